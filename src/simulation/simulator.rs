//! Abstract transition oracle consumed by the planners.
//!
//! A domain supplies start states, a step function, an abstraction function
//! mapping ground states to coarse regions, and a handful of optional
//! knowledge hooks. The planners own every state they hold; transfer is by
//! clone and drop.

use std::hash::Hash;

use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use crate::planning::history::History;

/// Recoverable planner failures.
#[derive(Debug, Error)]
pub enum PlanningError {
    /// No belief sample survived a real-step update (flat planning).
    #[error("belief state ran out of particles after update")]
    ParticleDepletion,
    /// The requested configuration cannot be planned for.
    #[error("invalid planner configuration: {0}")]
    Config(String),
}

/// Static behavior switches of a domain.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatorFlags {
    /// Macro-actions over abstract observations are meaningful.
    pub action_abstraction: bool,
    /// Belief fingerprints should track the whole history rather than a
    /// memory-1 abstraction.
    pub state_abstraction: bool,
    /// Observations reveal the ground state; beliefs can be reseeded from
    /// the real state after each step.
    pub fully_observable: bool,
    /// The domain is intended for hierarchical planning.
    pub hierarchical_planning: bool,
}

/// One simulated transition.
#[derive(Clone, Copy, Debug)]
pub struct StepOutcome {
    pub observation: usize,
    pub reward: f64,
    pub terminal: bool,
}

/// Generative model of the decision problem.
pub trait Simulator {
    /// Domain state; hashing must be stable so states can key belief pools.
    type State: Clone + Hash;

    fn num_actions(&self) -> usize;

    fn num_observations(&self) -> usize;

    /// Discount factor in (0, 1].
    fn discount(&self) -> f64;

    /// Spread between the best and worst one-step rewards.
    fn reward_range(&self) -> f64;

    fn flags(&self) -> SimulatorFlags {
        SimulatorFlags::default()
    }

    /// Samples an initial state (may be stochastic).
    fn create_start_state(&self, rng: &mut StdRng) -> Self::State;

    /// Advances `state` under `action`, yielding an observation in
    /// `[0, num_observations)`, a reward, and episode termination.
    fn step(&self, state: &mut Self::State, action: usize, rng: &mut StdRng) -> StepOutcome;

    /// Abstract observation (region id) of a ground state.
    fn abstraction(&self, state: &Self::State) -> usize;

    /// Sanity check; implementations should panic on contract breaches.
    fn validate(&self, _state: &Self::State) {}

    /// Perturbs `state` to a nearby state consistent with the history.
    ///
    /// Returns false when no consistent perturbation exists.
    fn local_move(
        &self,
        _state: &mut Self::State,
        _history: &History,
        _step_observation: usize,
        _rng: &mut StdRng,
    ) -> bool {
        false
    }

    /// Actions legal in `state`; everything else is masked out of
    /// selection.
    fn legal_actions(&self, _state: &Self::State) -> Vec<usize> {
        (0..self.num_actions()).collect()
    }

    /// Actions worth seeding with an optimistic prior on expansion.
    fn preferred_actions(&self, _state: &Self::State, _history: &History) -> Vec<usize> {
        Vec::new()
    }

    /// Rollout policy; defaults to uniform over the legal actions.
    fn select_random(&self, state: &Self::State, _history: &History, rng: &mut StdRng) -> usize {
        let legal = self.legal_actions(state);
        assert!(!legal.is_empty(), "state with no legal actions");
        legal[rng.random_range(0..legal.len())]
    }

    /// Planning horizon that bounds the discounted return error by
    /// `accuracy`.
    fn horizon(&self, accuracy: f64, undiscounted_horizon: usize) -> usize {
        let discount = self.discount();
        if discount >= 1.0 {
            undiscounted_horizon
        } else {
            (accuracy.ln() / discount.ln()).ceil() as usize
        }
    }
}
