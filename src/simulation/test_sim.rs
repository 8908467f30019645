//! Reference simulator with known mean and optimal values.
//!
//! Action 0 is optimal: it pays U(0.5, 1.5) for the first `depth` steps of
//! an episode, while every other action (and every step past the structural
//! depth) pays U(-0.5, 0.5). Observations are uniform noise. The closed
//! forms below make it a convenient oracle for search and rollout tests.

use rand::rngs::StdRng;
use rand::Rng;

use crate::simulation::simulator::{Simulator, StepOutcome};

/// Step counter; the only state the domain carries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TestState {
    depth: usize,
}

/// The test domain.
#[derive(Clone, Debug)]
pub struct TestSimulator {
    actions: usize,
    observations: usize,
    depth: usize,
}

impl TestSimulator {
    #[must_use]
    pub const fn new(actions: usize, observations: usize, depth: usize) -> Self {
        Self {
            actions,
            observations,
            depth,
        }
    }

    /// Expected return of the uniform random policy.
    #[must_use]
    pub fn mean_value(&self) -> f64 {
        let mut total = 0.0;
        let mut discount = 1.0;
        for _ in 0..self.depth {
            total += discount / self.actions as f64;
            discount *= self.discount();
        }
        total
    }

    /// Expected return of always playing action 0.
    #[must_use]
    pub fn optimal_value(&self) -> f64 {
        let mut total = 0.0;
        let mut discount = 1.0;
        for _ in 0..self.depth {
            total += discount;
            discount *= self.discount();
        }
        total
    }
}

impl Simulator for TestSimulator {
    type State = TestState;

    fn num_actions(&self) -> usize {
        self.actions
    }

    fn num_observations(&self) -> usize {
        self.observations
    }

    fn discount(&self) -> f64 {
        1.0
    }

    fn reward_range(&self) -> f64 {
        2.0
    }

    fn create_start_state(&self, _rng: &mut StdRng) -> TestState {
        TestState::default()
    }

    fn step(&self, state: &mut TestState, action: usize, rng: &mut StdRng) -> StepOutcome {
        let reward = if state.depth < self.depth && action == 0 {
            rng.random_range(0.5..1.5)
        } else {
            rng.random_range(-0.5..0.5)
        };
        state.depth += 1;

        StepOutcome {
            observation: rng.random_range(0..self.observations),
            reward,
            terminal: false,
        }
    }

    fn abstraction(&self, _state: &TestState) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_closed_forms() {
        let sim = TestSimulator::new(4, 2, 3);
        assert!((sim.optimal_value() - 3.0).abs() < 1e-10);
        assert!((sim.mean_value() - 0.75).abs() < 1e-10);
    }

    #[test]
    fn test_optimal_action_pays_more() {
        let sim = TestSimulator::new(2, 2, 5);
        let mut rng = StdRng::seed_from_u64(1);

        let mut optimal = 0.0;
        let mut other = 0.0;
        for _ in 0..2000 {
            let mut state = sim.create_start_state(&mut rng);
            optimal += sim.step(&mut state, 0, &mut rng).reward;
            let mut state = sim.create_start_state(&mut rng);
            other += sim.step(&mut state, 1, &mut rng).reward;
        }

        assert!(optimal / 2000.0 > 0.9);
        assert!((other / 2000.0).abs() < 0.1);
    }

    #[test]
    fn test_rewards_flatten_past_depth() {
        let sim = TestSimulator::new(2, 2, 1);
        let mut rng = StdRng::seed_from_u64(2);

        let mut state = sim.create_start_state(&mut rng);
        sim.step(&mut state, 0, &mut rng);

        let mut total = 0.0;
        for _ in 0..2000 {
            let mut copy = state;
            total += sim.step(&mut copy, 0, &mut rng).reward;
        }
        assert!((total / 2000.0).abs() < 0.1);
    }
}
