//! Episode driver: runs a planner against the real domain and aggregates
//! results across runs.

use std::time::Instant;

use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::planning::statistic::Statistic;
use crate::planning::Planner;
use crate::simulation::simulator::{PlanningError, Simulator};

/// Aggregated statistics over episodes.
#[derive(Clone, Debug, Default)]
pub struct Results {
    pub reward: Statistic,
    pub undiscounted_return: Statistic,
    pub discounted_return: Statistic,
    pub time_per_action: Statistic,
    pub explored_nodes: Statistic,
    pub explored_depth: Statistic,
}

impl Results {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Outcome of a single episode.
#[derive(Clone, Copy, Debug)]
pub struct EpisodeOutcome {
    pub discounted_return: f64,
    pub undiscounted_return: f64,
    pub steps: usize,
    pub terminated: bool,
    pub out_of_particles: bool,
}

/// Runs one episode of at most `num_steps` real steps.
///
/// On particle depletion the episode is finished with a uniform random
/// policy, as the planner can no longer track the belief.
pub fn run_episode<S, P>(
    real: &S,
    planner: &mut P,
    num_steps: usize,
    rng: &mut StdRng,
    results: &mut Results,
) -> EpisodeOutcome
where
    S: Simulator,
    P: Planner<S>,
{
    let mut state = real.create_start_state(rng);

    let mut undiscounted = 0.0;
    let mut discounted = 0.0;
    let mut discount = 1.0;
    let mut terminated = false;
    let mut out_of_particles = false;
    let mut steps = 0;

    while steps < num_steps {
        let clock = Instant::now();
        let action = planner.select_action();
        results.time_per_action.add(clock.elapsed().as_secs_f64());

        let outcome = real.step(&mut state, action, rng);
        steps += 1;

        results.reward.add(outcome.reward);
        undiscounted += outcome.reward;
        discounted += outcome.reward * discount;
        discount *= real.discount();

        results.explored_nodes.add(planner.tree_size() as f64);
        results.explored_depth.add(planner.tree_depth() as f64);
        debug!(
            "step {steps}: action {action}, observation {}, reward {}",
            outcome.observation, outcome.reward
        );

        if outcome.terminal {
            terminated = true;
            break;
        }

        match planner.update(action, outcome.observation, &state) {
            Ok(()) => {}
            Err(PlanningError::ParticleDepletion) => {
                out_of_particles = true;
                break;
            }
            Err(err) => panic!("planner update failed: {err}"),
        }
    }

    if out_of_particles {
        // The belief is lost; finish the episode blindly
        warn!("out of particles; finishing the episode with a random policy");
        while steps < num_steps {
            let action = rng.random_range(0..real.num_actions());
            let outcome = real.step(&mut state, action, rng);
            steps += 1;

            results.reward.add(outcome.reward);
            undiscounted += outcome.reward;
            discounted += outcome.reward * discount;
            discount *= real.discount();

            if outcome.terminal {
                terminated = true;
                break;
            }
        }
    }

    results.undiscounted_return.add(undiscounted);
    results.discounted_return.add(discounted);

    EpisodeOutcome {
        discounted_return: discounted,
        undiscounted_return: undiscounted,
        steps,
        terminated,
        out_of_particles,
    }
}

/// Runs `num_runs` episodes, building a fresh planner per run.
pub fn multi_run<S, P, F>(
    real: &S,
    num_runs: usize,
    num_steps: usize,
    seed: u64,
    mut make_planner: F,
) -> Results
where
    S: Simulator,
    P: Planner<S>,
    F: FnMut(u64) -> P,
{
    let mut results = Results::default();

    for run in 0..num_runs {
        let run_seed = seed.wrapping_add(run as u64);
        let mut rng = StdRng::seed_from_u64(run_seed ^ 0x5e_ed);
        let mut planner = make_planner(run_seed);

        let outcome = run_episode(real, &mut planner, num_steps, &mut rng, &mut results);
        info!(
            "run {}/{num_runs}: return {:.2} in {} steps (terminated: {})",
            run + 1,
            outcome.discounted_return,
            outcome.steps,
            outcome.terminated
        );
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::{FlatMcts, SearchParams};
    use crate::simulation::test_sim::TestSimulator;

    #[test]
    fn test_episode_runs_to_step_cap() {
        let sim = TestSimulator::new(2, 2, 3);
        let params = SearchParams {
            max_depth: 5,
            num_simulations: 50,
            num_start_states: 10,
            use_particle_filter: true,
            seed: 1,
            ..SearchParams::default()
        };
        let mut planner = FlatMcts::new(sim.clone(), params);
        let mut rng = StdRng::seed_from_u64(2);
        let mut results = Results::default();

        let outcome = run_episode(&sim, &mut planner, 6, &mut rng, &mut results);

        // The test domain never terminates on its own
        assert!(!outcome.terminated);
        assert!(outcome.steps <= 6);
        assert_eq!(
            results.reward.count(),
            outcome.steps as u64,
            "one reward sample per step"
        );
        assert!(results.time_per_action.count() > 0);
    }

    #[test]
    fn test_multi_run_aggregates() {
        let sim = TestSimulator::new(2, 2, 2);
        let results = multi_run(&sim, 3, 4, 7, |seed| {
            let params = SearchParams {
                max_depth: 4,
                num_simulations: 30,
                num_start_states: 10,
                use_particle_filter: true,
                seed,
                ..SearchParams::default()
            };
            FlatMcts::new(sim.clone(), params)
        });

        assert_eq!(results.discounted_return.count(), 3);
        assert!(results.explored_nodes.count() > 0);
    }
}
