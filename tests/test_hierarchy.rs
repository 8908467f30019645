//! Tests for the hierarchical planner on the rooms domain.

use hplanning::planning::{HierarchicalMcts, Planner, SearchParams, Task, TaskGraph};
use hplanning::simulation::experiment::{run_episode, Results};
use hplanning::simulation::{Rooms, Simulator};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn params(num_simulations: usize, seed: u64) -> SearchParams {
    SearchParams {
        max_depth: 60,
        num_simulations,
        num_start_states: 1,
        hplanning: true,
        action_abstraction: true,
        root_goal: 0,
        seed,
        ..SearchParams::default()
    }
}

#[test]
fn test_warmup_applicability_is_symmetric() {
    let rooms = Rooms::four_rooms(0.2);
    let planner = HierarchicalMcts::new(rooms.clone(), params(100, 1)).unwrap();
    let graph = planner.task_graph();

    for o1 in 0..rooms.num_observations() {
        for o2 in 0..rooms.num_observations() {
            assert_eq!(
                graph.applicable(Some(o1), TaskGraph::macro_action(o2)),
                graph.applicable(Some(o2), TaskGraph::macro_action(o1)),
                "asymmetric applicability between regions {o1} and {o2}"
            );
        }
    }
}

#[test]
fn test_warmup_discovers_adjacent_rooms() {
    let rooms = Rooms::four_rooms(0.2);
    let planner = HierarchicalMcts::new(rooms, params(100, 2)).unwrap();
    let graph = planner.task_graph();

    // Rooms 1 and 0 share a door; so do 2 and 3
    assert!(graph.applicable(Some(1), TaskGraph::macro_action(0)));
    assert!(graph.applicable(Some(2), TaskGraph::macro_action(3)));
    // Primitives are applicable everywhere
    assert!(graph.applicable(Some(0), Task::Primitive(2)));
}

#[test]
fn test_same_seed_same_trajectory() {
    let rooms = Rooms::two_rooms(0.0);

    let mut trajectories = Vec::new();
    for _ in 0..2 {
        let mut planner = HierarchicalMcts::new(rooms.clone(), params(150, 9)).unwrap();
        let mut rng = StdRng::seed_from_u64(77);
        let mut state = rooms.create_start_state(&mut rng);

        let mut actions = Vec::new();
        for _ in 0..20 {
            let action = planner.select_action();
            actions.push(action);
            let outcome = rooms.step(&mut state, action, &mut rng);
            if outcome.terminal {
                break;
            }
            Planner::update(&mut planner, action, outcome.observation, &state).unwrap();
        }
        trajectories.push(actions);
    }

    assert_eq!(trajectories[0], trajectories[1]);
}

#[test]
fn test_reaches_goal_on_small_map() {
    let rooms = Rooms::two_rooms(0.0);
    let mut planner = HierarchicalMcts::new(rooms.clone(), params(300, 13)).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let mut results = Results::default();

    let outcome = run_episode(&rooms, &mut planner, 300, &mut rng, &mut results);

    assert!(outcome.terminated, "goal not reached in {} steps", outcome.steps);
    assert!(!outcome.out_of_particles);
    assert!(planner.tree_size() > 0);
}

#[test]
fn test_caching_planner_completes_episodes() {
    let rooms = Rooms::two_rooms(0.0);
    let cached = SearchParams {
        converged: 40,
        cache_rate: 0.5,
        ..params(300, 17)
    };
    let mut planner = HierarchicalMcts::new(rooms.clone(), cached).unwrap();
    let mut rng = StdRng::seed_from_u64(17);
    let mut results = Results::default();

    let outcome = run_episode(&rooms, &mut planner, 300, &mut rng, &mut results);
    assert!(outcome.terminated, "goal not reached in {} steps", outcome.steps);
}

#[test]
fn test_planner_without_abstraction_still_plans() {
    let rooms = Rooms::two_rooms(0.0);
    let flat_hierarchy = SearchParams {
        action_abstraction: false,
        ..params(200, 23)
    };
    let mut planner = HierarchicalMcts::new(rooms.clone(), flat_hierarchy).unwrap();

    let action = planner.select_action();
    assert!(action < rooms.num_actions());
}
