//! Flat POMCP planner.
//!
//! Classic partially observable Monte Carlo planning: a tree of alternating
//! belief (V) and action (Q) nodes grown by simulation, UCB1 or Thompson
//! action selection, random rollouts at the frontier, and a particle filter
//! with local-move transforms to keep the root belief populated across real
//! steps.

use std::time::Instant;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::planning::beliefs::ParticleSet;
use crate::planning::history::History;
use crate::planning::node::{NodeId, Tree};
use crate::planning::params::SearchParams;
use crate::planning::statistic::UcbTable;
use crate::planning::thompson::NormalGamma;
use crate::planning::Planner;
use crate::simulation::simulator::{PlanningError, Simulator};

/// Synthetic visit count seeded on preferred actions at expansion.
const PREFERRED_PRIOR_COUNT: u64 = 10;
/// Synthetic value seeded on preferred actions at expansion.
const PREFERRED_PRIOR_VALUE: f64 = 1.0;

/// Flat Monte Carlo tree search over belief nodes.
pub struct FlatMcts<S: Simulator> {
    sim: S,
    params: SearchParams,
    ucb: UcbTable,
    history: History,
    tree: Tree<S::State>,
    root: NodeId,
    rng: StdRng,
    tree_depth: usize,
}

impl<S: Simulator> FlatMcts<S> {
    /// Builds the planner and seeds the root belief with start states.
    pub fn new(sim: S, params: SearchParams) -> Self {
        let mut planner = Self {
            ucb: UcbTable::new(params.exploration_constant),
            history: History::new(params.memory_size),
            tree: Tree::new(params.memory_size.is_some()),
            root: 0,
            rng: StdRng::seed_from_u64(params.seed),
            tree_depth: 0,
            sim,
            params,
        };

        let state = planner.sim.create_start_state(&mut planner.rng);
        planner.root = planner.expand_node(&state);
        planner.tree.node_mut(planner.root).beliefs.add(state);
        for _ in 1..planner.params.num_start_states {
            let sample = planner.sim.create_start_state(&mut planner.rng);
            planner.tree.node_mut(planner.root).beliefs.add(sample);
        }
        planner
    }

    /// Runs the search budget and commits to the greedy action at the root.
    pub fn select_action(&mut self) -> usize {
        self.search();

        if self.params.verbose >= 1 {
            let root = self.tree.node(self.root);
            debug!(
                "root value {:.3} over {} visits, {} nodes",
                root.value.mean(),
                root.value.count(),
                self.tree.len()
            );
        }

        self.action_selection(self.root, 0, true)
    }

    /// Mean return estimate at the root.
    #[must_use]
    pub fn root_value(&self) -> f64 {
        self.tree.node(self.root).value.mean()
    }

    /// Runs simulations until the count or wall-clock budget is exhausted.
    pub fn search(&mut self) {
        match self.params.time_out_per_action {
            Some(limit) => {
                let start = Instant::now();
                let mut simulations = 0usize;
                loop {
                    self.search_imp();
                    simulations += 1;
                    if start.elapsed().as_secs_f64() > limit {
                        break;
                    }
                }
                debug!("anytime search ran {simulations} simulations");
            }
            None => {
                for _ in 0..self.params.num_simulations {
                    self.search_imp();
                }
            }
        }
    }

    fn search_imp(&mut self) {
        let history_depth = self.history.size();

        let mut state = self.tree.node(self.root).beliefs.create_sample(&mut self.rng);
        self.sim.validate(&state);
        self.simulate_v(&mut state, self.root, 0);

        self.history.truncate(history_depth);
    }

    fn simulate_v(&mut self, state: &mut S::State, node: NodeId, depth: usize) -> f64 {
        let action = self.action_selection(node, depth, false);

        self.tree_depth = self.tree_depth.max(depth);
        if depth >= self.params.max_depth {
            return 0.0;
        }

        if depth >= 1 {
            let sample = state.clone();
            self.tree.node_mut(node).beliefs.add(sample);
        }

        let total = self.simulate_q(state, node, action, depth);

        if self.params.thompson_sampling {
            self.tree.node_mut(node).cumulative_reward(state).add(total);
        } else {
            self.tree.node_mut(node).value.add(total);
        }
        total
    }

    fn simulate_q(&mut self, state: &mut S::State, node: NodeId, action: usize, depth: usize) -> f64 {
        let outcome = self.sim.step(state, action, &mut self.rng);
        assert!(
            outcome.observation < self.sim.num_observations(),
            "observation out of range"
        );

        if self.params.thompson_sampling {
            self.tree
                .node_mut(node)
                .child_mut(action)
                .ts_update(outcome.observation, outcome.reward);
        }
        self.history.add(action, outcome.observation);

        let mut child = self.tree.node(node).child(action).child(outcome.observation);
        if child.is_none() {
            // Bounded-memory histories may collide with an existing node
            if let Some(memory) = self.params.memory_size {
                if self.history.size() >= memory {
                    if let Some(existing) = self.tree.lookup(self.history.belief_hash()) {
                        trace!("merging redundant node {existing}");
                        self.tree
                            .node_mut(node)
                            .child_mut(action)
                            .set_child(outcome.observation, existing);
                        child = Some(existing);
                    }
                }
            }
        }

        let mut delayed = 0.0;
        if outcome.terminal {
            let vnode = match child {
                Some(vnode) => vnode,
                None => {
                    let vnode = self.expand_node(state);
                    self.tree
                        .node_mut(node)
                        .child_mut(action)
                        .set_child(outcome.observation, vnode);
                    vnode
                }
            };
            if self.params.thompson_sampling {
                self.tree.node_mut(vnode).cumulative_reward(state).add(0.0);
            } else {
                self.tree.node_mut(vnode).value.add(0.0);
            }
        } else if let Some(vnode) = child {
            delayed = self.simulate_v(state, vnode, depth + 1);
        } else {
            let vnode = self.expand_node(state);
            self.tree
                .node_mut(node)
                .child_mut(action)
                .set_child(outcome.observation, vnode);

            let mut copy = state.clone();
            delayed = self.rollout(&mut copy, depth + 1);

            if self.params.thompson_sampling {
                self.tree.node_mut(vnode).cumulative_reward(state).add(delayed);
            } else {
                self.tree.node_mut(vnode).value.add(delayed);
            }
        }

        let total = outcome.reward + self.sim.discount() * delayed;
        if !self.params.thompson_sampling {
            self.tree.node_mut(node).child_mut(action).value.add(total);
        }
        total
    }

    /// Random-policy Monte Carlo continuation to the horizon.
    fn rollout(&mut self, state: &mut S::State, depth: usize) -> f64 {
        let mut total = 0.0;
        let mut discount = 1.0;
        let mut terminal = false;
        let mut steps = 0;

        while steps + depth < self.params.max_depth && !terminal {
            let action = self.sim.select_random(state, &self.history, &mut self.rng);
            let outcome = self.sim.step(state, action, &mut self.rng);
            self.history.add(action, outcome.observation);

            total += outcome.reward * discount;
            discount *= self.sim.discount();
            terminal = outcome.terminal;
            steps += 1;
        }

        trace!("rollout ended after {steps} steps with return {total}");
        total
    }

    fn action_selection(&mut self, node: NodeId, depth: usize, greedy: bool) -> usize {
        if self.params.thompson_sampling {
            self.thompson_selection(node, depth, !greedy)
        } else {
            self.greedy_ucb(node, !greedy)
        }
    }

    /// Argmax over Q (plus the UCB1 bonus while exploring).
    ///
    /// While exploring, actions are scanned in numerical order and the first
    /// untried applicable action is returned outright. Ties break uniformly
    /// at random.
    fn greedy_ucb(&mut self, node: NodeId, ucb: bool) -> usize {
        let vnode = self.tree.node(node);
        let total = vnode.value.count();

        let mut best: Vec<usize> = Vec::new();
        let mut best_q = f64::NEG_INFINITY;

        for action in 0..vnode.num_children() {
            let qnode = vnode.child(action);
            if !qnode.applicable() {
                continue;
            }

            let count = qnode.value.count();
            if ucb && count == 0 {
                return action;
            }

            let mut q = qnode.value.mean();
            if ucb {
                q += self.ucb.fast_ucb(total, count);
            }

            if q >= best_q {
                if q > best_q {
                    best.clear();
                }
                best_q = q;
                best.push(action);
            }
        }

        assert!(!best.is_empty(), "node with no applicable actions");
        best[self.rng.random_range(0..best.len())]
    }

    /// Posterior-sampling action selection.
    fn thompson_selection(&mut self, node: NodeId, depth: usize, sampling: bool) -> usize {
        let num_actions = self.sim.num_actions();

        let mut unexplored: Vec<usize> = Vec::new();
        for action in 0..num_actions {
            let qnode = self.tree.node(node).child(action);
            if qnode.applicable() && qnode.ts_updates() == 0 {
                unexplored.push(action);
            }
        }
        if !unexplored.is_empty() {
            return unexplored[self.rng.random_range(0..unexplored.len())];
        }

        let mut best = None;
        let mut best_q = f64::NEG_INFINITY;
        for action in 0..num_actions {
            if !self.tree.node(node).child(action).applicable() {
                continue;
            }
            let q = self.q_value(node, action, depth, sampling);
            if q > best_q {
                best_q = q;
                best = Some(action);
            }
        }

        best.expect("node with no applicable actions")
    }

    /// Q posterior: observation posterior marginalized over child H-values
    /// plus the immediate-reward posterior.
    fn q_value(&mut self, node: NodeId, action: usize, depth: usize, sampling: bool) -> f64 {
        let observations = self
            .tree
            .node(node)
            .child(action)
            .observations
            .distribution(&mut self.rng, sampling);

        let mut qvalue = 0.0;
        for (observation, probability) in observations {
            let child = self.tree.node(node).child(action).child(observation);
            qvalue += probability * self.h_value(child, depth, sampling);
        }
        qvalue *= self.sim.discount();

        qvalue
            + self
                .tree
                .node(node)
                .child(action)
                .reward
                .thompson_sample(&mut self.rng, sampling)
    }

    fn h_value(&mut self, node: Option<NodeId>, depth: usize, sampling: bool) -> f64 {
        if let Some(id) = node {
            self.tree.node(id).thompson_value(&mut self.rng, sampling)
        } else if depth + 1 >= self.params.max_depth {
            0.0
        } else {
            NormalGamma::new().thompson_sample(&mut self.rng, sampling)
        }
    }

    /// Allocates a node for the current history, applying the domain prior.
    fn expand_node(&mut self, state: &S::State) -> NodeId {
        let num_actions = self.sim.num_actions();
        let mut applicable = vec![false; num_actions];
        for action in self.sim.legal_actions(state) {
            applicable[action] = true;
        }

        let node = self.tree.expand(
            self.history.belief_hash(),
            num_actions,
            self.sim.num_observations(),
            &applicable,
        );

        for action in self.sim.preferred_actions(state, &self.history) {
            self.tree
                .node_mut(node)
                .child_mut(action)
                .value
                .set(PREFERRED_PRIOR_COUNT, PREFERRED_PRIOR_VALUE);
        }
        node
    }

    /// Advances the planner past a real step, replenishing and re-rooting
    /// the belief tree.
    pub fn update(
        &mut self,
        action: usize,
        observation: usize,
        state: &S::State,
    ) -> Result<(), PlanningError> {
        self.history.add(action, observation);

        if self.sim.flags().fully_observable {
            // Running an MDP: reseed directly from the real state
            self.tree.clear();
            self.root = self.expand_node(state);
            self.tree.node_mut(self.root).beliefs.add(state.clone());
            return Ok(());
        }

        let matched = self.tree.node(self.root).child(action).child(observation);

        let mut beliefs: ParticleSet<S::State> = ParticleSet::new();
        if let Some(vnode) = matched {
            debug!(
                "matched {} states at the real observation",
                self.tree.node(vnode).beliefs.num_samples()
            );
            for sample in self.tree.node(vnode).beliefs.iter() {
                beliefs.add(sample.clone());
            }
        } else {
            debug!("no matching node found");
        }

        if self.params.use_particle_filter {
            self.particle_filter(&mut beliefs);
        }
        if self.params.use_transforms {
            self.add_transforms(&mut beliefs);
        }

        let matched_empty = matched.map_or(true, |v| self.tree.node(v).beliefs.is_empty());
        if beliefs.is_empty() && matched_empty {
            return Err(PlanningError::ParticleDepletion);
        }

        // A state to initialise the prior of a fresh root
        let prior_sample = match matched {
            Some(vnode) if !self.tree.node(vnode).beliefs.is_empty() => {
                self.tree.node(vnode).beliefs.get_sample().cloned()
            }
            _ => beliefs.get_sample().cloned(),
        };

        if let (Some(vnode), true) = (matched, self.params.reuse_tree) {
            self.root = self.tree.prune_to(vnode);
            self.tree.node_mut(self.root).beliefs.clear();
        } else {
            self.tree.clear();
            let sample = prior_sample.expect("a surviving sample was checked above");
            self.root = self.expand_node(&sample);
        }

        self.tree.node_mut(self.root).beliefs = beliefs;
        Ok(())
    }

    /// Rejection sampling: step root particles under the real action and
    /// keep the ones that reproduce the real observation.
    fn particle_filter(&mut self, beliefs: &mut ParticleSet<S::State>) {
        let entry = self.history.back().expect("update recorded a step");
        let target = self.params.num_start_states;
        let max_attempts = target.saturating_sub(beliefs.num_samples()) * 10;

        let mut attempts = 0;
        let mut added = 0;
        while beliefs.num_samples() < target && attempts < max_attempts {
            let mut state = self.tree.node(self.root).beliefs.create_sample(&mut self.rng);
            let outcome = self.sim.step(&mut state, entry.action, &mut self.rng);
            if self.params.thompson_sampling {
                self.tree
                    .node_mut(self.root)
                    .child_mut(entry.action)
                    .ts_update(outcome.observation, outcome.reward);
            }

            if outcome.observation == entry.observation {
                beliefs.add(state);
                added += 1;
            }
            attempts += 1;
        }

        debug!("particle filter kept {added} of {attempts} resimulated particles");
    }

    /// History-consistent local perturbations of root particles.
    fn add_transforms(&mut self, beliefs: &mut ParticleSet<S::State>) {
        let mut attempts = 0;
        let mut added = 0;
        while added < self.params.num_transforms && attempts < self.params.max_attempts {
            if let Some(transform) = self.create_transform() {
                beliefs.add(transform);
                added += 1;
            }
            attempts += 1;
        }

        debug!("created {added} transforms out of {attempts} attempts");
    }

    fn create_transform(&mut self) -> Option<S::State> {
        let entry = self.history.back().expect("update recorded a step");

        let mut state = self.tree.node(self.root).beliefs.create_sample(&mut self.rng);
        let outcome = self.sim.step(&mut state, entry.action, &mut self.rng);
        if self.params.thompson_sampling {
            self.tree
                .node_mut(self.root)
                .child_mut(entry.action)
                .ts_update(outcome.observation, outcome.reward);
        }

        if self
            .sim
            .local_move(&mut state, &self.history, outcome.observation, &mut self.rng)
        {
            Some(state)
        } else {
            None
        }
    }
}

impl<S: Simulator> Planner<S> for FlatMcts<S> {
    fn select_action(&mut self) -> usize {
        FlatMcts::select_action(self)
    }

    fn update(&mut self, action: usize, observation: usize, state: &S::State)
        -> Result<(), PlanningError> {
        FlatMcts::update(self, action, observation, state)
    }

    fn tree_size(&self) -> usize {
        self.tree.len()
    }

    fn tree_depth(&self) -> usize {
        self.tree_depth
    }

    fn root_samples(&self) -> Vec<S::State> {
        self.tree.node(self.root).beliefs.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::test_sim::TestSimulator;

    fn planner(actions: usize, observations: usize, depth: usize) -> FlatMcts<TestSimulator> {
        let params = SearchParams {
            num_start_states: 10,
            seed: 1,
            ..SearchParams::default()
        };
        FlatMcts::new(TestSimulator::new(actions, observations, depth), params)
    }

    fn fresh_node(planner: &mut FlatMcts<TestSimulator>) -> NodeId {
        let state = planner.sim.create_start_state(&mut planner.rng);
        planner.expand_node(&state)
    }

    #[test]
    fn test_greedy_without_bonus_prefers_value() {
        let mut mcts = planner(5, 5, 0);
        let node = fresh_node(&mut mcts);

        mcts.tree.node_mut(node).value.set(1, 0.0);
        mcts.tree.node_mut(node).child_mut(0).value.set(1, 1.0);
        for action in 1..5 {
            mcts.tree.node_mut(node).child_mut(action).value.set(0, 0.0);
        }

        assert_eq!(mcts.greedy_ucb(node, false), 0);
    }

    #[test]
    fn test_ucb_lowest_count_wins_at_equal_value() {
        let mut mcts = planner(5, 5, 0);
        let node = fresh_node(&mut mcts);

        mcts.tree.node_mut(node).value.set(1, 0.0);
        for action in 0..5 {
            let count = if action == 3 { 99 } else { 100 + action as u64 };
            mcts.tree.node_mut(node).child_mut(action).value.set(count, 0.0);
        }

        assert_eq!(mcts.greedy_ucb(node, true), 3);
    }

    #[test]
    fn test_ucb_highest_value_wins_at_high_counts() {
        let mut mcts = planner(5, 5, 0);
        let node = fresh_node(&mut mcts);

        mcts.tree.node_mut(node).value.set(1, 0.0);
        for action in 0..5 {
            if action == 3 {
                mcts.tree.node_mut(node).child_mut(action).value.set(104, 1.0);
            } else {
                mcts.tree.node_mut(node).child_mut(action).value.set(105 - action as u64, 0.0);
            }
        }

        assert_eq!(mcts.greedy_ucb(node, true), 3);
    }

    #[test]
    fn test_ucb_low_count_beats_high_counts() {
        let mut mcts = planner(5, 5, 0);
        let node = fresh_node(&mut mcts);

        mcts.tree.node_mut(node).value.set(1, 0.0);
        for action in 0..5 {
            if action == 3 {
                mcts.tree.node_mut(node).child_mut(action).value.set(1, 1.0);
            } else {
                mcts.tree.node_mut(node).child_mut(action).value.set(100 + action as u64, 1.0);
            }
        }

        assert_eq!(mcts.greedy_ucb(node, true), 3);
    }

    #[test]
    fn test_ucb_zero_count_always_selected() {
        let mut mcts = planner(5, 5, 0);
        let node = fresh_node(&mut mcts);

        mcts.tree.node_mut(node).value.set(1, 0.0);
        for action in 0..5 {
            if action == 3 {
                mcts.tree.node_mut(node).child_mut(action).value.set(0, 0.0);
            } else {
                mcts.tree.node_mut(node).child_mut(action).value.set(1, 1.0);
            }
        }

        assert_eq!(mcts.greedy_ucb(node, true), 3);
    }

    #[test]
    fn test_rollout_matches_simulator_mean() {
        let params = SearchParams {
            max_depth: 10,
            num_simulations: 1000,
            num_start_states: 10,
            seed: 3,
            ..SearchParams::default()
        };
        let mut mcts = FlatMcts::new(TestSimulator::new(2, 2, 0), params);

        let mut total = 0.0;
        for _ in 0..1000 {
            let mut state = mcts.sim.create_start_state(&mut mcts.rng);
            let depth = mcts.history.size();
            total += mcts.rollout(&mut state, 0);
            mcts.history.truncate(depth);
        }
        let mean = total / 1000.0;

        assert!((mean - mcts.sim.mean_value()).abs() < 0.1);
    }

    #[test]
    fn test_search_converges_to_optimal() {
        for depth in 1..=3usize {
            let params = SearchParams {
                max_depth: depth + 1,
                num_simulations: 10usize.pow(depth as u32 + 1),
                num_start_states: 10,
                seed: 5,
                ..SearchParams::default()
            };
            let mut mcts = FlatMcts::new(TestSimulator::new(3, 2, depth), params);
            mcts.search();

            let optimal = mcts.sim.optimal_value();
            assert!(
                (mcts.root_value() - optimal).abs() < 0.1,
                "depth {depth}: root value {} vs optimal {optimal}",
                mcts.root_value()
            );
        }
    }

    #[test]
    fn test_root_count_matches_child_counts() {
        let params = SearchParams {
            max_depth: 5,
            num_simulations: 200,
            num_start_states: 10,
            seed: 9,
            ..SearchParams::default()
        };
        let mut mcts = FlatMcts::new(TestSimulator::new(3, 2, 2), params);
        mcts.search();

        let root = mcts.tree.node(mcts.root);
        let child_total: u64 = (0..root.num_children())
            .map(|action| root.child(action).value.count())
            .sum();
        assert_eq!(root.value.count(), child_total);
    }

    #[test]
    fn test_update_with_particle_filter_keeps_belief() {
        let params = SearchParams {
            max_depth: 10,
            num_simulations: 200,
            num_start_states: 50,
            use_particle_filter: true,
            seed: 11,
            ..SearchParams::default()
        };
        let sim = TestSimulator::new(2, 2, 3);
        let mut mcts = FlatMcts::new(sim.clone(), params);

        let mut rng = StdRng::seed_from_u64(99);
        let mut state = sim.create_start_state(&mut rng);

        let action = mcts.select_action();
        let outcome = sim.step(&mut state, action, &mut rng);
        mcts.update(action, outcome.observation, &state).unwrap();

        assert!(!mcts.tree.node(mcts.root).beliefs.is_empty());
    }

    #[test]
    fn test_update_reuse_tree_promotes_matched_child() {
        let params = SearchParams {
            max_depth: 10,
            num_simulations: 500,
            num_start_states: 50,
            reuse_tree: true,
            seed: 13,
            ..SearchParams::default()
        };
        let sim = TestSimulator::new(2, 2, 3);
        let mut mcts = FlatMcts::new(sim.clone(), params);
        mcts.search();

        let action = 0;
        let (observation, matched) = (0..2)
            .find_map(|o| mcts.tree.node(mcts.root).child(action).child(o).map(|id| (o, id)))
            .expect("search expanded at least one observation child");
        let matched_hash = mcts.tree.node(matched).belief_hash();

        let mut rng = StdRng::seed_from_u64(7);
        let state = sim.create_start_state(&mut rng);
        mcts.update(action, observation, &state).unwrap();

        assert_eq!(mcts.tree.node(mcts.root).belief_hash(), matched_hash);
    }

    #[test]
    fn test_thompson_selection_prefers_unexplored() {
        let params = SearchParams {
            thompson_sampling: true,
            num_start_states: 10,
            seed: 17,
            ..SearchParams::default()
        };
        let mut mcts = FlatMcts::new(TestSimulator::new(4, 2, 1), params);
        let node = fresh_node(&mut mcts);

        for action in [0, 1, 3] {
            mcts.tree.node_mut(node).child_mut(action).ts_update(0, 0.5);
        }

        assert_eq!(mcts.thompson_selection(node, 0, true), 2);
    }
}
