//! Hierarchical Monte Carlo tree search over a task graph.
//!
//! Simulations descend the task hierarchy instead of a flat tree: each
//! subtask keeps value statistics per belief context, recursion composes a
//! subtask's return with the completion of its parent, and once a subtask's
//! greedy choice has converged its observed exits can be replayed from a
//! cache instead of being resimulated.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, trace};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::planning::beliefs::{ParticleSet, WeightedParticles};
use crate::planning::history::{hash_combine, History};
use crate::planning::params::SearchParams;
use crate::planning::statistic::{Statistic, UcbTable};
use crate::planning::task_graph::{Task, TaskGraph};
use crate::planning::Planner;
use crate::simulation::simulator::{PlanningError, Simulator};

/// Random trajectories sampled to learn applicability before planning.
const WARMUP_TRAJECTORIES: usize = 1000;
/// Step cap per warmup trajectory.
const WARMUP_MAX_STEPS: usize = 1000;

/// Belief context a subtask is invoked under.
#[derive(Clone, Copy, Debug)]
struct SubtaskInput {
    belief_hash: u64,
    last_observation: Option<usize>,
}

/// Outcome of running a subtask to completion.
///
/// The reward is discounted in the subtask's own frame; `steps` counts the
/// primitive steps elapsed.
#[derive(Clone, Copy, Debug)]
pub struct SubtaskResult {
    pub reward: f64,
    pub steps: usize,
    pub terminal: bool,
    pub belief_hash: u64,
    pub last_observation: Option<usize>,
}

impl SubtaskResult {
    const fn empty(input: SubtaskInput) -> Self {
        Self {
            reward: 0.0,
            steps: 0,
            terminal: false,
            belief_hash: input.belief_hash,
            last_observation: input.last_observation,
        }
    }
}

/// Per-(subtask, belief context) statistics.
#[derive(Clone, Debug, Default)]
struct SubtaskData {
    value: Statistic,
    qvalues: HashMap<Task, Statistic>,
    cache: Vec<SubtaskResult>,
}

/// Hierarchical planner.
pub struct HierarchicalMcts<S: Simulator> {
    sim: S,
    params: SearchParams,
    ucb: UcbTable,
    history: History,
    graph: TaskGraph,
    table: HashMap<Task, HashMap<u64, SubtaskData>>,
    root_sampling: ParticleSet<S::State>,
    exit_pool: HashMap<u64, WeightedParticles<S::State>>,
    converged_bound: f64,
    rng: StdRng,
    tree_size: usize,
    tree_depth: usize,
}

impl<S: Simulator> HierarchicalMcts<S> {
    /// Builds the planner: task graph, initial belief, applicability warmup
    /// and the convergence threshold.
    ///
    /// # Errors
    ///
    /// Returns [`PlanningError::Config`] when action abstraction is
    /// requested over an empty observation space.
    pub fn new(sim: S, params: SearchParams) -> Result<Self, PlanningError> {
        let graph = TaskGraph::new(
            sim.num_actions(),
            sim.num_observations(),
            params.action_abstraction,
            params.root_goal,
        )?;

        let ucb = UcbTable::new(params.exploration_constant);
        let budget = params.num_simulations as u64;
        let converged_bound =
            1.1f64.powi(params.converged as i32) * 2.0 * ucb.fast_ucb(budget, budget);

        let mut planner = Self {
            ucb,
            history: History::new(None),
            graph,
            table: HashMap::new(),
            root_sampling: ParticleSet::new(),
            exit_pool: HashMap::new(),
            converged_bound,
            rng: StdRng::seed_from_u64(params.seed),
            tree_size: 0,
            tree_depth: 0,
            sim,
            params,
        };

        for _ in 0..planner.params.num_start_states {
            let state = planner.sim.create_start_state(&mut planner.rng);
            planner.root_sampling.add(state);
        }

        if planner.params.action_abstraction {
            planner.learn_applicability();
        }
        debug!("converged bound {}", planner.converged_bound);

        Ok(planner)
    }

    /// Populates the applicability relation from random exploration.
    ///
    /// Runs on sampled start states only; the subtask tables are untouched.
    fn learn_applicability(&mut self) {
        let num_actions = self.sim.num_actions();

        for _ in 0..WARMUP_TRAJECTORIES {
            let mut history = History::new(None);
            let mut state = self.root_sampling.create_sample(&mut self.rng);
            self.sim.validate(&state);

            for _ in 0..WARMUP_MAX_STEPS {
                let action = self.rng.random_range(0..num_actions);
                let outcome = self.sim.step(&mut state, action, &mut self.rng);
                self.graph
                    .update_connection(history.last_observation(), outcome.observation);
                history.add(action, outcome.observation);
                if outcome.terminal {
                    break;
                }
            }
        }
    }

    /// Runs the search budget and descends the hierarchy greedily to a
    /// primitive action.
    pub fn select_action(&mut self) -> usize {
        self.search();
        self.select_primitive_action(Task::Root)
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

        let mut state = self.root_sampling.create_sample(&mut self.rng);
        self.sim.validate(&state);

        if self.graph.terminate(Task::Root, self.history.last_observation()) {
            // The episode already reached this region; it is no longer a
            // valid abstract target anywhere in the hierarchy.
            let reached = self.history.back().expect("root terminates only after a step");
            trace!("erasing observation {} from the task graph", reached.observation);
            self.graph.erase_goal(reached.observation);
        }

        let input = SubtaskInput {
            belief_hash: self.history.belief_hash(),
            last_observation: self.history.last_observation(),
        };
        self.search_tree(Task::Root, input, &mut state, 0);

        self.history.truncate(history_depth);
    }

    /// One nested-search descent through subtask `task`.
    ///
    /// Mutates `state` to the subtask's exit state; on a cache hit the state
    /// is replaced by a pooled exit sample instead.
    fn search_tree(
        &mut self,
        task: Task,
        input: SubtaskInput,
        state: &mut S::State,
        depth: usize,
    ) -> SubtaskResult {
        self.tree_depth = self.tree_depth.max(depth);

        if let Task::Primitive(_) = task {
            return self.rollout(task, input, state, depth);
        }

        if depth >= self.params.max_depth || self.graph.terminate(task, input.last_observation) {
            return SubtaskResult::empty(input);
        }

        let exists = self
            .table
            .get(&task)
            .is_some_and(|entries| entries.contains_key(&input.belief_hash));
        if !exists {
            self.tree_size += 1;
            self.table
                .entry(task)
                .or_default()
                .insert(input.belief_hash, SubtaskData::default());
            return self.rollout(task, input, state, depth);
        }

        let mut converged = false;
        if self.params.action_abstraction && self.params.converged > 0 {
            let data = &self.table[&task][&input.belief_hash];
            let greedy = Self::greedy_child(
                &self.graph,
                &self.ucb,
                data,
                task,
                input.last_observation,
                false,
                &mut self.rng,
            );
            let tried = data.qvalues.get(&greedy).map_or(0, Statistic::count);
            let bound_range = 2.0 * self.ucb.fast_ucb(data.value.count(), tried);

            if bound_range <= self.converged_bound {
                converged = true;

                if !data.cache.is_empty() && self.rng.random_bool(self.params.cache_rate) {
                    let cached = data.cache[self.rng.random_range(0..data.cache.len())];
                    // Substitute a plausible exit state for the current one
                    let pool = self
                        .exit_pool
                        .get(&cached.belief_hash)
                        .expect("cached exits always pool a terminal state");
                    *state = pool
                        .sample(&mut self.rng)
                        .expect("exit pool entries are non-empty")
                        .clone();
                    trace!("cache hit on {task:?} at depth {depth}");
                    return cached;
                }
            }
        }

        let child = {
            let data = &self.table[&task][&input.belief_hash];
            Self::greedy_child(
                &self.graph,
                &self.ucb,
                data,
                task,
                input.last_observation,
                true,
                &mut self.rng,
            )
        };

        let subtask = self.search_tree(child, input, state, depth);
        let steps = subtask.steps;

        let mut completion = SubtaskResult::empty(SubtaskInput {
            belief_hash: subtask.belief_hash,
            last_observation: subtask.last_observation,
        });
        if !subtask.terminal {
            let continuation = SubtaskInput {
                belief_hash: subtask.belief_hash,
                last_observation: subtask.last_observation,
            };
            completion = self.search_tree(task, continuation, state, depth + steps);
        }

        let total = subtask.reward + self.sim.discount().powi(steps as i32) * completion.reward;

        let data = self
            .table
            .get_mut(&task)
            .and_then(|entries| entries.get_mut(&input.belief_hash))
            .expect("entry created before recursion");
        data.value.add(total);
        data.qvalues.entry(child).or_default().add(total);

        let ret = SubtaskResult {
            reward: total,
            steps: steps + completion.steps,
            terminal: subtask.terminal || completion.terminal,
            belief_hash: completion.belief_hash,
            last_observation: completion.last_observation,
        };

        if converged && (ret.terminal || self.graph.terminate(task, ret.last_observation)) {
            // A true exit: remember it and pool the state it ended in
            let data = self
                .table
                .get_mut(&task)
                .and_then(|entries| entries.get_mut(&input.belief_hash))
                .expect("entry created before recursion");
            data.cache.push(ret);
            self.exit_pool
                .entry(completion.belief_hash)
                .or_default()
                .add(state.clone());
        }

        ret
    }

    /// Pure Monte Carlo continuation over the hierarchy; no statistics are
    /// backed up.
    fn rollout(
        &mut self,
        task: Task,
        input: SubtaskInput,
        state: &mut S::State,
        depth: usize,
    ) -> SubtaskResult {
        if let Task::Primitive(action) = task {
            let outcome = self.sim.step(state, action, &mut self.rng);
            self.graph
                .update_connection(input.last_observation, outcome.observation);

            let belief_hash = if self.sim.flags().state_abstraction {
                // Whole-history fingerprint
                hash_combine(
                    hash_combine(input.belief_hash, action as u64),
                    outcome.observation as u64,
                )
            } else {
                // Memory-1 fingerprint: observation and depth only
                hash_combine(hash_combine(0, outcome.observation as u64), depth as u64)
            };

            return SubtaskResult {
                reward: outcome.reward,
                steps: 1,
                terminal: outcome.terminal,
                belief_hash,
                last_observation: Some(outcome.observation),
            };
        }

        if depth >= self.params.max_depth || self.graph.terminate(task, input.last_observation) {
            return SubtaskResult::empty(input);
        }

        let child = self.random_child(task, input.last_observation);
        let subtask = self.rollout(child, input, state, depth);
        let steps = subtask.steps;

        let mut completion = SubtaskResult::empty(SubtaskInput {
            belief_hash: subtask.belief_hash,
            last_observation: subtask.last_observation,
        });
        if !subtask.terminal {
            let continuation = SubtaskInput {
                belief_hash: subtask.belief_hash,
                last_observation: subtask.last_observation,
            };
            completion = self.rollout(task, continuation, state, depth + steps);
        }

        let total = subtask.reward + self.sim.discount().powi(steps as i32) * completion.reward;
        SubtaskResult {
            reward: total,
            steps: steps + completion.steps,
            terminal: subtask.terminal || completion.terminal,
            belief_hash: completion.belief_hash,
            last_observation: completion.last_observation,
        }
    }

    /// Uniform draw over the applicable, non-terminating children.
    fn random_child(&mut self, task: Task, last_observation: Option<usize>) -> Task {
        let children = self.graph.children(task);
        loop {
            let child = children[self.rng.random_range(0..children.len())];
            if !self.graph.terminate(child, last_observation)
                && self.graph.applicable(last_observation, child)
            {
                return child;
            }
        }
    }

    /// Argmax over subtask Q-values (plus the UCB1 bonus while exploring).
    ///
    /// Terminating and non-applicable children are skipped; an untried child
    /// is returned outright; ties break uniformly at random.
    fn greedy_child(
        graph: &TaskGraph,
        ucb: &UcbTable,
        data: &SubtaskData,
        task: Task,
        last_observation: Option<usize>,
        use_ucb: bool,
        rng: &mut StdRng,
    ) -> Task {
        let total = data.value.count();

        let mut best: Vec<Task> = Vec::new();
        let mut best_q = f64::NEG_INFINITY;

        for &child in graph.children(task) {
            if graph.terminate(child, last_observation) || !graph.applicable(last_observation, child)
            {
                continue;
            }

            let (tried, mut q) = data
                .qvalues
                .get(&child)
                .map_or((0, 0.0), |stat| (stat.count(), stat.mean()));
            if tried == 0 {
                return child;
            }

            if use_ucb {
                q += ucb.fast_ucb(total, tried);
            }

            if q >= best_q {
                if q > best_q {
                    best.clear();
                }
                best_q = q;
                best.push(child);
            }
        }

        assert!(!best.is_empty(), "subtask with no selectable children");
        best[rng.random_range(0..best.len())]
    }

    /// Greedy descent from the root task to a primitive action.
    fn select_primitive_action(&mut self, task: Task) -> usize {
        if let Task::Primitive(action) = task {
            return action;
        }

        let belief_hash = self.history.belief_hash();
        let last_observation = self.history.last_observation();

        let has_data = self
            .table
            .get(&task)
            .is_some_and(|entries| entries.contains_key(&belief_hash));

        let next = if has_data {
            let data = &self.table[&task][&belief_hash];
            if self.params.verbose >= 1 {
                debug!(
                    "V({task:?}) = {:.3} over {} visits",
                    data.value.mean(),
                    data.value.count()
                );
                for (child, stat) in &data.qvalues {
                    debug!("  Q({task:?}, {child:?}) = {:.3} [{}]", stat.mean(), stat.count());
                }
            }
            Self::greedy_child(
                &self.graph,
                &self.ucb,
                data,
                task,
                last_observation,
                false,
                &mut self.rng,
            )
        } else {
            debug!("no data for {task:?}; selecting a random child");
            self.random_child(task, last_observation)
        };

        self.select_primitive_action(next)
    }

    /// The task hierarchy with its learned applicability relation.
    #[must_use]
    pub const fn task_graph(&self) -> &TaskGraph {
        &self.graph
    }

    /// Advances the planner past a real step.
    ///
    /// The whole tree and exit pool are discarded; the root belief is
    /// reseeded from the real state, so hierarchical planning never runs out
    /// of particles.
    pub fn update(&mut self, action: usize, observation: usize, state: &S::State) {
        self.graph
            .update_connection(self.history.last_observation(), observation);
        self.history.add(action, observation);

        self.table.clear();
        self.exit_pool.clear();
        self.root_sampling.clear();
        self.root_sampling.add(state.clone());
    }
}

impl<S: Simulator> Planner<S> for HierarchicalMcts<S> {
    fn select_action(&mut self) -> usize {
        HierarchicalMcts::select_action(self)
    }

    fn update(&mut self, action: usize, observation: usize, state: &S::State)
        -> Result<(), PlanningError> {
        HierarchicalMcts::update(self, action, observation, state);
        Ok(())
    }

    fn tree_size(&self) -> usize {
        self.tree_size
    }

    fn tree_depth(&self) -> usize {
        self.tree_depth
    }

    fn root_samples(&self) -> Vec<S::State> {
        self.root_sampling.iter().cloned().collect()
    }
}
