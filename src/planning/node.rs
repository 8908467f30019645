//! V/Q node tree for the flat planner.
//!
//! Nodes live in an arena and reference each other by index, which lets the
//! bounded-memory transposition pool alias subtrees without back-pointers.
//! Re-rooting compacts the arena down to the retained subtree.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use rand::rngs::StdRng;

use crate::planning::beliefs::{state_hash, ParticleSet};
use crate::planning::statistic::Statistic;
use crate::planning::thompson::{DirichletCounts, NormalGamma};

/// Arena index of a [`VNode`].
pub type NodeId = usize;

/// Action node: value statistic plus sparse per-observation children.
#[derive(Clone, Debug)]
pub struct QNode {
    pub value: Statistic,
    applicable: bool,
    children: HashMap<usize, NodeId>,
    /// Posterior over which observation follows this action.
    pub observations: DirichletCounts,
    /// Posterior over the immediate reward of this action.
    pub reward: NormalGamma,
    updates: u64,
}

impl QNode {
    fn new(num_observations: usize, applicable: bool) -> Self {
        Self {
            value: Statistic::new(),
            applicable,
            children: HashMap::new(),
            observations: DirichletCounts::new(num_observations),
            reward: NormalGamma::new(),
            updates: 0,
        }
    }

    /// Whether the action was legal when the parent node was expanded.
    #[must_use]
    pub const fn applicable(&self) -> bool {
        self.applicable
    }

    /// Child node for an observation, if one was ever created.
    #[must_use]
    pub fn child(&self, observation: usize) -> Option<NodeId> {
        self.children.get(&observation).copied()
    }

    pub fn set_child(&mut self, observation: usize, node: NodeId) {
        self.children.insert(observation, node);
    }

    /// Records one observed transition for the Thompson posteriors.
    pub fn ts_update(&mut self, observation: usize, reward: f64) {
        self.observations.observe(observation);
        self.reward.add(reward);
        self.updates += 1;
    }

    /// Number of transitions folded into the posteriors.
    #[must_use]
    pub const fn ts_updates(&self) -> u64 {
        self.updates
    }
}

/// Belief node: value statistic, local particle set and one QNode per
/// action.
#[derive(Clone, Debug)]
pub struct VNode<St> {
    pub value: Statistic,
    pub beliefs: ParticleSet<St>,
    belief_hash: u64,
    children: Vec<QNode>,
    /// Per-state posterior over the cumulative reward from this node.
    ///
    /// Keyed by state hash; ordered so posterior draws are reproducible.
    cumulative: BTreeMap<u64, NormalGamma>,
}

impl<St: Clone + Hash> VNode<St> {
    fn new(belief_hash: u64, children: Vec<QNode>) -> Self {
        Self {
            value: Statistic::new(),
            beliefs: ParticleSet::new(),
            belief_hash,
            children,
            cumulative: BTreeMap::new(),
        }
    }

    /// Fingerprint of the history this node was expanded under.
    #[must_use]
    pub const fn belief_hash(&self) -> u64 {
        self.belief_hash
    }

    #[must_use]
    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn child(&self, action: usize) -> &QNode {
        &self.children[action]
    }

    pub fn child_mut(&mut self, action: usize) -> &mut QNode {
        &mut self.children[action]
    }

    /// Cumulative-reward posterior for the given ground state.
    pub fn cumulative_reward(&mut self, state: &St) -> &mut NormalGamma {
        self.cumulative.entry(state_hash(state)).or_default()
    }

    /// Samples an H-value by marginalizing the per-state posteriors,
    /// weighting each by its observation count.
    #[must_use]
    pub fn thompson_value(&self, rng: &mut StdRng, sampling: bool) -> f64 {
        let total: u64 = self.cumulative.values().map(NormalGamma::count).sum();
        if total == 0 {
            return NormalGamma::new().thompson_sample(rng, sampling);
        }

        let mut value = 0.0;
        for posterior in self.cumulative.values() {
            value += posterior.count() as f64 * posterior.thompson_sample(rng, sampling);
        }
        value / total as f64
    }
}

/// Arena of VNodes plus the transposition pool by belief fingerprint.
#[derive(Clone, Debug)]
pub struct Tree<St> {
    nodes: Vec<VNode<St>>,
    pool: HashMap<u64, NodeId>,
    pooled: bool,
}

impl<St: Clone + Hash> Tree<St> {
    /// Creates an empty arena; `pooled` enables transposition merging.
    #[must_use]
    pub fn new(pooled: bool) -> Self {
        Self {
            nodes: Vec::new(),
            pool: HashMap::new(),
            pooled,
        }
    }

    /// Number of live nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn node(&self, id: NodeId) -> &VNode<St> {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut VNode<St> {
        &mut self.nodes[id]
    }

    /// Allocates a node with one QNode per action; `applicable` marks the
    /// legal actions.
    pub fn expand(
        &mut self,
        belief_hash: u64,
        num_actions: usize,
        num_observations: usize,
        applicable: &[bool],
    ) -> NodeId {
        assert_eq!(applicable.len(), num_actions);
        let children = (0..num_actions)
            .map(|action| QNode::new(num_observations, applicable[action]))
            .collect();

        let id = self.nodes.len();
        self.nodes.push(VNode::new(belief_hash, children));
        if self.pooled {
            self.pool.insert(belief_hash, id);
        }
        id
    }

    /// Transposition lookup by belief fingerprint.
    #[must_use]
    pub fn lookup(&self, belief_hash: u64) -> Option<NodeId> {
        self.pool.get(&belief_hash).copied()
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.pool.clear();
    }

    /// Compacts the arena to the subtree reachable from `keep` and returns
    /// the new id of `keep`.
    pub fn prune_to(&mut self, keep: NodeId) -> NodeId {
        let mut order = vec![keep];
        let mut remap: HashMap<NodeId, NodeId> = HashMap::new();
        remap.insert(keep, 0);

        let mut next = 0;
        while next < order.len() {
            let id = order[next];
            next += 1;
            for qnode in &self.nodes[id].children {
                for &child in qnode.children.values() {
                    if !remap.contains_key(&child) {
                        remap.insert(child, order.len());
                        order.push(child);
                    }
                }
            }
        }

        let mut old: Vec<Option<VNode<St>>> =
            std::mem::take(&mut self.nodes).into_iter().map(Some).collect();
        let mut nodes = Vec::with_capacity(order.len());
        for &id in &order {
            let mut node = old[id].take().expect("reachable nodes are visited once");
            for qnode in &mut node.children {
                for child in qnode.children.values_mut() {
                    *child = remap[child];
                }
            }
            nodes.push(node);
        }

        self.nodes = nodes;
        self.pool.clear();
        if self.pooled {
            for (id, node) in self.nodes.iter().enumerate() {
                self.pool.insert(node.belief_hash, id);
            }
        }
        0
    }
}
