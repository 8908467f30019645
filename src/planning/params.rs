//! Search configuration shared by both planners.

/// Runtime knobs for a planning run.
#[derive(Clone, Debug)]
pub struct SearchParams {
    /// Diagnostic verbosity; higher levels enable expensive trace output.
    pub verbose: u8,
    /// Search horizon cap (primitive steps).
    pub max_depth: usize,
    /// Simulations per action selection.
    pub num_simulations: usize,
    /// Particle count for the initial belief.
    pub num_start_states: usize,
    /// Replenish beliefs with history-consistent local perturbations.
    pub use_transforms: bool,
    /// Replenish beliefs by rejection sampling against the real observation.
    pub use_particle_filter: bool,
    /// Transform particles to generate per update.
    pub num_transforms: usize,
    /// Attempt budget for transform generation.
    pub max_attempts: usize,
    /// UCB1 exploration constant.
    pub exploration_constant: f64,
    /// Keep the matched subtree across real steps (flat planning).
    pub reuse_tree: bool,
    /// Select actions by posterior sampling instead of UCB1.
    pub thompson_sampling: bool,
    /// Wall-clock budget per action in seconds (`None` = simulation count
    /// only).
    pub time_out_per_action: Option<f64>,
    /// History suffix length used for belief fingerprints
    /// (`None` = unbounded).
    pub memory_size: Option<usize>,
    /// Subtask convergence exponent; 0 disables exit caching.
    pub converged: u32,
    /// Probability of substituting a cached exit once converged.
    pub cache_rate: f64,
    /// Plan over the task hierarchy instead of the flat tree.
    pub hplanning: bool,
    /// Build macro-actions over abstract observations.
    pub action_abstraction: bool,
    /// Goal abstract observation of the root task.
    pub root_goal: usize,
    /// RNG seed; all planner randomness derives from it.
    pub seed: u64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            verbose: 0,
            max_depth: 100,
            num_simulations: 1000,
            num_start_states: 1000,
            use_transforms: true,
            use_particle_filter: false,
            num_transforms: 0,
            max_attempts: 0,
            exploration_constant: 1.0,
            reuse_tree: false,
            thompson_sampling: false,
            time_out_per_action: None,
            memory_size: None,
            converged: 0,
            cache_rate: 0.5,
            hplanning: false,
            action_abstraction: false,
            root_goal: 0,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = SearchParams::default();
        assert_eq!(params.max_depth, 100);
        assert_eq!(params.num_simulations, 1000);
        assert_eq!(params.num_start_states, 1000);
        assert!(params.use_transforms);
        assert!(!params.use_particle_filter);
        assert!((params.exploration_constant - 1.0).abs() < 1e-10);
        assert!(params.time_out_per_action.is_none());
        assert!(params.memory_size.is_none());
        assert_eq!(params.converged, 0);
    }
}
