//! Conjugate posteriors for Thompson-sampling action selection.
//!
//! Returns are modelled with a normal-gamma posterior, observation
//! frequencies with Dirichlet counts. Each posterior supports a sampled
//! mode (used while exploring) and an expected mode (used when committing).

use rand::rngs::StdRng;
use rand_distr::{Distribution, Gamma, Normal};

/// Normal-gamma posterior over the mean of a real-valued signal.
#[derive(Clone, Copy, Debug)]
pub struct NormalGamma {
    mu: f64,
    lambda: f64,
    alpha: f64,
    beta: f64,
    count: u64,
}

impl Default for NormalGamma {
    fn default() -> Self {
        // Weakly informative prior centred at zero
        Self {
            mu: 0.0,
            lambda: 1.0,
            alpha: 1.0,
            beta: 1.0,
            count: 0,
        }
    }
}

impl NormalGamma {
    /// Creates the uninformative prior.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequential Bayesian update with one observation.
    pub fn add(&mut self, value: f64) {
        let lambda_next = self.lambda + 1.0;
        let delta = value - self.mu;
        self.beta += self.lambda * delta * delta / (2.0 * lambda_next);
        self.mu = (self.lambda * self.mu + value) / lambda_next;
        self.lambda = lambda_next;
        self.alpha += 0.5;
        self.count += 1;
    }

    /// Posterior mean.
    #[must_use]
    pub const fn mean(&self) -> f64 {
        self.mu
    }

    /// Number of observations folded in.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Draws a mean from the posterior, or returns the expected mean when
    /// `sampling` is false.
    #[must_use]
    pub fn thompson_sample(&self, rng: &mut StdRng, sampling: bool) -> f64 {
        if !sampling {
            return self.mu;
        }

        let gamma = Gamma::new(self.alpha, 1.0 / self.beta)
            .expect("posterior shape parameters stay positive");
        let precision = gamma.sample(rng).max(1e-10);
        let std_dev = (1.0 / (self.lambda * precision)).sqrt();
        let normal = Normal::new(self.mu, std_dev).expect("finite posterior scale");
        normal.sample(rng)
    }
}

/// Dirichlet posterior over a discrete observation distribution.
#[derive(Clone, Debug)]
pub struct DirichletCounts {
    counts: Vec<f64>,
    total: f64,
}

impl DirichletCounts {
    /// Creates zeroed counts over `support` outcomes.
    #[must_use]
    pub fn new(support: usize) -> Self {
        Self {
            counts: vec![0.0; support],
            total: 0.0,
        }
    }

    /// Records one occurrence of `outcome`.
    pub fn observe(&mut self, outcome: usize) {
        self.counts[outcome] += 1.0;
        self.total += 1.0;
    }

    /// Total observation count.
    #[must_use]
    pub const fn total(&self) -> f64 {
        self.total
    }

    /// Probability weights over the outcomes seen so far.
    ///
    /// Sampled mode draws from the posterior Dirichlet; expected mode
    /// returns the empirical frequencies. Outcomes never observed are
    /// omitted.
    #[must_use]
    pub fn distribution(&self, rng: &mut StdRng, sampling: bool) -> Vec<(usize, f64)> {
        if self.total <= 0.0 {
            return Vec::new();
        }

        let mut weights: Vec<(usize, f64)> = Vec::with_capacity(self.counts.len());
        for (outcome, &count) in self.counts.iter().enumerate() {
            if count <= 0.0 {
                continue;
            }
            let weight = if sampling {
                let gamma = Gamma::new(count, 1.0).expect("positive count");
                gamma.sample(rng).max(1e-10)
            } else {
                count
            };
            weights.push((outcome, weight));
        }

        let sum: f64 = weights.iter().map(|(_, w)| w).sum();
        for (_, weight) in &mut weights {
            *weight /= sum;
        }
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_normal_gamma_tracks_sample_mean() {
        let mut posterior = NormalGamma::new();
        for _ in 0..200 {
            posterior.add(3.0);
        }
        // Prior pseudo-observation at zero biases slightly low
        assert!((posterior.mean() - 3.0).abs() < 0.1);
        assert_eq!(posterior.count(), 200);
    }

    #[test]
    fn test_normal_gamma_expected_mode_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut posterior = NormalGamma::new();
        posterior.add(1.5);
        let first = posterior.thompson_sample(&mut rng, false);
        let second = posterior.thompson_sample(&mut rng, false);
        assert!((first - second).abs() < 1e-12);
    }

    #[test]
    fn test_normal_gamma_samples_concentrate() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut posterior = NormalGamma::new();
        for _ in 0..1000 {
            posterior.add(2.0);
        }

        let mut total = 0.0;
        for _ in 0..200 {
            total += posterior.thompson_sample(&mut rng, true);
        }
        assert!((total / 200.0 - 2.0).abs() < 0.2);
    }

    #[test]
    fn test_dirichlet_expected_frequencies() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut counts = DirichletCounts::new(4);
        for _ in 0..3 {
            counts.observe(1);
        }
        counts.observe(2);

        let distribution = counts.distribution(&mut rng, false);
        assert_eq!(distribution.len(), 2);
        assert_eq!(distribution[0].0, 1);
        assert!((distribution[0].1 - 0.75).abs() < 1e-10);
        assert!((distribution[1].1 - 0.25).abs() < 1e-10);
    }

    #[test]
    fn test_dirichlet_sampled_mode_normalizes() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut counts = DirichletCounts::new(3);
        counts.observe(0);
        counts.observe(2);

        let distribution = counts.distribution(&mut rng, true);
        let sum: f64 = distribution.iter().map(|(_, p)| p).sum();
        assert!((sum - 1.0).abs() < 1e-10);
    }

    #[test]
    fn test_dirichlet_empty() {
        let mut rng = StdRng::seed_from_u64(5);
        let counts = DirichletCounts::new(3);
        assert!(counts.distribution(&mut rng, true).is_empty());
    }
}
