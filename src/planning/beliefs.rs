//! Particle representations of belief states.
//!
//! A belief is an unordered multiset of sampled domain states. The flat
//! planner stores particles verbatim; the exit-state pool deduplicates them
//! by state hash and keeps weights instead.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::Rng;

/// Stable 64-bit hash of a domain state.
#[must_use]
pub fn state_hash<T: Hash>(state: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    state.hash(&mut hasher);
    hasher.finish()
}

/// Unordered multiset of owned state samples.
#[derive(Clone, Debug)]
pub struct ParticleSet<T> {
    samples: Vec<T>,
}

impl<T> Default for ParticleSet<T> {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
        }
    }
}

impl<T: Clone> ParticleSet<T> {
    /// Creates an empty particle set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            samples: Vec::new(),
        }
    }

    /// Adds a sample, taking ownership.
    pub fn add(&mut self, sample: T) {
        self.samples.push(sample);
    }

    /// Draws a uniform sample and returns a fresh copy.
    ///
    /// # Panics
    ///
    /// Panics if the set is empty; sampling an empty belief is a planner
    /// contract breach.
    #[must_use]
    pub fn create_sample(&self, rng: &mut StdRng) -> T {
        assert!(!self.samples.is_empty(), "sampling an empty belief");
        self.samples[rng.random_range(0..self.samples.len())].clone()
    }

    /// Borrows an arbitrary sample.
    #[must_use]
    pub fn get_sample(&self) -> Option<&T> {
        self.samples.first()
    }

    /// Number of particles.
    #[must_use]
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Destroys all particles.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Iterates over the particles.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.samples.iter()
    }
}

/// Weighted, hash-deduplicated particle set.
///
/// Used for pools of exit states where many simulations terminate in the
/// same ground state and only the multiplicity matters. Samples are kept in
/// insertion order so draws stay reproducible for a fixed seed.
#[derive(Clone, Debug)]
pub struct WeightedParticles<T> {
    index: HashMap<u64, usize>,
    samples: Vec<(T, u32)>,
    total: u32,
}

impl<T> Default for WeightedParticles<T> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            samples: Vec::new(),
            total: 0,
        }
    }
}

impl<T: Clone + Hash> WeightedParticles<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sample, merging it with an existing equal-hash particle.
    pub fn add(&mut self, sample: T) {
        self.total += 1;
        let key = state_hash(&sample);
        if let Some(&slot) = self.index.get(&key) {
            self.samples[slot].1 += 1;
        } else {
            self.index.insert(key, self.samples.len());
            self.samples.push((sample, 1));
        }
    }

    /// Draws a weight-proportional sample by reference.
    #[must_use]
    pub fn sample(&self, rng: &mut StdRng) -> Option<&T> {
        if self.total == 0 {
            return None;
        }

        let mut remaining = rng.random_range(0..self.total);
        for (sample, weight) in &self.samples {
            if remaining < *weight {
                return Some(sample);
            }
            remaining -= *weight;
        }
        unreachable!("weights sum to total")
    }

    /// Total particle count (including multiplicities).
    #[must_use]
    pub const fn num_samples(&self) -> u32 {
        self.total
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total == 0
    }
}
