//! Action/observation history and the belief fingerprint derived from it.
//!
//! Two histories with identical retained suffixes (and the same memory
//! bound) produce identical fingerprints, which makes the hash usable as a
//! belief-context key across tree nodes and subtask tables.

/// Order-sensitive seeded hash combine.
///
/// The widened boost recipe; successive combines of the same values in a
/// different order yield different seeds.
#[must_use]
pub fn hash_combine(seed: u64, value: u64) -> u64 {
    seed ^ value
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(seed << 6)
        .wrapping_add(seed >> 2)
}

/// One executed step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Entry {
    pub action: usize,
    pub observation: usize,
}

/// Append-only log of (action, observation) pairs.
///
/// When `memory_size` is set, only the last `memory_size` entries
/// contribute to the fingerprint; the full log is always retained so that
/// simulations can truncate back to the exact pre-simulation state.
#[derive(Clone, Debug, Default)]
pub struct History {
    entries: Vec<Entry>,
    memory_size: Option<usize>,
}

impl History {
    /// Creates an empty history with the given memory bound
    /// (`None` = unbounded).
    #[must_use]
    pub fn new(memory_size: Option<usize>) -> Self {
        Self {
            entries: Vec::new(),
            memory_size,
        }
    }

    /// Appends one step.
    pub fn add(&mut self, action: usize, observation: usize) {
        self.entries.push(Entry {
            action,
            observation,
        });
    }

    /// Number of recorded steps.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops everything after the first `len` entries.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// The most recent step, if any.
    #[must_use]
    pub fn back(&self) -> Option<Entry> {
        self.entries.last().copied()
    }

    /// The most recent observation, if any.
    #[must_use]
    pub fn last_observation(&self) -> Option<usize> {
        self.entries.last().map(|e| e.observation)
    }

    /// The configured memory bound.
    #[must_use]
    pub const fn memory_size(&self) -> Option<usize> {
        self.memory_size
    }

    /// Deterministic fingerprint of the retained suffix.
    ///
    /// The memory bound participates in the seed, so the same suffix under
    /// a different bound hashes differently.
    #[must_use]
    pub fn belief_hash(&self) -> u64 {
        let seed = match self.memory_size {
            Some(memory) => hash_combine(0, memory as u64),
            None => hash_combine(0, u64::MAX),
        };

        let start = match self.memory_size {
            Some(memory) => self.entries.len().saturating_sub(memory),
            None => 0,
        };

        self.entries[start..].iter().fold(seed, |acc, entry| {
            let acc = hash_combine(acc, entry.action as u64);
            hash_combine(acc, entry.observation as u64)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_combine_order_sensitive() {
        let ab = hash_combine(hash_combine(0, 1), 2);
        let ba = hash_combine(hash_combine(0, 2), 1);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_add_and_last_observation() {
        let mut history = History::new(None);
        assert!(history.last_observation().is_none());

        history.add(2, 7);
        history.add(0, 3);
        assert_eq!(history.size(), 2);
        assert_eq!(history.last_observation(), Some(3));
        assert_eq!(history.back().unwrap().action, 0);
    }

    #[test]
    fn test_truncate_restores_hash() {
        let mut history = History::new(None);
        history.add(1, 1);
        history.add(2, 0);
        let fingerprint = history.belief_hash();
        let depth = history.size();

        history.add(0, 2);
        history.add(1, 1);
        assert_ne!(history.belief_hash(), fingerprint);

        history.truncate(depth);
        assert_eq!(history.belief_hash(), fingerprint);
    }

    #[test]
    fn test_identical_suffix_same_hash_under_bound() {
        let mut short = History::new(Some(2));
        short.add(3, 1);
        short.add(0, 2);

        let mut long = History::new(Some(2));
        long.add(1, 0);
        long.add(2, 2);
        long.add(3, 1);
        long.add(0, 2);

        assert_eq!(short.belief_hash(), long.belief_hash());
    }

    #[test]
    fn test_memory_bound_changes_hash() {
        let mut bounded = History::new(Some(1));
        let mut unbounded = History::new(None);
        for history in [&mut bounded, &mut unbounded] {
            history.add(0, 1);
        }
        assert_ne!(bounded.belief_hash(), unbounded.belief_hash());
    }

    #[test]
    fn test_different_suffix_different_hash() {
        let mut first = History::new(None);
        first.add(0, 1);
        let mut second = History::new(None);
        second.add(1, 0);
        assert_ne!(first.belief_hash(), second.belief_hash());
    }
}
