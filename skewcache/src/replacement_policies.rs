use rand::Rng;
use crate::cache::CacheEntry;
use crate::config::ReplacementPolicyConfig;
use crate::SimRng;

/// Upper bound of the TreePLRU age counters. Ages saturate rather than wrap
pub const TREE_PLRU_MAX_AGE: u64 = u8::MAX as u64;

/// A generic trait for implementing new replacement policies. Can be used to parameterise a
/// SkewedCache.
///
/// Policies keep their per-line state in the `metadata` field of each entry, so the cache can hand
/// out victims together with the state that got them chosen. Every method receives the whole
/// storage array and the candidate cells of the address being accessed, `cells[way]` being the
/// storage index of the candidate in `way`. Candidate cells are always distinct, as no two ways
/// share storage.
pub trait ReplacementPolicy {
    /// Updates the policy when an address is found in `cells[way]`
    ///
    /// Not applicable for some policies, a default which does nothing is provided
    fn update_on_hit(&mut self, _storage: &mut [CacheEntry], _cells: &[usize], _way: usize) {}

    /// Picks the way whose candidate cell is replaced on a miss, leaving the storage untouched
    ///
    /// returns: usize, the victim way
    fn select_victim(&mut self, storage: &[CacheEntry], cells: &[usize]) -> usize;

    /// Updates the policy once the victim's prior contents have been read, before the new entry
    /// is installed in `cells[way]`
    ///
    /// The eviction oracle calls this too without installing anything, so updates made here
    /// persist across oracle queries. Does nothing by default
    fn update_on_replace(&mut self, _storage: &mut [CacheEntry], _cells: &[usize], _way: usize) {}

    /// Metadata for an entry which is being installed
    fn new_metadata(&mut self) -> u64 {
        0
    }

    fn kind(&self) -> ReplacementPolicyConfig;
}

/// Replaces a uniformly random way, regardless of whether the candidate cells are occupied
#[derive(Debug, Clone)]
pub struct Random {
    rng: SimRng,
}

impl Random {
    pub fn new(rng: SimRng) -> Self {
        Self { rng }
    }
}

impl ReplacementPolicy for Random {
    fn select_victim(&mut self, _storage: &[CacheEntry], cells: &[usize]) -> usize {
        self.rng.gen_range(0..cells.len())
    }

    fn kind(&self) -> ReplacementPolicyConfig {
        ReplacementPolicyConfig::Random
    }
}

/// Least Recently Used replacement policy
///
/// Each entry stores the logical time it was last used. The clock starts at 1, so empty cells
/// (timestamp 0) are always replaced before anything resident.
#[derive(Debug, Clone)]
pub struct LeastRecentlyUsed {
    // Logical rather than wall-clock time, every access gets a distinct timestamp
    time: u64,
}

impl LeastRecentlyUsed {
    pub fn new() -> Self {
        Self { time: 1 }
    }

    fn tick(&mut self) -> u64 {
        let now = self.time;
        self.time += 1;
        now
    }
}

impl Default for LeastRecentlyUsed {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplacementPolicy for LeastRecentlyUsed {
    fn update_on_hit(&mut self, storage: &mut [CacheEntry], cells: &[usize], way: usize) {
        storage[cells[way]].metadata = self.tick();
    }

    // Ties go to the lowest way, strict comparison keeps the first minimum
    fn select_victim(&mut self, storage: &[CacheEntry], cells: &[usize]) -> usize {
        let mut min_value = u64::MAX;
        let mut min_way = 0;
        for (way, cell) in cells.iter().enumerate() {
            if storage[*cell].metadata < min_value {
                min_value = storage[*cell].metadata;
                min_way = way;
            }
        }
        min_way
    }

    fn new_metadata(&mut self) -> u64 {
        self.tick()
    }

    fn kind(&self) -> ReplacementPolicyConfig {
        ReplacementPolicyConfig::LeastRecentlyUsed
    }
}

/// Counter based approximation of LRU
///
/// Each cell carries a small age. Accessing a cell ages every candidate cell which is no older than
/// it, then resets the accessed cell to age 0. The oldest candidate is replaced on a miss, ties
/// between equally old candidates are broken at random.
#[derive(Debug, Clone)]
pub struct TreePlru {
    rng: SimRng,
}

impl TreePlru {
    pub fn new(rng: SimRng) -> Self {
        Self { rng }
    }

    fn touch(storage: &mut [CacheEntry], cells: &[usize], way: usize) {
        let age = storage[cells[way]].metadata;
        for cell in cells {
            let entry = &mut storage[*cell];
            if entry.metadata <= age {
                entry.metadata = (entry.metadata + 1).min(TREE_PLRU_MAX_AGE);
            }
        }
        storage[cells[way]].metadata = 0;
    }
}

impl ReplacementPolicy for TreePlru {
    fn update_on_hit(&mut self, storage: &mut [CacheEntry], cells: &[usize], way: usize) {
        Self::touch(storage, cells, way);
    }

    fn select_victim(&mut self, storage: &[CacheEntry], cells: &[usize]) -> usize {
        let max_age = cells.iter().map(|c| storage[*c].metadata).max().unwrap_or(0);
        let oldest: Vec<usize> = cells
            .iter()
            .enumerate()
            .filter(|(_, c)| storage[**c].metadata == max_age)
            .map(|(way, _)| way)
            .collect();
        oldest[self.rng.gen_range(0..oldest.len())]
    }

    // The victim counts as just accessed
    fn update_on_replace(&mut self, storage: &mut [CacheEntry], cells: &[usize], way: usize) {
        Self::touch(storage, cells, way);
    }

    fn kind(&self) -> ReplacementPolicyConfig {
        ReplacementPolicyConfig::TreePlru
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use super::*;

    fn entries(metadata: &[u64]) -> Vec<CacheEntry> {
        metadata.iter().enumerate().map(|(i, m)| CacheEntry::new(i as u64 + 100, *m)).collect()
    }

    #[test]
    fn lru_picks_oldest_and_lowest_way_on_ties() {
        let mut policy = LeastRecentlyUsed::new();
        let mut storage = entries(&[5, 3, 3, 9]);
        assert_eq!(policy.select_victim(&storage, &[0, 1, 2, 3]), 1);
        policy.update_on_replace(&mut storage, &[0, 1, 2, 3], 1);
        // Replacing doesn't touch the timestamps, the new entry brings its own
        assert_eq!(storage[1].metadata, 3);
    }

    #[test]
    fn lru_clock_is_monotonic() {
        let mut policy = LeastRecentlyUsed::new();
        let mut storage = entries(&[0, 0]);
        let first = policy.new_metadata();
        policy.update_on_hit(&mut storage, &[0, 1], 1);
        assert!(storage[1].metadata > first);
        assert!(policy.new_metadata() > storage[1].metadata);
    }

    #[test]
    fn tree_plru_hit_ages_younger_cells() {
        let mut policy = TreePlru::new(SimRng::seed_from_u64(1));
        let mut storage = entries(&[2, 1, 3, 0]);
        policy.update_on_hit(&mut storage, &[0, 1, 2, 3], 0);
        let ages: Vec<u64> = storage.iter().map(|e| e.metadata).collect();
        assert_eq!(ages, vec![0, 2, 3, 1]);
    }

    #[test]
    fn tree_plru_victim_has_max_age() {
        let mut policy = TreePlru::new(SimRng::seed_from_u64(7));
        for _ in 0..50 {
            let mut storage = entries(&[1, 4, 2, 4]);
            let way = policy.select_victim(&storage, &[0, 1, 2, 3]);
            assert!(way == 1 || way == 3);
            assert_eq!(storage[way].metadata, 4);
            policy.update_on_replace(&mut storage, &[0, 1, 2, 3], way);
            assert_eq!(storage[way].metadata, 0);
        }
    }

    #[test]
    fn tree_plru_ages_saturate() {
        let mut storage = entries(&[TREE_PLRU_MAX_AGE, TREE_PLRU_MAX_AGE]);
        TreePlru::touch(&mut storage, &[0, 1], 0);
        assert_eq!(storage[1].metadata, TREE_PLRU_MAX_AGE);
        assert_eq!(storage[0].metadata, 0);
    }

    #[test]
    fn random_stays_in_range() {
        let mut policy = Random::new(SimRng::seed_from_u64(3));
        let storage = entries(&[0; 4]);
        let mut seen = [false; 4];
        for _ in 0..200 {
            seen[policy.select_victim(&storage, &[0, 1, 2, 3])] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }
}
