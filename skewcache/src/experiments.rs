use std::collections::HashSet;
use serde::Serialize;
use crate::attack::prune;
use crate::cache::CacheTrait;
use crate::{random_address, SimRng};

/// Counts how many random accesses it takes to evict a freshly inserted target
///
/// # Arguments
///
/// * `cache`: The cache, its current contents are kept
/// * `rng`: Source of the random addresses
/// * `target`: The address to evict
/// * `max_inserts`: Gives up after this many random accesses
///
/// returns: Option<u64>, None if the target survived `max_inserts` accesses
pub fn eviction_distance<C: CacheTrait>(
    cache: &mut C,
    rng: &mut SimRng,
    target: u64,
    max_inserts: u64,
) -> Option<u64> {
    cache.insert(target);
    for count in 1..=max_inserts {
        let address = random_address(rng);
        if cache.insert(address).is_some_and(|victim| victim.holds(target)) {
            return Some(count);
        }
    }
    None
}

/// The result of a single prime and prune
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PrimePruneOutcome {
    pub misses: u64,
    /// Attacker addresses left after pruning
    pub remaining: usize,
    /// Whether the target's access would evict one of the remaining addresses
    pub would_evict: bool,
}

/// Primes the cache with `set_size` fresh addresses, prunes them, then asks the eviction oracle
/// whether the target would now evict one of them
///
/// Pruning follows the same escalation rule as the full attack, but isn't bounded by a budget.
/// The target must not be resident.
pub fn prime_and_prune_once<C: CacheTrait>(
    cache: &mut C,
    rng: &mut SimRng,
    target: u64,
    set_size: usize,
) -> PrimePruneOutcome {
    let mut attackers: Vec<u64> = (0..set_size).map(|_| random_address(rng)).collect();
    for address in &attackers {
        cache.insert(*address);
    }
    let mut misses = set_size as u64;
    prune(cache, &mut attackers, &mut misses, u64::MAX);
    let attacker_set: HashSet<u64> = attackers.iter().copied().collect();
    PrimePruneOutcome {
        misses,
        remaining: attackers.len(),
        would_evict: cache.would_evict(&attacker_set, target),
    }
}

/// Aggregated prime and prune samples for one set size
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PrimePruneSummary {
    pub set_size: usize,
    pub samples: usize,
    pub successes: usize,
    pub total_misses: u64,
}

impl PrimePruneSummary {
    pub fn new(set_size: usize) -> Self {
        Self {
            set_size,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &PrimePruneOutcome) {
        self.samples += 1;
        self.total_misses += outcome.misses;
        if outcome.would_evict {
            self.successes += 1;
        }
    }

    /// Fraction of samples where the target would have evicted an attacker address
    pub fn success_rate(&self) -> Option<f64> {
        (self.samples != 0).then(|| self.successes as f64 / self.samples as f64)
    }

    pub fn mean_misses(&self) -> Option<f64> {
        (self.samples != 0).then(|| self.total_misses as f64 / self.samples as f64)
    }
}

/// Summary statistics over eviction distances
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DistanceSummary {
    pub samples: usize,
    pub evicted: usize,
    pub min: Option<u64>,
    pub max: Option<u64>,
    pub mean: Option<f64>,
}

impl DistanceSummary {
    pub fn from_samples(samples: &[Option<u64>]) -> Self {
        let evicted: Vec<u64> = samples.iter().flatten().copied().collect();
        let mean = (!evicted.is_empty())
            .then(|| evicted.iter().sum::<u64>() as f64 / evicted.len() as f64);
        Self {
            samples: samples.len(),
            evicted: evicted.len(),
            min: evicted.iter().min().copied(),
            max: evicted.iter().max().copied(),
            mean,
        }
    }
}
