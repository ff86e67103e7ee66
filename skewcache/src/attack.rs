use serde::Serialize;
use tracing::debug;
use crate::cache::CacheTrait;
use crate::eviction_set::check_eviction_set;
use crate::{random_address, SimRng};

/// Failed prune passes tolerated before conflicting addresses are removed in batches
pub const PRUNE_ESCALATION_PASSES: usize = 3;

/// Most conflicting addresses removed by a single escalated prune pass
pub const PRUNE_BATCH: usize = 6;

/// The result of one profiling round
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The generalized eviction set covers every way of the target
    Success { misses: u64, eviction_set: Vec<u64> },
    /// The miss budget ran out first
    Aborted { misses: u64 },
}

/// Results over many profiling rounds against the same target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttackReport {
    /// Misses taken by each successful round, in order
    pub miss_counts: Vec<u64>,
    /// Successful rounds which took no more misses than the cache has cells
    pub rounds_within_capacity: usize,
    pub rounds: usize,
    pub failures: usize,
}

/// Accesses every address, returning those which missed
fn access_all<C: CacheTrait>(cache: &mut C, addresses: &[u64]) -> Vec<u64> {
    addresses
        .iter()
        .copied()
        .filter(|address| cache.insert(*address).is_some())
        .collect()
}

/// Re-accesses the attacker set until a full pass hits everywhere
///
/// Each failed pass drops the first conflicting address. Once more than
/// [`PRUNE_ESCALATION_PASSES`] passes in a row have failed the set is clearly far too big for the
/// cache, and up to [`PRUNE_BATCH`] conflicting addresses go per pass instead.
///
/// returns: bool, false if `misses` went over `budget` before the set stabilised
pub(crate) fn prune<C: CacheTrait>(
    cache: &mut C,
    attackers: &mut Vec<u64>,
    misses: &mut u64,
    budget: u64,
) -> bool {
    let mut failed_passes = 0;
    loop {
        let conflicts = access_all(cache, attackers);
        if conflicts.is_empty() {
            return true;
        }
        *misses += conflicts.len() as u64;
        if *misses > budget {
            return false;
        }
        failed_passes += 1;
        let batch = if failed_passes > PRUNE_ESCALATION_PASSES {
            debug!(failed_passes, conflicts = conflicts.len(), "Escalating prune");
            PRUNE_BATCH.min(conflicts.len())
        } else {
            1
        };
        let dropped = &conflicts[..batch];
        attackers.retain(|address| !dropped.contains(address));
    }
}

/// Simulates the prime, prune and probe attack, building generalized eviction sets for a target
///
/// Each round starts from an empty eviction set and repeats these steps:
///
/// 1. Prime: top the attacker set up to `set_size` with fresh addresses and access all of it
/// 2. Prune: drop self-conflicting addresses until the attacker set is stable, see [`prune`]
/// 3. Victim: optional unrelated accesses, then the target itself
/// 4. Probe: the first attacker address to miss joins the eviction set and leaves the attacker
/// set
/// 5. Re-evict: evict the target again so the next step starts clean, first using the eviction
/// set, then the attacker set, then growing the attacker set with fresh addresses. The attacker
/// never sees the target leave, the engine checks the evicted entries on its behalf
/// 6. Stop once the eviction set covers every way of the target, or once the misses exceed twice
/// the cache capacity
///
/// The cache keeps its state between rounds.
#[derive(Debug)]
pub struct PrimeProbeEngine<C: CacheTrait> {
    cache: C,
    rng: SimRng,
    noise_accesses: usize,
}

impl<C: CacheTrait> PrimeProbeEngine<C> {
    pub fn new(cache: C, rng: SimRng) -> Self {
        Self {
            cache,
            rng,
            noise_accesses: 0,
        }
    }

    /// Sets the number of unrelated accesses made right before every victim access
    pub fn with_noise(mut self, noise_accesses: usize) -> Self {
        self.noise_accesses = noise_accesses;
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn into_inner(self) -> C {
        self.cache
    }

    /// The miss budget of a round, twice the cache capacity
    pub fn miss_budget(&self) -> u64 {
        2 * self.cache.geometry().capacity() as u64
    }

    /// Runs `max_rounds` profiling rounds against `target`
    ///
    /// # Arguments
    ///
    /// * `target`: The victim's address, the same for every round
    /// * `set_size`: Size of the attacker set at the start of every step
    /// * `max_rounds`: Number of profiling rounds
    ///
    /// returns: AttackReport
    pub fn run(&mut self, target: u64, set_size: usize, max_rounds: usize) -> AttackReport {
        let capacity = self.cache.geometry().capacity() as u64;
        let mut report = AttackReport {
            rounds: max_rounds,
            ..AttackReport::default()
        };
        for _ in 0..max_rounds {
            match self.profile(target, set_size) {
                RoundOutcome::Success { misses, .. } => {
                    if misses <= capacity {
                        report.rounds_within_capacity += 1;
                    }
                    report.miss_counts.push(misses);
                }
                RoundOutcome::Aborted { .. } => report.failures += 1,
            }
        }
        report
    }

    /// Runs a single profiling round
    pub fn profile(&mut self, target: u64, set_size: usize) -> RoundOutcome {
        let budget = self.miss_budget();
        let mut attackers: Vec<u64> = Vec::with_capacity(set_size);
        let mut eviction_set: Vec<u64> = Vec::new();
        let mut misses = 0;
        loop {
            while attackers.len() < set_size {
                attackers.push(random_address(&mut self.rng));
            }
            misses += access_all(&mut self.cache, &attackers).len() as u64;

            if !prune(&mut self.cache, &mut attackers, &mut misses, budget) {
                debug!(misses, "Round aborted while pruning");
                return RoundOutcome::Aborted { misses };
            }

            self.trigger_victim(target);

            let mut victim_removed = false;
            if let Some((address, victim_was_target)) = self.probe(target, &attackers) {
                misses += 1;
                attackers.retain(|a| *a != address);
                eviction_set.push(address);
                victim_removed = victim_was_target;
            }
            if misses > budget {
                debug!(misses, "Round aborted after probing");
                return RoundOutcome::Aborted { misses };
            }

            if !victim_removed
                && !self.evict_target(target, &eviction_set, &mut attackers, &mut misses, budget)
            {
                debug!(misses, "Round aborted while evicting the target");
                return RoundOutcome::Aborted { misses };
            }

            if attackers.len() > set_size {
                let excess = attackers.len() - set_size;
                attackers.drain(..excess);
            }

            if check_eviction_set(&self.cache, target, &eviction_set) {
                debug!(misses, eviction_set_size = eviction_set.len(), "Round succeeded");
                return RoundOutcome::Success { misses, eviction_set };
            }
            if misses > budget {
                debug!(misses, "Round aborted, miss budget exhausted");
                return RoundOutcome::Aborted { misses };
            }
        }
    }

    fn trigger_victim(&mut self, target: u64) {
        for _ in 0..self.noise_accesses {
            let noise = random_address(&mut self.rng);
            self.cache.insert(noise);
        }
        self.cache.insert(target);
    }

    /// Re-accesses the attacker set in order, stopping at the first miss
    ///
    /// returns: Option<(u64, bool)>, the address which missed and whether it evicted the target
    fn probe(&mut self, target: u64, attackers: &[u64]) -> Option<(u64, bool)> {
        let cache = &mut self.cache;
        attackers
            .iter()
            .find_map(|address| {
                cache
                    .insert(*address)
                    .map(|victim| (*address, victim.holds(target)))
            })
    }

    /// Accesses known conflicting addresses, then the attacker set, then ever more fresh addresses
    /// until the target gets evicted
    ///
    /// returns: bool, false if the budget ran out first
    fn evict_target(
        &mut self,
        target: u64,
        eviction_set: &[u64],
        attackers: &mut Vec<u64>,
        misses: &mut u64,
        budget: u64,
    ) -> bool {
        if Self::replay(&mut self.cache, target, eviction_set, misses)
            || Self::replay(&mut self.cache, target, attackers, misses)
        {
            return true;
        }
        loop {
            if *misses > budget {
                return false;
            }
            let fresh = random_address(&mut self.rng);
            attackers.push(fresh);
            if Self::replay(&mut self.cache, target, &[fresh], misses)
                || Self::replay(&mut self.cache, target, attackers, misses)
            {
                return true;
            }
        }
    }

    /// Accesses addresses in order, counting misses, until one of them evicts the target
    fn replay(cache: &mut C, target: u64, addresses: &[u64], misses: &mut u64) -> bool {
        for address in addresses {
            if let Some(victim) = cache.insert(*address) {
                *misses += 1;
                if victim.holds(target) {
                    return true;
                }
            }
        }
        false
    }
}
