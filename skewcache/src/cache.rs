use std::collections::HashSet;
use std::fmt::Write;
use serde::Serialize;
use tracing::{debug, trace, warn};
use crate::config::{CacheConfig, ReplacementPolicyConfig};
use crate::error::{Error, Result};
use crate::indexer::AddressIndexer;
pub use crate::indexer::MAX_IDX_WIDTH;
use crate::replacement_policies::{LeastRecentlyUsed, ReplacementPolicy, Random, TreePlru};
use crate::SimRng;

/// A single storage cell: a resident address plus whatever the replacement policy tracks for it
///
/// Empty cells are represented by entries with `valid` unset. Always check validity rather than
/// comparing addresses, address 0 is a perfectly good address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub address: u64,
    /// A logical timestamp for LRU, an age for TreePLRU, unused for Random
    pub metadata: u64,
    pub valid: bool,
}

impl CacheEntry {
    /// The empty cell
    pub const EMPTY: CacheEntry = CacheEntry {
        address: 0,
        metadata: 0,
        valid: false,
    };

    pub fn new(address: u64, metadata: u64) -> Self {
        Self {
            address,
            metadata,
            valid: true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Whether this entry holds `address`. Never true for an empty cell
    pub fn holds(&self, address: u64) -> bool {
        self.valid && self.address == address
    }
}

/// The shape of a cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheGeometry {
    pub ways: usize,
    pub idx_width: u32,
}

impl CacheGeometry {
    pub fn rows(&self) -> usize {
        1 << self.idx_width
    }

    /// Total number of cells, ways * rows
    pub fn capacity(&self) -> usize {
        self.ways * self.rows()
    }
}

/// A generic trait for skewed caches
///
/// Every operation runs to completion, there's no internal concurrency. A cache is owned by
/// whichever simulation loop drives it.
pub trait CacheTrait {
    /// Gets the candidate row of an address in each way
    fn candidate_rows(&self, address: u64) -> Vec<u64>;

    /// Accesses an address, installing it on a miss
    ///
    /// Returns None on a hit. On a miss the previous contents of the replaced cell are returned,
    /// which may be an empty entry; check validity before treating it as a conflict.
    ///
    /// # Arguments
    ///
    /// * `address`: The address being accessed
    ///
    /// returns: Option<CacheEntry>
    fn insert(&mut self, address: u64) -> Option<CacheEntry>;

    /// Answers whether accessing `address` right now would evict one of `attacker_addresses`,
    /// without installing it
    ///
    /// This isn't something an attacker can observe, it exists to analyse attacks. Replacement
    /// state is updated as it would be for a real miss, so repeated calls stay consistent with the
    /// policy, but no addresses move.
    ///
    /// `address` must not be resident. If it is, a warning is logged, the hit is applied and the
    /// oracle carries on selecting a victim anyway; the answer is meaningless in that case.
    fn would_evict(&mut self, attacker_addresses: &HashSet<u64>, address: u64) -> bool;

    /// Gets the resident entry for an address, if any. Doesn't count as an access
    fn lookup(&self, address: u64) -> Option<CacheEntry>;

    /// Gets the contents of cell `(row, way)`, None if it's out of range
    fn entry(&self, row: u64, way: usize) -> Option<CacheEntry>;

    /// Gets the number of valid cells
    fn resident_count(&self) -> usize;

    /// Empties every cell
    fn flush(&mut self);

    /// Renders the whole storage, one row per line, for debugging
    fn dump(&self) -> String;

    fn geometry(&self) -> CacheGeometry;

    fn policy_kind(&self) -> ReplacementPolicyConfig;

    fn ways(&self) -> usize {
        self.geometry().ways
    }

    fn idx_width(&self) -> u32 {
        self.geometry().idx_width
    }

    fn rows(&self) -> usize {
        self.geometry().rows()
    }

    /// Total number of cells
    fn capacity(&self) -> usize {
        self.geometry().capacity()
    }
}

/// A skewed set-associative cache, parameterised by a replacement policy
///
/// Storage is a flat array of `rows * ways` cells, cell `(row, way)` living at `row * ways + way`.
/// Rather than mapping an address to one row, the indexer gives every way its own row, so the set
/// of an address is the `ways` cells `(rows[i], i)`.
#[derive(Debug, Clone)]
pub struct SkewedCache<R: ReplacementPolicy> {
    geometry: CacheGeometry,
    indexer: AddressIndexer,
    storage: Vec<CacheEntry>,
    replacement_policy: R,
}

impl<R: ReplacementPolicy> SkewedCache<R> {
    /// Fails with [`Error::InvalidGeometry`] for zero ways, an index wider than
    /// [`MAX_IDX_WIDTH`] bits, or storage which can't be allocated
    pub fn new(ways: usize, idx_width: u32, policy: R) -> Result<Self> {
        let indexer = AddressIndexer::new(ways, idx_width)?;
        if !ways.is_power_of_two() {
            warn!(ways, "Way count is not a power of two, unusual choice, might be an error");
        }
        let geometry = CacheGeometry { ways, idx_width };
        let capacity = ways
            .checked_mul(geometry.rows())
            .ok_or(Error::InvalidGeometry { ways, idx_width })?;
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| Error::InvalidGeometry { ways, idx_width })?;
        storage.resize(capacity, CacheEntry::EMPTY);
        debug!(ways, idx_width, policy = ?policy.kind(), "Created cache");
        Ok(Self {
            geometry,
            indexer,
            storage,
            replacement_policy: policy,
        })
    }

    fn cells(&self, address: u64) -> Vec<usize> {
        let ways = self.geometry.ways;
        self.indexer
            .candidate_rows(address)
            .into_iter()
            .enumerate()
            .map(|(way, row)| row as usize * ways + way)
            .collect()
    }

    fn find_hit(&self, cells: &[usize], address: u64) -> Option<usize> {
        cells.iter().position(|c| self.storage[*c].holds(address))
    }
}

impl<R: ReplacementPolicy> CacheTrait for SkewedCache<R> {
    fn candidate_rows(&self, address: u64) -> Vec<u64> {
        self.indexer.candidate_rows(address)
    }

    fn insert(&mut self, address: u64) -> Option<CacheEntry> {
        let cells = self.cells(address);
        if let Some(way) = self.find_hit(&cells, address) {
            self.replacement_policy.update_on_hit(&mut self.storage, &cells, way);
            return None;
        }
        let way = self.replacement_policy.select_victim(&self.storage, &cells);
        let victim = self.storage[cells[way]];
        self.replacement_policy.update_on_replace(&mut self.storage, &cells, way);
        self.storage[cells[way]] = CacheEntry::new(address, self.replacement_policy.new_metadata());
        if victim.is_valid() {
            trace!(address, victim = victim.address, way, "Evicted");
        }
        Some(victim)
    }

    fn would_evict(&mut self, attacker_addresses: &HashSet<u64>, address: u64) -> bool {
        let cells = self.cells(address);
        if let Some(way) = self.find_hit(&cells, address) {
            warn!(address, "Eviction oracle queried for an address which is already resident");
            self.replacement_policy.update_on_hit(&mut self.storage, &cells, way);
        }
        let way = self.replacement_policy.select_victim(&self.storage, &cells);
        let victim = self.storage[cells[way]];
        self.replacement_policy.update_on_replace(&mut self.storage, &cells, way);
        victim.is_valid() && attacker_addresses.contains(&victim.address)
    }

    fn lookup(&self, address: u64) -> Option<CacheEntry> {
        let cells = self.cells(address);
        self.find_hit(&cells, address).map(|way| self.storage[cells[way]])
    }

    fn entry(&self, row: u64, way: usize) -> Option<CacheEntry> {
        if way >= self.geometry.ways || row >= self.geometry.rows() as u64 {
            return None;
        }
        self.storage.get(row as usize * self.geometry.ways + way).copied()
    }

    fn resident_count(&self) -> usize {
        self.storage.iter().filter(|e| e.is_valid()).count()
    }

    fn flush(&mut self) {
        self.storage.fill(CacheEntry::EMPTY);
    }

    fn dump(&self) -> String {
        let mut out = String::new();
        for (row, cells) in self.storage.chunks(self.geometry.ways).enumerate() {
            let _ = write!(out, "{row}:");
            for entry in cells {
                if entry.is_valid() {
                    let _ = write!(out, " {:#018x}", entry.address);
                } else {
                    out.push_str(" -");
                }
            }
            out.push('\n');
        }
        out
    }

    fn geometry(&self) -> CacheGeometry {
        self.geometry
    }

    fn policy_kind(&self) -> ReplacementPolicyConfig {
        self.replacement_policy.kind()
    }
}

/// Enum for the three caches provided by the library
///
/// The replacement policy is picked once, at construction. Explicitly branching on every variant
/// lets the compiler see the concrete policy type in each arm.
#[derive(Debug, Clone)]
pub enum CacheStore {
    Random(SkewedCache<Random>),
    LeastRecentlyUsed(SkewedCache<LeastRecentlyUsed>),
    TreePlru(SkewedCache<TreePlru>),
}

macro_rules! dispatch {
    ($self:expr, $c:ident => $body:expr) => {
        match $self {
            CacheStore::Random($c) => $body,
            CacheStore::LeastRecentlyUsed($c) => $body,
            CacheStore::TreePlru($c) => $body,
        }
    };
}

impl CacheStore {
    /// Creates a cache with `ways * 2^idx_width` cells
    ///
    /// # Arguments
    ///
    /// * `ways`: Number of ways, should be a power of two (anything else only logs a warning)
    /// * `idx_width`: Bits of row index, each way has 2^idx_width rows
    /// * `policy`: The replacement policy
    /// * `rng`: Source of all randomness used by the policy. Unused by LRU
    ///
    /// returns: Result<CacheStore, Error>
    pub fn new(
        ways: usize,
        idx_width: u32,
        policy: ReplacementPolicyConfig,
        rng: SimRng,
    ) -> Result<Self> {
        Ok(match policy {
            ReplacementPolicyConfig::Random => {
                SkewedCache::new(ways, idx_width, Random::new(rng))?.into()
            }
            ReplacementPolicyConfig::LeastRecentlyUsed => {
                SkewedCache::new(ways, idx_width, LeastRecentlyUsed::new())?.into()
            }
            ReplacementPolicyConfig::TreePlru => {
                SkewedCache::new(ways, idx_width, TreePlru::new(rng))?.into()
            }
        })
    }

    /// Creates a cache from a policy name such as "rand", "lru" or "rplru"
    ///
    /// Unknown names are rejected before any storage is allocated
    pub fn with_policy_name(
        ways: usize,
        idx_width: u32,
        policy: &str,
        rng: SimRng,
    ) -> Result<Self> {
        let policy: ReplacementPolicyConfig = policy.parse()?;
        Self::new(ways, idx_width, policy, rng)
    }

    pub fn from_config(config: &CacheConfig, rng: SimRng) -> Result<Self> {
        Self::new(config.ways, config.idx_width, config.replacement_policy, rng)
    }
}

impl From<SkewedCache<Random>> for CacheStore {
    fn from(value: SkewedCache<Random>) -> Self {
        Self::Random(value)
    }
}

impl From<SkewedCache<LeastRecentlyUsed>> for CacheStore {
    fn from(value: SkewedCache<LeastRecentlyUsed>) -> Self {
        Self::LeastRecentlyUsed(value)
    }
}

impl From<SkewedCache<TreePlru>> for CacheStore {
    fn from(value: SkewedCache<TreePlru>) -> Self {
        Self::TreePlru(value)
    }
}

impl CacheTrait for CacheStore {
    fn candidate_rows(&self, address: u64) -> Vec<u64> {
        dispatch!(self, c => c.candidate_rows(address))
    }

    fn insert(&mut self, address: u64) -> Option<CacheEntry> {
        dispatch!(self, c => c.insert(address))
    }

    fn would_evict(&mut self, attacker_addresses: &HashSet<u64>, address: u64) -> bool {
        dispatch!(self, c => c.would_evict(attacker_addresses, address))
    }

    fn lookup(&self, address: u64) -> Option<CacheEntry> {
        dispatch!(self, c => c.lookup(address))
    }

    fn entry(&self, row: u64, way: usize) -> Option<CacheEntry> {
        dispatch!(self, c => c.entry(row, way))
    }

    fn resident_count(&self) -> usize {
        dispatch!(self, c => c.resident_count())
    }

    fn flush(&mut self) {
        dispatch!(self, c => c.flush())
    }

    fn dump(&self) -> String {
        dispatch!(self, c => c.dump())
    }

    fn geometry(&self) -> CacheGeometry {
        dispatch!(self, c => c.geometry())
    }

    fn policy_kind(&self) -> ReplacementPolicyConfig {
        dispatch!(self, c => c.policy_kind())
    }
}
