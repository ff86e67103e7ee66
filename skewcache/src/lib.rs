//! # SkewCache
//!
//! SkewCache models the storage and replacement behaviour of a randomized, skewed-associative cache
//! or TLB, making visible exactly which entry is replaced on every access
//!
//! It doesn't attempt to model timing or memory hierarchies. Instead it gives ground truth about
//! cache contents, which makes it useful for studying eviction set construction against randomized
//! caches. On top of the cache it provides a validator for generalized eviction sets and a
//! simulation of the prime, prune and probe attack
//!
//! All randomness comes from explicitly seeded generators, so a fixed seed reproduces a run exactly

use rand::Rng;

/// Contains the skewed cache, its entries, and the enum over the provided replacement policies
pub mod cache;

/// Contains definitions for the JSON configuration format
pub mod config;

/// Contains the error type shared by the library
pub mod error;

/// Contains the validator for generalized eviction sets
pub mod eviction_set;

/// Contains the prime, prune and probe attack simulation
pub mod attack;

/// Contains experiments measuring how hard eviction is for each configuration
pub mod experiments;

/// Contains the per-way address indexing
pub mod indexer;

/// Contains file reading helpers for address traces
pub mod io;

/// Contains the provided replacement policies, with a trait for implementing custom replacement
/// policies
pub mod replacement_policies;

/// Contains the simulator used to replay address traces against a cache
pub mod simulator;


/// The generator every randomized component draws from. Seed it with `SeedableRng::seed_from_u64`
pub type SimRng = rand_chacha::ChaCha8Rng;

/// Draws a fresh, uniformly random 64-bit address
pub fn random_address(rng: &mut SimRng) -> u64 {
    rng.gen()
}
