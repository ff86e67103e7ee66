use std::io::BufRead;
use std::time::{Duration, Instant};
use serde::{Deserialize, Serialize};
use crate::cache::{CacheStore, CacheTrait};
use crate::error::{Error, Result};

/// Replays address traces against a cache and collects results
///
/// It supports calling simulate multiple times, the cache keeps its contents and the results and
/// time taken accumulate
pub struct TraceSimulator {
    cache: CacheStore,
    result: TraceResult,
    simulation_time: Duration,
}

/// The result of replaying a trace. Can be serialised to the output format
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct TraceResult {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    /// Misses which displaced a resident entry, rather than filling an empty cell
    pub evictions: u64,
}

impl TraceSimulator {
    pub fn new(name: &str, cache: CacheStore) -> Self {
        Self {
            cache,
            result: TraceResult {
                name: name.to_string(),
                ..TraceResult::default()
            },
            simulation_time: Duration::new(0, 0),
        }
    }

    /// Accesses a single address
    pub fn access(&mut self, address: u64) {
        match self.cache.insert(address) {
            None => self.result.hits += 1,
            Some(victim) => {
                self.result.misses += 1;
                if victim.is_valid() {
                    self.result.evictions += 1;
                }
            }
        }
    }

    /// Replays a trace of one address per line
    ///
    /// Addresses are hexadecimal, with or without a `0x` prefix. Blank lines and anything after a
    /// `#` are ignored. A malformed line stops the replay, the accesses before it still count
    ///
    /// # Arguments
    ///
    /// * `reader`: The trace
    ///
    /// returns: Result<&TraceResult, Error>
    pub fn simulate<R: BufRead>(&mut self, reader: R) -> Result<&TraceResult> {
        let start = Instant::now();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if let Some(address) = parse_address(&line).map_err(|_| Error::TraceParse {
                line: index + 1,
                content: line.clone(),
            })? {
                self.access(address);
            }
        }
        self.simulation_time += start.elapsed();
        Ok(&self.result)
    }

    pub fn result(&self) -> &TraceResult {
        &self.result
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Gets the wall-clock execution time for processing
    pub fn get_execution_time(&self) -> &Duration {
        &self.simulation_time
    }
}

/// Parses one trace line
///
/// returns: Result<Option<u64>, ParseIntError>, None for lines without an address
///
/// # Examples
///
/// ```
/// use skewcache::simulator::parse_address;
/// assert_eq!(parse_address("0x1F"), Ok(Some(31)));
/// assert_eq!(parse_address("  # comment"), Ok(None));
/// ```
pub fn parse_address(line: &str) -> std::result::Result<Option<u64>, std::num::ParseIntError> {
    let content = line.split('#').next().unwrap_or("").trim();
    if content.is_empty() {
        return Ok(None);
    }
    let digits = content
        .strip_prefix("0x")
        .or_else(|| content.strip_prefix("0X"))
        .unwrap_or(content);
    u64::from_str_radix(digits, 16).map(Some)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use rand::SeedableRng;
    use crate::config::ReplacementPolicyConfig;
    use crate::SimRng;
    use super::*;

    fn simulator() -> TraceSimulator {
        let cache = CacheStore::new(4, 4, ReplacementPolicyConfig::LeastRecentlyUsed, SimRng::seed_from_u64(0)).unwrap();
        TraceSimulator::new("test", cache)
    }

    #[test]
    fn counts_hits_and_misses() {
        let mut sim = simulator();
        let trace = "0x10\n0x20\n# comment\n\n10\n20 # again\n";
        let result = sim.simulate(Cursor::new(trace)).unwrap();
        assert_eq!(result.hits, 2);
        assert_eq!(result.misses, 2);
        assert_eq!(result.evictions, 0);
    }

    #[test]
    fn reports_malformed_lines() {
        let mut sim = simulator();
        let err = sim.simulate(Cursor::new("0x10\nnot an address\n")).unwrap_err();
        assert!(matches!(err, Error::TraceParse { line: 2, .. }));
        assert_eq!(sim.result().misses, 1);
    }

    #[test]
    fn overflowing_trace_evicts() {
        let mut sim = simulator();
        let trace: String = (1..=200u64).map(|a| format!("{a:x}\n")).collect();
        let result = sim.simulate(Cursor::new(trace)).unwrap();
        assert_eq!(result.misses, 200);
        assert!(result.evictions >= 200 - 64);
        assert!(sim.cache().resident_count() <= 64);
    }
}
