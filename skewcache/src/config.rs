use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::Error;

/// A configuration with several independent caches. Each experiment runs against every one of them
#[derive(Debug, Deserialize)]
pub struct LayeredConfig {
    pub caches: Vec<CacheConfig>,
}

/// A configuration for a single skewed cache
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub name: String,
    pub ways: usize,
    /// Each way has 2^idx_width rows
    pub idx_width: u32,
    #[serde(default = "ReplacementPolicyConfig::default")]
    pub replacement_policy: ReplacementPolicyConfig,
}

/// The replacement policy - rand, lru, or rplru. Defaults to rand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplacementPolicyConfig {
    #[serde(alias = "rand", alias = "random")]
    Random,
    #[serde(alias = "lru")]
    LeastRecentlyUsed,
    #[serde(alias = "rplru", alias = "tree_plru")]
    TreePlru,
}

impl Default for ReplacementPolicyConfig {
    fn default() -> Self {
        ReplacementPolicyConfig::Random
    }
}

impl FromStr for ReplacementPolicyConfig {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rand" | "random" => Ok(Self::Random),
            "lru" => Ok(Self::LeastRecentlyUsed),
            "rplru" | "tree_plru" | "treeplru" => Ok(Self::TreePlru),
            _ => Err(Error::UnknownPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for ReplacementPolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Random => write!(f, "rand"),
            Self::LeastRecentlyUsed => write!(f, "lru"),
            Self::TreePlru => write!(f, "rplru"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_policy_names() {
        assert_eq!("RAND".parse::<ReplacementPolicyConfig>().unwrap(), ReplacementPolicyConfig::Random);
        assert_eq!("lru".parse::<ReplacementPolicyConfig>().unwrap(), ReplacementPolicyConfig::LeastRecentlyUsed);
        assert_eq!("RPLRU".parse::<ReplacementPolicyConfig>().unwrap(), ReplacementPolicyConfig::TreePlru);
        assert!(matches!("mru".parse::<ReplacementPolicyConfig>(), Err(Error::UnknownPolicy(_))));
    }

    #[test]
    fn display_parses_back() {
        for policy in [
            ReplacementPolicyConfig::Random,
            ReplacementPolicyConfig::LeastRecentlyUsed,
            ReplacementPolicyConfig::TreePlru,
        ] {
            assert_eq!(policy.to_string().parse::<ReplacementPolicyConfig>().unwrap(), policy);
        }
    }

    #[test]
    fn reads_json_config() {
        let json = r#"{"caches": [
            {"name": "w=4, N=64", "ways": 4, "idx_width": 4, "replacement_policy": "rplru"},
            {"name": "default", "ways": 8, "idx_width": 3}
        ]}"#;
        let config: LayeredConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.caches.len(), 2);
        assert_eq!(config.caches[0].replacement_policy, ReplacementPolicyConfig::TreePlru);
        assert_eq!(config.caches[1].replacement_policy, ReplacementPolicyConfig::Random);
    }

    #[test]
    fn rejects_unknown_policy_in_json() {
        let json = r#"{"name": "x", "ways": 4, "idx_width": 4, "replacement_policy": "fifo"}"#;
        assert!(serde_json::from_str::<CacheConfig>(json).is_err());
    }
}
