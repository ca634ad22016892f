//! Block configuration module.
//!
//! This module provides configuration loading for the join pushdown block
//! from environment variables.
//!
//! # Environment Variables
//!
//! - `SPJ_NODE_ID`: Data node id this block runs on (default: `1`)
//! - `SPJ_MAX_REQUESTS`: Capacity of the request pool (default: `1024`)
//! - `SPJ_ARENA_WORDS`: Per-request arena budget in 32-bit words (default: `65536`)
//! - `SPJ_SCAN_PRIORITY`: Scan priority used when the caller supplies none (default: `1`)
//! - `SPJ_FRAGMENTS`: Fragments per table for the hash distribution (default: `4`)
//!
//! # Invariants
//!
//! - `node_id` is a valid data node id (1-63)
//! - `max_requests` fits the 16-bit slot field of a node handle
//! - `arena_words`, `scan_priority` and `fragments` are never zero

use crate::types::{MAX_DATA_NODE_ID, NodeId};

/// Block configuration.
///
/// # Post-conditions
///
/// When constructed via `from_env()` or `from_lookup()`, every field
/// satisfies the module invariants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockConfig {
    /// Data node this block instance belongs to.
    pub node_id: NodeId,
    /// Maximum number of concurrently live requests.
    pub max_requests: usize,
    /// Arena budget of a single request, in words.
    pub arena_words: usize,
    /// Scan priority hint for root scans that do not carry one.
    pub scan_priority: u32,
    /// Fragments per table used by the hash distribution.
    pub fragments: u32,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(Self::DEFAULT_NODE_ID),
            max_requests: Self::DEFAULT_MAX_REQUESTS,
            arena_words: Self::DEFAULT_ARENA_WORDS,
            scan_priority: Self::DEFAULT_SCAN_PRIORITY,
            fragments: Self::DEFAULT_FRAGMENTS,
        }
    }
}

impl BlockConfig {
    /// Default data node id.
    pub const DEFAULT_NODE_ID: u16 = 1;
    /// Default request pool capacity.
    pub const DEFAULT_MAX_REQUESTS: usize = 1024;
    /// Default per-request arena budget.
    pub const DEFAULT_ARENA_WORDS: usize = 65536;
    /// Default scan priority.
    pub const DEFAULT_SCAN_PRIORITY: u32 = 1;
    /// Default fragment count per table.
    pub const DEFAULT_FRAGMENTS: u32 = 4;
    /// Upper bound of `max_requests`, imposed by the 16-bit slot in node handles.
    pub const MAX_REQUESTS_LIMIT: usize = 1 << 16;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is set to an unparsable or
    /// out-of-range value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables take their defaults.
    ///
    /// # Errors
    ///
    /// Same as [`BlockConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let node_id = Self::load_node_id(&lookup)?;
        let max_requests = load_ranged(
            &lookup,
            "SPJ_MAX_REQUESTS",
            Self::DEFAULT_MAX_REQUESTS,
            1,
            Self::MAX_REQUESTS_LIMIT,
        )?;
        let arena_words = load_ranged(
            &lookup,
            "SPJ_ARENA_WORDS",
            Self::DEFAULT_ARENA_WORDS,
            1,
            usize::MAX,
        )?;
        let scan_priority = load_ranged(
            &lookup,
            "SPJ_SCAN_PRIORITY",
            Self::DEFAULT_SCAN_PRIORITY,
            1,
            u32::MAX,
        )?;
        let fragments = load_ranged(&lookup, "SPJ_FRAGMENTS", Self::DEFAULT_FRAGMENTS, 1, 1024)?;

        Ok(Self {
            node_id,
            max_requests,
            arena_words,
            scan_priority,
            fragments,
        })
    }

    /// Load the node id.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is set but not a data node id.
    fn load_node_id(lookup: &impl Fn(&str) -> Option<String>) -> Result<NodeId, ConfigError> {
        let id = load_ranged(
            lookup,
            "SPJ_NODE_ID",
            Self::DEFAULT_NODE_ID,
            1,
            MAX_DATA_NODE_ID,
        )?;
        Ok(NodeId(id))
    }
}

/// Parse an optional numeric variable and check it against `min..=max`.
fn load_ranged<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(value) = lookup(name) else {
        return Ok(default);
    };
    let parsed = value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("'{value}' is not a number"),
        })?;
    if parsed < min || parsed > max {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            message: format!("{parsed} is outside {min}..={max}"),
        });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = BlockConfig::from_lookup(|_| None).expect("defaults load");
        assert_eq!(config, BlockConfig::default());
        assert_eq!(config.node_id, NodeId(1));
        assert_eq!(config.max_requests, 1024);
        assert_eq!(config.arena_words, 65536);
    }

    #[test]
    fn test_overrides() {
        let config = BlockConfig::from_lookup(lookup_from(&[
            ("SPJ_NODE_ID", "7"),
            ("SPJ_MAX_REQUESTS", "16"),
            ("SPJ_ARENA_WORDS", " 512 "),
            ("SPJ_SCAN_PRIORITY", "3"),
            ("SPJ_FRAGMENTS", "8"),
        ]))
        .expect("valid config");
        assert_eq!(config.node_id, NodeId(7));
        assert_eq!(config.max_requests, 16);
        assert_eq!(config.arena_words, 512);
        assert_eq!(config.scan_priority, 3);
        assert_eq!(config.fragments, 8);
    }

    #[test]
    fn test_node_id_out_of_range() {
        let err = BlockConfig::from_lookup(lookup_from(&[("SPJ_NODE_ID", "64")]))
            .expect_err("node 64 is not a data node");
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                name: "SPJ_NODE_ID".to_string(),
                message: "64 is outside 1..=63".to_string(),
            }
        );
    }

    #[test]
    fn test_unparsable_value() {
        let err = BlockConfig::from_lookup(lookup_from(&[("SPJ_ARENA_WORDS", "lots")]))
            .expect_err("not a number");
        assert_eq!(
            err.to_string(),
            "invalid value for SPJ_ARENA_WORDS: 'lots' is not a number"
        );
    }

    #[test]
    fn test_zero_requests_rejected() {
        assert!(BlockConfig::from_lookup(lookup_from(&[("SPJ_MAX_REQUESTS", "0")])).is_err());
    }
}
