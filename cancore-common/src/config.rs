//! Stack configuration
//!
//! The configuration is stored as TOML, and loaded with [`StackConfig::load_from_str`] or
//! [`StackConfig::load_from_file`].
//!
//! # Example
//!
//! ```toml
//! # The node ID of the remote device, added to node-relative COB-IDs
//! node_id = 5
//!
//! [pdo]
//! # How long a dictionary read of an RPDO-backed object waits for the first frame
//! buffer_timeout_ms = 1000
//! # What to do with received frames whose length does not match the mapping:
//! # "ignore", "warn" or "error"
//! framing = "warn"
//! ```
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use snafu::{ResultExt, Snafu};

use crate::node_id::NodeId;

/// Error returned when loading a [`StackConfig`]
#[derive(Debug, Snafu)]
pub enum ConfigError {
    /// The config file could not be read
    #[snafu(display("Failed to read config file {path}: {source}"))]
    Io {
        /// The path which was being read
        path: String,
        /// The underlying IO error
        source: std::io::Error,
    },
    /// The config could not be parsed
    #[snafu(display("Failed to parse config: {source}"))]
    Parse {
        /// The underlying TOML error
        source: toml::de::Error,
    },
}

/// How a received frame whose length disagrees with the mapped length is reported
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingPolicy {
    /// Reject the frame without escalating any status
    Ignore,
    /// Reject the frame and escalate to WARN on the next read pass
    #[default]
    Warn,
    /// Reject the frame and escalate to ERROR on the next read pass
    Error,
}

fn default_buffer_timeout_ms() -> u64 {
    1000
}

/// Configuration of the PDO mapper
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PdoConfig {
    /// Deadline of the blocking dictionary read of an RPDO buffer, in milliseconds
    #[serde(default = "default_buffer_timeout_ms")]
    pub buffer_timeout_ms: u64,
    /// Policy for frame length mismatches
    #[serde(default)]
    pub framing: FramingPolicy,
}

impl Default for PdoConfig {
    fn default() -> Self {
        Self {
            buffer_timeout_ms: default_buffer_timeout_ms(),
            framing: FramingPolicy::default(),
        }
    }
}

impl PdoConfig {
    /// The buffer read deadline as a Duration
    pub fn buffer_timeout(&self) -> Duration {
        Duration::from_millis(self.buffer_timeout_ms)
    }
}

/// Top level configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// Node ID of the device whose dictionary is being mapped
    pub node_id: NodeId,
    /// PDO mapper settings
    #[serde(default)]
    pub pdo: PdoConfig,
}

impl StackConfig {
    /// Read a configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).context(IoSnafu {
            path: path.display().to_string(),
        })?;
        Self::load_from_str(&s)
    }

    /// Read a configuration from a TOML string
    pub fn load_from_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).context(ParseSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = StackConfig::load_from_str("node_id = 3").unwrap();
        assert_eq!(3, cfg.node_id.raw());
        assert_eq!(Duration::from_secs(1), cfg.pdo.buffer_timeout());
        assert_eq!(FramingPolicy::Warn, cfg.pdo.framing);
    }

    #[test]
    fn test_pdo_section() {
        const CFG: &str = r#"
            node_id = 12

            [pdo]
            buffer_timeout_ms = 250
            framing = "error"
        "#;
        let cfg = StackConfig::load_from_str(CFG).unwrap();
        assert_eq!(Duration::from_millis(250), cfg.pdo.buffer_timeout());
        assert_eq!(FramingPolicy::Error, cfg.pdo.framing);
    }

    #[test]
    fn test_invalid_node_id() {
        assert!(StackConfig::load_from_str("node_id = 0").is_err());
        assert!(StackConfig::load_from_str("node_id = 200").is_err());
    }

    #[test]
    fn test_unknown_field() {
        let result = StackConfig::load_from_str("node_id = 1\nbitrate = 500");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }
}
