//! Configuration for the routing core

use serde::{Deserialize, Serialize};

/// Complete dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Queue configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Depth tier configuration
    #[serde(default)]
    pub depth: DepthConfig,

    /// Maximum number of retained execution log entries
    #[serde(default = "default_execution_log_capacity")]
    pub execution_log_capacity: usize,

    /// Handler deadline applied when a request carries none
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            depth: DepthConfig::default(),
            execution_log_capacity: default_execution_log_capacity(),
            default_timeout_ms: None,
        }
    }
}

/// Dispatch queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of queued items
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

/// Depth tier limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepthConfig {
    /// Default tier limit
    #[serde(default = "default_standard_limit")]
    pub standard: u32,

    /// Limit for `extended-loop` items
    #[serde(default = "default_extended_limit")]
    pub extended: u32,

    /// Limit for `emergency` items; reaching it always terminates with an alert
    #[serde(default = "default_emergency_limit")]
    pub emergency: u32,

    /// Hard ceiling; reaching it is a panic stop
    #[serde(default = "default_absolute_limit")]
    pub absolute: u32,

    /// Maximum number of retained exhaustion events
    #[serde(default = "default_exhaustion_log_capacity")]
    pub exhaustion_log_capacity: usize,
}

impl Default for DepthConfig {
    fn default() -> Self {
        Self {
            standard: default_standard_limit(),
            extended: default_extended_limit(),
            emergency: default_emergency_limit(),
            absolute: default_absolute_limit(),
            exhaustion_log_capacity: default_exhaustion_log_capacity(),
        }
    }
}

// Default value helpers
fn default_capacity() -> usize {
    1000
}

fn default_execution_log_capacity() -> usize {
    500
}

fn default_standard_limit() -> u32 {
    7
}

fn default_extended_limit() -> u32 {
    12
}

fn default_emergency_limit() -> u32 {
    21
}

fn default_absolute_limit() -> u32 {
    33
}

fn default_exhaustion_log_capacity() -> usize {
    100
}

impl DispatchConfig {
    /// Load configuration from defaults, an optional file, and
    /// `DISPATCH_`-prefixed environment variables, in that order.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DispatchConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("DISPATCH")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.queue.capacity = capacity;
        self
    }

    pub fn with_default_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = Some(timeout_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatchConfig::default();
        assert_eq!(config.queue.capacity, 1000);
        assert_eq!(config.execution_log_capacity, 500);
        assert!(config.default_timeout_ms.is_none());
    }

    #[test]
    fn test_depth_defaults() {
        let depth = DepthConfig::default();
        assert_eq!(
            (depth.standard, depth.extended, depth.emergency, depth.absolute),
            (7, 12, 21, 33)
        );
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: DispatchConfig =
            serde_json::from_str(r#"{ "queue": { "capacity": 8 } }"#).unwrap();
        assert_eq!(config.queue.capacity, 8);
        assert_eq!(config.depth.absolute, 33);
    }

    #[test]
    fn test_load_without_file() {
        let config = DispatchConfig::load(None).unwrap();
        assert_eq!(config.depth.standard, 7);
    }
}
