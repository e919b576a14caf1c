//! Configuration file support for linkpingd
//!
//! Loads and validates the daemon configuration from a TOML file.
//! Default location: /etc/linkpingd.conf
//!
//! Configuration is read once at startup and is immutable afterwards; every
//! problem found here is fatal before any probe session starts.

use crate::error::{LinkpingError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/linkpingd.conf";

/// Smallest accepted probe interval, seconds
pub const MIN_INTERVAL_SECS: f64 = 1.0;
/// Largest accepted probe interval, seconds
pub const MAX_INTERVAL_SECS: f64 = 86_400.0;
/// Smallest accepted per-probe timeout, seconds
pub const MIN_TIMEOUT_SECS: f64 = 1.0;
/// Largest accepted per-probe timeout, seconds
pub const MAX_TIMEOUT_SECS: f64 = 180.0;

/// One monitored (device, address) pair
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetConfig {
    /// Interface whose up/down state gates probing
    pub device: String,

    /// Destination to probe, host name or address literal
    pub address: String,

    /// Probe cadence in seconds
    pub interval: f64,

    /// Per-probe deadline in seconds
    pub timeout: f64,
}

impl TargetConfig {
    /// Probe cadence as a Duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval)
    }

    /// Per-probe deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }
}

/// Complete daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Monitored targets, keyed by section name
    #[serde(default)]
    pub targets: BTreeMap<String, TargetConfig>,
}

impl Config {
    /// Load and validate configuration from a file
    ///
    /// A missing or unparsable file is a fatal configuration error; there
    /// is no default fallback because an empty target set is itself
    /// invalid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            LinkpingError::Config(format!("cannot open config file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| LinkpingError::Config(format!("cannot parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the target set
    pub fn validate(&self) -> Result<()> {
        if self.targets.is_empty() {
            return Err(LinkpingError::Config(
                "no targets configured, nothing to watch".to_string(),
            ));
        }

        for (name, target) in &self.targets {
            if target.device.is_empty() {
                return Err(LinkpingError::Config(format!(
                    "target \"{}\": device must not be empty",
                    name
                )));
            }
            if target.address.is_empty() {
                return Err(LinkpingError::Config(format!(
                    "target \"{}\": address must not be empty",
                    name
                )));
            }
            if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&target.interval) {
                return Err(LinkpingError::Config(format!(
                    "target \"{}\": interval {} out of range {}-{}",
                    name, target.interval, MIN_INTERVAL_SECS, MAX_INTERVAL_SECS
                )));
            }
            if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&target.timeout) {
                return Err(LinkpingError::Config(format!(
                    "target \"{}\": timeout {} out of range {}-{}",
                    name, target.timeout, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
                )));
            }
        }

        Ok(())
    }
}
