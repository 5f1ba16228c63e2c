//! TOML configuration.
//!
//! Every field is optional. Durations are given in (fractional) seconds.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(30);
const DEFAULT_STALE_THRESHOLD: Duration = Duration::from_secs(120);

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub registry: RegistryConfig,
    pub status: StatusConfig,
}

impl Config {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.registry.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

/// Route table timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// How often stale endpoints are pruned. Zero disables pruning.
    #[serde(deserialize_with = "secs::deserialize")]
    pub prune_interval: Duration,

    /// Maximum age of an unrefreshed registration.
    #[serde(deserialize_with = "secs::deserialize")]
    pub stale_threshold: Duration,

    /// How long a failed endpoint is skipped. Defaults to a quarter of
    /// `stale_threshold`.
    #[serde(deserialize_with = "secs::deserialize_opt")]
    pub retry_after_failure: Option<Duration>,
}

impl RegistryConfig {
    pub fn retry_after_failure(&self) -> Duration {
        self.retry_after_failure
            .unwrap_or(self.stale_threshold / 4)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stale_threshold.is_zero() {
            return Err(ConfigError::Invalid(
                "registry.stale_threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prune_interval: DEFAULT_PRUNE_INTERVAL,
            stale_threshold: DEFAULT_STALE_THRESHOLD,
            retry_after_failure: None,
        }
    }
}

/// Introspection HTTP server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusConfig {
    pub listen: SocketAddr,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    fn to_duration<E: Error>(secs: f64) -> Result<Duration, E> {
        Duration::try_from_secs_f64(secs)
            .map_err(|_| E::custom(format!("invalid duration: {} seconds", secs)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        to_duration(f64::deserialize(d)?)
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<f64>::deserialize(d)?
            .map(to_duration)
            .transpose()
    }
}
