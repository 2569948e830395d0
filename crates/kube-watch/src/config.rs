//! Watch configuration.
//!
//! Values come from defaults or from `KUBE_WATCH_*` environment variables.

use crate::error::ConfigError;
use crate::frame::DEFAULT_MAX_FRAME_BYTES;
use std::time::Duration;

/// Environment variable for [`WatchConfig::max_frame_bytes`]
pub const ENV_MAX_FRAME_BYTES: &str = "KUBE_WATCH_MAX_FRAME_BYTES";
/// Environment variable for [`WatchConfig::backoff_min`], in seconds
pub const ENV_BACKOFF_MIN_SECS: &str = "KUBE_WATCH_BACKOFF_MIN_SECS";
/// Environment variable for [`WatchConfig::backoff_max`], in seconds
pub const ENV_BACKOFF_MAX_SECS: &str = "KUBE_WATCH_BACKOFF_MAX_SECS";

/// Settings for watch sessions and the caller-side reconnect helpers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Longest line accepted from the stream
    pub max_frame_bytes: usize,
    /// First reconnect delay
    pub backoff_min: Duration,
    /// Cap on the reconnect delay
    pub backoff_max: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            backoff_min: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

impl WatchConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// unset keys.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_frame_bytes = match lookup(ENV_MAX_FRAME_BYTES) {
            Some(raw) => parse_positive(ENV_MAX_FRAME_BYTES, &raw)?,
            None => defaults.max_frame_bytes,
        };
        let backoff_min = match lookup(ENV_BACKOFF_MIN_SECS) {
            Some(raw) => Duration::from_secs(parse_positive(ENV_BACKOFF_MIN_SECS, &raw)?),
            None => defaults.backoff_min,
        };
        let backoff_max = match lookup(ENV_BACKOFF_MAX_SECS) {
            Some(raw) => Duration::from_secs(parse_positive(ENV_BACKOFF_MAX_SECS, &raw)?),
            None => defaults.backoff_max,
        };

        if backoff_max < backoff_min {
            return Err(ConfigError::InvalidValue {
                key: ENV_BACKOFF_MAX_SECS.to_string(),
                value: backoff_max.as_secs().to_string(),
                reason: format!(
                    "must not be below {ENV_BACKOFF_MIN_SECS} ({}s)",
                    backoff_min.as_secs()
                ),
            });
        }

        Ok(Self {
            max_frame_bytes,
            backoff_min,
            backoff_max,
        })
    }
}

fn parse_positive<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
{
    let invalid = |reason: String| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
        reason,
    };
    let value: T = raw.trim().parse().map_err(|e: T::Err| invalid(e.to_string()))?;
    if value == T::default() {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(value)
}
