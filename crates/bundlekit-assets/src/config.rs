//! Runtime configuration for the asset system.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::InitError;
use crate::scheduler::DEFAULT_MAX_CONCURRENCY;

/// Configuration for an [`AssetSystem`](crate::AssetSystem).
///
/// Missing fields take their defaults, so `{}` is a valid configuration.
///
/// ```
/// use bundlekit_assets::AssetSystemConfig;
///
/// let config = AssetSystemConfig::from_json_str(r#"{ "max_concurrency": 4 }"#).unwrap();
/// assert_eq!(config.max_concurrency, 4);
/// assert_eq!(config.default_timeout_ms, 30_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetSystemConfig {
    /// Maximum number of physical bundle loads in flight at once.
    pub max_concurrency: usize,
    /// Timeout used by `load_asset_default`, in milliseconds.
    pub default_timeout_ms: u64,
    /// Lifecycle events kept until drained. Zero disables recording.
    pub event_capacity: usize,
}

impl Default for AssetSystemConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            default_timeout_ms: 30_000,
            event_capacity: 1024,
        }
    }
}

impl AssetSystemConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self, InitError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the concurrency bound.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Set the default timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the event buffer capacity.
    pub fn with_event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }

    /// Reject values the system cannot run with.
    pub fn validate(&self) -> Result<(), InitError> {
        if self.max_concurrency == 0 {
            return Err(InitError::InvalidConfig(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(InitError::InvalidConfig(
                "default_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The default timeout as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}
