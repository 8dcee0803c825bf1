//! Settings domain types and validation.
//!
//! Timing knobs for supervision and log transfer. These are pure domain
//! types; the only I/O is [`Settings::load`] reading a JSON file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default period of the resolve and monitor loops.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default time given to a stopped process to report its exit status.
pub const DEFAULT_TERMINATION_TIMEOUT_MS: u64 = 5_000;

/// Default period of the log flush polling loop.
pub const DEFAULT_FLUSH_POLL_PERIOD_MS: u64 = 100;

/// Default deadline for all log uploads to complete.
pub const DEFAULT_FLUSH_TIMEOUT_MS: u64 = 600_000;

/// Supervision and log transfer settings.
///
/// All fields are optional to support partial updates and graceful defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Period of the resolve and monitor loops, in milliseconds.
    pub poll_interval_ms: Option<u64>,

    /// How long `wait_running` blocks by default. `None` blocks indefinitely.
    pub resolve_timeout_ms: Option<u64>,

    /// Consecutive name service communication failures tolerated while
    /// resolving. `None` retries forever.
    pub max_resolve_failures: Option<u32>,

    /// Time given to a stopped process to report its exit status.
    pub termination_timeout_ms: Option<u64>,

    /// Period of the log flush polling loop, in milliseconds.
    pub flush_poll_period_ms: Option<u64>,

    /// Deadline for log uploads to complete, in milliseconds.
    pub flush_timeout_ms: Option<u64>,

    /// Upload rate cap in bytes per second. `None` means unlimited.
    pub default_max_upload_rate: Option<u64>,

    /// Per process server upload rate caps, overriding the default.
    pub max_upload_rates: BTreeMap<String, u64>,
}

impl Settings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub const fn with_defaults() -> Self {
        Self {
            poll_interval_ms: Some(DEFAULT_POLL_INTERVAL_MS),
            resolve_timeout_ms: None,
            max_resolve_failures: None,
            termination_timeout_ms: Some(DEFAULT_TERMINATION_TIMEOUT_MS),
            flush_poll_period_ms: Some(DEFAULT_FLUSH_POLL_PERIOD_MS),
            flush_timeout_ms: Some(DEFAULT_FLUSH_TIMEOUT_MS),
            default_max_upload_rate: None,
            max_upload_rates: BTreeMap::new(),
        }
    }

    /// Read and validate settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::Read(format!("{}: {e}", path.display())))?;
        let settings: Self =
            serde_json::from_str(&content).map_err(|e| SettingsError::Parse(e.to_string()))?;
        validate_settings(&settings)?;
        Ok(settings)
    }

    #[must_use]
    pub const fn effective_poll_interval(&self) -> Duration {
        Duration::from_millis(match self.poll_interval_ms {
            Some(ms) => ms,
            None => DEFAULT_POLL_INTERVAL_MS,
        })
    }

    /// `None` means "block indefinitely".
    #[must_use]
    pub const fn effective_resolve_timeout(&self) -> Option<Duration> {
        match self.resolve_timeout_ms {
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        }
    }

    #[must_use]
    pub const fn effective_termination_timeout(&self) -> Duration {
        Duration::from_millis(match self.termination_timeout_ms {
            Some(ms) => ms,
            None => DEFAULT_TERMINATION_TIMEOUT_MS,
        })
    }

    #[must_use]
    pub const fn effective_flush_poll_period(&self) -> Duration {
        Duration::from_millis(match self.flush_poll_period_ms {
            Some(ms) => ms,
            None => DEFAULT_FLUSH_POLL_PERIOD_MS,
        })
    }

    #[must_use]
    pub const fn effective_flush_timeout(&self) -> Duration {
        Duration::from_millis(match self.flush_timeout_ms {
            Some(ms) => ms,
            None => DEFAULT_FLUSH_TIMEOUT_MS,
        })
    }

    /// Merge another settings into this one, only updating fields that are Some.
    pub fn merge(&mut self, other: &SettingsUpdate) {
        if let Some(ref ms) = other.poll_interval_ms {
            self.poll_interval_ms = *ms;
        }
        if let Some(ref ms) = other.resolve_timeout_ms {
            self.resolve_timeout_ms = *ms;
        }
        if let Some(ref max) = other.max_resolve_failures {
            self.max_resolve_failures = *max;
        }
        if let Some(ref ms) = other.termination_timeout_ms {
            self.termination_timeout_ms = *ms;
        }
        if let Some(ref ms) = other.flush_poll_period_ms {
            self.flush_poll_period_ms = *ms;
        }
        if let Some(ref ms) = other.flush_timeout_ms {
            self.flush_timeout_ms = *ms;
        }
        if let Some(ref rate) = other.default_max_upload_rate {
            self.default_max_upload_rate = *rate;
        }
        if let Some(ref rates) = other.max_upload_rates {
            self.max_upload_rates.clone_from(rates);
        }
    }
}

/// Partial settings update.
///
/// Each scalar field is `Option<Option<T>>`:
/// - `None` = don't change this field
/// - `Some(None)` = set field to None/null
/// - `Some(Some(value))` = set field to value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub poll_interval_ms: Option<Option<u64>>,
    pub resolve_timeout_ms: Option<Option<u64>>,
    pub max_resolve_failures: Option<Option<u32>>,
    pub termination_timeout_ms: Option<Option<u64>>,
    pub flush_poll_period_ms: Option<Option<u64>>,
    pub flush_timeout_ms: Option<Option<u64>>,
    pub default_max_upload_rate: Option<Option<u64>>,
    pub max_upload_rates: Option<BTreeMap<String, u64>>,
}

/// Settings validation error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("Upload rate for {0} must be greater than zero")]
    ZeroUploadRate(String),

    #[error("Max resolve failures must be at least 1")]
    ZeroResolveFailures,

    #[error("Failed to read settings file {0}")]
    Read(String),

    #[error("Failed to parse settings: {0}")]
    Parse(String),
}

/// Validate settings values.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    let durations = [
        ("poll_interval_ms", settings.poll_interval_ms),
        ("resolve_timeout_ms", settings.resolve_timeout_ms),
        ("termination_timeout_ms", settings.termination_timeout_ms),
        ("flush_poll_period_ms", settings.flush_poll_period_ms),
        ("flush_timeout_ms", settings.flush_timeout_ms),
    ];
    for (field, value) in durations {
        if value == Some(0) {
            return Err(SettingsError::ZeroDuration { field });
        }
    }

    if settings.max_resolve_failures == Some(0) {
        return Err(SettingsError::ZeroResolveFailures);
    }

    if settings.default_max_upload_rate == Some(0) {
        return Err(SettingsError::ZeroUploadRate("default".to_string()));
    }

    if let Some((server, _)) = settings.max_upload_rates.iter().find(|(_, rate)| **rate == 0) {
        return Err(SettingsError::ZeroUploadRate(server.clone()));
    }

    Ok(())
}
