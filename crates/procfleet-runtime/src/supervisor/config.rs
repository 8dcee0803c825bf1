use std::time::Duration;

use procfleet_core::Settings;

/// Timing of one supervisor's background loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Period of the resolve and monitor loops.
    pub poll_interval: Duration,
    /// Consecutive name service communication failures tolerated while
    /// resolving. `None` retries forever.
    pub max_resolve_failures: Option<u32>,
    /// Time given to a stopped process to report its exit status.
    pub termination_timeout: Duration,
    /// Default limit of `wait_running`. `None` blocks until the supervisor
    /// settles.
    pub resolve_timeout: Option<Duration>,
}

impl SupervisorConfig {
    pub const fn from_settings(settings: &Settings) -> Self {
        Self {
            poll_interval: settings.effective_poll_interval(),
            max_resolve_failures: settings.max_resolve_failures,
            termination_timeout: settings.effective_termination_timeout(),
            resolve_timeout: settings.effective_resolve_timeout(),
        }
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub const fn with_max_resolve_failures(mut self, max: Option<u32>) -> Self {
        self.max_resolve_failures = max;
        self
    }

    #[must_use]
    pub const fn with_resolve_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.resolve_timeout = timeout;
        self
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::with_defaults())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_from_settings() {
        let settings = Settings {
            poll_interval_ms: Some(20),
            max_resolve_failures: Some(3),
            resolve_timeout_ms: Some(1_500),
            ..Settings::with_defaults()
        };
        let config = SupervisorConfig::from_settings(&settings);
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.max_resolve_failures, Some(3));
        assert_eq!(config.termination_timeout, Duration::from_secs(5));
        assert_eq!(config.resolve_timeout, Some(Duration::from_millis(1_500)));
        assert_eq!(SupervisorConfig::default().resolve_timeout, None);
    }
}
