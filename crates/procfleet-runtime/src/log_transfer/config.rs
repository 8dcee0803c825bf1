use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use procfleet_core::Settings;

/// Where logs go and how fast they may get there.
///
/// A self-spawned configuration only needs `ip` and `target_dir`: the
/// manager generates certificates and credentials and fills in the port once
/// the sink is listening. An external configuration describes a sink someone
/// else runs, so every connection field has to be provided.
#[derive(Clone)]
pub struct LogTransferConfig {
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub target_dir: Option<PathBuf>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// PEM certificate the sink's TLS certificate chains to.
    pub certificate: Option<String>,
    pub self_spawned: bool,
    /// Upload rate cap in bytes per second. `None` means unlimited.
    pub default_max_upload_rate: Option<u64>,
    /// Per process server upload rate caps.
    pub max_upload_rates: BTreeMap<String, u64>,
    pub flush_poll_period: Duration,
    pub flush_timeout: Duration,
}

impl Default for LogTransferConfig {
    fn default() -> Self {
        let settings = Settings::with_defaults();
        Self {
            ip: None,
            port: None,
            target_dir: None,
            user: None,
            password: None,
            certificate: None,
            self_spawned: true,
            default_max_upload_rate: None,
            max_upload_rates: BTreeMap::new(),
            flush_poll_period: settings.effective_flush_poll_period(),
            flush_timeout: settings.effective_flush_timeout(),
        }
    }
}

impl LogTransferConfig {
    /// Sink started and owned by this process.
    pub fn self_spawned(ip: IpAddr, target_dir: impl Into<PathBuf>) -> Self {
        Self {
            ip: Some(ip),
            target_dir: Some(target_dir.into()),
            ..Self::default()
        }
    }

    /// Sink run by someone else.
    pub fn external(
        ip: IpAddr,
        port: u16,
        target_dir: impl Into<PathBuf>,
        user: impl Into<String>,
        password: impl Into<String>,
        certificate: impl Into<String>,
    ) -> Self {
        Self {
            ip: Some(ip),
            port: Some(port),
            target_dir: Some(target_dir.into()),
            user: Some(user.into()),
            password: Some(password.into()),
            certificate: Some(certificate.into()),
            self_spawned: false,
            ..Self::default()
        }
    }

    /// Take rate caps and flush timing from `settings`.
    #[must_use]
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.default_max_upload_rate = settings.default_max_upload_rate;
        self.max_upload_rates = settings.max_upload_rates.clone();
        self.flush_poll_period = settings.effective_flush_poll_period();
        self.flush_timeout = settings.effective_flush_timeout();
        self
    }

    /// Rate cap for uploads from `process_server`.
    pub fn max_upload_rate_for(&self, process_server: &str) -> Option<u64> {
        self.max_upload_rates
            .get(process_server)
            .copied()
            .or(self.default_max_upload_rate)
    }
}

impl fmt::Debug for LogTransferConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogTransferConfig")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("target_dir", &self.target_dir)
            .field("user", &self.user)
            .field("self_spawned", &self.self_spawned)
            .field("default_max_upload_rate", &self.default_max_upload_rate)
            .field("max_upload_rates", &self.max_upload_rates)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_server_rate_overrides_default() {
        let mut config = LogTransferConfig::self_spawned("127.0.0.1".parse().unwrap(), "/tmp/x");
        config.default_max_upload_rate = Some(1000);
        config.max_upload_rates.insert("slow".into(), 10);

        assert_eq!(config.max_upload_rate_for("slow"), Some(10));
        assert_eq!(config.max_upload_rate_for("other"), Some(1000));
    }

    #[test]
    fn settings_carry_over() {
        let settings = Settings {
            default_max_upload_rate: Some(42),
            flush_timeout_ms: Some(1_000),
            ..Settings::with_defaults()
        };
        let config = LogTransferConfig::default().with_settings(&settings);
        assert_eq!(config.default_max_upload_rate, Some(42));
        assert_eq!(config.flush_timeout, Duration::from_secs(1));
    }

    #[test]
    fn debug_hides_secrets() {
        let config = LogTransferConfig::external(
            "10.0.0.1".parse().unwrap(),
            2121,
            "/logs",
            "user",
            "hunter2",
            "PEM",
        );
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
