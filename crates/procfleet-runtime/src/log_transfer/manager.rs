//! Log transfer orchestration.
//!
//! [`LogTransferManager`] owns the sink side (certificates and the TLS
//! server) and drives uploads through each process server's own
//! [`LogUploadClient`]. Uploads are fire-and-forget; [`LogTransferManager::flush`]
//! polls the clients until they report nothing pending.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use procfleet_core::{LogUploadClient, LogUploadRequest, LogUploadResult, ProcessServerConfig};

use super::certificate::CertificateAuthority;
use super::config::LogTransferConfig;
use super::server::{SecureTransferServer, TransferCredentials};
use super::LogTransferError;

/// User name given to a self-spawned sink when none is configured.
pub const DEFAULT_USER: &str = "procfleet";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Unstarted,
    Started,
    Stopped,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Started => "started",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Connection parameters handed to upload clients.
struct Endpoint<'a> {
    ip: IpAddr,
    port: u16,
    certificate: &'a str,
    user: &'a str,
    password: &'a str,
}

pub struct LogTransferManager {
    config: LogTransferConfig,
    state: TransferState,
    authority: Option<CertificateAuthority>,
    server: Option<SecureTransferServer>,
}

impl LogTransferManager {
    /// Validate `config` and create an unstarted manager.
    pub fn new(config: LogTransferConfig) -> Result<Self, LogTransferError> {
        if config.ip.is_none() {
            return Err(LogTransferError::MissingIp);
        }
        if config.target_dir.is_none() {
            return Err(LogTransferError::MissingTargetDir);
        }
        if !config.self_spawned {
            if config.port.is_none() {
                return Err(LogTransferError::MissingField("port"));
            }
            if config.certificate.is_none() {
                return Err(LogTransferError::MissingField("certificate"));
            }
            if config.user.is_none() {
                return Err(LogTransferError::MissingField("user"));
            }
            if config.password.is_none() {
                return Err(LogTransferError::MissingField("password"));
            }
        }
        Ok(Self {
            config,
            state: TransferState::Unstarted,
            authority: None,
            server: None,
        })
    }

    /// Start the sink and return the port it listens on.
    ///
    /// For an external sink this only marks the manager as started.
    pub async fn server_start(&mut self) -> Result<u16, LogTransferError> {
        match self.state {
            TransferState::Started => {
                return Err(LogTransferError::AlreadyRunning(
                    self.config.port.unwrap_or_default(),
                ));
            }
            TransferState::Stopped => return Err(LogTransferError::NotRestartable),
            TransferState::Unstarted => {}
        }

        if !self.config.self_spawned {
            let port = self.config.port.ok_or(LogTransferError::MissingField("port"))?;
            self.state = TransferState::Started;
            info!(port, "Using external log sink");
            return Ok(port);
        }

        let ip = self.config.ip.ok_or(LogTransferError::MissingIp)?;
        let target_dir = self
            .config
            .target_dir
            .clone()
            .ok_or(LogTransferError::MissingTargetDir)?;

        let authority = CertificateAuthority::generate(ip)?;
        let user = self
            .config
            .user
            .get_or_insert_with(|| DEFAULT_USER.to_owned())
            .clone();
        let password = self
            .config
            .password
            .get_or_insert_with(|| Uuid::new_v4().simple().to_string())
            .clone();

        let server = SecureTransferServer::start(
            ip,
            target_dir,
            TransferCredentials::new(user, password),
            authority.server_config()?,
        )
        .await?;

        let port = server.port();
        self.config.port = Some(port);
        self.config.certificate = Some(authority.certificate().to_owned());
        self.authority = Some(authority);
        self.server = Some(server);
        self.state = TransferState::Started;
        Ok(port)
    }

    /// Ask every process server to upload its files. Returns the number of
    /// requests issued; completion is tracked by [`Self::flush`].
    pub async fn transfer(
        &self,
        logs: &[(ProcessServerConfig, Vec<PathBuf>)],
    ) -> Result<usize, LogTransferError> {
        let endpoint = self.endpoint()?;
        let clients = logs
            .iter()
            .map(|(server, files)| Ok((server, uploader_of(server)?, files)))
            .collect::<Result<Vec<_>, LogTransferError>>()?;

        let mut issued = 0;
        for (server, client, files) in clients {
            let max_upload_rate = self.config.max_upload_rate_for(&server.name);
            for path in files {
                let request = LogUploadRequest {
                    ip: endpoint.ip,
                    port: endpoint.port,
                    certificate: endpoint.certificate.to_owned(),
                    user: endpoint.user.to_owned(),
                    password: endpoint.password.to_owned(),
                    path: path.clone(),
                    max_upload_rate,
                };
                client
                    .log_upload_file(request)
                    .await
                    .map_err(|source| LogTransferError::Upload {
                        server: server.name.clone(),
                        source,
                    })?;
                issued += 1;
            }
            debug!(server = %server.name, files = files.len(), "Requested log uploads");
        }
        Ok(issued)
    }

    /// Poll the upload clients of `servers` until none has uploads pending.
    ///
    /// Returns the results collected per process server. Fails with
    /// [`LogTransferError::Timeout`] once `timeout` has passed; results
    /// collected so far are not returned in that case.
    pub async fn flush(
        &self,
        servers: &[ProcessServerConfig],
        poll_period: Duration,
        timeout: Duration,
    ) -> Result<BTreeMap<String, Vec<LogUploadResult>>, LogTransferError> {
        let mut pending = servers
            .iter()
            .map(|server| Ok((server.name.clone(), uploader_of(server)?)))
            .collect::<Result<BTreeMap<_, _>, LogTransferError>>()?;
        let mut results: BTreeMap<String, Vec<LogUploadResult>> = pending
            .keys()
            .map(|name| (name.clone(), Vec::new()))
            .collect();

        let deadline = Instant::now() + timeout;
        loop {
            let mut done = Vec::new();
            for (name, client) in &pending {
                let state = client
                    .log_upload_state()
                    .await
                    .map_err(|source| LogTransferError::Upload {
                        server: name.clone(),
                        source,
                    })?;
                results.entry(name.clone()).or_default().extend(state.results);
                if state.pending_count == 0 {
                    done.push(name.clone());
                }
            }
            for name in done {
                pending.remove(&name);
            }

            if pending.is_empty() {
                return Ok(results);
            }
            let now = Instant::now();
            if now >= deadline {
                let pending: Vec<String> = pending.into_keys().collect();
                warn!(pending = ?pending, "Log flush timed out");
                return Err(LogTransferError::Timeout { pending });
            }
            tokio::time::sleep(poll_period.min(deadline - now)).await;
        }
    }

    /// Flush with the configured poll period and timeout.
    pub async fn flush_all(
        &self,
        servers: &[ProcessServerConfig],
    ) -> Result<BTreeMap<String, Vec<LogUploadResult>>, LogTransferError> {
        self.flush(servers, self.config.flush_poll_period, self.config.flush_timeout)
            .await
    }

    /// Optionally flush, then stop the sink and remove the certificates.
    ///
    /// The sink is torn down even when the flush fails; the flush error is
    /// returned afterwards.
    pub async fn dispose(
        &mut self,
        servers: &[ProcessServerConfig],
        flush: bool,
    ) -> Result<(), LogTransferError> {
        let flushed = if flush && self.state == TransferState::Started {
            self.flush_all(servers).await.map(drop)
        } else {
            Ok(())
        };

        if let Some(mut server) = self.server.take() {
            server.stop().await;
        }
        let disposed = match self.authority.take() {
            Some(mut authority) => authority.dispose(),
            None => Ok(()),
        };
        if self.state != TransferState::Stopped {
            info!("Log transfer stopped");
        }
        self.state = TransferState::Stopped;

        flushed.and(disposed)
    }

    /// Whether files in `dir` still have to be uploaded, i.e. `dir` is not
    /// the sink's own target directory.
    pub fn transfer_local_files_from(&self, dir: &Path) -> bool {
        let Some(target_dir) = self.config.target_dir.as_deref() else {
            return true;
        };
        match (std::fs::canonicalize(dir), std::fs::canonicalize(target_dir)) {
            (Ok(dir), Ok(target_dir)) => dir != target_dir,
            _ => dir != target_dir,
        }
    }

    pub const fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == TransferState::Started
    }

    pub const fn config(&self) -> &LogTransferConfig {
        &self.config
    }

    pub const fn port(&self) -> Option<u16> {
        self.config.port
    }

    pub fn user(&self) -> Option<&str> {
        self.config.user.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.config.password.as_deref()
    }

    pub fn certificate(&self) -> Option<&str> {
        self.config.certificate.as_deref()
    }

    pub fn target_dir(&self) -> Option<&Path> {
        self.config.target_dir.as_deref()
    }

    /// CA certificate on disk, for a running self-spawned sink.
    pub fn ca_certificate_path(&self) -> Option<PathBuf> {
        self.authority
            .as_ref()
            .and_then(CertificateAuthority::ca_certificate_path)
    }

    fn endpoint(&self) -> Result<Endpoint<'_>, LogTransferError> {
        if self.state != TransferState::Started {
            return Err(LogTransferError::NotStarted);
        }
        let config = &self.config;
        Ok(Endpoint {
            ip: config.ip.ok_or(LogTransferError::MissingIp)?,
            port: config.port.ok_or(LogTransferError::MissingField("port"))?,
            certificate: config
                .certificate
                .as_deref()
                .ok_or(LogTransferError::MissingField("certificate"))?,
            user: config
                .user
                .as_deref()
                .ok_or(LogTransferError::MissingField("user"))?,
            password: config
                .password
                .as_deref()
                .ok_or(LogTransferError::MissingField("password"))?,
        })
    }
}

fn uploader_of(server: &ProcessServerConfig) -> Result<Arc<dyn LogUploadClient>, LogTransferError> {
    server
        .client
        .log_uploader()
        .ok_or_else(|| LogTransferError::NoUploadClient(server.name.clone()))
}

impl fmt::Debug for LogTransferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogTransferManager")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("authority", &self.authority)
            .finish_non_exhaustive()
    }
}
