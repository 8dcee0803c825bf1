//! Owner of the running supervisors.
//!
//! The pool is what polls `verify_state` and forgets dead supervisors, and
//! it drives the shutdown sequence: kill every supervisor, ship the log
//! files, then tear the registry down.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use procfleet_core::{
    ConfiguredDeployment, FleetContext, LookupError, ProcessServerConfig, RegistryError, Settings,
    TaskRef,
};

use crate::log_transfer::{LogTransferError, LogTransferManager};
use crate::supervisor::{ProcessSupervisor, SupervisorConfig, SupervisorError, SupervisorState};

/// What [`SupervisorPool::poll`] observed.
#[derive(Debug)]
pub enum PoolEvent {
    /// A background loop failed; the supervisor is dead.
    Failed {
        deployment: String,
        error: SupervisorError,
    },
    /// The supervisor died without a recorded fault, e.g. a task stopped
    /// answering pings.
    Died { deployment: String },
}

impl PoolEvent {
    pub fn deployment(&self) -> &str {
        match self {
            Self::Failed { deployment, .. } | Self::Died { deployment } => deployment,
        }
    }
}

/// A task registered in a process server's name service, with the
/// supervisor that declares it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownTask {
    pub name: String,
    pub deployment: Option<String>,
    pub state: Option<SupervisorState>,
}

impl fmt::Display for KnownTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.deployment, self.state) {
            (Some(deployment), Some(state)) => write!(f, "{} ({deployment}, {state})", self.name),
            _ => write!(f, "{} (unsupervised)", self.name),
        }
    }
}

/// Supervisors keyed by deployment name.
#[derive(Debug, Default)]
pub struct SupervisorPool {
    config: SupervisorConfig,
    supervisors: BTreeMap<String, ProcessSupervisor>,
}

impl SupervisorPool {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            supervisors: BTreeMap::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(SupervisorConfig::from_settings(settings))
    }

    /// Start supervising `deployment` with the backend its process server
    /// calls for.
    pub async fn spawn(
        &mut self,
        ctx: &FleetContext,
        deployment: &Arc<ConfiguredDeployment>,
    ) -> Result<ProcessSupervisor, SupervisorError> {
        let server_name = deployment.process_server_name();
        let server = ctx
            .registry
            .process_server(server_name)
            .ok_or_else(|| RegistryError::UnknownServer(server_name.to_owned()))?;

        let name = deployment.deployment_name();
        if self.supervisors.get(name).is_some_and(ProcessSupervisor::is_running) {
            return Err(SupervisorError::AlreadySupervised(name.to_owned()));
        }

        let supervisor = ProcessSupervisor::new(Arc::clone(deployment), server, self.config);
        supervisor.spawn().await?;
        info!(deployment = %name, server = %server_name, kind = %supervisor.kind(), "Supervising deployment");
        self.supervisors.insert(name.to_owned(), supervisor.clone());
        Ok(supervisor)
    }

    pub fn get(&self, deployment_name: &str) -> Option<&ProcessSupervisor> {
        self.supervisors.get(deployment_name)
    }

    pub fn supervisors(&self) -> impl Iterator<Item = &ProcessSupervisor> {
        self.supervisors.values()
    }

    /// Wait for a supervised deployment, limited by the configured resolve
    /// timeout.
    pub async fn wait_running(
        &self,
        deployment_name: &str,
    ) -> Result<HashMap<String, Arc<dyn TaskRef>>, SupervisorError> {
        let supervisor = self
            .supervisors
            .get(deployment_name)
            .ok_or_else(|| RegistryError::UnknownDeployment(deployment_name.to_owned()))?;
        supervisor.wait_running_default().await
    }

    /// Every task registered in `server`'s name service, sorted, with the
    /// state of the supervisor of `server` that declares it.
    pub async fn known_tasks(
        &self,
        server: &ProcessServerConfig,
    ) -> Result<Vec<KnownTask>, LookupError> {
        let mut names = server.client.name_service().known_tasks().await?;
        names.sort();
        let tasks = names
            .into_iter()
            .map(|name| {
                let owner = self.supervisors.values().find(|s| {
                    let deployment = s.deployment();
                    deployment.process_server_name() == server.name && deployment.deploys_task(&name)
                });
                KnownTask {
                    deployment: owner.map(|s| s.name().to_owned()),
                    state: owner.map(ProcessSupervisor::state),
                    name,
                }
            })
            .collect();
        Ok(tasks)
    }

    /// Check every supervisor and drop the dead ones.
    pub fn poll(&mut self) -> Vec<PoolEvent> {
        let mut events = Vec::new();
        self.supervisors.retain(|name, supervisor| {
            if let Err(error) = supervisor.verify_state() {
                warn!(deployment = %name, error = %error, "Supervisor failed");
                events.push(PoolEvent::Failed {
                    deployment: name.clone(),
                    error,
                });
                // A recorded fault always ends in DEAD
                return false;
            }
            if supervisor.is_dead() {
                debug!(deployment = %name, "Dropping dead supervisor");
                events.push(PoolEvent::Died {
                    deployment: name.clone(),
                });
                return false;
            }
            true
        });
        events
    }

    /// Kill every supervisor. With `wait`, returns once all are dead.
    pub async fn kill_all(&mut self, wait: bool) {
        for supervisor in self.supervisors.values() {
            supervisor.kill(wait).await;
        }
        if wait {
            self.supervisors.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.supervisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.supervisors.is_empty()
    }

    /// Take the whole fleet down.
    ///
    /// Supervisors are killed first so that log files are complete. Then,
    /// when a transfer manager is given, the files in every process
    /// server's log directory are uploaded and flushed, and the sink is
    /// disposed. The registry is cleared last, even if the transfer failed.
    pub async fn shutdown(
        &mut self,
        ctx: &mut FleetContext,
        manager: Option<&mut LogTransferManager>,
    ) -> Result<(), LogTransferError> {
        self.kill_all(true).await;

        let result = match manager {
            Some(manager) => ship_logs(ctx, manager).await,
            None => Ok(()),
        };

        ctx.registry.clear();
        info!("Fleet shut down");
        result
    }
}

async fn ship_logs(
    ctx: &FleetContext,
    manager: &mut LogTransferManager,
) -> Result<(), LogTransferError> {
    let mut logs: Vec<(ProcessServerConfig, Vec<PathBuf>)> = Vec::new();
    for server in ctx.registry.process_servers() {
        let Some(dir) = server.log_dir.as_deref() else {
            continue;
        };
        if !manager.transfer_local_files_from(dir) {
            debug!(server = %server.name, "Logs already in the sink directory");
            continue;
        }
        if server.client.log_uploader().is_none() {
            warn!(server = %server.name, "Process server cannot upload logs, leaving them in place");
            continue;
        }
        let files = log_files_in(dir).await?;
        if !files.is_empty() {
            logs.push((server.clone(), files));
        }
    }

    let servers: Vec<ProcessServerConfig> = logs.iter().map(|(server, _)| server.clone()).collect();
    let transferred = if manager.is_started() {
        manager.transfer(&logs).await.map(|issued| {
            info!(files = issued, servers = servers.len(), "Transferring logs");
        })
    } else {
        Ok(())
    };
    let disposed = manager.dispose(&servers, transferred.is_ok()).await;
    transferred.and(disposed)
}

/// Regular files directly inside `dir`, sorted. A missing directory has
/// no files.
async fn log_files_in(dir: &Path) -> Result<Vec<PathBuf>, LogTransferError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
