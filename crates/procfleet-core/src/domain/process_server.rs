//! Process server descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::ExitStatusBook;
use crate::ports::ProcessBackend;

/// Host id of process servers running on the local machine.
pub const LOCALHOST_HOST_ID: &str = "localhost";

/// Host id of the process server that runs tasks inside the supervising process.
pub const IN_PROCESS_HOST_ID: &str = "in-process";

/// Kind of process backend behind a process server.
///
/// Selects which supervision variant drives the deployments of that server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// The backend creates and destroys OS processes, possibly on another host.
    Remote,
    /// Process lifecycle is controlled externally; only liveness is monitored.
    Unmanaged,
    /// Tasks are instantiated inside the supervising process.
    InProcess,
}

impl BackendKind {
    /// Unmanaged processes are started by someone else under their declared
    /// names, so they cannot be renamed.
    #[must_use]
    pub const fn forbids_renaming(self) -> bool {
        matches!(self, Self::Unmanaged)
    }

    /// Whether the backend owns process creation (and therefore termination).
    #[must_use]
    pub const fn owns_processes(self) -> bool {
        !matches!(self, Self::Unmanaged)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote => write!(f, "remote"),
            Self::Unmanaged => write!(f, "unmanaged"),
            Self::InProcess => write!(f, "in-process"),
        }
    }
}

/// A registered process server.
///
/// Created by `DeploymentRegistry::register_process_server`, destroyed by
/// `DeploymentRegistry::remove_process_server`. Cloning shares the backend
/// client and its book of unclaimed exit statuses.
#[derive(Clone)]
pub struct ProcessServerConfig {
    /// Unique name of the process server.
    pub name: String,
    /// Handle to the backend.
    pub client: Arc<dyn ProcessBackend>,
    /// Directory the backend writes process logs into, if any.
    pub log_dir: Option<PathBuf>,
    /// Identifies the machine the backend runs on.
    pub host_id: String,
    /// Exit statuses reported by `client` that no supervisor claimed yet.
    pub exit_statuses: Arc<ExitStatusBook>,
}

impl ProcessServerConfig {
    pub fn new(
        name: impl Into<String>,
        client: Arc<dyn ProcessBackend>,
        log_dir: Option<PathBuf>,
        host_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            client,
            log_dir,
            host_id: host_id.into(),
            exit_statuses: Arc::new(ExitStatusBook::new()),
        }
    }

    /// Name of the simulation server paired with `name`.
    pub fn simulation_name_for(name: &str) -> String {
        format!("{name}-sim")
    }

    /// True if the backend runs on the same machine as the caller.
    pub fn on_localhost(&self) -> bool {
        self.host_id == LOCALHOST_HOST_ID || self.in_process()
    }

    /// True if the backend runs tasks inside the calling process.
    pub fn in_process(&self) -> bool {
        self.host_id == IN_PROCESS_HOST_ID
    }

    /// Kind of the backend client.
    pub fn kind(&self) -> BackendKind {
        self.client.kind()
    }
}

impl fmt::Debug for ProcessServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessServerConfig")
            .field("name", &self.name)
            .field("kind", &self.client.kind())
            .field("log_dir", &self.log_dir)
            .field("host_id", &self.host_id)
            .finish_non_exhaustive()
    }
}
