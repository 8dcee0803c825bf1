//! Process backend trait definition.
//!
//! This port defines the contract every process server client implements,
//! whether it starts processes on a remote host, only watches externally
//! managed ones, or instantiates tasks inside the current process.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use super::{LogUploadClient, ModelLoader, NameService, ProcessError};
use crate::domain::{BackendKind, NameMappings, ProcessStatus, SpawnOptions};

/// What the backend knows about a process it just started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Name the process was started under.
    pub name: String,
    /// Process ID on the backend host, when there is one.
    pub pid: Option<u32>,
}

impl ProcessInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, pid: Option<u32>) -> Self {
        Self {
            name: name.into(),
            pid,
        }
    }
}

/// Per-process answer of [`ProcessBackend::wait_running`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ProcessReadiness {
    /// The process is still starting up.
    Pending,
    /// The process is up; `iors` maps task names to their references.
    Ready { iors: BTreeMap<String, String> },
    /// The process failed before becoming ready.
    Failed { reason: String },
}

/// Client of a process server.
///
/// # Design Rules
///
/// - Express **intent**, not implementation detail
/// - Must support: in-memory test backend, remote backend, unmanaged watcher
/// - `disconnect` is synchronous so registry teardown stays synchronous
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    /// Which supervision variant drives this backend's deployments.
    fn kind(&self) -> BackendKind;

    /// Start the process `name` running the deployment `deployment_name`.
    async fn start(
        &self,
        name: &str,
        deployment_name: &str,
        name_mappings: &NameMappings,
        options: &SpawnOptions,
    ) -> Result<ProcessInfo, ProcessError>;

    /// Report the readiness of the given processes.
    async fn wait_running(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, ProcessReadiness>, ProcessError>;

    /// Ask the backend to stop the process `name`.
    async fn stop(&self, name: &str) -> Result<(), ProcessError>;

    /// Wait up to `timeout` for stopped processes and report their exit status.
    async fn wait_termination(
        &self,
        timeout: Duration,
    ) -> Result<HashMap<String, ProcessStatus>, ProcessError>;

    /// Drop the connection to the backend.
    fn disconnect(&self);

    /// Name service the backend's tasks register into.
    fn name_service(&self) -> Arc<dyn NameService>;

    /// Loader for the deployment models this backend can run.
    fn model_loader(&self) -> Arc<dyn ModelLoader>;

    /// Client able to ship this backend's log files, if it supports it.
    fn log_uploader(&self) -> Option<Arc<dyn LogUploadClient>> {
        None
    }
}
