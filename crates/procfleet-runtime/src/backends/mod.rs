//! Supervision backends.
//!
//! A supervisor drives one deployment through the same state machine
//! whatever the process server is. What differs is how the process comes
//! to exist and how it goes away, which is what [`SupervisionBackend`]
//! captures. [`Backend`] selects the variant from the server's
//! [`BackendKind`].

mod in_process;
mod remote;
mod unmanaged;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use procfleet_core::{
    BackendKind, ConfiguredDeployment, ExitStatusBook, ProcessBackend, ProcessInfo,
    ProcessReadiness, ProcessServerConfig, ProcessStatus,
};

use crate::supervisor::SupervisorError;

pub use in_process::InProcessBackend;
pub use remote::RemoteBackend;
pub use unmanaged::UnmanagedBackend;

/// Process lifecycle hooks of one backend variant.
#[async_trait]
pub trait SupervisionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Validate the deployment for this backend and start its process if
    /// the backend owns process creation.
    async fn spawn(
        &self,
        deployment: &ConfiguredDeployment,
    ) -> Result<Option<ProcessInfo>, SupervisorError>;

    /// Called on every resolve iteration, before the name lookups.
    async fn check_startup(&self, deployment: &ConfiguredDeployment) -> Result<(), SupervisorError>;

    /// Stop the process, if owned, and report how it ended.
    async fn terminate(
        &self,
        deployment: &ConfiguredDeployment,
        timeout: Duration,
    ) -> Option<ProcessStatus>;
}

/// The backend variant driving a supervisor.
pub enum Backend {
    Remote(RemoteBackend),
    Unmanaged(UnmanagedBackend),
    InProcess(InProcessBackend),
}

impl Backend {
    /// Variant matching the kind of the server's client.
    pub fn for_server(server: &ProcessServerConfig) -> Self {
        let client = Arc::clone(&server.client);
        let exits = Arc::clone(&server.exit_statuses);
        match server.kind() {
            BackendKind::Remote => Self::Remote(RemoteBackend::new(client, exits)),
            BackendKind::Unmanaged => Self::Unmanaged(UnmanagedBackend::new()),
            BackendKind::InProcess => Self::InProcess(InProcessBackend::new(client, exits)),
        }
    }

    fn inner(&self) -> &dyn SupervisionBackend {
        match self {
            Self::Remote(b) => b,
            Self::Unmanaged(b) => b,
            Self::InProcess(b) => b,
        }
    }
}

#[async_trait]
impl SupervisionBackend for Backend {
    fn kind(&self) -> BackendKind {
        self.inner().kind()
    }

    async fn spawn(
        &self,
        deployment: &ConfiguredDeployment,
    ) -> Result<Option<ProcessInfo>, SupervisorError> {
        self.inner().spawn(deployment).await
    }

    async fn check_startup(&self, deployment: &ConfiguredDeployment) -> Result<(), SupervisorError> {
        self.inner().check_startup(deployment).await
    }

    async fn terminate(
        &self,
        deployment: &ConfiguredDeployment,
        timeout: Duration,
    ) -> Option<ProcessStatus> {
        self.inner().terminate(deployment, timeout).await
    }
}

// Shared by the variants that own their processes.

async fn check_owned_startup(
    client: &dyn ProcessBackend,
    deployment: &ConfiguredDeployment,
) -> Result<(), SupervisorError> {
    let process = deployment.deployment_name().to_owned();
    let mut readiness = client.wait_running(std::slice::from_ref(&process)).await?;
    match readiness.remove(&process) {
        Some(ProcessReadiness::Failed { reason }) => {
            Err(SupervisorError::ProcessFailed { process, reason })
        }
        Some(ProcessReadiness::Ready { .. } | ProcessReadiness::Pending) | None => Ok(()),
    }
}

/// How often a supervisor looks for its status in the shared book while
/// another supervisor's wait may be holding it.
const CLAIM_POLL: Duration = Duration::from_millis(10);

async fn terminate_owned(
    client: &dyn ProcessBackend,
    exits: &ExitStatusBook,
    deployment: &ConfiguredDeployment,
    timeout: Duration,
) -> Option<ProcessStatus> {
    let process = deployment.deployment_name();
    let deadline = Instant::now() + timeout;
    if let Err(e) = client.stop(process).await {
        // The process may have exited on its own already
        debug!(process = %process, error = %e, "Stop request failed");
    }
    if let Some(status) = exits.claim(process) {
        return Some(status);
    }
    match client.wait_termination(timeout).await {
        // Statuses of sibling processes are kept for their supervisors
        Ok(statuses) => exits.record(statuses),
        Err(e) => warn!(process = %process, error = %e, "Failed to wait for process termination"),
    }
    loop {
        if let Some(status) = exits.claim(process) {
            return Some(status);
        }
        let now = Instant::now();
        if now >= deadline {
            warn!(process = %process, ?timeout, "Process did not report an exit status");
            return None;
        }
        tokio::time::sleep(CLAIM_POLL.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procfleet_core::testing::MemoryBackend;

    #[test]
    fn variant_follows_client_kind() {
        for (client, kind) in [
            (MemoryBackend::remote(), BackendKind::Remote),
            (MemoryBackend::unmanaged(), BackendKind::Unmanaged),
            (MemoryBackend::in_process(), BackendKind::InProcess),
        ] {
            let server = ProcessServerConfig::new("s", Arc::new(client), None, "localhost");
            assert_eq!(Backend::for_server(&server).kind(), kind);
        }
    }

    fn owned_deployment(name: &str) -> ConfiguredDeployment {
        let model = Arc::new(procfleet_core::DeploymentModel::new("pkg", name, Vec::<String>::new()));
        ConfiguredDeployment::new("s", model, Default::default(), Default::default())
    }

    #[tokio::test]
    async fn terminate_leaves_sibling_statuses_for_their_owners() {
        let client = MemoryBackend::remote();
        let exits = ExitStatusBook::new();
        let (a, b) = (owned_deployment("a"), owned_deployment("b"));
        for deployment in [&a, &b] {
            client
                .start(
                    deployment.deployment_name(),
                    "pkg",
                    deployment.name_mappings(),
                    deployment.spawn_options(),
                )
                .await
                .unwrap();
        }
        client.set_exit_status("a", ProcessStatus::Exited(3));
        client.set_exit_status("b", ProcessStatus::Exited(4));

        // Both processes end before either supervisor waits
        client.stop("b").await.unwrap();
        let timeout = Duration::from_millis(200);
        assert_eq!(
            terminate_owned(&client, &exits, &a, timeout).await,
            Some(ProcessStatus::Exited(3))
        );
        assert_eq!(exits.len(), 1);
        assert_eq!(
            terminate_owned(&client, &exits, &b, timeout).await,
            Some(ProcessStatus::Exited(4))
        );
        assert!(exits.is_empty());
    }
}
