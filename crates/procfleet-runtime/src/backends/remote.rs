use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use procfleet_core::{
    BackendKind, ConfiguredDeployment, ExitStatusBook, ProcessBackend, ProcessInfo, ProcessStatus,
};

use super::{SupervisionBackend, check_owned_startup, terminate_owned};
use crate::supervisor::SupervisorError;

/// Backend starting the deployment as an OS process through a process server.
///
/// Any rename table is accepted and forwarded, along with the full spawn
/// options.
pub struct RemoteBackend {
    client: Arc<dyn ProcessBackend>,
    exits: Arc<ExitStatusBook>,
}

impl RemoteBackend {
    pub fn new(client: Arc<dyn ProcessBackend>, exits: Arc<ExitStatusBook>) -> Self {
        Self { client, exits }
    }
}

#[async_trait]
impl SupervisionBackend for RemoteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    async fn spawn(
        &self,
        deployment: &ConfiguredDeployment,
    ) -> Result<Option<ProcessInfo>, SupervisorError> {
        let name = deployment.deployment_name();
        let info = self
            .client
            .start(
                name,
                &deployment.model().name,
                deployment.name_mappings(),
                deployment.spawn_options(),
            )
            .await?;
        debug!(process = %name, pid = ?info.pid, "Remote process started");
        Ok(Some(info))
    }

    async fn check_startup(&self, deployment: &ConfiguredDeployment) -> Result<(), SupervisorError> {
        check_owned_startup(self.client.as_ref(), deployment).await
    }

    async fn terminate(
        &self,
        deployment: &ConfiguredDeployment,
        timeout: Duration,
    ) -> Option<ProcessStatus> {
        terminate_owned(self.client.as_ref(), &self.exits, deployment, timeout).await
    }
}
