use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use procfleet_core::{
    BackendKind, ConfiguredDeployment, ExitStatusBook, ProcessBackend, ProcessInfo, ProcessStatus,
    SpawnOptions,
};

use super::{SupervisionBackend, check_owned_startup, terminate_owned};
use crate::supervisor::SupervisorError;

/// Backend instantiating the deployment's tasks inside the supervising
/// process.
///
/// Renaming is allowed. There is no separate OS process, so command line
/// arguments and environment are dropped; only the working directory is
/// forwarded.
pub struct InProcessBackend {
    client: Arc<dyn ProcessBackend>,
    exits: Arc<ExitStatusBook>,
}

impl InProcessBackend {
    pub fn new(client: Arc<dyn ProcessBackend>, exits: Arc<ExitStatusBook>) -> Self {
        Self { client, exits }
    }
}

#[async_trait]
impl SupervisionBackend for InProcessBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    async fn spawn(
        &self,
        deployment: &ConfiguredDeployment,
    ) -> Result<Option<ProcessInfo>, SupervisorError> {
        let name = deployment.deployment_name();
        let requested = deployment.spawn_options();
        if !requested.cmdline_args.is_empty() || !requested.env.is_empty() {
            warn!(
                deployment = %name,
                "Ignoring command line and environment of an in-process deployment"
            );
        }
        let options = SpawnOptions {
            working_directory: requested.working_directory.clone(),
            ..SpawnOptions::default()
        };

        let info = self
            .client
            .start(name, &deployment.model().name, deployment.name_mappings(), &options)
            .await?;
        debug!(deployment = %name, "In-process deployment instantiated");
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
