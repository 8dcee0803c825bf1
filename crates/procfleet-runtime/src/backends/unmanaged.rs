use async_trait::async_trait;
use std::time::Duration;

use procfleet_core::{BackendKind, ConfiguredDeployment, ProcessInfo, ProcessStatus};

use super::SupervisionBackend;
use crate::supervisor::SupervisorError;

/// Backend for processes started and stopped by someone else.
///
/// Nothing is spawned or terminated; the supervisor only resolves and
/// pings the tasks. Since the tasks are started under their declared names,
/// every name mapping must be the identity.
#[derive(Debug, Default)]
pub struct UnmanagedBackend;

impl UnmanagedBackend {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SupervisionBackend for UnmanagedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Unmanaged
    }

    async fn spawn(
        &self,
        deployment: &ConfiguredDeployment,
    ) -> Result<Option<ProcessInfo>, SupervisorError> {
        let renamed: Vec<String> = deployment
            .non_identity_mappings()
            .map(|(from, to)| format!("{from} => {to}"))
            .collect();
        if renamed.is_empty() {
            Ok(None)
        } else {
            Err(SupervisorError::NameMappingForbidden {
                deployment: deployment.deployment_name().to_owned(),
                mappings: renamed.join(", "),
            })
        }
    }

    async fn check_startup(&self, _deployment: &ConfiguredDeployment) -> Result<(), SupervisorError> {
        Ok(())
    }

    async fn terminate(
        &self,
        _deployment: &ConfiguredDeployment,
        _timeout: Duration,
    ) -> Option<ProcessStatus> {
        None
    }
}
