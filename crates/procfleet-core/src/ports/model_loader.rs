//! Deployment model loader port.

use std::sync::Arc;
use thiserror::Error;

use crate::domain::DeploymentModel;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelLoadError {
    #[error("project {0} cannot be resolved")]
    UnknownProject(String),

    #[error("project {project} has no deployment named {deployment}")]
    UnknownDeployment { project: String, deployment: String },
}

/// Loads deployment models from the projects a process server knows about.
///
/// Model instances are only valid for one connection to a process server;
/// after a reconnect they must be loaded again.
pub trait ModelLoader: Send + Sync {
    fn load_deployment(
        &self,
        project: &str,
        deployment: &str,
    ) -> Result<Arc<DeploymentModel>, ModelLoadError>;
}
