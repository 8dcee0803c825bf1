use procfleet_core::{LookupError, ProcessError, RegistryError};
use thiserror::Error;

use super::SupervisorState;

/// Error from supervisor operations and background supervision loops.
#[derive(Debug, Clone, Error)]
pub enum SupervisorError {
    /// The backend cannot rename tasks but the deployment asks for it.
    #[error("deployment {deployment} cannot be renamed on an unmanaged process server ({mappings})")]
    NameMappingForbidden {
        deployment: String,
        mappings: String,
    },

    /// The operation is not valid in the current state.
    #[error("cannot {operation} a supervisor in state {state}")]
    InvalidState {
        operation: &'static str,
        state: SupervisorState,
    },

    /// Task resolution has not completed.
    #[error("task {0} is not running yet")]
    NotRunning(String),

    /// The deployment declares no such task.
    #[error("deployment does not declare a task named {0}")]
    UnknownTask(String),

    /// The process server rejected a request.
    #[error(transparent)]
    Backend(#[from] ProcessError),

    /// A name lookup failed permanently.
    #[error("cannot resolve task {task}: {source}")]
    Lookup {
        task: String,
        #[source]
        source: LookupError,
    },

    /// The name service kept failing while resolving.
    #[error("giving up on task {task} after {failures} consecutive name service failures")]
    TooManyResolveFailures { task: String, failures: u32 },

    /// The process failed before its tasks became reachable.
    #[error("process {process} failed during startup: {reason}")]
    ProcessFailed { process: String, reason: String },

    /// `wait_running` gave up.
    #[error("timed out waiting for tasks: {}", pending.join(", "))]
    ResolveTimeout { pending: Vec<String> },

    /// The supervisor died before its tasks became reachable.
    #[error("deployment {0} is dead")]
    Dead(String),

    /// A background loop panicked.
    #[error("supervision loop panicked: {0}")]
    Panicked(String),

    /// A deployment with this name is already supervised.
    #[error("deployment {0} is already supervised")]
    AlreadySupervised(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}
