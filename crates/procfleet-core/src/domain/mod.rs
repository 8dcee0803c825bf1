//! Domain types shared by the registry, the supervisors and the log transfer stack.
//!
//! These are plain data types with no I/O. Backend handles are carried as
//! port trait objects (see [`crate::ports`]).

mod deployment;
mod process_server;
mod process_status;

pub use deployment::{ConfiguredDeployment, DeploymentId, DeploymentModel, NameMappings, SpawnOptions};
pub use process_server::{BackendKind, IN_PROCESS_HOST_ID, LOCALHOST_HOST_ID, ProcessServerConfig};
pub use process_status::{ExitStatusBook, ProcessStatus};
