//! Port definitions (trait abstractions) for external systems.
//!
//! Ports define the interfaces the supervision core expects from process
//! backends, name services, model loaders and log upload clients. They
//! contain no implementation details and use only domain types.
//!
//! # Design Rules
//!
//! - No transport types (sockets, TLS, CORBA-like stubs) in any signature
//! - Lookups return typed errors that separate "not yet" from "never"
//! - Every backend variant (remote, unmanaged, in-process) implements the
//!   same [`ProcessBackend`] contract

pub mod log_upload;
pub mod model_loader;
pub mod name_service;
pub mod process_backend;
pub mod task_ref;

use thiserror::Error;

pub use log_upload::{LogUploadClient, LogUploadRequest, LogUploadResult, LogUploadState, UploadError};
pub use model_loader::{ModelLoadError, ModelLoader};
pub use name_service::{LookupError, NameService};
pub use process_backend::{ProcessBackend, ProcessInfo, ProcessReadiness};
pub use task_ref::{CommunicationError, TaskRef};

/// Domain-specific errors for process backend operations.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// Failed to start the process.
    #[error("Failed to start {name}: {reason}")]
    StartFailed { name: String, reason: String },

    /// Failed to stop the process.
    #[error("Failed to stop {name}: {reason}")]
    StopFailed { name: String, reason: String },

    /// The process is not known to the backend.
    #[error("Process not running: {0}")]
    NotRunning(String),

    /// The backend connection is gone.
    #[error("Backend disconnected: {0}")]
    Disconnected(String),

    /// Internal backend error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors raised by the deployment registry.
///
/// All of them are raised synchronously by the call that caused them and
/// leave the registry unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A process server with this name is already registered.
    #[error("there is already a process server registered as {0}")]
    DuplicateServer(String),

    /// No process server with this name is registered.
    #[error("there is no process server registered as {0}")]
    UnknownServer(String),

    /// A deployed task name is already owned by another deployment.
    #[error("task name {task} is already used by deployment {owner}")]
    TaskNameAlreadyInUse { task: String, owner: String },

    /// The deployment is not registered.
    #[error("deployment {0} is not registered")]
    UnknownDeployment(String),

    /// Another deployment on the same process server already uses this
    /// deployment (process) name.
    #[error("process server {server} already has a deployment named {name}")]
    DuplicateDeployment { name: String, server: String },
}
