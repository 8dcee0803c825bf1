//! Core domain types, ports and deployment registry for procfleet.
//!
//! This crate has no transport code: process servers, name services and
//! log upload clients are reached through the traits in [`ports`], and the
//! runtime crate provides the supervision machinery on top of them.

pub mod context;
pub mod domain;
pub mod ports;
pub mod registry;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use context::FleetContext;
pub use domain::{
    BackendKind, ConfiguredDeployment, DeploymentId, DeploymentModel, ExitStatusBook, IN_PROCESS_HOST_ID,
    LOCALHOST_HOST_ID, NameMappings, ProcessServerConfig, ProcessStatus, SpawnOptions,
};
pub use ports::{
    CommunicationError, LogUploadClient, LogUploadRequest, LogUploadResult,
    LogUploadState, LookupError, ModelLoadError, ModelLoader, NameService, ProcessBackend,
    ProcessError, ProcessInfo, ProcessReadiness, RegistryError, TaskRef, UploadError,
};
pub use registry::{DeploymentRegistry, NameFilter};
pub use settings::{
    DEFAULT_FLUSH_POLL_PERIOD_MS, DEFAULT_FLUSH_TIMEOUT_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TERMINATION_TIMEOUT_MS, Settings, SettingsError, SettingsUpdate, validate_settings,
};
