//! Supervision runtime for procfleet.
//!
//! [`ProcessSupervisor`] drives one configured deployment through its
//! lifecycle on top of the ports in `procfleet_core`, [`SupervisorPool`]
//! owns the supervisors of a fleet, and [`log_transfer`] ships log files to
//! a TLS log sink when the fleet shuts down.

#![deny(unsafe_code)]

pub mod backends;
pub mod log_transfer;
mod pool;
pub mod supervisor;

pub use backends::{Backend, InProcessBackend, RemoteBackend, SupervisionBackend, UnmanagedBackend};
pub use log_transfer::{
    CertificateAuthority, LogTransferConfig, LogTransferError, LogTransferManager, LogUploader,
    SecureTransferServer, TransferCredentials, TransferState,
};
pub use pool::{KnownTask, PoolEvent, SupervisorPool};
pub use supervisor::{ProcessSupervisor, SupervisorConfig, SupervisorError, SupervisorState};
