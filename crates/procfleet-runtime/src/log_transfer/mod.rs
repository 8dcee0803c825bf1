//! Secure log transfer.
//!
//! A [`LogTransferManager`] runs (or points at) a TLS log sink and asks
//! process servers to upload their log files into it. Process servers on
//! this host use [`LogUploader`] as their upload client.

mod certificate;
mod config;
mod error;
mod manager;
mod protocol;
mod server;
mod uploader;

pub use certificate::CertificateAuthority;
pub use config::LogTransferConfig;
pub use error::LogTransferError;
pub use manager::{DEFAULT_USER, LogTransferManager, TransferState};
pub use protocol::{MAX_LINE_LEN, UploadHeader, UploadReply};
pub use server::{SecureTransferServer, TransferCredentials};
pub use uploader::LogUploader;
