//! Log upload client port.
//!
//! A process server ships its log files to the central sink itself; the
//! supervising side only issues requests and polls the bookkeeping.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    /// The request was rejected before any transfer started.
    #[error("invalid upload request: {0}")]
    InvalidRequest(String),

    /// The upload client cannot be reached.
    #[error("upload client unavailable: {0}")]
    Unavailable(String),
}

/// One file to send to the log sink.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogUploadRequest {
    /// Address of the sink.
    pub ip: IpAddr,
    /// Port of the sink.
    pub port: u16,
    /// PEM certificate the sink's TLS certificate must chain to.
    pub certificate: String,
    pub user: String,
    pub password: String,
    /// File to upload, on the process server's host.
    pub path: PathBuf,
    /// Upload rate cap in bytes per second (`None` = unlimited).
    pub max_upload_rate: Option<u64>,
}

impl fmt::Debug for LogUploadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogUploadRequest")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("path", &self.path)
            .field("max_upload_rate", &self.max_upload_rate)
            .finish_non_exhaustive()
    }
}

/// Outcome of one finished upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogUploadResult {
    /// File that was uploaded.
    pub path: PathBuf,
    /// Whether the sink acknowledged the file.
    pub success: bool,
    /// Bytes sent.
    pub bytes: u64,
    /// Error description for failed uploads.
    pub message: Option<String>,
}

impl LogUploadResult {
    pub fn succeeded(path: impl Into<PathBuf>, bytes: u64) -> Self {
        Self {
            path: path.into(),
            success: true,
            bytes,
            message: None,
        }
    }

    pub fn failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            success: false,
            bytes: 0,
            message: Some(message.into()),
        }
    }
}

/// Snapshot of an upload client's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogUploadState {
    /// Uploads requested but not finished.
    pub pending_count: usize,
    /// Uploads finished since the previous snapshot.
    pub results: Vec<LogUploadResult>,
}

/// Client-side log upload interface of a process server.
#[async_trait]
pub trait LogUploadClient: Send + Sync {
    /// Queue an upload. Returns once the request is accepted, not when the
    /// transfer completes.
    async fn log_upload_file(&self, request: LogUploadRequest) -> Result<(), UploadError>;

    /// Current bookkeeping. Completed results are handed out exactly once.
    async fn log_upload_state(&self) -> Result<LogUploadState, UploadError>;
}
