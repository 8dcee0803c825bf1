use procfleet_core::UploadError;
use thiserror::Error;

/// Error from the log transfer stack.
#[derive(Debug, Error)]
pub enum LogTransferError {
    #[error("log transfer needs the IP address of the log sink")]
    MissingIp,

    #[error("log transfer needs a target directory")]
    MissingTargetDir,

    /// A field a caller-provided sink must describe.
    #[error("log transfer to an external sink needs {0}")]
    MissingField(&'static str),

    #[error("log transfer server is already running on port {0}")]
    AlreadyRunning(u16),

    #[error("log transfer server was not started")]
    NotStarted,

    #[error("log transfer server was stopped and cannot be restarted")]
    NotRestartable,

    /// The process server has no client able to upload logs.
    #[error("process server {0} cannot upload log files")]
    NoUploadClient(String),

    /// Uploads were still pending when the flush deadline passed.
    #[error("timed out waiting for log uploads on {}", pending.join(", "))]
    Timeout { pending: Vec<String> },

    #[error("upload request to {server} failed: {source}")]
    Upload {
        server: String,
        #[source]
        source: UploadError,
    },

    #[error("certificate generation failed: {0}")]
    Certificate(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("failed to bind log sink to {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
