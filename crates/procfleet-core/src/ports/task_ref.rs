//! Task reference port.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// A call to a remote task did not get through.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("communication with {task} failed: {message}")]
pub struct CommunicationError {
    pub task: String,
    pub message: String,
}

impl CommunicationError {
    pub fn new(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            message: message.into(),
        }
    }
}

/// Opaque handle used to address and ping one running task instance.
#[async_trait]
pub trait TaskRef: Send + Sync + fmt::Debug {
    /// Deployed name of the task.
    fn name(&self) -> &str;

    /// Stringified reference (IOR-equivalent) of the task.
    fn ior(&self) -> &str;

    /// Round-trip to the task. Any error means the task is gone.
    async fn ping(&self) -> Result<(), CommunicationError>;

    /// Ask the task to stop its processing.
    async fn stop(&self) -> Result<(), CommunicationError>;

    /// Ask the task to release its resources.
    async fn cleanup(&self) -> Result<(), CommunicationError>;
}
