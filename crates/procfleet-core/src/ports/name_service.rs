//! Name service port.
//!
//! Tasks register under their deployed name once their process is up.
//! Until then a lookup answers [`LookupError::NotYetAvailable`], which
//! callers treat as "poll again later".

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use super::TaskRef;

/// Why a name lookup did not produce a task reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The name is not registered (yet).
    #[error("{0} is not registered in the name service yet")]
    NotYetAvailable(String),

    /// The name service could not be reached.
    #[error("cannot reach the name service: {0}")]
    Communication(String),

    /// The name resolved to something that will never be a usable task.
    #[error("lookup failed permanently: {0}")]
    PermanentFailure(String),
}

impl LookupError {
    /// Whether polling again may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NotYetAvailable(_) | Self::Communication(_))
    }
}

/// Registry of running task references, keyed by deployed task name.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Resolve `name` to a task reference.
    async fn get(&self, name: &str) -> Result<Arc<dyn TaskRef>, LookupError>;

    /// Names of every task currently registered.
    async fn known_tasks(&self) -> Result<Vec<String>, LookupError>;
}
