//! Per-deployment process supervision.
//!
//! One [`ProcessSupervisor`] drives one configured deployment through
//! `CREATED -> SPAWNING -> RESOLVING -> READY -> MONITORING -> DEAD`.
//! Cancellation is cooperative: `kill` cancels a token that both background
//! loops check on every iteration.

mod config;
mod error;
mod handle;
mod monitor;
mod resolve;
mod state;

pub use config::SupervisorConfig;
pub use error::SupervisorError;
pub use handle::ProcessSupervisor;
pub use state::SupervisorState;
