//! Supervisor lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`super::ProcessSupervisor`].
///
/// ```text
/// CREATED -> SPAWNING -> RESOLVING -> READY -> MONITORING -> DEAD
///               \___________\___________\________\__> KILLING -> DEAD
/// ```
///
/// `DEAD` is terminal; a dead supervisor is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Created,
    Spawning,
    Resolving,
    Ready,
    Monitoring,
    Killing,
    Dead,
}

impl SupervisorState {
    /// States from which `kill` goes through `KILLING`.
    pub const ACTIVE: [Self; 4] = [Self::Spawning, Self::Resolving, Self::Ready, Self::Monitoring];

    #[must_use]
    pub const fn is_dead(self) -> bool {
        matches!(self, Self::Dead)
    }

    /// Tasks are resolved and reachable.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Monitoring)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Spawning => "SPAWNING",
            Self::Resolving => "RESOLVING",
            Self::Ready => "READY",
            Self::Monitoring => "MONITORING",
            Self::Killing => "KILLING",
            Self::Dead => "DEAD",
        };
        f.write_str(s)
    }
}
