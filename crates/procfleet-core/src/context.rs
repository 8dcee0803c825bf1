//! Explicit fleet context.
//!
//! Holds the registry and the settings for one supervising process. It is
//! constructed once by the owner and passed by reference to pools and
//! managers; nothing in the workspace reaches for it globally.

use crate::registry::DeploymentRegistry;
use crate::settings::{validate_settings, Settings, SettingsError};

#[derive(Debug, Default)]
pub struct FleetContext {
    pub registry: DeploymentRegistry,
    pub settings: Settings,
}

impl FleetContext {
    /// Create a context with an empty registry and validated settings.
    pub fn new(settings: Settings) -> Result<Self, SettingsError> {
        validate_settings(&settings)?;
        Ok(Self {
            registry: DeploymentRegistry::new(),
            settings,
        })
    }

    /// Context with default settings.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            registry: DeploymentRegistry::new(),
            settings: Settings::with_defaults(),
        }
    }
}
