//! Defines the unified error surface for running the plugin host.

use keel_plugins::PluginError;
use thiserror::Error;

use crate::bootstrap::BootstrapError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the host process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrapping the host failed.
    #[error("host bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// Plugin activation hit a host-fatal error.
    #[error("plugin activation halted the host: {source}")]
    Plugins {
        /// Underlying plugin error.
        #[source]
        source: PluginError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<PluginError> for LaunchError {
    fn from(source: PluginError) -> Self {
        Self::Plugins { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}
