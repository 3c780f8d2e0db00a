//! Domain errors raised by plugin discovery, activation and supervision.
//!
//! All errors use `thiserror`-derived enums with structured context so callers
//! can inspect the failure programmatically. I/O errors are wrapped in `Arc`
//! to satisfy the `result_large_err` Clippy lint.
//!
//! Only [`PluginError::HelperPathEscape`] is host-fatal; every other variant
//! is contained at the boundary of the plugin that raised it.

use std::path::PathBuf;
use std::sync::Arc;

use keel_config::TemplateError;
use thiserror::Error;

/// Errors arising from plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A manifest was readable but failed validation.
    #[error("invalid manifest '{path}': {message}")]
    Manifest {
        /// Manifest file.
        path: PathBuf,
        /// Description of the validation failure.
        message: String,
    },

    /// A manifest could not be parsed.
    #[error("failed to parse manifest '{path}': {source}")]
    ManifestParse {
        /// Manifest file.
        path: PathBuf,
        /// Underlying TOML error.
        #[source]
        source: Box<toml::de::Error>,
    },

    /// A filesystem operation failed.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A path template from configuration could not be expanded.
    #[error("invalid path template: {source}")]
    Template {
        /// Underlying expansion error.
        #[source]
        source: TemplateError,
    },

    /// The native module could not be loaded.
    #[error("failed to load native module '{path}': {source}")]
    ModuleLoad {
        /// Module file.
        path: PathBuf,
        /// Underlying loader error.
        #[source]
        source: Arc<libloading::Error>,
    },

    /// The native module lacks a required entry point.
    #[error("native module '{path}' does not export '{symbol}'")]
    MissingSymbol {
        /// Module file.
        path: PathBuf,
        /// Name of the missing symbol.
        symbol: &'static str,
    },

    /// The plugin's version check returned a negative status.
    #[error("plugin '{name}' failed its version check with status {status}")]
    VersionCheckFailed {
        /// Plugin name.
        name: String,
        /// Status returned by the entry point.
        status: i32,
    },

    /// The plugin was built against a different plugin API revision.
    #[error("plugin '{name}' uses plugin API {found}, host supports {expected}")]
    ApiVersionMismatch {
        /// Plugin name.
        name: String,
        /// API revision supported by the host.
        expected: u32,
        /// API revision reported by the plugin.
        found: u32,
    },

    /// The plugin was compiled against a different host version.
    #[error("plugin '{name}' was built for host {found}, this host is {expected}")]
    HostVersionMismatch {
        /// Plugin name.
        name: String,
        /// Running host version.
        expected: String,
        /// Host version reported by the plugin.
        found: String,
    },

    /// The plugin's activation entry point returned a negative status.
    #[error("plugin '{name}' failed to activate with status {status}")]
    ActivationFailed {
        /// Plugin name.
        name: String,
        /// Status returned by the entry point.
        status: i32,
    },

    /// A record was asked to hold a second runtime.
    #[error("plugin '{name}' already holds an active runtime")]
    AlreadyActive {
        /// Plugin name.
        name: String,
    },

    /// A helper binary name contained a path separator.
    ///
    /// This is host-fatal: the manifest is attempting to reference a binary
    /// outside the approved helper search paths.
    #[error("plugin '{name}' names invalid helper binary '{binary}'; it must not contain a path")]
    HelperPathEscape {
        /// Plugin name.
        name: String,
        /// Rejected binary name.
        binary: String,
    },

    /// The helper binary was not found in any approved search path.
    #[error("plugin '{name}' helper binary '{binary}' not found in {searched:?}")]
    HelperNotFound {
        /// Plugin name.
        name: String,
        /// Binary name that was searched for.
        binary: String,
        /// Directories that were searched, in order.
        searched: Vec<PathBuf>,
    },

    /// The helper process could not be started.
    #[error("plugin '{name}' failed to launch helper: {message}")]
    HelperSpawn {
        /// Plugin name.
        name: String,
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// A helper channel was used after it was closed.
    #[error("helper channel for plugin '{name}' is closed")]
    ChannelClosed {
        /// Plugin name.
        name: String,
    },

    /// The listing could not be serialised.
    #[error("failed to serialise plugin listing: {0}")]
    Listing(#[source] serde_json::Error),

    /// An HTTP request reached the listing handler for a path it does not serve.
    #[error("no handler for {method} {path}")]
    UnsupportedRequest {
        /// Requested path.
        path: String,
        /// Request method.
        method: String,
    },
}

impl PluginError {
    /// Returns `true` for errors that must halt the host.
    #[must_use]
    pub const fn is_host_fatal(&self) -> bool {
        matches!(self, Self::HelperPathEscape { .. })
    }
}

impl From<TemplateError> for PluginError {
    fn from(source: TemplateError) -> Self {
        Self::Template { source }
    }
}
