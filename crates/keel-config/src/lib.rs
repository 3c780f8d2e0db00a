//! Shared configuration for the keel plugin host.
//!
//! [`Config`] is layered by `ortho_config`: built-in defaults, then a TOML
//! file named by `--config-path` or [`CONFIG_PATH_ENV`], then `KEEL_*`
//! environment variables, then command-line flags. Every field has a default
//! so an absent file yields a usable configuration. Path-valued options are
//! stored as templates and expanded on demand with [`expand_path_template`].

mod defaults;
mod logging;
mod template;

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use defaults::{
    CONFIG_PATH_ENV, DEFAULT_HELPER_BINARY_PATH, DEFAULT_HELPER_TERMINATION_GRACE_MS,
    DEFAULT_LOG_FILTER, DEFAULT_PLUGIN_SYSTEM_DIR, DEFAULT_PLUGIN_USER_DIR, LOG_FILTER_ENV,
    LOG_FORMAT_ENV,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use template::{TemplateContext, TemplateError, expand_path_template};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration layer could not be read, parsed or merged.
    #[error("failed to load configuration: {source}")]
    Load {
        /// Underlying loader error, possibly aggregating several layers.
        #[source]
        source: Arc<OrthoError>,
    },
}

impl From<Arc<OrthoError>> for ConfigError {
    fn from(source: Arc<OrthoError>) -> Self {
        Self::Load { source }
    }
}

/// Resolved host configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[serde(default)]
#[ortho_config(prefix = "KEEL")]
pub struct Config {
    /// Tracing filter expression, such as `info` or `keel_plugins=debug`.
    #[ortho_config(default = defaults::default_log_filter())]
    log_filter: String,
    /// Log output format (`json` or `compact`).
    #[ortho_config(default = defaults::default_log_format())]
    log_format: LogFormat,
    /// Path template of the system-wide plugin install root.
    #[ortho_config(default = DEFAULT_PLUGIN_SYSTEM_DIR.to_owned())]
    plugin_system_dir: String,
    /// Path template of the per-user plugin root; blank disables it.
    #[ortho_config(default = DEFAULT_PLUGIN_USER_DIR.to_owned())]
    plugin_user_dir: String,
    /// Ordered search-path templates for helper binaries.
    #[ortho_config(default = Vec::new())]
    helper_binary_path: Vec<String>,
    /// Milliseconds a helper is given to exit before it is killed.
    #[ortho_config(default = DEFAULT_HELPER_TERMINATION_GRACE_MS)]
    helper_termination_grace_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_filter: defaults::default_log_filter(),
            log_format: defaults::default_log_format(),
            plugin_system_dir: DEFAULT_PLUGIN_SYSTEM_DIR.to_owned(),
            plugin_user_dir: DEFAULT_PLUGIN_USER_DIR.to_owned(),
            helper_binary_path: Vec::new(),
            helper_termination_grace_ms: DEFAULT_HELPER_TERMINATION_GRACE_MS,
        }
    }
}

impl Config {
    /// Loads configuration from `args` plus the file and environment layers.
    ///
    /// `args` starts with the program name, as [`std::env::args_os`] does.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] when a flag is unknown or malformed, the
    /// configuration file cannot be read or parsed, or an environment value
    /// does not fit its field.
    pub fn load_from_args<I>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = OsString>,
    {
        Self::load_from_iter(args).map_err(ConfigError::from)
    }

    /// Replaces the log filter expression.
    #[must_use]
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }

    /// Replaces the log format.
    #[must_use]
    pub const fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }

    /// Replaces the plugin install root templates.
    #[must_use]
    pub fn with_plugin_dirs(mut self, system: impl Into<String>, user: impl Into<String>) -> Self {
        self.plugin_system_dir = system.into();
        self.plugin_user_dir = user.into();
        self
    }

    /// Replaces the helper binary search-path templates.
    #[must_use]
    pub fn with_helper_binary_path(mut self, templates: Vec<String>) -> Self {
        self.helper_binary_path = templates;
        self
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Template for the system-wide plugin install root.
    #[must_use]
    pub fn plugin_system_dir(&self) -> &str {
        &self.plugin_system_dir
    }

    /// Template for the per-user plugin root; `None` when disabled.
    #[must_use]
    pub fn plugin_user_dir(&self) -> Option<&str> {
        let trimmed = self.plugin_user_dir.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    /// Configured helper binary search-path templates, possibly empty.
    #[must_use]
    pub fn helper_binary_path(&self) -> &[String] {
        &self.helper_binary_path
    }

    /// Time a helper process is given to exit before it is killed.
    #[must_use]
    pub const fn helper_termination_grace(&self) -> Duration {
        Duration::from_millis(self.helper_termination_grace_ms)
    }
}
