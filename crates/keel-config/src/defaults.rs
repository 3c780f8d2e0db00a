use crate::logging::LogFormat;

/// Default log filter expression used by the host.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// System-wide plugin install root.
pub const DEFAULT_PLUGIN_SYSTEM_DIR: &str = "/usr/local/lib/keel/plugins";

/// Per-user plugin override root.
pub const DEFAULT_PLUGIN_USER_DIR: &str = "%h/.keel/plugins";

/// Search-path template used when no `helper_binary_path` is configured.
pub const DEFAULT_HELPER_BINARY_PATH: &str = "%B";

/// Grace period granted to a helper process before it is killed.
pub const DEFAULT_HELPER_TERMINATION_GRACE_MS: u64 = 2_000;

/// Environment variable naming an explicit configuration file. The
/// `--config-path` flag takes precedence over it.
pub const CONFIG_PATH_ENV: &str = "KEEL_CONFIG_PATH";

/// Environment variable overriding the configured log filter.
pub const LOG_FILTER_ENV: &str = "KEEL_LOG_FILTER";

/// Environment variable overriding the configured log format.
pub const LOG_FORMAT_ENV: &str = "KEEL_LOG_FORMAT";

pub(crate) fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

pub(crate) const fn default_log_format() -> LogFormat {
    LogFormat::Json
}
