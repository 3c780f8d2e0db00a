//! Integration tests for configuration file, environment and flag layering.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use keel_config::{
    CONFIG_PATH_ENV, Config, ConfigError, DEFAULT_PLUGIN_SYSTEM_DIR, LOG_FILTER_ENV,
    LOG_FORMAT_ENV, LogFormat,
};
use once_cell::sync::Lazy;
use rstest::{fixture, rstest};
use tempfile::TempDir;

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Serialises environment access and restores overridden variables on drop.
struct EnvGuard {
    previous: Vec<(&'static str, Option<OsString>)>,
    _lock: MutexGuard<'static, ()>,
}

impl EnvGuard {
    fn new() -> Self {
        let lock = ENV_MUTEX
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut guard = Self {
            previous: Vec::new(),
            _lock: lock,
        };
        for key in [CONFIG_PATH_ENV, LOG_FILTER_ENV, LOG_FORMAT_ENV] {
            guard.remove(key);
        }
        guard
    }

    fn set(&mut self, key: &'static str, value: impl AsRef<OsStr>) {
        self.previous.push((key, std::env::var_os(key)));
        // Environment mutation is serialised by `ENV_MUTEX`.
        unsafe { std::env::set_var(key, value) };
    }

    fn remove(&mut self, key: &'static str) {
        self.previous.push((key, std::env::var_os(key)));
        unsafe { std::env::remove_var(key) };
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        while let Some((key, value)) = self.previous.pop() {
            match value {
                Some(text) => unsafe { std::env::set_var(key, text) },
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}

#[fixture]
fn env() -> EnvGuard {
    EnvGuard::new()
}

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("keel.toml");
    fs::write(&path, body).expect("write config");
    path
}

fn args(extra: &[&OsStr]) -> Vec<OsString> {
    std::iter::once(OsString::from("keeld"))
        .chain(extra.iter().map(|arg| arg.to_os_string()))
        .collect()
}

fn config_flag(path: &Path) -> [&OsStr; 2] {
    [OsStr::new("--config-path"), path.as_os_str()]
}

#[rstest]
fn defaults_apply_without_a_file(env: EnvGuard) {
    let config = Config::load_from_args(args(&[])).expect("load defaults");
    drop(env);

    assert_eq!(config, Config::default());
    assert_eq!(config.plugin_system_dir(), DEFAULT_PLUGIN_SYSTEM_DIR);
    assert_eq!(config.plugin_user_dir(), Some("%h/.keel/plugins"));
    assert!(config.helper_binary_path().is_empty());
    assert_eq!(config.helper_termination_grace(), Duration::from_secs(2));
}

#[rstest]
fn explicit_file_is_parsed(env: EnvGuard) {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(
        &dir,
        r#"
log_filter = "keel_plugins=debug"
log_format = "compact"
plugin_system_dir = "/opt/keel/plugins"
plugin_user_dir = ""
helper_binary_path = ["%B", "/usr/libexec/keel"]
helper_termination_grace_ms = 250
"#,
    );

    let config = Config::load_from_args(args(&config_flag(&path))).expect("load file");
    drop(env);

    assert_eq!(config.log_filter(), "keel_plugins=debug");
    assert_eq!(config.log_format(), LogFormat::Compact);
    assert_eq!(config.plugin_system_dir(), "/opt/keel/plugins");
    assert_eq!(config.plugin_user_dir(), None);
    assert_eq!(config.helper_binary_path(), ["%B", "/usr/libexec/keel"]);
    assert_eq!(config.helper_termination_grace(), Duration::from_millis(250));
}

#[rstest]
fn config_path_is_taken_from_environment(mut env: EnvGuard) {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "log_filter = \"warn\"\n");
    env.set(CONFIG_PATH_ENV, &path);

    let config = Config::load_from_args(args(&[])).expect("load");
    drop(env);

    assert_eq!(config.log_filter(), "warn");
}

#[rstest]
fn environment_overrides_file_values(mut env: EnvGuard) {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "log_filter = \"warn\"\nlog_format = \"json\"\n");
    env.set(LOG_FILTER_ENV, "trace");
    env.set(LOG_FORMAT_ENV, "compact");

    let config = Config::load_from_args(args(&config_flag(&path))).expect("load");
    drop(env);

    assert_eq!(config.log_filter(), "trace");
    assert_eq!(config.log_format(), LogFormat::Compact);
}

#[rstest]
fn flags_override_environment_and_file(mut env: EnvGuard) {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "log_filter = \"warn\"\n");
    env.set(LOG_FILTER_ENV, "trace");
    let [flag, value] = config_flag(&path);

    let config = Config::load_from_args(args(&[
        flag,
        value,
        OsStr::new("--log-filter"),
        OsStr::new("keel_plugins=debug"),
        OsStr::new("--log-format"),
        OsStr::new("compact"),
    ]))
    .expect("load");
    drop(env);

    assert_eq!(config.log_filter(), "keel_plugins=debug");
    assert_eq!(config.log_format(), LogFormat::Compact);
}

#[rstest]
fn unknown_log_format_override_is_rejected(mut env: EnvGuard) {
    env.set(LOG_FORMAT_ENV, "xml");

    let err = Config::load_from_args(args(&[])).expect_err("invalid format");
    drop(env);

    assert!(matches!(err, ConfigError::Load { .. }));
}

#[rstest]
fn malformed_file_is_reported(env: EnvGuard) {
    let dir = TempDir::new().expect("temp dir");
    let path = write_config(&dir, "helper_binary_path = \"not-a-list\"\n");

    let err = Config::load_from_args(args(&config_flag(&path))).expect_err("parse error");
    drop(env);

    assert!(matches!(err, ConfigError::Load { .. }));
}

#[rstest]
fn unknown_flag_is_rejected(env: EnvGuard) {
    let err = Config::load_from_args(args(&[OsStr::new("--no-such-flag")]))
        .expect_err("unknown flag");
    drop(env);

    assert!(matches!(err, ConfigError::Load { .. }));
}
