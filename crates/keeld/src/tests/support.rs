//! Shared collaborators for host daemon tests.

use std::ffi::OsString;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keel_config::{Config, ConfigError, TemplateContext};
use keel_plugins::{MANIFEST_FILE_NAME, PluginError, ScanSummary};
use parking_lot::Mutex;

use crate::bootstrap::{BootstrapError, ConfigLoader, StaticConfigLoader};
use crate::health::LifecycleReporter;
use crate::process::{LaunchPlan, ShutdownError, ShutdownSignal};

/// Lifecycle milestones captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed,
    Scanned { discovered: usize, skipped: usize },
    Activated(usize),
    Failed { host_fatal: bool },
    Finalized(usize),
    Released(usize),
}

/// Reporter that records every event in order.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingReporter {
    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    fn push(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}

impl LifecycleReporter for RecordingReporter {
    fn bootstrap_starting(&self) {
        self.push(LifecycleEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.push(LifecycleEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, _error: &BootstrapError) {
        self.push(LifecycleEvent::BootstrapFailed);
    }

    fn plugins_scanned(&self, summary: &ScanSummary) {
        self.push(LifecycleEvent::Scanned {
            discovered: summary.discovered(),
            skipped: summary.skipped(),
        });
    }

    fn plugins_activated(&self, activated: usize) {
        self.push(LifecycleEvent::Activated(activated));
    }

    fn plugins_failed(&self, error: &PluginError) {
        self.push(LifecycleEvent::Failed {
            host_fatal: error.is_host_fatal(),
        });
    }

    fn plugins_finalized(&self, finalized: usize) {
        self.push(LifecycleEvent::Finalized(finalized));
    }

    fn plugins_released(&self, released: usize) {
        self.push(LifecycleEvent::Released(released));
    }
}

/// Loader that fails by passing an invalid flag value.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, ConfigError> {
        Config::load_from_args([
            OsString::from("keeld"),
            OsString::from("--helper-termination-grace-ms"),
            OsString::from("soon"),
        ])
    }
}

/// Shutdown signal that returns immediately, counting how often it waited.
#[derive(Debug, Default)]
pub struct ImmediateShutdown {
    waits: AtomicUsize,
    fail: bool,
}

impl ImmediateShutdown {
    pub fn failing() -> Self {
        Self {
            waits: AtomicUsize::new(0),
            fail: true,
        }
    }

    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl ShutdownSignal for Arc<ImmediateShutdown> {
    fn wait(&self) -> Result<(), ShutdownError> {
        self.waits.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(ShutdownError::Install {
                source: io::Error::other("signal handlers unavailable"),
            })
        } else {
            Ok(())
        }
    }
}

/// Host configuration whose only install root is `root`.
pub fn config_for_root(root: &Path) -> Config {
    Config::default()
        .with_log_filter("debug")
        .with_plugin_dirs(root.display().to_string(), "")
}

/// Writes a plugin directory holding `manifest` under `root`.
pub fn install_plugin(root: &Path, dirname: &str, manifest: &str) {
    let dir = root.join(dirname);
    std::fs::create_dir_all(&dir).expect("create plugin dir");
    std::fs::write(dir.join(MANIFEST_FILE_NAME), manifest).expect("write manifest");
}

/// Launch plan wired to test collaborators.
pub fn plan(
    config: Config,
    reporter: &Arc<RecordingReporter>,
    shutdown: &Arc<ImmediateShutdown>,
) -> LaunchPlan<StaticConfigLoader, Arc<ImmediateShutdown>> {
    LaunchPlan {
        loader: StaticConfigLoader::new(config),
        reporter: Arc::clone(reporter) as Arc<dyn LifecycleReporter>,
        shutdown: Arc::clone(shutdown),
        context: TemplateContext::detect(),
    }
}
