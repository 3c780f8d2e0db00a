//! Crate-level integration and BDD tests, plus stubs shared by unit tests.

use std::collections::HashMap;
use std::ffi::c_int;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keel_plugin_abi::{HostServices, PLUGIN_API_VERSION, PluginServerInfo};
use tempfile::TempDir;

use crate::error::PluginError;
use crate::manifest::MANIFEST_FILE_NAME;
use crate::module::{ModuleLoader, PluginModule};
use crate::services::ServiceRegistry;
use crate::tracker::PluginTracker;


/// Hook run inside a stub's activate entry point.
pub(crate) type ActivateHook = Arc<dyn Fn(&HostServices) + Send + Sync>;

/// How a [`StubModule`] answers each entry point.
#[derive(Clone)]
pub(crate) struct StubBehaviour {
    pub(crate) version_status: c_int,
    pub(crate) api_version: u32,
    pub(crate) host_tiny: Option<&'static str>,
    pub(crate) activate_status: c_int,
    pub(crate) finalize_status: Option<c_int>,
    pub(crate) on_activate: Option<ActivateHook>,
}

impl Default for StubBehaviour {
    fn default() -> Self {
        Self {
            version_status: 0,
            api_version: PLUGIN_API_VERSION,
            host_tiny: None,
            activate_status: 0,
            finalize_status: Some(0),
            on_activate: None,
        }
    }
}

impl StubBehaviour {
    pub(crate) fn rejecting_version() -> Self {
        Self {
            version_status: -1,
            ..Self::default()
        }
    }

    pub(crate) fn wrong_api() -> Self {
        Self {
            api_version: PLUGIN_API_VERSION + 1,
            ..Self::default()
        }
    }

    pub(crate) fn wrong_host() -> Self {
        Self {
            host_tiny: Some("999"),
            ..Self::default()
        }
    }

    pub(crate) fn failing_activate() -> Self {
        Self {
            activate_status: -1,
            ..Self::default()
        }
    }

    pub(crate) fn finalize(status: Option<c_int>) -> Self {
        Self {
            finalize_status: status,
            ..Self::default()
        }
    }

    pub(crate) fn with_hook(hook: ActivateHook) -> Self {
        Self {
            on_activate: Some(hook),
            ..Self::default()
        }
    }
}

/// Calls observed across every stub module created by one loader.
#[derive(Debug, Default)]
pub(crate) struct StubCounters {
    pub(crate) loads: AtomicUsize,
    pub(crate) version_checks: AtomicUsize,
    pub(crate) activations: AtomicUsize,
    pub(crate) finalizations: AtomicUsize,
    pub(crate) unloads: AtomicUsize,
}

impl StubCounters {
    pub(crate) fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Modules currently loaded.
    pub(crate) fn live(&self) -> usize {
        Self::get(&self.loads) - Self::get(&self.unloads)
    }
}

/// In-memory stand-in for a loaded native module.
pub(crate) struct StubModule {
    path: PathBuf,
    behaviour: StubBehaviour,
    counters: Arc<StubCounters>,
}

impl StubModule {
    pub(crate) fn new(path: &Path, behaviour: StubBehaviour, counters: Arc<StubCounters>) -> Self {
        counters.loads.fetch_add(1, Ordering::SeqCst);
        Self {
            path: path.to_path_buf(),
            behaviour,
            counters,
        }
    }
}

impl PluginModule for StubModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn version_check(&self, info: &mut PluginServerInfo) -> c_int {
        self.counters.version_checks.fetch_add(1, Ordering::SeqCst);
        info.fill_current();
        info.plugin_api_version = self.behaviour.api_version;
        if let Some(tiny) = self.behaviour.host_tiny {
            let (major, minor) = (info.host_major(), info.host_minor());
            info.set_host_version(&major, &minor, tiny);
        }
        self.behaviour.version_status
    }

    fn activate(&self, services: &HostServices) -> c_int {
        self.counters.activations.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.behaviour.on_activate {
            hook(services);
        }
        self.behaviour.activate_status
    }

    fn finalize(&self, _services: &HostServices) -> Option<c_int> {
        let status = self.behaviour.finalize_status?;
        self.counters.finalizations.fetch_add(1, Ordering::SeqCst);
        Some(status)
    }
}

impl Drop for StubModule {
    fn drop(&mut self) {
        self.counters.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// Loader handing out [`StubModule`]s keyed by module file name.
///
/// Unknown file names behave like a module missing its activate symbol.
#[derive(Default)]
pub(crate) struct StubLoader {
    modules: HashMap<String, StubBehaviour>,
    pub(crate) counters: Arc<StubCounters>,
}

impl StubLoader {
    pub(crate) fn with_module(mut self, file: &str, behaviour: StubBehaviour) -> Self {
        self.modules.insert(file.to_owned(), behaviour);
        self
    }
}

impl ModuleLoader for StubLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginError> {
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let behaviour = self
            .modules
            .get(&file)
            .cloned()
            .ok_or_else(|| PluginError::MissingSymbol {
                path: path.to_path_buf(),
                symbol: "keel_plugin_activate",
            })?;
        Ok(Box::new(StubModule::new(
            path,
            behaviour,
            Arc::clone(&self.counters),
        )))
    }
}

/// Writes a plugin directory with the given manifest under `root`.
pub(crate) fn install_plugin(root: &Path, dirname: &str, manifest: &str) -> PathBuf {
    let dir = root.join(dirname);
    fs::create_dir_all(&dir).expect("create plugin dir");
    fs::write(dir.join(MANIFEST_FILE_NAME), manifest).expect("write manifest");
    dir
}

/// Manifest text naming a native module.
pub(crate) fn native_manifest(name: &str, object: &str) -> String {
    format!("name = \"{name}\"\nversion = \"1.0\"\nobject = \"{object}\"\n")
}

#[test]
fn end_to_end_demo_plugin_lifecycle() {
    let root = TempDir::new().expect("temp dir");
    install_plugin(root.path(), "demo", &native_manifest("demo", "demo.so"));
    let loader = StubLoader::default().with_module("demo.so", StubBehaviour::default());
    let counters = Arc::clone(&loader.counters);
    let tracker = PluginTracker::with_loader(loader, Arc::new(ServiceRegistry::new()))
        .with_roots(root.path(), None);

    let summary = tracker.scan();
    assert_eq!(summary.discovered(), 1);
    let activated = tracker.activate().expect("activate");
    assert_eq!(activated, 1);

    let names: Vec<String> = tracker
        .registry_snapshot()
        .iter()
        .map(|info| info.name().to_owned())
        .collect();
    assert_eq!(names, vec![String::from("demo")]);
    assert_eq!(tracker.active_count(), 1);
    assert_eq!(counters.live(), 1);

    tracker.shutdown();
    assert_eq!(tracker.active_count(), 0);
    assert!(tracker.registry_snapshot().is_empty());
    assert_eq!(counters.live(), 0);
}
