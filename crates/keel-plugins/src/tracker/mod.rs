//! The plugin tracker: discovery and the four-phase plugin lifecycle.
//!
//! [`PluginTracker::scan`] walks the install roots and queues a record for
//! every manifested subdirectory. [`PluginTracker::activate`] drains that
//! queue, loading native modules or launching helpers, and moves each
//! successful record into the registry. [`PluginTracker::finalize`] offers
//! every native module its optional late-start hook, and
//! [`PluginTracker::shutdown`] releases everything.
//!
//! Tracker state sits behind one re-entrant lock. Plugin entry points run
//! outside it during activation, and a record is only committed to the
//! registry once it is fully populated, so concurrent readers of
//! [`PluginTracker::registry_snapshot`] never see a half-activated plugin.
//! Finalize hooks run with the lock held for reading; the lock being
//! re-entrant lets a hook inspect the registry from the same thread.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_config::{Config, TemplateContext, expand_path_template};
use keel_plugin_abi::PluginServerInfo;
use parking_lot::ReentrantMutex;
use tracing::{debug, error, info, warn};

use crate::error::PluginError;
use crate::harness::{HelperHarness, HelperSettings};
use crate::manifest::{MANIFEST_FILE_NAME, PluginManifest};
use crate::module::{DylibLoader, HostVersion, ModuleLoader};
use crate::record::{FinalizeOutcome, PluginInfo, PluginRecord};
use crate::services::ServiceRegistry;

const TRACKER_TARGET: &str = "keel_plugins::tracker";

/// Outcome of [`PluginTracker::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    discovered: usize,
    skipped: usize,
    failed_roots: Vec<PathBuf>,
}

impl ScanSummary {
    /// Records queued for activation.
    #[must_use]
    pub const fn discovered(&self) -> usize {
        self.discovered
    }

    /// Candidate entries ignored because they were unreadable or lacked a
    /// usable manifest.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.skipped
    }

    /// Install roots that could not be read.
    #[must_use]
    pub fn failed_roots(&self) -> &[PathBuf] {
        &self.failed_roots
    }

    /// Returns `true` when at least one install root could not be read.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failed_roots.is_empty()
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    preload: Vec<PluginRecord>,
    registry: Vec<PluginRecord>,
    active: usize,
}

/// What an activated record was committed with.
enum Activation {
    Native,
    Helper,
    Metadata,
}

/// Discovers, activates and supervises plugins.
pub struct PluginTracker<L = DylibLoader> {
    loader: L,
    roots: Vec<PathBuf>,
    helpers: HelperSettings,
    host: HostVersion,
    services: Arc<ServiceRegistry>,
    state: ReentrantMutex<RefCell<TrackerState>>,
}

impl<L> std::fmt::Debug for PluginTracker<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.state.lock();
        let state = guard.borrow();
        f.debug_struct("PluginTracker")
            .field("roots", &self.roots)
            .field("host", &self.host)
            .field("preload", &state.preload.len())
            .field("registry", &state.registry.len())
            .field("active", &state.active)
            .finish_non_exhaustive()
    }
}

impl PluginTracker<DylibLoader> {
    /// Creates a tracker that loads native modules with the platform linker.
    #[must_use]
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self::with_loader(DylibLoader, services)
    }

    /// Creates a tracker whose install roots and helper settings come from
    /// host configuration.
    ///
    /// Roots whose template cannot be expanded are logged and left out;
    /// a blank template disables that root.
    #[must_use]
    pub fn from_config(
        config: &Config,
        context: &TemplateContext,
        services: Arc<ServiceRegistry>,
    ) -> Self {
        let roots: Vec<PathBuf> = std::iter::once(config.plugin_system_dir())
            .chain(config.plugin_user_dir())
            .filter(|template| !template.trim().is_empty())
            .filter_map(|template| {
                expand_path_template(template, context)
                    .inspect_err(|err| {
                        warn!(
                            target: TRACKER_TARGET,
                            template,
                            error = %err,
                            "ignoring plugin install root"
                        );
                    })
                    .ok()
            })
            .collect();
        let mut tracker = Self::new(services)
            .with_helper_settings(HelperSettings::from_config(config, context.clone()));
        tracker.roots = roots;
        tracker
    }
}

impl<L: ModuleLoader> PluginTracker<L> {
    /// Creates a tracker with a custom module loader and no install roots.
    #[must_use]
    pub fn with_loader(loader: L, services: Arc<ServiceRegistry>) -> Self {
        Self {
            loader,
            roots: Vec::new(),
            helpers: HelperSettings::new(Vec::new(), TemplateContext::detect()),
            host: HostVersion::current(),
            services,
            state: ReentrantMutex::new(RefCell::new(TrackerState::default())),
        }
    }

    /// Sets the system-wide and optional user-local install roots.
    #[must_use]
    pub fn with_roots(mut self, system: impl Into<PathBuf>, user: Option<PathBuf>) -> Self {
        self.roots = std::iter::once(system.into()).chain(user).collect();
        self
    }

    /// Sets how helper binaries are found and supervised.
    #[must_use]
    pub fn with_helper_settings(mut self, helpers: HelperSettings) -> Self {
        self.helpers = helpers;
        self
    }

    /// Sets the host version plugins are verified against.
    #[must_use]
    pub fn with_host_version(mut self, host: HostVersion) -> Self {
        self.host = host;
        self
    }

    /// Install roots, scanned in order.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Registry handed to plugin entry points.
    #[must_use]
    pub const fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    fn read_state<R>(&self, f: impl FnOnce(&TrackerState) -> R) -> R {
        let guard = self.state.lock();
        let state = guard.borrow();
        f(&state)
    }

    /// Queues a record for every manifested plugin directory.
    ///
    /// An unreadable root is logged and contributes nothing; the remaining
    /// roots are still scanned. Directories without a usable manifest are
    /// skipped with a warning.
    pub fn scan(&self) -> ScanSummary {
        let mut summary = ScanSummary::default();
        for root in &self.roots {
            match scan_root(root) {
                Ok((records, skipped)) => {
                    summary.discovered += records.len();
                    summary.skipped += skipped;
                    self.with_state(|state| state.preload.extend(records));
                }
                Err(err) => {
                    warn!(
                        target: TRACKER_TARGET,
                        root = %root.display(),
                        error = %err,
                        "plugin install root unavailable"
                    );
                    summary.failed_roots.push(root.clone());
                }
            }
        }
        info!(
            target: TRACKER_TARGET,
            discovered = summary.discovered,
            skipped = summary.skipped,
            failed_roots = summary.failed_roots.len(),
            "plugin scan complete"
        );
        summary
    }

    /// Activates every queued record and returns how many succeeded.
    ///
    /// A plugin that fails to activate is logged and discarded, and its
    /// module or helper is released.
    ///
    /// # Errors
    ///
    /// Returns the first host-fatal error, currently only
    /// [`PluginError::HelperPathEscape`]. Records not yet activated at that
    /// point are dropped.
    pub fn activate(&self) -> Result<usize, PluginError> {
        let pending = self.with_state(|state| std::mem::take(&mut state.preload));
        let mut activated = 0;
        for mut record in pending {
            match self.activate_record(&mut record) {
                Ok(kind) => {
                    self.with_state(|state| {
                        if matches!(kind, Activation::Native) {
                            state.active += 1;
                        }
                        state.registry.push(record);
                    });
                    activated += 1;
                }
                Err(err) if err.is_host_fatal() => {
                    error!(
                        target: TRACKER_TARGET,
                        plugin = %record.name(),
                        error = %err,
                        "fatal plugin configuration error"
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        target: TRACKER_TARGET,
                        plugin = %record.name(),
                        error = %err,
                        "plugin activation failed; plugin discarded"
                    );
                }
            }
        }
        info!(target: TRACKER_TARGET, activated, "plugin activation complete");
        Ok(activated)
    }

    fn activate_record(&self, record: &mut PluginRecord) -> Result<Activation, PluginError> {
        let name = record.name().to_owned();
        let module_path = record.info().module_path();
        let helper = record.info().helper_binary().map(str::to_owned);

        if let Some(path) = module_path {
            if helper.is_some() {
                warn!(
                    target: TRACKER_TARGET,
                    plugin = %name,
                    "manifest names both a native module and a helper; using the native module"
                );
            }
            let module = self.loader.load(&path)?;

            let mut server_info = PluginServerInfo::empty();
            let version_status = module.version_check(&mut server_info);
            self.host.verify(&name, version_status, &server_info)?;

            let activate_status = self
                .services
                .with_host_services(|table| module.activate(table));
            if activate_status < 0 {
                return Err(PluginError::ActivationFailed {
                    name,
                    status: activate_status,
                });
            }
            record.attach_module(module)?;
            info!(
                target: TRACKER_TARGET,
                plugin = %name,
                path = %path.display(),
                "native plugin activated"
            );
            return Ok(Activation::Native);
        }

        if let Some(binary) = helper {
            let harness = HelperHarness::launch(&name, &binary, &self.helpers)?;
            record.attach_helper(harness)?;
            info!(
                target: TRACKER_TARGET,
                plugin = %name,
                binary = %binary,
                "helper plugin activated"
            );
            return Ok(Activation::Helper);
        }

        debug!(target: TRACKER_TARGET, plugin = %name, "metadata-only plugin registered");
        Ok(Activation::Metadata)
    }

    /// Offers every activated native module its finalize hook, once.
    ///
    /// Returns how many hooks ran. A negative status is logged and otherwise
    /// ignored.
    pub fn finalize(&self) -> usize {
        self.read_state(|state| {
            let mut invoked = 0;
            for record in &state.registry {
                match record.finalize(&self.services) {
                    FinalizeOutcome::Invoked(status) => {
                        invoked += 1;
                        if status < 0 {
                            warn!(
                                target: TRACKER_TARGET,
                                plugin = %record.name(),
                                status,
                                "plugin finalize reported failure"
                            );
                        }
                    }
                    FinalizeOutcome::EntryPointAbsent => {
                        debug!(
                            target: TRACKER_TARGET,
                            plugin = %record.name(),
                            "plugin has no finalize entry point"
                        );
                    }
                    FinalizeOutcome::NotApplicable => {}
                }
            }
            invoked
        })
    }

    /// Releases every activated plugin and empties the registry.
    ///
    /// Returns the number of records released; calling it again is a no-op.
    pub fn shutdown(&self) -> usize {
        let released = self.with_state(|state| {
            state.active = 0;
            std::mem::take(&mut state.registry)
        });
        let count = released.len();
        for mut record in released {
            record.release();
        }
        if count > 0 {
            info!(target: TRACKER_TARGET, released = count, "plugins shut down");
        }
        count
    }

    /// Point-in-time copy of the registry's metadata, in activation order.
    #[must_use]
    pub fn registry_snapshot(&self) -> Vec<PluginInfo> {
        self.read_state(|state| {
            state
                .registry
                .iter()
                .map(|record| record.info().clone())
                .collect()
        })
    }

    /// Number of activated native modules.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.read_state(|state| state.active)
    }

    /// Number of records in the registry.
    #[must_use]
    pub fn registry_len(&self) -> usize {
        self.read_state(|state| state.registry.len())
    }

    /// Number of records awaiting activation.
    #[must_use]
    pub fn preload_len(&self) -> usize {
        self.read_state(|state| state.preload.len())
    }

    /// Runs `f` against the helper of the first registered plugin named
    /// `plugin`, if it was activated out of process.
    pub fn with_helper<R>(&self, plugin: &str, f: impl FnOnce(&HelperHarness) -> R) -> Option<R> {
        self.read_state(|state| {
            state
                .registry
                .iter()
                .filter(|record| record.name() == plugin)
                .find_map(PluginRecord::helper)
                .map(f)
        })
    }
}

/// Reads one install root, returning its records and the skip count.
fn scan_root(root: &Path) -> Result<(Vec<PluginRecord>, usize), PluginError> {
    let entries = fs::read_dir(root).map_err(|err| PluginError::Io {
        path: root.to_path_buf(),
        source: Arc::new(err),
    })?;
    let (readable, mut skipped) = readable_entries(root, entries);
    let mut candidates: Vec<PathBuf> = readable
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    candidates.sort();

    let mut records = Vec::new();
    for dir in candidates {
        let manifest_path = dir.join(MANIFEST_FILE_NAME);
        if !manifest_path.is_file() {
            warn!(
                target: TRACKER_TARGET,
                dir = %dir.display(),
                "plugin directory has no manifest; skipping"
            );
            skipped += 1;
            continue;
        }
        match PluginManifest::from_path(&manifest_path) {
            Ok(manifest) => {
                debug!(
                    target: TRACKER_TARGET,
                    plugin = manifest.name(),
                    dir = %dir.display(),
                    "plugin discovered"
                );
                records.push(PluginRecord::from_manifest(&manifest, &dir));
            }
            Err(err) => {
                warn!(
                    target: TRACKER_TARGET,
                    dir = %dir.display(),
                    error = %err,
                    "invalid plugin manifest; skipping"
                );
                skipped += 1;
            }
        }
    }
    Ok((records, skipped))
}

/// Splits directory entries into the readable ones and a count of those
/// that failed, logging each failure.
fn readable_entries<T>(
    root: &Path,
    entries: impl IntoIterator<Item = std::io::Result<T>>,
) -> (Vec<T>, usize) {
    let mut readable = Vec::new();
    let mut unreadable = 0;
    for entry in entries {
        match entry {
            Ok(item) => readable.push(item),
            Err(err) => {
                warn!(
                    target: TRACKER_TARGET,
                    root = %root.display(),
                    error = %err,
                    "unreadable plugin directory entry; skipping"
                );
                unreadable += 1;
            }
        }
    }
    (readable, unreadable)
}
