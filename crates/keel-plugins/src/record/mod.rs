//! Plugin records: metadata plus the runtime a plugin was activated with.
//!
//! A [`PluginRecord`] is built from a manifest during scan and carries no
//! runtime. Activation attaches at most one [`PluginRuntime`], either a
//! loaded native module or a running helper harness. The runtime is torn
//! down through [`PluginRecord::release`], which also runs on drop, so the
//! failure path and the shutdown path share a single teardown.

use std::cell::Cell;
use std::ffi::c_int;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::PluginError;
use crate::harness::HelperHarness;
use crate::manifest::PluginManifest;
use crate::module::PluginModule;
use crate::services::ServiceRegistry;

const RECORD_TARGET: &str = "keel_plugins::record";

/// Conventional name of a plugin's static web-asset directory.
pub const HTTPD_DIR_NAME: &str = "httpd";

/// Descriptive metadata of one plugin, as exposed by the listing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    #[serde(rename = "keel.plugin.name")]
    name: String,
    #[serde(rename = "keel.plugin.description")]
    description: String,
    #[serde(rename = "keel.plugin.author")]
    author: String,
    #[serde(rename = "keel.plugin.version")]
    version: String,
    #[serde(rename = "keel.plugin.shared_object")]
    shared_object: Option<String>,
    #[serde(rename = "keel.plugin.helper_binary")]
    helper_binary: Option<String>,
    #[serde(rename = "keel.plugin.dirname")]
    dirname: String,
    #[serde(rename = "keel.plugin.path")]
    path: PathBuf,
    #[serde(rename = "keel.plugin.jsmodule")]
    jsmodule: Option<String>,
    #[serde(rename = "keel.plugin.httpd")]
    httpd: Option<String>,
}

impl PluginInfo {
    /// Builds metadata for the plugin installed at `content_path`.
    ///
    /// When the manifest names no web-asset subpath but the directory has an
    /// `httpd/` subtree, that subtree is used.
    #[must_use]
    pub fn from_manifest(manifest: &PluginManifest, content_path: &Path) -> Self {
        let dirname = content_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let httpd = manifest.httpd().map(str::to_owned).or_else(|| {
            content_path
                .join(HTTPD_DIR_NAME)
                .is_dir()
                .then(|| String::from(HTTPD_DIR_NAME))
        });
        Self {
            name: manifest.name().to_owned(),
            description: manifest.description().to_owned(),
            author: manifest.author().to_owned(),
            version: manifest.version().to_owned(),
            shared_object: manifest.object().map(str::to_owned),
            helper_binary: manifest.helper().map(str::to_owned),
            dirname,
            path: content_path.to_path_buf(),
            jsmodule: manifest.js().map(str::to_owned),
            httpd,
        }
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Plugin author.
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Plugin version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Native module filename, relative to the content path.
    #[must_use]
    pub fn shared_object(&self) -> Option<&str> {
        self.shared_object.as_deref()
    }

    /// Helper binary name.
    #[must_use]
    pub fn helper_binary(&self) -> Option<&str> {
        self.helper_binary.as_deref()
    }

    /// Name of the plugin's install directory.
    #[must_use]
    pub fn dirname(&self) -> &str {
        &self.dirname
    }

    /// Absolute content path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Script module filename.
    #[must_use]
    pub fn jsmodule(&self) -> Option<&str> {
        self.jsmodule.as_deref()
    }

    /// Web-asset subpath.
    #[must_use]
    pub fn httpd(&self) -> Option<&str> {
        self.httpd.as_deref()
    }

    /// Absolute path of the native module, if the plugin ships one.
    #[must_use]
    pub fn module_path(&self) -> Option<PathBuf> {
        self.shared_object.as_ref().map(|object| self.path.join(object))
    }
}

/// What a plugin was activated with.
pub enum PluginRuntime {
    /// Nothing to run; the plugin only exposes metadata and static assets.
    Metadata,
    /// A loaded native module.
    Native(Box<dyn PluginModule>),
    /// A supervised helper process.
    Helper(HelperHarness),
}

impl std::fmt::Debug for PluginRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Metadata => f.write_str("Metadata"),
            Self::Native(module) => f.debug_tuple("Native").field(&module.path()).finish(),
            Self::Helper(harness) => f.debug_tuple("Helper").field(harness).finish(),
        }
    }
}

/// Result of offering a record its finalize call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The record has no native module, or was already finalized.
    NotApplicable,
    /// The module does not export a finalize entry point.
    EntryPointAbsent,
    /// The entry point ran and returned this status.
    Invoked(c_int),
}

/// One discovered or activated plugin.
#[derive(Debug)]
pub struct PluginRecord {
    info: PluginInfo,
    runtime: PluginRuntime,
    finalized: Cell<bool>,
}

impl PluginRecord {
    /// Builds an unactivated record for the plugin at `content_path`.
    #[must_use]
    pub fn from_manifest(manifest: &PluginManifest, content_path: &Path) -> Self {
        Self::new(PluginInfo::from_manifest(manifest, content_path))
    }

    /// Wraps existing metadata in an unactivated record.
    #[must_use]
    pub const fn new(info: PluginInfo) -> Self {
        Self {
            info,
            runtime: PluginRuntime::Metadata,
            finalized: Cell::new(false),
        }
    }

    /// Plugin metadata.
    #[must_use]
    pub const fn info(&self) -> &PluginInfo {
        &self.info
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// Attached runtime.
    #[must_use]
    pub const fn runtime(&self) -> &PluginRuntime {
        &self.runtime
    }

    /// Returns `true` when a native module is loaded.
    #[must_use]
    pub const fn has_native_module(&self) -> bool {
        matches!(self.runtime, PluginRuntime::Native(_))
    }

    /// Running helper, if the plugin was activated out of process.
    #[must_use]
    pub const fn helper(&self) -> Option<&HelperHarness> {
        match &self.runtime {
            PluginRuntime::Helper(harness) => Some(harness),
            _ => None,
        }
    }

    /// Returns `true` once the finalize entry point has been offered.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    /// Attaches a loaded native module.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyActive`] when a runtime is already
    /// attached.
    pub fn attach_module(&mut self, module: Box<dyn PluginModule>) -> Result<(), PluginError> {
        self.attach(PluginRuntime::Native(module))
    }

    /// Attaches a running helper harness.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::AlreadyActive`] when a runtime is already
    /// attached.
    pub fn attach_helper(&mut self, harness: HelperHarness) -> Result<(), PluginError> {
        self.attach(PluginRuntime::Helper(harness))
    }

    fn attach(&mut self, runtime: PluginRuntime) -> Result<(), PluginError> {
        if !matches!(self.runtime, PluginRuntime::Metadata) {
            // The rejected runtime is dropped here, which releases it.
            return Err(PluginError::AlreadyActive {
                name: self.info.name.clone(),
            });
        }
        self.runtime = runtime;
        Ok(())
    }

    /// Invokes the module's finalize entry point at most once.
    pub fn finalize(&self, services: &ServiceRegistry) -> FinalizeOutcome {
        let PluginRuntime::Native(module) = &self.runtime else {
            return FinalizeOutcome::NotApplicable;
        };
        if self.finalized.replace(true) {
            return FinalizeOutcome::NotApplicable;
        }
        services
            .with_host_services(|table| module.finalize(table))
            .map_or(FinalizeOutcome::EntryPointAbsent, FinalizeOutcome::Invoked)
    }

    /// Tears down the attached runtime, leaving metadata only.
    ///
    /// Unloads a native module or terminates a helper process. Safe to call
    /// more than once.
    pub fn release(&mut self) {
        match std::mem::replace(&mut self.runtime, PluginRuntime::Metadata) {
            PluginRuntime::Metadata => {}
            PluginRuntime::Native(module) => {
                debug!(
                    target: RECORD_TARGET,
                    plugin = %self.info.name,
                    path = %module.path().display(),
                    "releasing native module"
                );
                drop(module);
            }
            PluginRuntime::Helper(mut harness) => {
                debug!(
                    target: RECORD_TARGET,
                    plugin = %self.info.name,
                    pid = harness.pid(),
                    "releasing helper process"
                );
                harness.terminate();
            }
        }
    }
}

impl Drop for PluginRecord {
    fn drop(&mut self) {
        self.release();
    }
}
