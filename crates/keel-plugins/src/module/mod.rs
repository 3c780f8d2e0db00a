//! Native-module loading and version verification.
//!
//! [`DylibLoader`] opens a shared library with `libloading` and resolves the
//! two required entry points up front, so a module that lacks either one is
//! reported as [`PluginError::MissingSymbol`] and unloaded immediately. The
//! optional finalize entry point is resolved when it is first needed.
//!
//! The loaded library handle lives inside the returned [`PluginModule`];
//! dropping the module is the only way it is unloaded.

use std::ffi::c_int;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_plugin_abi::{
    ACTIVATE_SYMBOL, ActivateFn, FINALIZE_SYMBOL, FinalizeFn, HOST_VERSION_MAJOR,
    HOST_VERSION_MINOR, HOST_VERSION_TINY, HostServices, PLUGIN_API_VERSION, PluginServerInfo,
    VERSION_CHECK_SYMBOL, VersionCheckFn,
};
use libloading::Library;
use tracing::debug;

use crate::error::PluginError;

const MODULE_TARGET: &str = "keel_plugins::module";

/// A loaded native plugin module.
///
/// Implementations own whatever keeps the module's code mapped; dropping the
/// value unloads it.
pub trait PluginModule: Send {
    /// File the module was loaded from.
    fn path(&self) -> &Path;

    /// Calls the version-check entry point.
    fn version_check(&self, info: &mut PluginServerInfo) -> c_int;

    /// Calls the activation entry point.
    fn activate(&self, services: &HostServices) -> c_int;

    /// Calls the finalize entry point, or returns `None` when the module does
    /// not export one.
    fn finalize(&self, services: &HostServices) -> Option<c_int>;
}

/// Opens native modules from disk.
pub trait ModuleLoader: Send + Sync {
    /// Loads the module at `path` and resolves its required entry points.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ModuleLoad`] when the file cannot be loaded and
    /// [`PluginError::MissingSymbol`] when a required entry point is absent.
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginError>;
}

/// Loader backed by the platform dynamic linker.
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

impl ModuleLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn PluginModule>, PluginError> {
        NativeModule::open(path).map(|module| Box::new(module) as Box<dyn PluginModule>)
    }
}

struct NativeModule {
    path: PathBuf,
    version_check: VersionCheckFn,
    activate: ActivateFn,
    library: Library,
}

impl NativeModule {
    fn open(path: &Path) -> Result<Self, PluginError> {
        debug!(target: MODULE_TARGET, path = %path.display(), "loading native module");

        // SAFETY: loading a plugin runs its initialisers in our address
        // space. Plugin code is trusted by the host.
        let library = unsafe { Library::new(path) }.map_err(|err| PluginError::ModuleLoad {
            path: path.to_path_buf(),
            source: Arc::new(err),
        })?;

        // SAFETY: the ABI fixes the signature of each named entry point.
        let version_check =
            unsafe { resolve::<VersionCheckFn>(&library, path, VERSION_CHECK_SYMBOL) }?;
        // SAFETY: as above.
        let activate = unsafe { resolve::<ActivateFn>(&library, path, ACTIVATE_SYMBOL) }?;

        Ok(Self {
            path: path.to_path_buf(),
            version_check,
            activate,
            library,
        })
    }
}

/// Copies a function pointer out of `library`.
///
/// # Safety
///
/// `T` must be the function pointer type the symbol was exported with, and
/// the pointer must not be used after `library` is dropped.
unsafe fn resolve<T: Copy>(
    library: &Library,
    path: &Path,
    symbol: &'static [u8],
) -> Result<T, PluginError> {
    // SAFETY: upheld by the caller.
    unsafe { library.get::<T>(symbol) }
        .map(|resolved| *resolved)
        .map_err(|_| PluginError::MissingSymbol {
            path: path.to_path_buf(),
            symbol: symbol_name(symbol),
        })
}

fn symbol_name(symbol: &'static [u8]) -> &'static str {
    let trimmed = symbol.strip_suffix(&[0]).unwrap_or(symbol);
    std::str::from_utf8(trimmed).unwrap_or("<non-utf8 symbol>")
}

impl PluginModule for NativeModule {
    fn path(&self) -> &Path {
        &self.path
    }

    fn version_check(&self, info: &mut PluginServerInfo) -> c_int {
        // SAFETY: the pointer was resolved from `self.library`, which is
        // still loaded, and `info` is a valid exclusive reference.
        unsafe { (self.version_check)(info) }
    }

    fn activate(&self, services: &HostServices) -> c_int {
        // SAFETY: as for `version_check`; `services` outlives the call.
        unsafe { (self.activate)(services) }
    }

    fn finalize(&self, services: &HostServices) -> Option<c_int> {
        // SAFETY: the finalize signature is fixed by the ABI and the symbol
        // is only used while `self.library` is loaded.
        let finalize = unsafe { self.library.get::<FinalizeFn>(FINALIZE_SYMBOL) }.ok()?;
        // SAFETY: as above; `services` outlives the call.
        Some(unsafe { finalize(services) })
    }
}

impl Drop for NativeModule {
    fn drop(&mut self) {
        debug!(
            target: MODULE_TARGET,
            path = %self.path.display(),
            "unloading native module"
        );
    }
}

/// Host version plugins must have been built against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostVersion {
    major: String,
    minor: String,
    tiny: String,
}

impl Default for HostVersion {
    fn default() -> Self {
        Self::current()
    }
}

impl HostVersion {
    /// Version of the running host.
    #[must_use]
    pub fn current() -> Self {
        Self::new(HOST_VERSION_MAJOR, HOST_VERSION_MINOR, HOST_VERSION_TINY)
    }

    /// Builds an explicit version.
    #[must_use]
    pub fn new(major: impl Into<String>, minor: impl Into<String>, tiny: impl Into<String>) -> Self {
        Self {
            major: major.into(),
            minor: minor.into(),
            tiny: tiny.into(),
        }
    }

    /// Checks the outcome of a plugin's version-check call.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::VersionCheckFailed`] for a negative status,
    /// [`PluginError::ApiVersionMismatch`] when the plugin reports another
    /// API revision, and [`PluginError::HostVersionMismatch`] when it was
    /// built for another host version.
    pub fn verify(
        &self,
        plugin: &str,
        status: c_int,
        info: &PluginServerInfo,
    ) -> Result<(), PluginError> {
        if status < 0 {
            return Err(PluginError::VersionCheckFailed {
                name: plugin.to_owned(),
                status,
            });
        }
        if info.plugin_api_version != PLUGIN_API_VERSION {
            return Err(PluginError::ApiVersionMismatch {
                name: plugin.to_owned(),
                expected: PLUGIN_API_VERSION,
                found: info.plugin_api_version,
            });
        }
        let reported = Self::new(info.host_major(), info.host_minor(), info.host_tiny());
        if reported != *self {
            return Err(PluginError::HostVersionMismatch {
                name: plugin.to_owned(),
                expected: self.to_string(),
                found: reported.to_string(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for HostVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.tiny)
    }
}
