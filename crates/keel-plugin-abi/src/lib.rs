//! Native-module ABI shared by the keel host and its plugins.
//!
//! A native plugin is a shared library exporting up to three `extern "C"`
//! entry points, looked up by the fixed names below:
//!
//! | symbol                        | signature            | required |
//! |-------------------------------|----------------------|----------|
//! | [`VERSION_CHECK_SYMBOL`]      | [`VersionCheckFn`]   | yes      |
//! | [`ACTIVATE_SYMBOL`]           | [`ActivateFn`]       | yes      |
//! | [`FINALIZE_SYMBOL`]           | [`FinalizeFn`]       | no       |
//!
//! Every entry point returns a negative value on failure and a non-negative
//! value on success.
//!
//! The version check receives an empty [`PluginServerInfo`] which the plugin
//! fills with the API version and host version it was built against,
//! normally by calling [`PluginServerInfo::fill_current`]. The host rejects
//! any plugin that reports a different [`PLUGIN_API_VERSION`] or host
//! version.
//!
//! Activation and finalisation receive a [`HostServices`] table: the
//! capability through which a plugin publishes and looks up named values in
//! the host's service registry. The table is only valid for the duration of
//! the call.
//!
//! Everything in this crate is `#[repr(C)]` so plugins may be written in any
//! language with a C FFI.

use std::ffi::{CStr, CString, c_char, c_int, c_void};


/// Revision of the plugin ABI described by this crate.
pub const PLUGIN_API_VERSION: u32 = 1;

/// Host major version plugins are built against.
pub const HOST_VERSION_MAJOR: &str = env!("CARGO_PKG_VERSION_MAJOR");

/// Host minor version plugins are built against.
pub const HOST_VERSION_MINOR: &str = env!("CARGO_PKG_VERSION_MINOR");

/// Host patch version plugins are built against.
pub const HOST_VERSION_TINY: &str = env!("CARGO_PKG_VERSION_PATCH");

/// Required version-check entry point.
pub const VERSION_CHECK_SYMBOL: &[u8] = b"keel_plugin_version_check\0";

/// Required activation entry point.
pub const ACTIVATE_SYMBOL: &[u8] = b"keel_plugin_activate\0";

/// Optional finalisation entry point, called once host startup completes.
pub const FINALIZE_SYMBOL: &[u8] = b"keel_plugin_finalize\0";

/// Capacity, including the NUL terminator, of each version string field.
pub const VERSION_FIELD_LEN: usize = 32;

/// Version-check entry point signature.
pub type VersionCheckFn = unsafe extern "C" fn(info: *mut PluginServerInfo) -> c_int;

/// Activation entry point signature.
pub type ActivateFn = unsafe extern "C" fn(services: *const HostServices) -> c_int;

/// Finalisation entry point signature; identical to [`ActivateFn`].
pub type FinalizeFn = ActivateFn;

/// Publishes a NUL-terminated `value` under a NUL-terminated `key`.
///
/// Returns zero on success and a negative value on failure.
pub type PublishFn =
    unsafe extern "C" fn(context: *mut c_void, key: *const c_char, value: *const c_char) -> c_int;

/// Copies the value stored under `key` into `out`.
///
/// At most `out_len - 1` bytes are copied and the result is always
/// NUL-terminated. Returns the full length of the value in bytes, or a
/// negative value when the key is unknown.
pub type LookupFn = unsafe extern "C" fn(
    context: *mut c_void,
    key: *const c_char,
    out: *mut c_char,
    out_len: usize,
) -> c_int;

/// Version record exchanged during the version check.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginServerInfo {
    /// ABI revision the plugin was built against.
    pub plugin_api_version: u32,
    /// NUL-terminated host major version.
    pub host_major: [u8; VERSION_FIELD_LEN],
    /// NUL-terminated host minor version.
    pub host_minor: [u8; VERSION_FIELD_LEN],
    /// NUL-terminated host patch version.
    pub host_tiny: [u8; VERSION_FIELD_LEN],
}

impl Default for PluginServerInfo {
    fn default() -> Self {
        Self::empty()
    }
}

impl PluginServerInfo {
    /// Returns a zeroed record, as handed to a plugin's version check.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            plugin_api_version: 0,
            host_major: [0; VERSION_FIELD_LEN],
            host_minor: [0; VERSION_FIELD_LEN],
            host_tiny: [0; VERSION_FIELD_LEN],
        }
    }

    /// Fills the record with the versions this crate was compiled with.
    pub fn fill_current(&mut self) {
        self.plugin_api_version = PLUGIN_API_VERSION;
        self.set_host_version(HOST_VERSION_MAJOR, HOST_VERSION_MINOR, HOST_VERSION_TINY);
    }

    /// Writes the host version strings, truncating overlong values.
    pub fn set_host_version(&mut self, major: &str, minor: &str, tiny: &str) {
        write_field(&mut self.host_major, major);
        write_field(&mut self.host_minor, minor);
        write_field(&mut self.host_tiny, tiny);
    }

    /// Host major version reported by the plugin.
    #[must_use]
    pub fn host_major(&self) -> String {
        read_field(&self.host_major)
    }

    /// Host minor version reported by the plugin.
    #[must_use]
    pub fn host_minor(&self) -> String {
        read_field(&self.host_minor)
    }

    /// Host patch version reported by the plugin.
    #[must_use]
    pub fn host_tiny(&self) -> String {
        read_field(&self.host_tiny)
    }
}

fn write_field(field: &mut [u8; VERSION_FIELD_LEN], value: &str) {
    *field = [0; VERSION_FIELD_LEN];
    for (slot, byte) in field
        .iter_mut()
        .zip(value.as_bytes().iter().take(VERSION_FIELD_LEN - 1))
    {
        *slot = *byte;
    }
}

fn read_field(field: &[u8; VERSION_FIELD_LEN]) -> String {
    let bytes = field.split(|byte| *byte == 0).next().unwrap_or(&[]);
    String::from_utf8_lossy(bytes).into_owned()
}

/// Capability table through which plugins reach the host service registry.
///
/// Tables are built by the host and stay valid only while an entry point
/// runs; plugins must not retain the pointer.
#[repr(C)]
#[derive(Debug)]
pub struct HostServices {
    /// Opaque host state passed back to every callback.
    pub context: *mut c_void,
    /// Publishes a named value.
    pub publish: PublishFn,
    /// Looks up a named value.
    pub lookup: LookupFn,
}

impl HostServices {
    /// Publishes `value` under `key`, returning whether the host accepted it.
    ///
    /// Keys or values containing interior NUL bytes are rejected.
    #[must_use]
    pub fn publish(&self, key: &str, value: &str) -> bool {
        let (Ok(c_key), Ok(c_value)) = (CString::new(key), CString::new(value)) else {
            return false;
        };
        // SAFETY: the table is built by the host, whose callbacks accept any
        // NUL-terminated strings together with the context it supplied.
        let status = unsafe { (self.publish)(self.context, c_key.as_ptr(), c_value.as_ptr()) };
        status >= 0
    }

    /// Looks up the value stored under `key`.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<String> {
        let c_key = CString::new(key).ok()?;
        let mut buffer = vec![0_u8; 256];
        let mut needed = self.lookup_into(&c_key, &mut buffer)?;
        if needed >= buffer.len() {
            buffer = vec![0_u8; needed + 1];
            needed = self.lookup_into(&c_key, &mut buffer)?;
        }
        buffer.truncate(needed);
        String::from_utf8(buffer).ok()
    }

    fn lookup_into(&self, key: &CStr, buffer: &mut [u8]) -> Option<usize> {
        // SAFETY: `buffer` is writable for `buffer.len()` bytes and the
        // callback honours `out_len`.
        let status = unsafe {
            (self.lookup)(
                self.context,
                key.as_ptr(),
                buffer.as_mut_ptr().cast::<c_char>(),
                buffer.len(),
            )
        };
        usize::try_from(status).ok()
    }
}
