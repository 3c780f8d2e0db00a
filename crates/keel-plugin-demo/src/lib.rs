//! Reference native plugin for the keel host.
//!
//! Built as a `cdylib`, this crate exports the three entry points the host
//! resolves by name. Install it next to a manifest such as:
//!
//! ```toml
//! name = "demo"
//! version = "1.0"
//! object = "libkeel_plugin_demo.so"
//! ```
//!
//! On activation it publishes [`ACTIVATED_KEY`]. On finalize it reads
//! [`HOST_GREETING_KEY`], which the host may publish after activation, and
//! echoes it back under [`FINALIZED_KEY`].

use std::ffi::c_int;
use std::sync::atomic::{AtomicUsize, Ordering};

use keel_plugin_abi::{ActivateFn, FinalizeFn, HostServices, PluginServerInfo, VersionCheckFn};

/// Value published when the plugin activates.
pub const ACTIVATED_KEY: &str = "demo.activated";

/// Value published when the plugin is finalized.
pub const FINALIZED_KEY: &str = "demo.finalized";

/// Value the plugin looks up during finalize.
pub const HOST_GREETING_KEY: &str = "host.greeting";

static FINALIZE_CALLS: AtomicUsize = AtomicUsize::new(0);

const _: VersionCheckFn = keel_plugin_version_check;
const _: ActivateFn = keel_plugin_activate;
const _: FinalizeFn = keel_plugin_finalize;

/// Reports the API and host version this plugin was built against.
///
/// # Safety
///
/// `info` must be null or point to a writable [`PluginServerInfo`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_plugin_version_check(info: *mut PluginServerInfo) -> c_int {
    // SAFETY: upheld by the caller.
    let Some(record) = (unsafe { info.as_mut() }) else {
        return -1;
    };
    record.fill_current();
    0
}

/// Publishes the plugin's version into the host service registry.
///
/// # Safety
///
/// `services` must be null or point to a live [`HostServices`] table.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_plugin_activate(services: *const HostServices) -> c_int {
    // SAFETY: upheld by the caller.
    let Some(table) = (unsafe { services.as_ref() }) else {
        return -1;
    };
    if table.publish(ACTIVATED_KEY, env!("CARGO_PKG_VERSION")) {
        0
    } else {
        -1
    }
}

/// Echoes the host greeting, if any, once the host has finished starting.
///
/// # Safety
///
/// `services` must be null or point to a live [`HostServices`] table.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keel_plugin_finalize(services: *const HostServices) -> c_int {
    FINALIZE_CALLS.fetch_add(1, Ordering::SeqCst);
    // SAFETY: upheld by the caller.
    let Some(table) = (unsafe { services.as_ref() }) else {
        return -1;
    };
    let greeting = table
        .lookup(HOST_GREETING_KEY)
        .unwrap_or_else(|| String::from("none"));
    if table.publish(FINALIZED_KEY, &greeting) {
        0
    } else {
        -1
    }
}

/// Number of times the finalize entry point has run in this process.
#[must_use]
pub fn finalize_calls() -> usize {
    FINALIZE_CALLS.load(Ordering::SeqCst)
}
