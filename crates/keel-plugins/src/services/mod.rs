//! Host service registry handed to plugins as a capability.
//!
//! The registry holds two kinds of entries under string names:
//!
//! - text values, reachable from native plugins through the
//!   [`HostServices`] table;
//! - typed services (`Arc<dyn Any + Send + Sync>`) for in-process Rust
//!   callers.
//!
//! The tracker never inspects registry contents; it only passes the
//! capability into plugin entry points via [`ServiceRegistry::with_host_services`].

use std::any::Any;
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_int, c_void};
use std::sync::Arc;

use keel_plugin_abi::HostServices;
use parking_lot::RwLock;
use tracing::debug;

const SERVICES_TARGET: &str = "keel_plugins::services";

enum ServiceEntry {
    Value(String),
    Service(Arc<dyn Any + Send + Sync>),
}

/// Named values and services shared between the host and its plugins.
#[derive(Default)]
pub struct ServiceRegistry {
    entries: RwLock<HashMap<String, ServiceEntry>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.read();
        let mut names: Vec<&String> = entries.keys().collect();
        names.sort();
        f.debug_struct("ServiceRegistry")
            .field("entries", &names)
            .finish()
    }
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a text value, replacing any entry with the same name.
    pub fn publish_value(&self, name: impl Into<String>, value: impl Into<String>) {
        let key = name.into();
        debug!(target: SERVICES_TARGET, service = %key, "publishing value");
        self.entries
            .write()
            .insert(key, ServiceEntry::Value(value.into()));
    }

    /// Returns the text value published under `name`.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<String> {
        match self.entries.read().get(name) {
            Some(ServiceEntry::Value(value)) => Some(value.clone()),
            Some(ServiceEntry::Service(_)) | None => None,
        }
    }

    /// Publishes a typed service, replacing any entry with the same name.
    pub fn publish_service<T>(&self, name: impl Into<String>, service: Arc<T>)
    where
        T: Any + Send + Sync,
    {
        let key = name.into();
        debug!(target: SERVICES_TARGET, service = %key, "publishing service");
        self.entries
            .write()
            .insert(key, ServiceEntry::Service(service));
    }

    /// Returns the service published under `name` when it has type `T`.
    #[must_use]
    pub fn service<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        match self.entries.read().get(name) {
            Some(ServiceEntry::Service(service)) => Arc::clone(service).downcast::<T>().ok(),
            Some(ServiceEntry::Value(_)) | None => None,
        }
    }

    /// Removes the entry published under `name`, returning whether one existed.
    pub fn withdraw(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    /// Returns `true` when an entry is published under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Returns the number of published entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` when nothing is published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Runs `f` with a [`HostServices`] table bound to this registry.
    ///
    /// The table borrows `self` and is only valid inside `f`.
    pub fn with_host_services<R>(&self, f: impl FnOnce(&HostServices) -> R) -> R {
        let table = HostServices {
            context: std::ptr::from_ref(self).cast_mut().cast::<c_void>(),
            publish: publish_trampoline,
            lookup: lookup_trampoline,
        };
        f(&table)
    }
}

unsafe extern "C" fn publish_trampoline(
    context: *mut c_void,
    key: *const c_char,
    value: *const c_char,
) -> c_int {
    if context.is_null() || key.is_null() || value.is_null() {
        return -1;
    }
    // SAFETY: `context` was produced by `with_host_services` from a live
    // registry, and the ABI requires NUL-terminated strings.
    let (registry, name, text) = unsafe {
        (
            &*context.cast_const().cast::<ServiceRegistry>(),
            CStr::from_ptr(key),
            CStr::from_ptr(value),
        )
    };
    registry.publish_value(
        name.to_string_lossy().into_owned(),
        text.to_string_lossy().into_owned(),
    );
    0
}

unsafe extern "C" fn lookup_trampoline(
    context: *mut c_void,
    key: *const c_char,
    out: *mut c_char,
    out_len: usize,
) -> c_int {
    if context.is_null() || key.is_null() {
        return -1;
    }
    // SAFETY: as for `publish_trampoline`.
    let (registry, name) = unsafe {
        (
            &*context.cast_const().cast::<ServiceRegistry>(),
            CStr::from_ptr(key),
        )
    };
    let Some(value) = registry.value(&name.to_string_lossy()) else {
        return -1;
    };
    let bytes = value.as_bytes();
    if !out.is_null() && out_len > 0 {
        let copied = bytes.len().min(out_len - 1);
        // SAFETY: the caller guarantees `out` is writable for `out_len`
        // bytes and `copied + 1 <= out_len`.
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), out.cast::<u8>(), copied);
            *out.add(copied) = 0;
        }
    }
    c_int::try_from(bytes.len()).unwrap_or(c_int::MAX)
}

#[cfg(test)]
mod tests;
