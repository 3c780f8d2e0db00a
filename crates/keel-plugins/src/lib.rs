//! Plugin discovery, activation and supervision for the keel host.
//!
//! The `keel-plugins` crate extends a long-running host with third-party
//! plugins of two forms:
//!
//! - **native plugins** are shared libraries loaded into the host process.
//!   They export the entry points described in [`keel_plugin_abi`] and are
//!   version-checked before activation;
//! - **helper plugins** name an executable that the host spawns and owns,
//!   exchanging bytes with it over a bounded [`channel::DuplexBuffer`].
//!
//! A plugin with neither form only contributes metadata and static assets.
//!
//! # Lifecycle
//!
//! The [`PluginTracker`] drives every plugin through four phases:
//!
//! 1. [`PluginTracker::scan`] reads `manifest.toml` files from the system
//!    and user install roots;
//! 2. [`PluginTracker::activate`] loads modules or launches helpers;
//! 3. [`PluginTracker::finalize`] runs each module's optional late hook once
//!    the host has finished starting;
//! 4. [`PluginTracker::shutdown`] unloads modules and stops helpers.
//!
//! Failures stay with the plugin that raised them. The one exception is a
//! helper name that tries to leave the approved search paths, which
//! [`PluginError::is_host_fatal`] flags as grounds to halt the host.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use keel_plugins::{PluginTracker, ServiceRegistry};
//!
//! let tracker = PluginTracker::new(Arc::new(ServiceRegistry::new()))
//!     .with_roots("/usr/local/lib/keel/plugins", None);
//! tracker.scan();
//! tracker.activate().expect("no host-fatal plugin errors");
//! tracker.finalize();
//! tracker.shutdown();
//! ```

pub mod channel;
pub mod error;
pub mod harness;
pub mod listing;
pub mod manifest;
pub mod module;
pub mod record;
pub mod services;
pub mod tracker;

#[cfg(test)]
mod tests;

pub use self::channel::{ByteChannel, ChannelClosed, DuplexBuffer, HELPER_CHANNEL_CAPACITY};
pub use self::error::PluginError;
pub use self::harness::{BufferingConsumer, HelperConsumer, HelperHarness, HelperSettings};
pub use self::listing::{HttpResponse, HttpStreamHandler, PLUGIN_LISTING_PATH};
pub use self::manifest::{MANIFEST_FILE_NAME, PluginManifest};
pub use self::module::{DylibLoader, HostVersion, ModuleLoader, PluginModule};
pub use self::record::{FinalizeOutcome, PluginInfo, PluginRecord, PluginRuntime};
pub use self::services::ServiceRegistry;
pub use self::tracker::{PluginTracker, ScanSummary};
