//! Host daemon for keel plugins.
//!
//! `keeld` loads configuration (defaults, file, `KEEL_*` environment and
//! command-line flags, layered by `ortho_config`), installs structured
//! telemetry and then drives the plugin lifecycle from [`keel_plugins`]:
//! install roots are scanned, discovered plugins are activated and
//! finalized, and the host blocks until a termination signal arrives. Every registered plugin, including external
//! helper processes, is released before the process exits.
//!
//! Lifecycle milestones are reported through [`LifecycleReporter`] so tests
//! and alternative sinks can observe the sequence without parsing logs.

mod bootstrap;
mod health;
mod process;
mod telemetry;

pub use bootstrap::{
    BootstrapError, Bootstrapped, ConfigLoader, StaticConfigLoader, SystemConfigLoader,
    bootstrap_with,
};
pub use health::{LifecycleReporter, StructuredLifecycleReporter};
pub use process::{
    HOST_GREETING_KEY, LaunchError, LaunchPlan, RunSummary, ShutdownError, ShutdownSignal,
    SystemShutdownSignal, run_host, run_host_with,
};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
