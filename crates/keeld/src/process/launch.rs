//! Sequences the plugin lifecycle around the host's lifetime.

use std::sync::Arc;

use keel_config::TemplateContext;
use keel_plugins::{PluginTracker, ServiceRegistry};
use tracing::info;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{LifecycleReporter, StructuredLifecycleReporter};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Service-registry key under which the host publishes its greeting before
/// finalize hooks run.
pub const HOST_GREETING_KEY: &str = "host.greeting";

const HOST_GREETING: &str = concat!("keeld ", env!("CARGO_PKG_VERSION"));

/// Collaborators required to run the plugin host.
pub struct LaunchPlan<L, S> {
    /// Source of host configuration.
    pub loader: L,
    /// Observer notified of lifecycle milestones.
    pub reporter: Arc<dyn LifecycleReporter>,
    /// Blocks until the host should stop.
    pub shutdown: S,
    /// Values substituted into install-root and helper path templates.
    pub context: TemplateContext,
}

/// Counts observed over one host run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Plugin directories discovered during the scan.
    pub discovered: usize,
    /// Plugins that activated, including metadata-only records.
    pub activated: usize,
    /// Records registered once activation finished.
    pub registered: usize,
    /// Finalize hooks invoked.
    pub finalized: usize,
    /// Records released at shutdown.
    pub released: usize,
}

/// Runs the host using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap fails, a plugin raises a
/// host-fatal error, or the shutdown listener cannot be installed.
pub fn run_host() -> Result<RunSummary, LaunchError> {
    let plan = LaunchPlan {
        loader: SystemConfigLoader,
        reporter: Arc::new(StructuredLifecycleReporter::new()),
        shutdown: SystemShutdownSignal,
        context: TemplateContext::detect(),
    };
    run_host_with(plan)
}

/// Runs the host with injected collaborators.
///
/// Plugins are scanned, activated and finalized, then the host blocks on the
/// shutdown signal. Every registered plugin is released before returning,
/// including when activation halts on a host-fatal error or the shutdown
/// listener fails.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap fails, a plugin raises a
/// host-fatal error, or the shutdown listener cannot be installed.
pub fn run_host_with<L, S>(plan: LaunchPlan<L, S>) -> Result<RunSummary, LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan {
        loader,
        reporter,
        shutdown,
        context,
    } = plan;

    let bootstrapped = bootstrap_with(&loader, &reporter)?;
    let services = Arc::new(ServiceRegistry::new());
    let tracker =
        PluginTracker::from_config(bootstrapped.config(), &context, Arc::clone(&services));

    let scan = tracker.scan();
    reporter.plugins_scanned(&scan);

    let activated = match tracker.activate() {
        Ok(count) => count,
        Err(error) => {
            reporter.plugins_failed(&error);
            reporter.plugins_released(tracker.shutdown());
            return Err(error.into());
        }
    };
    reporter.plugins_activated(activated);

    services.publish_value(HOST_GREETING_KEY, HOST_GREETING);
    let finalized = tracker.finalize();
    reporter.plugins_finalized(finalized);

    let registered = tracker.registry_len();
    info!(
        target: PROCESS_TARGET,
        registered,
        active = tracker.active_count(),
        "plugin host running"
    );

    let waited = shutdown.wait();
    let released = tracker.shutdown();
    reporter.plugins_released(released);
    waited?;

    Ok(RunSummary {
        discovered: scan.discovered(),
        activated,
        registered,
        finalized,
        released,
    })
}
