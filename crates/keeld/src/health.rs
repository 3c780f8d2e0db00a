//! Structured reporting of host lifecycle milestones.

use std::sync::Arc;

use keel_config::Config;
use keel_plugins::{PluginError, ScanSummary};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = "keeld::health";

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after configuration and telemetry are ready.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the install roots have been scanned.
    fn plugins_scanned(&self, summary: &ScanSummary);

    /// Invoked after activation with the number of plugins registered.
    fn plugins_activated(&self, activated: usize);

    /// Invoked when activation stops on a host-fatal error.
    fn plugins_failed(&self, error: &PluginError);

    /// Invoked after finalize hooks have run.
    fn plugins_finalized(&self, finalized: usize);

    /// Invoked after every plugin has been released.
    fn plugins_released(&self, released: usize);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn plugins_scanned(&self, summary: &ScanSummary) {
        (**self).plugins_scanned(summary);
    }

    fn plugins_activated(&self, activated: usize) {
        (**self).plugins_activated(activated);
    }

    fn plugins_failed(&self, error: &PluginError) {
        (**self).plugins_failed(error);
    }

    fn plugins_finalized(&self, finalized: usize) {
        (**self).plugins_finalized(finalized);
    }

    fn plugins_released(&self, released: usize) {
        (**self).plugins_released(released);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting host bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            plugin_system_dir = %config.plugin_system_dir(),
            plugin_user_dir = ?config.plugin_user_dir(),
            "host bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "host bootstrap failed"
        );
    }

    fn plugins_scanned(&self, summary: &ScanSummary) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugins_scanned",
            discovered = summary.discovered(),
            skipped = summary.skipped(),
            failed_roots = summary.failed_roots().len(),
            "plugin install roots scanned"
        );
    }

    fn plugins_activated(&self, activated: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugins_activated",
            activated,
            "plugins activated"
        );
    }

    fn plugins_failed(&self, error: &PluginError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "plugins_failed",
            error = %error,
            "plugin activation halted the host"
        );
    }

    fn plugins_finalized(&self, finalized: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugins_finalized",
            finalized,
            "plugin finalize hooks completed"
        );
    }

    fn plugins_released(&self, released: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "plugins_released",
            released,
            "plugins released"
        );
    }
}
