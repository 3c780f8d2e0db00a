//! Host process orchestration: plugin lifecycle and signal-driven shutdown.

mod errors;
mod launch;
mod shutdown;

pub use errors::LaunchError;
pub use launch::{HOST_GREETING_KEY, LaunchPlan, RunSummary, run_host, run_host_with};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
