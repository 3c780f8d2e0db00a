//! Supervision of out-of-process helper plugins.
//!
//! A plugin that ships no native module may instead name a helper binary.
//! [`HelperHarness::launch`] finds that binary in the approved search paths,
//! spawns it with no arguments, and wires its standard streams to a
//! [`DuplexBuffer`]:
//!
//! - a writer pump moves host→child bytes from the outbound channel to the
//!   child's stdin;
//! - a reader pump moves child→host bytes from stdout into the inbound
//!   channel and notifies the registered [`HelperConsumer`];
//! - a third pump forwards stderr lines to the log.
//!
//! The harness owns the process and all three pumps. On Unix the helper
//! leads its own process group, so anything it starts is owned too.
//! [`HelperHarness::terminate`] (also run on drop) closes stdin, waits up to
//! a grace period for the child to exit, kills the group if it has not, and
//! joins the pumps. A pump still blocked after a further grace period is
//! detached rather than waited on.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use keel_config::{
    Config, DEFAULT_HELPER_BINARY_PATH, DEFAULT_HELPER_TERMINATION_GRACE_MS, TemplateContext,
    expand_path_template,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::channel::{ByteChannel, DuplexBuffer, HELPER_CHANNEL_CAPACITY};
use crate::error::PluginError;

const HARNESS_TARGET: &str = "keel_plugins::harness";

/// Largest chunk moved by a pump in one step.
const PUMP_CHUNK: usize = 64 * 1024;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shortest time terminate waits for the pumps to drain.
const PUMP_JOIN_FLOOR: Duration = Duration::from_millis(250);

/// Receives notice of bytes arriving from a helper process.
///
/// Called on the harness reader thread after each chunk is buffered. The
/// inbound channel is FIFO; implementations typically drain it with
/// [`ByteChannel::try_read`].
pub trait HelperConsumer: Send + Sync {
    /// Invoked after new bytes from `plugin`'s helper were buffered.
    fn bytes_available(&self, plugin: &str, inbound: &ByteChannel);
}

/// Consumer that leaves bytes buffered for whoever reads the harness.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferingConsumer;

impl HelperConsumer for BufferingConsumer {
    fn bytes_available(&self, plugin: &str, inbound: &ByteChannel) {
        debug!(
            target: HARNESS_TARGET,
            plugin,
            buffered = inbound.len(),
            "helper output buffered"
        );
    }
}

/// Where helper binaries may be found and how they are supervised.
#[derive(Clone)]
pub struct HelperSettings {
    search_templates: Vec<String>,
    context: TemplateContext,
    grace: Duration,
    consumer: Arc<dyn HelperConsumer>,
}

impl std::fmt::Debug for HelperSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HelperSettings")
            .field("search_templates", &self.search_templates)
            .field("context", &self.context)
            .field("grace", &self.grace)
            .finish_non_exhaustive()
    }
}

impl HelperSettings {
    /// Builds settings from explicit search-path templates.
    #[must_use]
    pub fn new(search_templates: Vec<String>, context: TemplateContext) -> Self {
        Self {
            search_templates,
            context,
            grace: Duration::from_millis(DEFAULT_HELPER_TERMINATION_GRACE_MS),
            consumer: Arc::new(BufferingConsumer),
        }
    }

    /// Builds settings from host configuration.
    #[must_use]
    pub fn from_config(config: &Config, context: TemplateContext) -> Self {
        Self::new(config.helper_binary_path().to_vec(), context)
            .with_grace(config.helper_termination_grace())
    }

    /// Overrides the termination grace period.
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Registers the consumer notified of child→host bytes.
    #[must_use]
    pub fn with_consumer(mut self, consumer: Arc<dyn HelperConsumer>) -> Self {
        self.consumer = consumer;
        self
    }

    /// Termination grace period.
    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Expands the search-path templates, in order.
    ///
    /// With no templates configured, falls back to [`DEFAULT_HELPER_BINARY_PATH`]
    /// and logs an error so operators notice stale configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Template`] when a template cannot be expanded.
    pub fn search_paths(&self, plugin: &str) -> Result<Vec<PathBuf>, PluginError> {
        if self.search_templates.is_empty() {
            error!(
                target: HARNESS_TARGET,
                plugin,
                fallback = DEFAULT_HELPER_BINARY_PATH,
                "no helper_binary_path configured; using the host install directory"
            );
            return Ok(vec![expand_path_template(
                DEFAULT_HELPER_BINARY_PATH,
                &self.context,
            )?]);
        }
        self.search_templates
            .iter()
            .map(|template| expand_path_template(template, &self.context).map_err(Into::into))
            .collect()
    }
}

/// Returns `true` when `binary` contains a path separator.
#[must_use]
pub fn escapes_search_path(binary: &str) -> bool {
    binary.contains('/') || binary.chars().any(std::path::is_separator)
}

/// A supervised helper process and its byte channels.
#[derive(Debug)]
pub struct HelperHarness {
    plugin: String,
    executable: PathBuf,
    buffers: DuplexBuffer,
    child: Mutex<Child>,
    pumps: Vec<JoinHandle<()>>,
    grace: Duration,
    terminated: bool,
}

impl HelperHarness {
    /// Validates, resolves and launches `binary` on behalf of `plugin`.
    ///
    /// # Errors
    ///
    /// - [`PluginError::HelperPathEscape`] when `binary` contains a path
    ///   separator. This is checked before anything else and is host-fatal.
    /// - [`PluginError::Template`] when a search path cannot be expanded.
    /// - [`PluginError::HelperNotFound`] when no search path holds an
    ///   executable named `binary`.
    /// - [`PluginError::HelperSpawn`] when the process or its pumps cannot
    ///   be started.
    pub fn launch(
        plugin: &str,
        binary: &str,
        settings: &HelperSettings,
    ) -> Result<Self, PluginError> {
        if escapes_search_path(binary) {
            error!(
                target: HARNESS_TARGET,
                plugin,
                binary,
                "invalid plugin helper binary; binary must not contain a path"
            );
            return Err(PluginError::HelperPathEscape {
                name: plugin.to_owned(),
                binary: binary.to_owned(),
            });
        }

        let buffers = DuplexBuffer::new(HELPER_CHANNEL_CAPACITY, HELPER_CHANNEL_CAPACITY);
        let search_paths = settings.search_paths(plugin)?;
        let executable = resolve_executable(plugin, binary, &search_paths)?;

        debug!(
            target: HARNESS_TARGET,
            plugin,
            executable = %executable.display(),
            "spawning helper process"
        );

        let mut command = Command::new(&executable);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|err| {
                error!(
                    target: HARNESS_TARGET,
                    plugin,
                    binary,
                    error = %err,
                    "failed to launch helper binary"
                );
                PluginError::HelperSpawn {
                    name: plugin.to_owned(),
                    message: format!("failed to spawn '{}'", executable.display()),
                    source: Some(Arc::new(err)),
                }
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut harness = Self {
            plugin: plugin.to_owned(),
            executable,
            buffers,
            child: Mutex::new(child),
            pumps: Vec::with_capacity(3),
            grace: settings.grace,
            terminated: false,
        };

        // On error the partially started harness is dropped, which kills
        // the child and joins whatever pumps did start.
        harness.start_pumps(stdin, stdout, stderr, Arc::clone(&settings.consumer))?;

        info!(
            target: HARNESS_TARGET,
            plugin,
            pid = harness.pid(),
            executable = %harness.executable.display(),
            "helper process launched"
        );
        Ok(harness)
    }

    fn start_pumps(
        &mut self,
        child_stdin: Option<ChildStdin>,
        child_stdout: Option<ChildStdout>,
        child_stderr: Option<ChildStderr>,
        consumer: Arc<dyn HelperConsumer>,
    ) -> Result<(), PluginError> {
        let (Some(stdin), Some(stdout)) = (child_stdin, child_stdout) else {
            return Err(PluginError::HelperSpawn {
                name: self.plugin.clone(),
                message: String::from("failed to capture helper stdio"),
                source: None,
            });
        };

        let outbound = Arc::clone(self.buffers.outbound());
        let writer = spawn_pump(&self.plugin, "tx", move || pump_outbound(&outbound, stdin))?;
        self.pumps.push(writer);

        let inbound = Arc::clone(self.buffers.inbound());
        let reader_plugin = self.plugin.clone();
        let reader = spawn_pump(&self.plugin, "rx", move || {
            pump_inbound(&reader_plugin, &inbound, stdout, consumer.as_ref());
        })?;
        self.pumps.push(reader);

        if let Some(stderr) = child_stderr {
            let stderr_plugin = self.plugin.clone();
            let forwarder = spawn_pump(&self.plugin, "err", move || {
                pump_stderr(&stderr_plugin, stderr);
            })?;
            self.pumps.push(forwarder);
        }
        Ok(())
    }

    /// Name of the plugin that owns this helper.
    #[must_use]
    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Absolute path of the launched executable.
    #[must_use]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Operating-system process id of the helper.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.lock().id()
    }

    /// Returns `true` while the helper process has not exited.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    /// Queues bytes for the helper without waiting, returning how many fit.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ChannelClosed`] once the helper's stdin is gone.
    pub fn send(&self, data: &[u8]) -> Result<usize, PluginError> {
        self.buffers
            .outbound()
            .try_write(data)
            .map_err(|_| self.channel_closed())
    }

    /// Queues all of `data`, waiting for the helper to consume earlier bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ChannelClosed`] once the helper's stdin is gone.
    pub fn send_all(&self, data: &[u8]) -> Result<(), PluginError> {
        self.buffers
            .outbound()
            .write_all(data)
            .map_err(|_| self.channel_closed())
    }

    fn channel_closed(&self) -> PluginError {
        PluginError::ChannelClosed {
            name: self.plugin.clone(),
        }
    }

    /// Child-to-host channel.
    #[must_use]
    pub fn inbound(&self) -> &ByteChannel {
        self.buffers.inbound()
    }

    /// Host-to-child channel.
    #[must_use]
    pub fn outbound(&self) -> &ByteChannel {
        self.buffers.outbound()
    }

    /// Stops the helper and releases its channels.
    ///
    /// Closes stdin, waits up to the grace period, then kills the process if
    /// it is still running. On Unix any descendants left in the helper's
    /// process group are killed too. Returns the exit status when it could
    /// be collected; repeated calls return `None`.
    pub fn terminate(&mut self) -> Option<ExitStatus> {
        if self.terminated {
            return None;
        }
        self.terminated = true;

        self.buffers.outbound().close();
        let status = wait_with_grace(&self.plugin, self.child.get_mut(), self.grace);
        // Descendants may outlive the helper and keep its pipes open.
        #[cfg(unix)]
        kill_process_group(&self.plugin, self.child.get_mut().id());
        self.buffers.inbound().close();

        let pumps = std::mem::take(&mut self.pumps);
        join_pumps(&self.plugin, pumps, self.grace);

        debug!(
            target: HARNESS_TARGET,
            plugin = %self.plugin,
            ?status,
            "helper process terminated"
        );
        status
    }
}

impl Drop for HelperHarness {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_pump<F>(plugin: &str, role: &str, work: F) -> Result<JoinHandle<()>, PluginError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("keel-helper-{role}"))
        .spawn(work)
        .map_err(|err| PluginError::HelperSpawn {
            name: plugin.to_owned(),
            message: format!("failed to start {role} pump"),
            source: Some(Arc::new(err)),
        })
}

fn resolve_executable(
    plugin: &str,
    binary: &str,
    search_paths: &[PathBuf],
) -> Result<PathBuf, PluginError> {
    if !binary.is_empty() {
        if let Some(found) = search_paths
            .iter()
            .map(|dir| dir.join(binary))
            .find(|candidate| is_executable(candidate))
        {
            return Ok(found);
        }
    }
    error!(
        target: HARNESS_TARGET,
        plugin,
        binary,
        searched = ?search_paths,
        "failed to launch helper binary"
    );
    Err(PluginError::HelperNotFound {
        name: plugin.to_owned(),
        binary: binary.to_owned(),
        searched: search_paths.to_vec(),
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn pump_outbound(outbound: &ByteChannel, mut stdin: ChildStdin) {
    while let Some(chunk) = outbound.read(PUMP_CHUNK) {
        if let Err(err) = stdin.write_all(&chunk).and_then(|()| stdin.flush()) {
            debug!(target: HARNESS_TARGET, error = %err, "helper stdin closed");
            break;
        }
    }
    outbound.close();
    // Dropping stdin tells the helper no more input will arrive.
}

fn pump_inbound(
    plugin: &str,
    inbound: &ByteChannel,
    mut stdout: ChildStdout,
    consumer: &dyn HelperConsumer,
) {
    let mut buffer = vec![0_u8; PUMP_CHUNK];
    loop {
        let count = match stdout.read(&mut buffer) {
            Ok(0) => break,
            Ok(count) => count,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!(target: HARNESS_TARGET, plugin, error = %err, "helper stdout failed");
                break;
            }
        };
        let Some(chunk) = buffer.get(..count) else {
            break;
        };
        if inbound.write_all(chunk).is_err() {
            break;
        }
        consumer.bytes_available(plugin, inbound);
    }
    inbound.close();
}

fn pump_stderr(plugin: &str, stderr: ChildStderr) {
    for entry in BufReader::new(stderr).lines() {
        match entry {
            Ok(line) if !line.trim().is_empty() => {
                debug!(target: HARNESS_TARGET, plugin, stderr = %line.trim(), "helper stderr");
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

/// Waits for the child to exit, killing it once `grace` has elapsed.
fn wait_with_grace(plugin: &str, child: &mut Child, grace: Duration) -> Option<ExitStatus> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status),
            Ok(None) if start.elapsed() < grace => thread::sleep(EXIT_POLL_INTERVAL),
            Ok(None) => {
                warn!(
                    target: HARNESS_TARGET,
                    plugin,
                    grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                    "helper did not exit in time, killing process"
                );
                kill_helper(plugin, child);
                return child.wait().ok();
            }
            Err(err) => {
                warn!(target: HARNESS_TARGET, plugin, error = %err, "failed to poll helper");
                kill_helper(plugin, child);
                return child.wait().ok();
            }
        }
    }
}

/// Kills the helper, taking its process group with it on Unix.
fn kill_helper(plugin: &str, child: &mut Child) {
    #[cfg(unix)]
    {
        if kill_process_group(plugin, child.id()) {
            return;
        }
    }
    drop(child.kill());
}

/// Sends `SIGKILL` to the process group led by `pgid`.
///
/// Returns `true` when the signal was delivered. An empty group is not an
/// error.
#[cfg(unix)]
fn kill_process_group(plugin: &str, pgid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            debug!(target: HARNESS_TARGET, plugin, pgid, "helper process group killed");
            true
        }
        Err(Errno::ESRCH) => false,
        Err(err) => {
            warn!(
                target: HARNESS_TARGET,
                plugin,
                pgid,
                error = %err,
                "failed to signal helper process group"
            );
            false
        }
    }
}

/// Joins the pump threads, detaching any still blocked once the grace
/// period (at least [`PUMP_JOIN_FLOOR`]) elapses.
fn join_pumps(plugin: &str, pumps: Vec<JoinHandle<()>>, grace: Duration) {
    let budget = grace.max(PUMP_JOIN_FLOOR);
    let start = Instant::now();
    for pump in pumps {
        while !pump.is_finished() && start.elapsed() < budget {
            thread::sleep(EXIT_POLL_INTERVAL);
        }
        if !pump.is_finished() {
            warn!(
                target: HARNESS_TARGET,
                plugin,
                pump = pump.thread().name().unwrap_or("unnamed"),
                "helper pump still blocked; detaching"
            );
            continue;
        }
        if pump.join().is_err() {
            warn!(target: HARNESS_TARGET, plugin, "helper pump panicked");
        }
    }
}
