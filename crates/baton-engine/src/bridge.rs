//! A kernel instance driven one master call at a time.
//!
//! [`Bridge`] composes the [`Synchronizer`] with a [`Registry`]: the
//! registry, the requested time, the last observed kernel clock and the log
//! queue travel together as the session. The kernel thread runs
//! [`Kernel::run`] with a driver that exchanges values at every step and
//! parks once the kernel has caught up with the requested time.

use baton_core::{
    Kernel, KernelClock, KernelError, KernelIo, LogLevel, StepDriver, StepFlow, ValueRef,
};
use baton_registry::{Registry, RegistryError, VariableSpec, WriteOutcome};
use thiserror::Error;

use crate::config::{BridgeConfig, ConfigError};
use crate::log_queue::{Drained, LogQueue};
use crate::sync::{KernelPort, SyncError, SyncState, Synchronizer, Turn};

// ── BridgeError ────────────────────────────────────────────────────

/// Errors from [`Bridge`] operations.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum BridgeError {
    /// The kernel is not running (not started, stopped, or faulted).
    #[error("the kernel is not running")]
    NotRunning,
    /// [`Bridge::start`] was called twice.
    #[error("the kernel is already running")]
    AlreadyRunning,
    /// The kernel failed or panicked; the bridge is no longer usable.
    #[error("kernel fault: {0}")]
    KernelFault(#[source] KernelError),
    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
    /// The configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The kernel thread could not be spawned.
    #[error("failed to spawn kernel thread: {reason}")]
    SpawnFailed {
        /// The OS error.
        reason: String,
    },
    /// The kernel thread went away while holding the session.
    #[error("kernel thread disconnected")]
    Disconnected,
}

impl From<SyncError> for BridgeError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::AlreadyRunning => Self::AlreadyRunning,
            SyncError::NotRunning => Self::NotRunning,
            SyncError::SpawnFailed { reason } => Self::SpawnFailed { reason },
            SyncError::KernelFault(fault) => Self::KernelFault(fault),
            SyncError::Disconnected => Self::Disconnected,
        }
    }
}

// ── LogSink ────────────────────────────────────────────────────────

/// Receives kernel log messages on the master thread.
pub trait LogSink: Send {
    /// Called once per drained message, in the order reported.
    fn log(&mut self, level: LogLevel, message: &str);
}

// ── Session ────────────────────────────────────────────────────────

/// State shared between master and kernel, owned by whichever side holds
/// the turn.
///
/// Master time and kernel time differ by a constant offset, set at the
/// kernel's first run-period step: that step happens at the master's start
/// time, whatever the kernel's own clock reads.
#[derive(Debug)]
pub struct Session {
    registry: Registry,
    requested_time: f64,
    clock: KernelClock,
    time_offset: Option<f64>,
    logs: LogQueue,
}

impl Session {
    /// The variable registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The time the master asked the kernel to reach.
    pub fn requested_time(&self) -> f64 {
        self.requested_time
    }

    /// The kernel clock as of the last step callback, in kernel time.
    pub fn clock(&self) -> KernelClock {
        self.clock
    }

    /// Master time minus kernel time. Zero until the run period starts.
    pub fn time_offset(&self) -> f64 {
        self.time_offset.unwrap_or(0.0)
    }

    /// Time of the last completed kernel step, in master time.
    pub fn current_time(&self) -> f64 {
        self.clock.current_time + self.time_offset()
    }

    /// Time of the kernel's next scheduled step, in master time.
    pub fn next_event_time(&self) -> f64 {
        self.clock.next_event_time() + self.time_offset()
    }
}

type ServiceOutcome = Result<(), RegistryError>;

// ── driver ─────────────────────────────────────────────────────────

struct Driver<'a> {
    port: &'a mut KernelPort<Session, ServiceOutcome>,
}

impl StepDriver for Driver<'_> {
    fn step(&mut self, kernel: &mut dyn KernelIo) -> Result<StepFlow, KernelError> {
        if self.port.stop_requested() {
            return Ok(StepFlow::Stop);
        }
        let clock = kernel.clock();
        let Some(session) = self.port.shared_mut() else {
            return Ok(StepFlow::Stop);
        };
        session.clock = clock;

        // The kickoff steps run before any referent can be resolved.
        if clock.phase == baton_core::KernelPhase::Startup {
            return Ok(StepFlow::Continue);
        }
        session
            .registry
            .exchange(kernel, true)
            .map_err(into_kernel_error)?;

        if !clock.phase.is_interactive() {
            return Ok(StepFlow::Continue);
        }
        if session.time_offset.is_none() {
            session.time_offset = Some(session.requested_time - clock.current_time);
        }
        if session.current_time() < session.requested_time {
            return Ok(StepFlow::Continue);
        }
        match self
            .port
            .yield_to_master(|session| session.registry.exchange(&mut *kernel, true))
        {
            Turn::Continue => Ok(StepFlow::Continue),
            Turn::Stop => Ok(StepFlow::Stop),
        }
    }

    fn log(&mut self, level: LogLevel, message: &str) {
        if let Some(session) = self.port.shared_mut() {
            session.logs.push(level, message);
        }
    }
}

fn into_kernel_error(e: RegistryError) -> KernelError {
    match e {
        RegistryError::Kernel { source, .. } | RegistryError::Recompute(source) => source,
        other => KernelError::failed(other.to_string()),
    }
}

// ── Bridge ─────────────────────────────────────────────────────────

/// One bridged kernel instance.
pub struct Bridge {
    config: BridgeConfig,
    sync: Synchronizer<Session, ServiceOutcome>,
    kernel: Option<Box<dyn Kernel>>,
    sink: Option<Box<dyn LogSink>>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("instance", &self.config.instance_name)
            .field("sync", &self.sync)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl Bridge {
    /// Validate `config`, build the registry from `specs`, and take
    /// ownership of `kernel`. Nothing runs until [`start`](Self::start).
    pub fn new(
        config: BridgeConfig,
        kernel: Box<dyn Kernel>,
        specs: Vec<VariableSpec>,
    ) -> Result<Self, BridgeError> {
        config.validate()?;
        let registry = Registry::new(specs)?;
        let session = Session {
            registry,
            requested_time: config.start_time,
            clock: kernel.clock(),
            time_offset: None,
            logs: LogQueue::new(config.log_queue_capacity),
        };
        let sync = Synchronizer::new(session, config.thread_name());
        Ok(Self {
            config,
            sync,
            kernel: Some(kernel),
            sink: None,
        })
    }

    /// Forward drained kernel messages to `sink` in addition to `tracing`.
    pub fn set_log_sink(&mut self, sink: Box<dyn LogSink>) {
        self.sink = Some(sink);
    }

    /// The configuration this bridge was built with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Whether the kernel thread is alive.
    pub fn is_running(&self) -> bool {
        self.sync.is_running()
    }

    /// Lifecycle state of the kernel thread.
    pub fn state(&self) -> SyncState {
        self.sync.state()
    }

    /// The session, when the master holds it.
    pub fn session(&self) -> Result<&Session, BridgeError> {
        self.sync.shared().ok_or(BridgeError::Disconnected)
    }

    /// Replace the experiment window before the kernel starts.
    pub fn set_experiment(
        &mut self,
        start_time: f64,
        stop_time: Option<f64>,
        tolerance: Option<f64>,
    ) -> Result<(), BridgeError> {
        if self.kernel.is_none() {
            return Err(BridgeError::AlreadyRunning);
        }
        let config = BridgeConfig {
            start_time,
            stop_time,
            tolerance,
            ..self.config.clone()
        };
        config.validate()?;
        self.session_mut()?.requested_time = start_time;
        self.config = config;
        Ok(())
    }

    /// Start the kernel and run it to its first run-period step, which
    /// becomes the configured start time in master time.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        let Some(mut kernel) = self.kernel.take() else {
            return Err(BridgeError::AlreadyRunning);
        };
        let start_time = self.config.start_time;
        self.session_mut()?.requested_time = start_time;

        tracing::info!(instance = %self.config.instance_name, start_time, "starting kernel");
        let started = self.sync.start(move |port| {
            let mut driver = Driver { port };
            kernel.run(&mut driver)
        });
        self.drain_logs();
        started?;

        if self.is_running() {
            self.set_time(start_time)?;
        }
        Ok(())
    }

    /// Ask the kernel to reach `time`.
    ///
    /// Inputs are exchanged first. The kernel only advances when `time` is
    /// at or past its next scheduled step.
    pub fn set_time(&mut self, time: f64) -> Result<(), BridgeError> {
        self.ensure_running()?;
        self.session_mut()?.requested_time = time;

        let serviced = self.sync.service();
        self.drain_logs();
        if let Some(outcome) = serviced? {
            outcome?;
        }

        if self.is_running() && time >= self.session()?.next_event_time() {
            tracing::trace!(instance = %self.config.instance_name, time, "advancing kernel");
            let advanced = self.sync.iterate();
            self.drain_logs();
            advanced?;
        }
        Ok(())
    }

    /// Stop the kernel and join its thread.
    ///
    /// A kernel that never completed a step gets one more turn first so it
    /// unwinds from a consistent state. A no-op when not running.
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        if !self.is_running() {
            return Ok(());
        }
        if self.session()?.clock.completed_steps == 0 {
            let advanced = self.sync.iterate();
            self.drain_logs();
            advanced?;
        }
        let stopped = self.sync.stop();
        self.drain_logs();
        stopped?;
        tracing::info!(instance = %self.config.instance_name, "kernel stopped");
        Ok(())
    }

    /// Master time of the last completed kernel step.
    pub fn current_time(&self) -> Result<f64, BridgeError> {
        self.ensure_running()?;
        Ok(self.session()?.current_time())
    }

    /// Master time of the kernel's next scheduled step.
    pub fn next_event_time(&self) -> Result<f64, BridgeError> {
        self.ensure_running()?;
        Ok(self.session()?.next_event_time())
    }

    /// Look up a value reference by name.
    pub fn value_ref(&self, name: &str) -> Result<ValueRef, BridgeError> {
        Ok(self.session()?.registry.index_of(name)?)
    }

    /// Read a variable in external units.
    pub fn get_value(&self, vr: ValueRef) -> Result<f64, BridgeError> {
        self.ensure_running()?;
        Ok(self.session()?.registry.get_value(vr)?)
    }

    /// [`get_value`](Self::get_value) by variable name.
    pub fn get_value_by_name(&self, name: &str) -> Result<f64, BridgeError> {
        self.ensure_running()?;
        Ok(self.session()?.registry.get_value_by_name(name)?)
    }

    /// Write a variable in external units. Allowed before start so the
    /// master can set initial inputs.
    pub fn set_value(&mut self, vr: ValueRef, value: f64) -> Result<WriteOutcome, BridgeError> {
        Ok(self.session_mut()?.registry.set_value(vr, value)?)
    }

    /// [`set_value`](Self::set_value) by variable name.
    pub fn set_value_by_name(
        &mut self,
        name: &str,
        value: f64,
    ) -> Result<WriteOutcome, BridgeError> {
        Ok(self.session_mut()?.registry.set_value_by_name(name, value)?)
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BridgeError::NotRunning)
        }
    }

    fn session_mut(&mut self) -> Result<&mut Session, BridgeError> {
        self.sync.shared_mut().ok_or(BridgeError::Disconnected)
    }

    fn drain_logs(&mut self) {
        let Some(session) = self.sync.shared_mut() else {
            return;
        };
        let Drained { messages, dropped } = session.logs.drain();
        let instance = &self.config.instance_name;
        if dropped > 0 {
            tracing::warn!(%instance, dropped, "kernel log queue overflowed");
        }
        for msg in messages {
            match msg.level {
                LogLevel::Info => tracing::info!(%instance, "{}", msg.message),
                LogLevel::Warning => tracing::warn!(%instance, "{}", msg.message),
                LogLevel::Error | LogLevel::Fatal => {
                    tracing::error!(%instance, level = %msg.level, "{}", msg.message)
                }
            }
            if let Some(sink) = self.sink.as_mut() {
                sink.log(msg.level, &msg.message);
            }
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                tracing::warn!(instance = %self.config.instance_name, error = %e, "stop on drop failed");
            }
        }
    }
}
