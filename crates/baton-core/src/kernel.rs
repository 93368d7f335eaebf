//! The simulation kernel interface.
//!
//! A kernel owns its main loop. The bridge hands it a [`StepDriver`] and
//! the kernel calls [`StepDriver::step`] once per completed time step,
//! passing itself back as a [`KernelIo`] so the driver can exchange values
//! while the kernel is paused at a consistent point. Whatever the driver
//! does inside `step` (including blocking until the master resumes it) is
//! invisible to the kernel.

use std::fmt;

use crate::error::KernelError;
use crate::id::KernelHandle;

/// Where the kernel is in its lifecycle.
///
/// Only [`KernelPhase::Running`] steps are interactive: the bridge never
/// returns control to the master during startup, warmup or sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KernelPhase {
    /// Loading inputs and allocating state.
    Startup,
    /// Repeating the first day until the state converges.
    Warmup,
    /// Design-day sizing calculations.
    Sizing,
    /// Stepping through the requested run period.
    Running,
}

impl KernelPhase {
    /// Whether the master may observe the kernel in this phase.
    pub fn is_interactive(self) -> bool {
        matches!(self, KernelPhase::Running)
    }
}

/// A snapshot of the kernel's simulated clock.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelClock {
    /// Lifecycle phase.
    pub phase: KernelPhase,
    /// Simulated time in seconds at the end of the last completed step.
    pub current_time: f64,
    /// Length of one kernel step in seconds.
    pub time_step: f64,
    /// Number of run-period steps completed so far.
    pub completed_steps: u64,
}

impl KernelClock {
    /// A clock at `start_time` that has not stepped yet.
    pub fn at_start(start_time: f64, time_step: f64) -> Self {
        Self {
            phase: KernelPhase::Startup,
            current_time: start_time,
            time_step,
            completed_steps: 0,
        }
    }

    /// The time at which the kernel will next update its state.
    pub fn next_event_time(&self) -> f64 {
        self.current_time + self.time_step
    }
}

/// Names a kernel-side referent for a variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KernelRef {
    /// A quantity of a named model entity, e.g. the air temperature of a zone.
    Entity {
        /// Entity category, e.g. `Zone`.
        kind: String,
        /// Entity name, e.g. `CORE`.
        name: String,
        /// Which quantity of the entity, e.g. `T`.
        quantity: String,
    },
    /// A reporting sensor, identified by output-variable name and key.
    Sensor {
        /// Output-variable name.
        name: String,
        /// Key value selecting the instance.
        key: String,
    },
    /// A control actuator.
    Actuator {
        /// Component type, e.g. `Schedule:Compact`.
        component_type: String,
        /// Control type, e.g. `Schedule Value`.
        control_type: String,
        /// Component key.
        key: String,
    },
}

impl KernelRef {
    /// Shorthand for [`KernelRef::Entity`].
    pub fn entity(kind: &str, name: &str, quantity: &str) -> Self {
        Self::Entity {
            kind: kind.into(),
            name: name.into(),
            quantity: quantity.into(),
        }
    }

    /// Shorthand for [`KernelRef::Sensor`].
    pub fn sensor(name: &str, key: &str) -> Self {
        Self::Sensor {
            name: name.into(),
            key: key.into(),
        }
    }

    /// Shorthand for [`KernelRef::Actuator`].
    pub fn actuator(component_type: &str, control_type: &str, key: &str) -> Self {
        Self::Actuator {
            component_type: component_type.into(),
            control_type: control_type.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for KernelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity {
                kind,
                name,
                quantity,
            } => write!(f, "{kind} '{name}' {quantity}"),
            Self::Sensor { name, key } => write!(f, "sensor '{name}' [{key}]"),
            Self::Actuator {
                component_type,
                control_type,
                key,
            } => write!(f, "actuator {component_type}/{control_type} [{key}]"),
        }
    }
}

/// Severity of a kernel log message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Routine progress.
    Info,
    /// Something the master should know about.
    Warning,
    /// A recoverable error inside the kernel.
    Error,
    /// The kernel cannot continue.
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        })
    }
}

/// Value access into a paused kernel.
///
/// Only valid while the kernel is inside [`StepDriver::step`]; the bridge
/// never holds a `KernelIo` across a yield.
pub trait KernelIo {
    /// The kernel's current clock.
    fn clock(&self) -> KernelClock;

    /// Resolve a referent to a handle usable with [`read`](Self::read) and
    /// [`write`](Self::write).
    fn resolve(&mut self, referent: &KernelRef) -> Result<KernelHandle, KernelError>;

    /// Read the current value of a referent, in kernel units.
    fn read(&mut self, handle: KernelHandle) -> Result<f64, KernelError>;

    /// Override a referent with an externally supplied value, in kernel units.
    fn write(&mut self, handle: KernelHandle, value: f64) -> Result<(), KernelError>;

    /// Release an override and return the referent to kernel control.
    fn reset(&mut self, handle: KernelHandle) -> Result<(), KernelError>;

    /// Recompute dependent state after inputs changed.
    fn recompute(&mut self) -> Result<(), KernelError>;
}

/// What the kernel should do after a step callback returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepFlow {
    /// Keep stepping.
    Continue,
    /// Unwind the main loop and return from [`Kernel::run`].
    Stop,
}

/// Callback invoked by the kernel at every step boundary.
pub trait StepDriver {
    /// Called after each completed kernel step, including startup, warmup
    /// and sizing steps.
    fn step(&mut self, kernel: &mut dyn KernelIo) -> Result<StepFlow, KernelError>;

    /// Report a message from the kernel.
    fn log(&mut self, level: LogLevel, message: &str);
}

/// A simulation kernel that can be driven by the bridge.
///
/// The kernel runs on its own thread, so it must be `Send`.
pub trait Kernel: KernelIo + Send {
    /// Run the main loop to completion, calling `driver.step` after each
    /// step. Returns when the run period ends or the driver returns
    /// [`StepFlow::Stop`].
    fn run(&mut self, driver: &mut dyn StepDriver) -> Result<(), KernelError>;
}
