//! One FMI instance: a [`Bridge`] plus the FMI 2.0 state machine.
//!
//! ```text
//! Instantiated ──setupExperiment──▶ Initializing ──exitInitializationMode──▶ Stepping
//!                                                                             ⇅ enterEventMode /
//!                                                                             ⇅ enterContinuousTimeMode
//!                                                                           EventMode
//! Initializing | Stepping | EventMode | Errored ──terminate──▶ Terminated
//! any state except Fatal ──reset──▶ Instantiated
//! ```
//!
//! A kernel fault moves the instance to `Errored`; a panic on the calling
//! thread moves it to `Fatal`.

use std::fmt;

use baton_core::ValueRef;
use baton_engine::{Bridge, BridgeConfig, BridgeError};
use baton_registry::{RegistryError, WriteOutcome};
use smallvec::SmallVec;

use crate::dispatcher::{DispatchError, InstantiateRequest, KernelBundle, KernelFactory};
use crate::logger::FmiLogger;
use crate::status::Fmi2Status;

/// FMI 2.0 instance state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InstanceState {
    /// Created; experiment not yet set up.
    Instantiated,
    /// Kernel started, initialization mode.
    Initializing,
    /// Advancing time (continuous-time mode or co-simulation stepping).
    Stepping,
    /// Event mode.
    EventMode,
    /// Kernel stopped; values remain readable.
    Terminated,
    /// A kernel fault was reported; terminate, reset or free.
    Errored,
    /// A panic was caught; only free is possible.
    Fatal,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Instantiated => "Instantiated",
            Self::Initializing => "Initializing",
            Self::Stepping => "Stepping",
            Self::EventMode => "EventMode",
            Self::Terminated => "Terminated",
            Self::Errored => "Errored",
            Self::Fatal => "Fatal",
        };
        f.write_str(name)
    }
}

use InstanceState::*;

const RUNNING: &[InstanceState] = &[Initializing, Stepping, EventMode];
const READABLE: &[InstanceState] = &[Initializing, Stepping, EventMode, Terminated];
const WRITABLE: &[InstanceState] = &[Instantiated, Initializing, Stepping, EventMode];

/// Result of `fmi2NewDiscreteStates`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EventInfo {
    /// The master should end the simulation.
    pub terminate_simulation: bool,
    /// The kernel's next scheduled step, while it is still running.
    pub next_event_time: Option<f64>,
}

/// One bridged FMI instance.
pub struct Instance {
    request: InstantiateRequest,
    bridge: Bridge,
    logger: FmiLogger,
    state: InstanceState,
    stop_time: Option<f64>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.request.instance_name)
            .field("state", &self.state)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl Instance {
    pub(crate) fn new(
        request: InstantiateRequest,
        bundle: KernelBundle,
        logger: FmiLogger,
    ) -> Result<Self, DispatchError> {
        let bridge = build_bridge(&request, bundle, &logger)?;
        Ok(Self {
            request,
            bridge,
            logger,
            state: Instantiated,
            stop_time: None,
        })
    }

    /// The instance name given at instantiation.
    pub fn name(&self) -> &str {
        &self.request.instance_name
    }

    /// Current FMI state.
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// The instantiation arguments.
    pub fn request(&self) -> &InstantiateRequest {
        &self.request
    }

    /// The master's logger for this instance.
    pub fn logger(&self) -> &FmiLogger {
        &self.logger
    }

    /// The underlying bridge.
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub(crate) fn mark_fatal(&mut self) {
        self.state = Fatal;
    }

    fn require(
        &self,
        operation: &'static str,
        allowed: &[InstanceState],
    ) -> Result<(), DispatchError> {
        if self.state == Fatal {
            return Err(DispatchError::InstanceFatal);
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(DispatchError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn track<T>(&mut self, result: Result<T, BridgeError>) -> Result<T, DispatchError> {
        if let Err(BridgeError::KernelFault(_) | BridgeError::Disconnected) = &result {
            self.state = Errored;
        }
        result.map_err(DispatchError::from)
    }

    /// `fmi2SetupExperiment`: record the window and start the kernel.
    pub fn setup_experiment(
        &mut self,
        tolerance: Option<f64>,
        start_time: f64,
        stop_time: Option<f64>,
    ) -> Result<(), DispatchError> {
        self.require("fmi2SetupExperiment", &[Instantiated])?;
        self.bridge.set_experiment(start_time, stop_time, tolerance)?;
        // The kernel is spent once start is attempted.
        if let Err(e) = self.bridge.start() {
            self.state = Errored;
            return Err(e.into());
        }
        self.stop_time = stop_time;
        self.state = Initializing;
        Ok(())
    }

    /// `fmi2EnterInitializationMode`.
    pub fn enter_initialization_mode(&mut self) -> Result<(), DispatchError> {
        self.require("fmi2EnterInitializationMode", &[Initializing])
    }

    /// `fmi2ExitInitializationMode`.
    pub fn exit_initialization_mode(&mut self) -> Result<(), DispatchError> {
        self.require("fmi2ExitInitializationMode", &[Initializing])?;
        self.state = Stepping;
        Ok(())
    }

    /// `fmi2SetTime`.
    pub fn set_time(&mut self, time: f64) -> Result<(), DispatchError> {
        self.require("fmi2SetTime", RUNNING)?;
        if !time.is_finite() {
            return Err(DispatchError::InvalidArgument(format!(
                "time must be finite, got {time}"
            )));
        }
        if !self.bridge.is_running() {
            tracing::debug!(instance = %self.name(), time, "kernel finished; time not advanced");
            return Ok(());
        }
        let advanced = self.bridge.set_time(time);
        self.track(advanced)
    }

    /// `fmi2DoStep`: advance to `current + step`.
    pub fn do_step(&mut self, current: f64, step: f64) -> Result<(), DispatchError> {
        self.require("fmi2DoStep", &[Stepping])?;
        if step.is_nan() || step < 0.0 {
            return Err(DispatchError::InvalidArgument(format!(
                "communication step must be non-negative, got {step}"
            )));
        }
        self.set_time(current + step)
    }

    /// `fmi2GetReal`. All references are read before anything is returned.
    pub fn get_real(&self, vrs: &[u32]) -> Result<SmallVec<[f64; 16]>, DispatchError> {
        self.require("fmi2GetReal", READABLE)?;
        vrs.iter().map(|&vr| self.read(ValueRef(vr))).collect()
    }

    fn read(&self, vr: ValueRef) -> Result<f64, DispatchError> {
        if self.bridge.is_running() {
            Ok(self.bridge.get_value(vr)?)
        } else {
            Ok(self.bridge.session()?.registry().get_value(vr)?)
        }
    }

    /// `fmi2SetReal`. `Warning` when a write to an output or parameter was
    /// ignored. References and input values are checked before any value is
    /// applied.
    pub fn set_real(&mut self, vrs: &[u32], values: &[f64]) -> Result<Fmi2Status, DispatchError> {
        self.require("fmi2SetReal", WRITABLE)?;
        let registry = self.bridge.session()?.registry();
        for (&vr, &value) in vrs.iter().zip(values) {
            let var = registry.get(ValueRef(vr))?;
            if var.causality().is_writable() && !value.is_finite() {
                return Err(RegistryError::NonFinite {
                    name: var.name().to_string(),
                    value,
                }
                .into());
            }
        }

        let mut warned = false;
        for (&vr, &value) in vrs.iter().zip(values) {
            if self.bridge.set_value(ValueRef(vr), value)? == WriteOutcome::Ignored {
                warned = true;
                self.logger.emit(
                    Fmi2Status::Warning,
                    "logStatusWarning",
                    &format!("value reference {vr} is not an input; write ignored"),
                );
            }
        }
        Ok(Fmi2Status::ok_or_warning(warned))
    }

    /// `fmi2EnterEventMode`.
    pub fn enter_event_mode(&mut self) -> Result<(), DispatchError> {
        self.require("fmi2EnterEventMode", &[Stepping, EventMode])?;
        self.state = EventMode;
        Ok(())
    }

    /// `fmi2EnterContinuousTimeMode`.
    pub fn enter_continuous_time_mode(&mut self) -> Result<(), DispatchError> {
        self.require("fmi2EnterContinuousTimeMode", &[Stepping, EventMode])?;
        self.state = Stepping;
        Ok(())
    }

    /// `fmi2NewDiscreteStates`.
    pub fn new_discrete_states(&mut self) -> Result<EventInfo, DispatchError> {
        self.require("fmi2NewDiscreteStates", &[Stepping, EventMode])?;
        let next_event_time = if self.bridge.is_running() {
            Some(self.bridge.next_event_time()?)
        } else {
            None
        };
        Ok(EventInfo {
            terminate_simulation: self.should_terminate()?,
            next_event_time,
        })
    }

    /// `fmi2CompletedIntegratorStep`: returns `(enter_event_mode, terminate)`.
    pub fn completed_integrator_step(&mut self) -> Result<(bool, bool), DispatchError> {
        self.require("fmi2CompletedIntegratorStep", &[Stepping])?;
        Ok((false, self.should_terminate()?))
    }

    fn should_terminate(&self) -> Result<bool, DispatchError> {
        if !self.bridge.is_running() {
            return Ok(true);
        }
        let now = self.bridge.current_time()?;
        Ok(self.stop_time.is_some_and(|stop| now >= stop))
    }

    /// `fmi2Terminate`: stop the kernel. Values stay readable.
    pub fn terminate(&mut self) -> Result<(), DispatchError> {
        self.require("fmi2Terminate", &[Initializing, Stepping, EventMode, Errored])?;
        if self.state == Errored {
            // A failed start or service round can leave the kernel parked.
            self.shutdown();
            self.state = Terminated;
            return Ok(());
        }
        let stopped = self.bridge.stop();
        self.track(stopped)?;
        self.state = Terminated;
        Ok(())
    }

    /// `fmi2Reset`: discard the kernel and build a fresh one.
    pub fn reset(&mut self, factory: &dyn KernelFactory) -> Result<(), DispatchError> {
        self.require(
            "fmi2Reset",
            &[Instantiated, Initializing, Stepping, EventMode, Terminated, Errored],
        )?;
        self.shutdown();
        let bundle = factory
            .create(&self.request)
            .map_err(DispatchError::Factory)?;
        self.bridge = build_bridge(&self.request, bundle, &self.logger)?;
        self.stop_time = None;
        self.state = Instantiated;
        tracing::info!(instance = %self.name(), "instance reset");
        Ok(())
    }

    /// Stop the kernel if it is still running, logging any failure.
    pub(crate) fn shutdown(&mut self) {
        if let Err(e) = self.bridge.stop() {
            tracing::warn!(instance = %self.name(), error = %e, "kernel stop failed");
        }
    }

    /// `fmi2SetDebugLogging`.
    pub fn set_debug_logging(&mut self, on: bool) -> Result<(), DispatchError> {
        self.require(
            "fmi2SetDebugLogging",
            &[Instantiated, Initializing, Stepping, EventMode, Terminated, Errored],
        )?;
        self.logger.set_enabled(on);
        Ok(())
    }

    /// `fmi2CancelStep`. `fmi2DoStep` always completes before returning,
    /// so there is never a step to cancel.
    pub fn cancel_step(&self) -> Result<(), DispatchError> {
        self.require("fmi2CancelStep", &[Stepping])?;
        Err(DispatchError::NothingPending)
    }

    /// Master time of the last completed kernel step. Still answered after
    /// `fmi2Terminate`.
    pub fn last_successful_time(&self) -> Result<f64, DispatchError> {
        self.require("fmi2GetRealStatus", READABLE)?;
        Ok(self.bridge.session()?.current_time())
    }

    /// Whether the kernel has run out of simulation, either by finishing
    /// its run period or through `fmi2Terminate`.
    pub fn kernel_finished(&self) -> Result<bool, DispatchError> {
        self.require("fmi2GetBooleanStatus", READABLE)?;
        Ok(!self.bridge.is_running())
    }

    /// Status queries with nothing to report. Steps are synchronous, so
    /// there is no pending status or progress message.
    pub fn no_status(&self, operation: &'static str) -> Result<Fmi2Status, DispatchError> {
        self.require(operation, READABLE)?;
        Ok(Fmi2Status::Discard)
    }

    /// Entry points for variable kinds this bridge never declares: only an
    /// empty request succeeds.
    pub fn empty_access(&self, operation: &'static str, count: usize) -> Result<(), DispatchError> {
        self.require(
            operation,
            &[Instantiated, Initializing, Stepping, EventMode, Terminated],
        )?;
        if count == 0 {
            Ok(())
        } else {
            Err(DispatchError::Unsupported { operation, count })
        }
    }
}

fn build_bridge(
    request: &InstantiateRequest,
    bundle: KernelBundle,
    logger: &FmiLogger,
) -> Result<Bridge, DispatchError> {
    let config = BridgeConfig::named(&request.instance_name);
    let mut bridge = Bridge::new(config, bundle.kernel, bundle.variables)?;
    bridge.set_log_sink(Box::new(logger.clone()));
    Ok(bridge)
}
