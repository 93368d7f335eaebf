//! A deterministic single-zone kernel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use baton_core::{
    Kernel, KernelClock, KernelError, KernelHandle, KernelIo, KernelPhase, KernelRef, LogLevel,
    StepDriver, StepFlow,
};

use crate::fixtures;

const ZONE_T: KernelHandle = KernelHandle(1);
const ZONE_V: KernelHandle = KernelHandle(2);
const HEATER: KernelHandle = KernelHandle(3);
const OUTDOOR_T: KernelHandle = KernelHandle(4);
const HEAT_LOSS: KernelHandle = KernelHandle(5);

/// Fault injected once the run period has completed a given number of steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Misbehavior {
    /// Return [`KernelError::SimulationFailed`] from `run`.
    FailAfter(u64),
    /// Panic inside `run`.
    PanicAfter(u64),
}

/// Shape of a scripted run.
#[derive(Clone, Debug)]
pub struct Script {
    pub start_time: f64,
    pub end_time: f64,
    pub time_step: f64,
    pub warmup_steps: u32,
    pub sizing_steps: u32,
    pub initial_temperature: f64,
    pub outdoor_temperature: f64,
    /// Zone volume in m3.
    pub volume: f64,
    /// Heat capacity in J/K.
    pub capacitance: f64,
    /// Envelope conductance in W/K.
    pub conductance: f64,
    /// Emit a warning every this many run-period steps.
    pub warn_every: Option<u64>,
    pub misbehavior: Option<Misbehavior>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            start_time: 0.0,
            end_time: 2.0 * 86_400.0,
            time_step: 600.0,
            warmup_steps: 3,
            sizing_steps: 2,
            initial_temperature: 20.0,
            outdoor_temperature: 5.0,
            volume: 300.0,
            capacitance: 2.0e6,
            conductance: 150.0,
            warn_every: None,
            misbehavior: None,
        }
    }
}

/// Counters shared between a [`ScriptedKernel`] and the test that owns it.
#[derive(Debug, Default)]
pub struct KernelProbe {
    pub resolves: AtomicU64,
    pub writes: AtomicU64,
    pub resets: AtomicU64,
    pub recomputes: AtomicU64,
    pub step_callbacks: AtomicU64,
    pub returned: AtomicBool,
}

impl KernelProbe {
    pub fn resolves(&self) -> u64 {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn step_callbacks(&self) -> u64 {
        self.step_callbacks.load(Ordering::SeqCst)
    }

    /// Whether [`Kernel::run`] has returned (normally or with an error).
    pub fn returned(&self) -> bool {
        self.returned.load(Ordering::SeqCst)
    }
}

/// Single thermal zone heated by an overridable heater.
///
/// `dT/dt = (Q - UA * (T - T_out)) / C`, integrated with explicit Euler.
/// The heater runs at 0 W unless an input overrides it.
pub struct ScriptedKernel {
    script: Script,
    clock: KernelClock,
    temperature: f64,
    heater_override: Option<f64>,
    heat_loss: f64,
    handles: HashMap<KernelRef, KernelHandle>,
    probe: Arc<KernelProbe>,
}

impl ScriptedKernel {
    pub fn new(script: Script) -> Self {
        let handles = HashMap::from([
            (fixtures::zone_temperature(), ZONE_T),
            (fixtures::zone_volume(), ZONE_V),
            (fixtures::heater(), HEATER),
            (fixtures::outdoor_temperature(), OUTDOOR_T),
            (fixtures::heat_loss(), HEAT_LOSS),
        ]);
        let mut kernel = Self {
            clock: KernelClock::at_start(script.start_time, script.time_step),
            temperature: script.initial_temperature,
            heater_override: None,
            heat_loss: 0.0,
            handles,
            probe: Arc::new(KernelProbe::default()),
            script,
        };
        kernel.update_heat_loss();
        kernel
    }

    /// Shared counters for assertions after the kernel has been moved.
    pub fn probe(&self) -> Arc<KernelProbe> {
        Arc::clone(&self.probe)
    }

    fn heater_power(&self) -> f64 {
        self.heater_override.unwrap_or(0.0)
    }

    fn update_heat_loss(&mut self) {
        self.heat_loss = self.script.conductance * (self.temperature - self.script.outdoor_temperature);
    }

    fn integrate(&mut self, dt: f64) {
        let net = self.heater_power() - self.heat_loss;
        self.temperature += dt * net / self.script.capacitance;
        self.update_heat_loss();
    }

    fn callback(&mut self, driver: &mut dyn StepDriver) -> Result<StepFlow, KernelError> {
        self.probe.step_callbacks.fetch_add(1, Ordering::SeqCst);
        driver.step(self)
    }

    fn check_misbehavior(&self) -> Result<(), KernelError> {
        let steps = self.clock.completed_steps;
        match self.script.misbehavior {
            Some(Misbehavior::FailAfter(n)) if steps >= n => Err(KernelError::failed(format!(
                "injected failure after {steps} steps"
            ))),
            Some(Misbehavior::PanicAfter(n)) if steps >= n => {
                panic!("injected panic after {steps} steps")
            }
            _ => Ok(()),
        }
    }

    fn run_inner(&mut self, driver: &mut dyn StepDriver) -> Result<(), KernelError> {
        driver.log(LogLevel::Info, "kernel starting up");
        self.clock.phase = KernelPhase::Startup;
        if self.callback(driver)? == StepFlow::Stop {
            return Ok(());
        }

        self.clock.phase = KernelPhase::Warmup;
        for _ in 0..self.script.warmup_steps {
            self.integrate(self.script.time_step);
            if self.callback(driver)? == StepFlow::Stop {
                return Ok(());
            }
        }
        // Warmup converges the state but must not move the clock or keep
        // the warmed-up temperature drift.
        self.temperature = self.script.initial_temperature;
        self.update_heat_loss();

        self.clock.phase = KernelPhase::Sizing;
        for _ in 0..self.script.sizing_steps {
            if self.callback(driver)? == StepFlow::Stop {
                return Ok(());
            }
        }

        self.clock.phase = KernelPhase::Running;
        self.clock.current_time = self.script.start_time;
        self.clock.completed_steps = 0;
        driver.log(LogLevel::Info, "run period started");
        loop {
            if self.callback(driver)? == StepFlow::Stop {
                return Ok(());
            }
            if self.clock.next_event_time() > self.script.end_time + 1e-9 {
                driver.log(LogLevel::Info, "run period complete");
                return Ok(());
            }
            self.integrate(self.script.time_step);
            self.clock.current_time = self.clock.next_event_time();
            self.clock.completed_steps += 1;
            self.check_misbehavior()?;
            if let Some(every) = self.script.warn_every {
                if every > 0 && self.clock.completed_steps % every == 0 {
                    driver.log(
                        LogLevel::Warning,
                        &format!(
                            "zone CORE outside comfort band at t={}",
                            self.clock.current_time
                        ),
                    );
                }
            }
        }
    }
}

impl KernelIo for ScriptedKernel {
    fn clock(&self) -> KernelClock {
        self.clock
    }

    fn resolve(&mut self, referent: &KernelRef) -> Result<KernelHandle, KernelError> {
        self.probe.resolves.fetch_add(1, Ordering::SeqCst);
        self.handles
            .get(referent)
            .copied()
            .ok_or_else(|| KernelError::UnknownReferent(referent.clone()))
    }

    fn read(&mut self, handle: KernelHandle) -> Result<f64, KernelError> {
        match handle {
            ZONE_T => Ok(self.temperature),
            ZONE_V => Ok(self.script.volume),
            HEATER => Ok(self.heater_power()),
            OUTDOOR_T => Ok(self.script.outdoor_temperature),
            HEAT_LOSS => Ok(self.heat_loss),
            other => Err(KernelError::InvalidHandle(other)),
        }
    }

    fn write(&mut self, handle: KernelHandle, value: f64) -> Result<(), KernelError> {
        self.probe.writes.fetch_add(1, Ordering::SeqCst);
        match handle {
            HEATER => {
                self.heater_override = Some(value);
                Ok(())
            }
            ZONE_T | ZONE_V | OUTDOOR_T | HEAT_LOSS => Err(KernelError::ReadOnly(handle)),
            other => Err(KernelError::InvalidHandle(other)),
        }
    }

    fn reset(&mut self, handle: KernelHandle) -> Result<(), KernelError> {
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
        match handle {
            HEATER => {
                self.heater_override = None;
                Ok(())
            }
            ZONE_T | ZONE_V | OUTDOOR_T | HEAT_LOSS => Err(KernelError::ReadOnly(handle)),
            other => Err(KernelError::InvalidHandle(other)),
        }
    }

    fn recompute(&mut self) -> Result<(), KernelError> {
        self.probe.recomputes.fetch_add(1, Ordering::SeqCst);
        self.update_heat_loss();
        Ok(())
    }
}

impl Kernel for ScriptedKernel {
    fn run(&mut self, driver: &mut dyn StepDriver) -> Result<(), KernelError> {
        let result = self.run_inner(driver);
        self.probe.returned.store(true, Ordering::SeqCst);
        result
    }
}
