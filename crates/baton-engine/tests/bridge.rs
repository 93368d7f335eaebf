//! Bridge lifecycle against the scripted single-zone kernel.
//!
//! Drives a real kernel thread through start, time advancement, value
//! exchange, faults, and shutdown.

use std::sync::{Arc, Mutex};

use baton_core::{KernelError, LogLevel};
use baton_engine::{Bridge, BridgeConfig, BridgeError, LogSink, SyncState};
use baton_registry::{RegistryError, WriteOutcome};
use baton_test_utils::fixtures::{self, Q_FLOW, T_OUT, T_ZONE, VOLUME};
use baton_test_utils::{Misbehavior, Script, ScriptedKernel};
use test_log::test;

fn bridge_with(script: Script) -> (Bridge, Arc<baton_test_utils::KernelProbe>) {
    let config = BridgeConfig {
        start_time: script.start_time,
        stop_time: Some(script.end_time),
        ..BridgeConfig::named("zone")
    };
    let kernel = ScriptedKernel::new(script);
    let probe = kernel.probe();
    let bridge = Bridge::new(config, Box::new(kernel), fixtures::zone_variables()).unwrap();
    (bridge, probe)
}

fn started(script: Script) -> (Bridge, Arc<baton_test_utils::KernelProbe>) {
    let (mut bridge, probe) = bridge_with(script);
    bridge.start().unwrap();
    (bridge, probe)
}

#[derive(Clone, Default)]
struct Collect(Arc<Mutex<Vec<(LogLevel, String)>>>);

impl LogSink for Collect {
    fn log(&mut self, level: LogLevel, message: &str) {
        if let Ok(mut logs) = self.0.lock() {
            logs.push((level, message.to_string()));
        }
    }
}

#[test]
fn start_parks_at_start_time() {
    let (bridge, _) = started(Script::default());
    assert!(bridge.is_running());
    assert_eq!(bridge.current_time().unwrap(), 0.0);
    assert_eq!(bridge.next_event_time().unwrap(), 600.0);
    // Outputs and parameters are populated by the start exchange.
    let t = bridge.get_value(T_ZONE).unwrap();
    assert!((t - 293.15).abs() < 1e-9);
    assert_eq!(bridge.get_value(VOLUME).unwrap(), 300_000.0);
}

#[test]
fn start_twice_is_already_running() {
    let (mut bridge, _) = started(Script::default());
    assert_eq!(bridge.start(), Err(BridgeError::AlreadyRunning));
}

#[test]
fn calls_before_start_are_not_running() {
    let (mut bridge, _) = bridge_with(Script::default());
    assert_eq!(bridge.set_time(600.0), Err(BridgeError::NotRunning));
    assert_eq!(bridge.get_value(T_ZONE), Err(BridgeError::NotRunning));
    assert_eq!(bridge.current_time(), Err(BridgeError::NotRunning));
    // Inputs may be set before start.
    assert_eq!(bridge.set_value(Q_FLOW, 100.0), Ok(WriteOutcome::Applied));
}

#[test]
fn set_time_advances_to_requested_time() {
    let (mut bridge, _) = started(Script::default());
    bridge.set_time(43_200.0).unwrap();
    assert_eq!(bridge.current_time().unwrap(), 43_200.0);
    bridge.set_time(43_500.0).unwrap();
    // Not yet at the next step boundary.
    assert_eq!(bridge.current_time().unwrap(), 43_200.0);
    bridge.set_time(43_800.0).unwrap();
    assert_eq!(bridge.current_time().unwrap(), 43_800.0);
}

#[test]
fn earlier_time_does_not_rewind() {
    let (mut bridge, _) = started(Script::default());
    bridge.set_time(6_000.0).unwrap();
    bridge.set_time(1_200.0).unwrap();
    assert_eq!(bridge.current_time().unwrap(), 6_000.0);
}

#[test]
fn heater_input_reaches_the_kernel() {
    let (mut cold, _) = started(Script::default());
    let (mut heated, _) = started(Script::default());
    heated.set_value(Q_FLOW, 10_000.0).unwrap();
    cold.set_time(36_000.0).unwrap();
    heated.set_time(36_000.0).unwrap();
    assert!(heated.get_value(T_ZONE).unwrap() > cold.get_value(T_ZONE).unwrap());
}

#[test]
fn get_value_is_idempotent_between_steps() {
    let (mut bridge, _) = started(Script::default());
    bridge.set_value(Q_FLOW, 2_500.0).unwrap();
    bridge.set_time(7_200.0).unwrap();
    let first = bridge.get_value(T_ZONE).unwrap();
    for _ in 0..25 {
        let again = bridge.get_value(T_ZONE).unwrap();
        assert!((again - first).abs() < 1e-5);
    }
}

#[test]
fn output_writes_are_ignored() {
    let (mut bridge, _) = started(Script::default());
    let before = bridge.get_value(T_OUT).unwrap();
    assert_eq!(bridge.set_value(T_OUT, 0.0), Ok(WriteOutcome::Ignored));
    assert_eq!(bridge.set_value(VOLUME, 1.0), Ok(WriteOutcome::Ignored));
    bridge.set_time(1_200.0).unwrap();
    assert_eq!(bridge.get_value(T_OUT).unwrap(), before);
}

#[test]
fn invalid_reference_is_reported() {
    let (bridge, _) = started(Script::default());
    let past_end = baton_core::ValueRef(fixtures::zone_variables().len() as u32);
    assert_eq!(
        bridge.get_value(past_end),
        Err(BridgeError::Registry(RegistryError::InvalidReference(past_end)))
    );
    assert!(matches!(
        bridge.get_value_by_name("nope"),
        Err(BridgeError::Registry(RegistryError::UnknownName(_)))
    ));
    assert_eq!(bridge.value_ref("T").unwrap(), T_ZONE);
}

#[test]
fn stop_joins_the_kernel() {
    let (mut bridge, probe) = started(Script::default());
    bridge.set_time(3_000.0).unwrap();
    bridge.stop().unwrap();
    assert_eq!(bridge.state(), SyncState::Stopped);
    assert!(probe.returned());
    assert_eq!(bridge.current_time(), Err(BridgeError::NotRunning));
    // Idempotent.
    bridge.stop().unwrap();
}

#[test]
fn stop_right_after_start_completes() {
    let (mut bridge, probe) = started(Script::default());
    bridge.stop().unwrap();
    assert!(probe.returned());
}

#[test]
fn drop_stops_a_running_bridge() {
    let (bridge, probe) = started(Script::default());
    drop(bridge);
    assert!(probe.returned());
}

#[test]
fn reaching_the_end_of_the_run_period_stops() {
    let (mut bridge, _) = started(Script {
        end_time: 3_600.0,
        ..Script::default()
    });
    bridge.set_time(10_000.0).unwrap();
    assert_eq!(bridge.state(), SyncState::Stopped);
    assert_eq!(bridge.set_time(20_000.0), Err(BridgeError::NotRunning));
    bridge.stop().unwrap();
}

#[test]
fn kernel_fault_surfaces_exactly_once() {
    let (mut bridge, _) = started(Script {
        misbehavior: Some(Misbehavior::FailAfter(3)),
        ..Script::default()
    });
    let err = bridge.set_time(6_000.0).unwrap_err();
    assert!(matches!(
        err,
        BridgeError::KernelFault(KernelError::SimulationFailed { .. })
    ));
    assert_eq!(bridge.set_time(6_000.0), Err(BridgeError::NotRunning));
    assert_eq!(bridge.get_value(T_ZONE), Err(BridgeError::NotRunning));
}

#[test]
fn kernel_panic_surfaces_as_fault() {
    let (mut bridge, _) = started(Script {
        misbehavior: Some(Misbehavior::PanicAfter(1)),
        ..Script::default()
    });
    match bridge.set_time(1_200.0) {
        Err(BridgeError::KernelFault(KernelError::Panicked(msg))) => {
            assert!(msg.contains("injected panic"), "got {msg}");
        }
        other => panic!("expected a panic fault, got {other:?}"),
    }
    assert!(!bridge.is_running());
}

#[test]
fn handles_are_resolved_once_per_variable() {
    let (mut bridge, probe) = started(Script::default());
    bridge.set_value(Q_FLOW, 100.0).unwrap();
    for step in 1..=20 {
        bridge.set_time(f64::from(step) * 600.0).unwrap();
    }
    assert_eq!(probe.resolves(), fixtures::zone_variables().len() as u64);
}

#[test]
fn kernel_warnings_reach_the_sink() {
    let (mut bridge, _) = bridge_with(Script {
        warn_every: Some(1),
        ..Script::default()
    });
    let sink = Collect::default();
    bridge.set_log_sink(Box::new(sink.clone()));
    bridge.start().unwrap();
    bridge.set_time(1_800.0).unwrap();
    let logs = sink.0.lock().unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|(level, _)| *level == LogLevel::Warning));
}

#[test]
fn invalid_config_is_rejected() {
    let config = BridgeConfig {
        log_queue_capacity: 0,
        ..BridgeConfig::default()
    };
    let err = Bridge::new(
        config,
        Box::new(ScriptedKernel::new(Script::default())),
        fixtures::zone_variables(),
    )
    .unwrap_err();
    assert!(matches!(err, BridgeError::Config(_)));
}

#[test]
fn start_time_is_mapped_onto_the_kernel_run_period() {
    let start = 364.0 * 86_400.0;
    let config = BridgeConfig {
        start_time: start,
        ..BridgeConfig::named("zone")
    };
    let mut bridge = Bridge::new(
        config,
        Box::new(ScriptedKernel::new(Script::default())),
        fixtures::zone_variables(),
    )
    .unwrap();
    bridge.start().unwrap();
    assert_eq!(bridge.current_time().unwrap(), start);
    assert_eq!(bridge.next_event_time().unwrap(), start + 600.0);
    assert_eq!(bridge.session().unwrap().clock().current_time, 0.0);

    bridge.set_time(start + 1_800.0).unwrap();
    assert_eq!(bridge.current_time().unwrap(), start + 1_800.0);
    let session = bridge.session().unwrap();
    assert_eq!(session.clock().current_time, 1_800.0);
    assert_eq!(session.time_offset(), start);
}
