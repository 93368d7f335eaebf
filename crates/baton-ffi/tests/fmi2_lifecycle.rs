//! The C surface driven the way a co-simulation master drives it.

use std::ffi::CStr;
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};

use baton_core::KernelError;
use baton_ffi::fmi2::*;
use baton_ffi::types::{Fmi2Component, Fmi2EventInfo, FMI2_FALSE, FMI2_TRUE};
use baton_ffi::{baton_last_panic_message, Fmi2Status, Fmi2Type, InstantiateRequest, KernelBundle};
use baton_test_utils::fixtures::{self, Q_FLOW, T_OUT, T_ZONE, VOLUME};
use baton_test_utils::{Misbehavior, Script, ScriptedKernel};
use test_log::test;

static RESET_PANICS: AtomicBool = AtomicBool::new(false);

fn factory(request: &InstantiateRequest) -> Result<KernelBundle, KernelError> {
    let misbehavior = match request.guid.as_str() {
        "fail" => Some(Misbehavior::FailAfter(2)),
        "panic" => Some(Misbehavior::PanicAfter(1)),
        "factory-panics" => panic!("factory exploded"),
        "reset-panics" if RESET_PANICS.swap(false, Ordering::SeqCst) => {
            panic!("factory exploded on reset")
        }
        _ => None,
    };
    Ok(KernelBundle {
        kernel: Box::new(ScriptedKernel::new(Script {
            misbehavior,
            ..Script::default()
        })),
        variables: fixtures::zone_variables(),
    })
}

fn install() {
    // Every test in this binary shares one dispatcher.
    let _ = baton_ffi::install(factory);
}

fn instantiate_with(name: &CStr, guid: &CStr, kind: Fmi2Type) -> Fmi2Component {
    install();
    fmi2Instantiate(
        name.as_ptr(),
        kind as i32,
        guid.as_ptr(),
        c"file:///tmp/baton/resources".as_ptr(),
        ptr::null(),
        FMI2_FALSE,
        FMI2_FALSE,
    )
}

fn instantiate(guid: &CStr) -> Fmi2Component {
    let c = instantiate_with(c"zone", guid, Fmi2Type::ModelExchange);
    assert!(!c.is_null());
    c
}

fn initialized(guid: &CStr) -> Fmi2Component {
    let c = instantiate(guid);
    assert_eq!(
        fmi2SetupExperiment(c, FMI2_FALSE, 0.0, 0.0, FMI2_TRUE, 86_400.0),
        Fmi2Status::Ok
    );
    assert_eq!(fmi2EnterInitializationMode(c), Fmi2Status::Ok);
    assert_eq!(fmi2ExitInitializationMode(c), Fmi2Status::Ok);
    c
}

fn get_reals(c: Fmi2Component, vrs: &[u32]) -> (Fmi2Status, Vec<f64>) {
    let mut out = vec![f64::NAN; vrs.len()];
    let status = fmi2GetReal(c, vrs.as_ptr(), vrs.len(), out.as_mut_ptr());
    (status, out)
}

#[test]
fn end_to_end_half_day() {
    let c = initialized(c"");
    assert_eq!(fmi2SetTime(c, 43_200.0), Fmi2Status::Ok);

    let outputs = fixtures::zone_outputs().map(|vr| vr.0);
    let (status, values) = get_reals(c, &outputs);
    assert_eq!(status, Fmi2Status::Ok);
    // Zone and outdoor temperatures are reported in kelvin.
    assert!(values[0] > 250.0 && values[0] < 320.0, "T = {}", values[0]);
    assert!((values[1] - 278.15).abs() < 1e-9);
    assert!(values[2].is_finite());

    assert_eq!(fmi2Terminate(c), Fmi2Status::Ok);
    let (status, after) = get_reals(c, &outputs);
    assert_eq!(status, Fmi2Status::Ok);
    assert_eq!(values, after);
    fmi2FreeInstance(c);
}

#[test]
fn heater_input_warms_the_zone() {
    let cold = initialized(c"");
    let warm = initialized(c"");
    let vr = [Q_FLOW.0];
    assert_eq!(fmi2SetReal(warm, vr.as_ptr(), 1, [8_000.0].as_ptr()), Fmi2Status::Ok);
    for c in [cold, warm] {
        assert_eq!(fmi2SetTime(c, 36_000.0), Fmi2Status::Ok);
    }
    let (_, t_cold) = get_reals(cold, &[T_ZONE.0]);
    let (_, t_warm) = get_reals(warm, &[T_ZONE.0]);
    assert!(t_warm[0] > t_cold[0]);
    fmi2FreeInstance(cold);
    fmi2FreeInstance(warm);
}

#[test]
fn parameters_are_readable_after_start() {
    let c = initialized(c"");
    let (status, v) = get_reals(c, &[VOLUME.0]);
    assert_eq!(status, Fmi2Status::Ok);
    assert_eq!(v[0], 300_000.0);
    fmi2FreeInstance(c);
}

#[test]
fn writing_an_output_is_a_warning() {
    let c = initialized(c"");
    let vr = [T_OUT.0];
    assert_eq!(fmi2SetReal(c, vr.as_ptr(), 1, [0.0].as_ptr()), Fmi2Status::Warning);
    fmi2FreeInstance(c);
}

#[test]
fn invalid_reference_leaves_the_buffer_alone() {
    let c = initialized(c"");
    let vrs = [T_ZONE.0, fixtures::zone_variables().len() as u32];
    let (status, out) = get_reals(c, &vrs);
    assert_eq!(status, Fmi2Status::Error);
    assert!(out.iter().all(|v| v.is_nan()));
    fmi2FreeInstance(c);
}

#[test]
fn stale_and_null_components_are_rejected() {
    let c = initialized(c"");
    fmi2FreeInstance(c);
    assert_eq!(fmi2SetTime(c, 600.0), Fmi2Status::Error);
    assert_eq!(fmi2Terminate(c), Fmi2Status::Error);
    // Double free is harmless.
    fmi2FreeInstance(c);
    fmi2FreeInstance(ptr::null_mut());
    assert_eq!(fmi2SetTime(ptr::null_mut(), 600.0), Fmi2Status::Error);
}

#[test]
fn calls_out_of_order_are_errors() {
    let c = instantiate(c"");
    assert_eq!(fmi2SetTime(c, 600.0), Fmi2Status::Error);
    assert_eq!(fmi2ExitInitializationMode(c), Fmi2Status::Error);
    let (status, _) = get_reals(c, &[T_ZONE.0]);
    assert_eq!(status, Fmi2Status::Error);
    fmi2FreeInstance(c);
}

#[test]
fn kernel_fault_is_an_error_and_terminate_still_works() {
    let c = initialized(c"fail");
    assert_eq!(fmi2SetTime(c, 6_000.0), Fmi2Status::Error);
    assert_eq!(fmi2SetTime(c, 7_200.0), Fmi2Status::Error);
    assert_eq!(fmi2Terminate(c), Fmi2Status::Ok);
    fmi2FreeInstance(c);
}

#[test]
fn kernel_panic_is_an_error_not_a_crash() {
    let c = initialized(c"panic");
    assert_eq!(fmi2SetTime(c, 1_200.0), Fmi2Status::Error);
    fmi2FreeInstance(c);
}

#[test]
fn reset_gives_a_fresh_instance() {
    let c = initialized(c"fail");
    assert_eq!(fmi2SetTime(c, 6_000.0), Fmi2Status::Error);
    assert_eq!(fmi2Reset(c), Fmi2Status::Ok);
    assert_eq!(
        fmi2SetupExperiment(c, FMI2_FALSE, 0.0, 0.0, FMI2_FALSE, 0.0),
        Fmi2Status::Ok
    );
    assert_eq!(fmi2ExitInitializationMode(c), Fmi2Status::Ok);
    assert_eq!(fmi2SetTime(c, 600.0), Fmi2Status::Ok);
    fmi2FreeInstance(c);
}

#[test]
fn panic_during_reset_is_fatal() {
    let c = instantiate(c"reset-panics");
    RESET_PANICS.store(true, Ordering::SeqCst);
    assert_eq!(fmi2Reset(c), Fmi2Status::Fatal);

    let mut buf = [0u8; 128];
    let len = baton_last_panic_message(buf.as_mut_ptr().cast(), buf.len());
    let msg = std::str::from_utf8(&buf[..len as usize]).unwrap();
    assert_eq!(msg, "factory exploded on reset");

    assert_eq!(
        fmi2SetupExperiment(c, FMI2_FALSE, 0.0, 0.0, FMI2_FALSE, 0.0),
        Fmi2Status::Fatal
    );
    fmi2FreeInstance(c);
}

#[test]
fn panic_during_instantiate_returns_null() {
    let c = instantiate_with(c"zone", c"factory-panics", Fmi2Type::ModelExchange);
    assert!(c.is_null());
    let len = baton_last_panic_message(ptr::null_mut(), 0);
    assert_eq!(len as usize, "factory exploded".len());
}

#[test]
fn empty_instance_name_is_refused() {
    let c = instantiate_with(c"", c"", Fmi2Type::ModelExchange);
    assert!(c.is_null());
}

#[test]
fn unknown_fmu_type_is_refused() {
    install();
    let c = fmi2Instantiate(
        c"zone".as_ptr(),
        7,
        c"".as_ptr(),
        ptr::null(),
        ptr::null(),
        FMI2_FALSE,
        FMI2_FALSE,
    );
    assert!(c.is_null());
}

#[test]
fn event_info_reports_the_next_step() {
    let c = initialized(c"");
    assert_eq!(fmi2EnterEventMode(c), Fmi2Status::Ok);
    let mut info = Fmi2EventInfo::default();
    assert_eq!(fmi2NewDiscreteStates(c, &mut info), Fmi2Status::Ok);
    assert_eq!(info.next_event_time_defined, FMI2_TRUE);
    assert_eq!(info.next_event_time, 600.0);
    assert_eq!(info.terminate_simulation, FMI2_FALSE);
    assert_eq!(info.new_discrete_states_needed, FMI2_FALSE);
    assert_eq!(fmi2NewDiscreteStates(c, ptr::null_mut()), Fmi2Status::Error);

    assert_eq!(fmi2EnterContinuousTimeMode(c), Fmi2Status::Ok);
    let (mut event, mut terminate) = (FMI2_TRUE, FMI2_TRUE);
    assert_eq!(
        fmi2CompletedIntegratorStep(c, FMI2_TRUE, &mut event, &mut terminate),
        Fmi2Status::Ok
    );
    assert_eq!(event, FMI2_FALSE);
    assert_eq!(terminate, FMI2_FALSE);
    fmi2FreeInstance(c);
}

#[test]
fn undeclared_variable_kinds_accept_only_empty_requests() {
    let c = initialized(c"");
    let mut ints = [0i32; 1];
    let vr = [0u32];
    assert_eq!(fmi2GetInteger(c, vr.as_ptr(), 0, ints.as_mut_ptr()), Fmi2Status::Ok);
    assert_eq!(fmi2GetInteger(c, vr.as_ptr(), 1, ints.as_mut_ptr()), Fmi2Status::Error);
    assert_eq!(fmi2SetBoolean(c, vr.as_ptr(), 0, ints.as_ptr()), Fmi2Status::Ok);
    assert_eq!(fmi2GetString(c, vr.as_ptr(), 0, ptr::null_mut()), Fmi2Status::Ok);
    assert_eq!(fmi2GetDerivatives(c, ptr::null_mut(), 0), Fmi2Status::Ok);
    assert_eq!(fmi2GetContinuousStates(c, ptr::null_mut(), 2), Fmi2Status::Error);
    fmi2FreeInstance(c);
}

#[test]
fn co_simulation_steps_with_do_step() {
    let c = instantiate_with(c"cs", c"", Fmi2Type::CoSimulation);
    assert!(!c.is_null());
    assert_eq!(
        fmi2SetupExperiment(c, FMI2_TRUE, 1e-4, 0.0, FMI2_FALSE, 0.0),
        Fmi2Status::Ok
    );
    assert_eq!(fmi2ExitInitializationMode(c), Fmi2Status::Ok);
    let mut t = 0.0;
    for _ in 0..6 {
        assert_eq!(fmi2DoStep(c, t, 600.0, FMI2_TRUE), Fmi2Status::Ok);
        t += 600.0;
    }
    let (status, _) = get_reals(c, &[T_ZONE.0]);
    assert_eq!(status, Fmi2Status::Ok);
    fmi2FreeInstance(c);
}

#[test]
fn co_simulation_status_queries() {
    let c = instantiate_with(c"cs-status", c"", Fmi2Type::CoSimulation);
    assert!(!c.is_null());
    assert_eq!(
        fmi2SetupExperiment(c, FMI2_FALSE, 0.0, 0.0, FMI2_FALSE, 0.0),
        Fmi2Status::Ok
    );
    assert_eq!(fmi2ExitInitializationMode(c), Fmi2Status::Ok);
    assert_eq!(fmi2DoStep(c, 0.0, 600.0, FMI2_TRUE), Fmi2Status::Ok);
    assert_eq!(fmi2DoStep(c, 600.0, 600.0, FMI2_TRUE), Fmi2Status::Ok);

    // fmi2LastSuccessfulTime and fmi2Terminated are the only answered kinds.
    let mut time = f64::NAN;
    assert_eq!(fmi2GetRealStatus(c, 2, &mut time), Fmi2Status::Ok);
    assert_eq!(time, 1_200.0);
    let mut done = FMI2_TRUE;
    assert_eq!(fmi2GetBooleanStatus(c, 3, &mut done), Fmi2Status::Ok);
    assert_eq!(done, FMI2_FALSE);

    let mut status = Fmi2Status::Ok;
    assert_eq!(fmi2GetStatus(c, 0, &mut status), Fmi2Status::Discard);
    let mut count = 0;
    assert_eq!(fmi2GetIntegerStatus(c, 1, &mut count), Fmi2Status::Discard);
    let mut message = ptr::null();
    assert_eq!(fmi2GetStringStatus(c, 1, &mut message), Fmi2Status::Discard);
    assert_eq!(fmi2GetRealStatus(c, 0, &mut time), Fmi2Status::Discard);
    assert_eq!(fmi2GetRealStatus(c, 9, &mut time), Fmi2Status::Error);
    assert_eq!(fmi2GetRealStatus(c, 2, ptr::null_mut()), Fmi2Status::Error);
    assert_eq!(time, 1_200.0);

    assert_eq!(fmi2CancelStep(c), Fmi2Status::Error);
    // The failed cancel leaves the instance stepping.
    assert_eq!(fmi2DoStep(c, 1_200.0, 600.0, FMI2_TRUE), Fmi2Status::Ok);

    let vr = [Q_FLOW.0];
    let order = [1];
    let mut derivative = [0.0];
    assert_eq!(
        fmi2SetRealInputDerivatives(c, vr.as_ptr(), 0, order.as_ptr(), derivative.as_ptr()),
        Fmi2Status::Ok
    );
    assert_eq!(
        fmi2SetRealInputDerivatives(c, vr.as_ptr(), 1, order.as_ptr(), derivative.as_ptr()),
        Fmi2Status::Error
    );
    assert_eq!(
        fmi2GetRealOutputDerivatives(c, vr.as_ptr(), 0, order.as_ptr(), derivative.as_mut_ptr()),
        Fmi2Status::Ok
    );
    assert_eq!(
        fmi2GetRealOutputDerivatives(c, vr.as_ptr(), 1, order.as_ptr(), derivative.as_mut_ptr()),
        Fmi2Status::Error
    );

    assert_eq!(fmi2Terminate(c), Fmi2Status::Ok);
    assert_eq!(fmi2GetBooleanStatus(c, 3, &mut done), Fmi2Status::Ok);
    assert_eq!(done, FMI2_TRUE);
    assert_eq!(fmi2GetRealStatus(c, 2, &mut time), Fmi2Status::Ok);
    assert_eq!(time, 1_800.0);
    assert_eq!(fmi2CancelStep(c), Fmi2Status::Error);
    fmi2FreeInstance(c);
}

#[test]
fn terminated_instance_can_be_reset_and_reused() {
    let c = initialized(c"");
    assert_eq!(fmi2SetTime(c, 3_600.0), Fmi2Status::Ok);
    assert_eq!(fmi2Terminate(c), Fmi2Status::Ok);

    // The handle outlives fmi2Terminate: outputs stay readable.
    let (status, _) = get_reals(c, &[T_ZONE.0]);
    assert_eq!(status, Fmi2Status::Ok);
    assert_eq!(fmi2SetTime(c, 7_200.0), Fmi2Status::Error);

    assert_eq!(fmi2Reset(c), Fmi2Status::Ok);
    assert_eq!(
        fmi2SetupExperiment(c, FMI2_FALSE, 0.0, 0.0, FMI2_FALSE, 0.0),
        Fmi2Status::Ok
    );
    assert_eq!(fmi2ExitInitializationMode(c), Fmi2Status::Ok);
    assert_eq!(fmi2SetTime(c, 600.0), Fmi2Status::Ok);
    let (status, v) = get_reals(c, &[T_ZONE.0]);
    assert_eq!(status, Fmi2Status::Ok);
    assert!(v[0].is_finite());
    fmi2FreeInstance(c);
}

#[test]
fn non_finite_input_is_an_error() {
    let c = initialized(c"");
    let vr = [Q_FLOW.0];
    assert_eq!(fmi2SetReal(c, vr.as_ptr(), 1, [f64::NAN].as_ptr()), Fmi2Status::Error);
    assert_eq!(
        fmi2SetReal(c, vr.as_ptr(), 1, [f64::INFINITY].as_ptr()),
        Fmi2Status::Error
    );
    assert_eq!(fmi2SetReal(c, vr.as_ptr(), 1, [250.0].as_ptr()), Fmi2Status::Ok);
    let (status, v) = get_reals(c, &vr);
    assert_eq!(status, Fmi2Status::Ok);
    assert_eq!(v[0], 250.0);
    fmi2FreeInstance(c);
}

#[test]
fn platform_and_debug_logging() {
    // SAFETY: both return static NUL-terminated strings.
    let platform = unsafe { CStr::from_ptr(fmi2GetTypesPlatform()) };
    let version = unsafe { CStr::from_ptr(fmi2GetVersion()) };
    assert_eq!(platform.to_str().unwrap(), "default");
    assert_eq!(version.to_str().unwrap(), "2.0");

    let c = instantiate(c"");
    assert_eq!(fmi2SetDebugLogging(c, FMI2_TRUE, 0, ptr::null()), Fmi2Status::Ok);
    fmi2FreeInstance(c);
}
