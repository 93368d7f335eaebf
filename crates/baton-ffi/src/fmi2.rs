//! The `fmi2*` entry points.
//!
//! Every function decodes its C arguments, resolves the component through
//! the installed [`Dispatcher`](crate::Dispatcher) and maps the outcome to
//! an [`Fmi2Status`]. Panics never cross the boundary.

#![allow(non_snake_case)]

use std::ffi::{c_char, CStr};

use crate::dispatcher::{installed, resource_path, DispatchError, InstantiateRequest};
use crate::handle::InstanceHandle;
use crate::instance::Instance;
use crate::logger::FmiLogger;
use crate::status::Fmi2Status;
use crate::types::{
    is_true, to_fmi2, Fmi2Boolean, Fmi2CallbackFunctions, Fmi2Component, Fmi2EventInfo,
    Fmi2Integer, Fmi2Real, Fmi2StatusKind, Fmi2String, Fmi2Type, Fmi2ValueReference, FMI2_FALSE,
    TYPES_PLATFORM, VERSION,
};

// ── helpers ────────────────────────────────────────────────────────

fn dispatch<T>(
    c: Fmi2Component,
    operation: &'static str,
    op: impl FnOnce(&mut Instance) -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    let result = InstanceHandle::from_ptr(c)
        .ok_or(DispatchError::InvalidHandle)
        .and_then(|handle| installed()?.with_instance(handle, operation, op));
    if let Err(e @ (DispatchError::InvalidHandle | DispatchError::NotInstalled)) = &result {
        tracing::warn!(operation, error = %e, "call rejected");
    }
    result
}

fn finish(result: Result<(), DispatchError>) -> Fmi2Status {
    match result {
        Ok(()) => Fmi2Status::Ok,
        Err(e) => Fmi2Status::from(&e),
    }
}

/// For calls whose success status is chosen by the instance.
fn reported(result: Result<Fmi2Status, DispatchError>) -> Fmi2Status {
    match result {
        Ok(status) => status,
        Err(e) => Fmi2Status::from(&e),
    }
}

fn invalid(what: &str, problem: &str) -> DispatchError {
    DispatchError::InvalidArgument(format!("{what} {problem}"))
}

/// # Safety
/// A non-null `ptr` must point to `n` readable elements.
#[allow(unsafe_code)]
unsafe fn input_slice<'a, T>(ptr: *const T, n: usize, what: &str) -> Result<&'a [T], DispatchError> {
    if n == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(invalid(what, "is null"));
    }
    // SAFETY: non-null and valid for n elements per the caller contract.
    Ok(unsafe { std::slice::from_raw_parts(ptr, n) })
}

/// # Safety
/// A non-null `ptr` must point to `n` writable elements.
#[allow(unsafe_code)]
unsafe fn output_slice<'a, T>(
    ptr: *mut T,
    n: usize,
    what: &str,
) -> Result<&'a mut [T], DispatchError> {
    if n == 0 {
        return Ok(&mut []);
    }
    if ptr.is_null() {
        return Err(invalid(what, "is null"));
    }
    // SAFETY: non-null and valid for n elements per the caller contract.
    Ok(unsafe { std::slice::from_raw_parts_mut(ptr, n) })
}

/// # Safety
/// A non-null `ptr` must be a NUL-terminated string valid for the call.
#[allow(unsafe_code)]
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<Option<&'a str>, DispatchError> {
    if ptr.is_null() {
        return Ok(None);
    }
    // SAFETY: non-null and NUL-terminated per the caller contract.
    let s = unsafe { CStr::from_ptr(ptr) };
    s.to_str()
        .map(Some)
        .map_err(|_| invalid(what, "is not valid UTF-8"))
}

fn empty_access(c: Fmi2Component, operation: &'static str, n: usize) -> Fmi2Status {
    finish(dispatch(c, operation, |inst| inst.empty_access(operation, n)))
}

fn status_kind(raw: i32) -> Result<Fmi2StatusKind, DispatchError> {
    Fmi2StatusKind::from_raw(raw)
        .ok_or_else(|| DispatchError::InvalidArgument(format!("unknown fmi2StatusKind {raw}")))
}

/// Shared body of the status queries that never have anything to report.
fn no_status(c: Fmi2Component, operation: &'static str, kind: i32) -> Fmi2Status {
    reported(dispatch(c, operation, |inst| {
        status_kind(kind)?;
        inst.no_status(operation)
    }))
}

// ── inquiry ────────────────────────────────────────────────────────

/// `fmi2GetTypesPlatform`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetTypesPlatform() -> *const c_char {
    TYPES_PLATFORM.as_ptr()
}

/// `fmi2GetVersion`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetVersion() -> *const c_char {
    VERSION.as_ptr()
}

/// `fmi2SetDebugLogging`. Categories are accepted and ignored.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetDebugLogging(
    c: Fmi2Component,
    logging_on: Fmi2Boolean,
    _n_categories: usize,
    _categories: *const Fmi2String,
) -> Fmi2Status {
    ffi_guard!({
        finish(dispatch(c, "fmi2SetDebugLogging", |inst| {
            inst.set_debug_logging(is_true(logging_on))
        }))
    })
}

// ── lifecycle ──────────────────────────────────────────────────────

/// `fmi2Instantiate`. Returns null on failure.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2Instantiate(
    instance_name: Fmi2String,
    fmu_type: i32,
    fmu_guid: Fmi2String,
    fmu_resource_location: Fmi2String,
    functions: *const Fmi2CallbackFunctions,
    _visible: Fmi2Boolean,
    logging_on: Fmi2Boolean,
) -> Fmi2Component {
    ffi_guard_or!(std::ptr::null_mut(), {
        // SAFETY: a non-null callback table is valid for this call; it is
        // copied, not retained.
        let callbacks = unsafe { functions.as_ref() };
        // SAFETY: FMI strings are NUL-terminated and valid for this call.
        let name = unsafe { c_str(instance_name, "instanceName") };
        let label = name.clone().ok().flatten().unwrap_or("");
        let logger = FmiLogger::new(callbacks, label, is_true(logging_on));

        let request = (|| {
            let instance_name = name?
                .filter(|n| !n.is_empty())
                .ok_or_else(|| invalid("instanceName", "is empty"))?;
            let kind = Fmi2Type::from_raw(fmu_type)
                .ok_or_else(|| invalid("fmuType", &format!("{fmu_type} is unknown")))?;
            // SAFETY: as above.
            let guid = unsafe { c_str(fmu_guid, "fmuGUID") }?.unwrap_or_default();
            // SAFETY: as above.
            let location = unsafe { c_str(fmu_resource_location, "fmuResourceLocation") }?;
            Ok::<_, DispatchError>(InstantiateRequest {
                instance_name: instance_name.to_string(),
                guid: guid.to_string(),
                resource_path: location.map(resource_path),
                kind,
                logging_on: is_true(logging_on),
            })
        })();

        match request.and_then(|request| installed()?.instantiate(request, logger.clone())) {
            Ok(handle) => handle.to_ptr(),
            Err(e) => {
                tracing::warn!(instance = %label, error = %e, "fmi2Instantiate failed");
                logger.emit(
                    Fmi2Status::Error,
                    "logStatusError",
                    &format!("fmi2Instantiate: {e}"),
                );
                std::ptr::null_mut()
            }
        }
    })
}

/// `fmi2FreeInstance`. Null and stale components are ignored.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2FreeInstance(c: Fmi2Component) {
    ffi_guard_or!((), {
        let Some(handle) = InstanceHandle::from_ptr(c) else {
            return;
        };
        if let Err(e) = installed().and_then(|d| d.free(handle)) {
            tracing::warn!(%handle, error = %e, "fmi2FreeInstance ignored");
        }
    })
}

/// `fmi2SetupExperiment`: starts the kernel.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetupExperiment(
    c: Fmi2Component,
    tolerance_defined: Fmi2Boolean,
    tolerance: Fmi2Real,
    start_time: Fmi2Real,
    stop_time_defined: Fmi2Boolean,
    stop_time: Fmi2Real,
) -> Fmi2Status {
    ffi_guard!({
        let tolerance = is_true(tolerance_defined).then_some(tolerance);
        let stop_time = is_true(stop_time_defined).then_some(stop_time);
        finish(dispatch(c, "fmi2SetupExperiment", |inst| {
            inst.setup_experiment(tolerance, start_time, stop_time)
        }))
    })
}

/// `fmi2EnterInitializationMode`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2EnterInitializationMode(c: Fmi2Component) -> Fmi2Status {
    ffi_guard!({
        finish(dispatch(c, "fmi2EnterInitializationMode", |inst| {
            inst.enter_initialization_mode()
        }))
    })
}

/// `fmi2ExitInitializationMode`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2ExitInitializationMode(c: Fmi2Component) -> Fmi2Status {
    ffi_guard!({
        finish(dispatch(c, "fmi2ExitInitializationMode", |inst| {
            inst.exit_initialization_mode()
        }))
    })
}

/// `fmi2Terminate`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2Terminate(c: Fmi2Component) -> Fmi2Status {
    ffi_guard!({ finish(dispatch(c, "fmi2Terminate", Instance::terminate)) })
}

/// `fmi2Reset`: rebuild the kernel and return to the instantiated state.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2Reset(c: Fmi2Component) -> Fmi2Status {
    ffi_guard!({
        let result = InstanceHandle::from_ptr(c)
            .ok_or(DispatchError::InvalidHandle)
            .and_then(|handle| installed()?.reset(handle));
        finish(result)
    })
}

// ── real variables ─────────────────────────────────────────────────

/// `fmi2GetReal`. `value` is written only if every reference is readable.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetReal(
    c: Fmi2Component,
    vr: *const Fmi2ValueReference,
    nvr: usize,
    value: *mut Fmi2Real,
) -> Fmi2Status {
    ffi_guard!({
        finish(dispatch(c, "fmi2GetReal", |inst| {
            // SAFETY: vr and value hold nvr elements per FMI 2.0.
            let refs = unsafe { input_slice(vr, nvr, "vr") }?;
            // SAFETY: as above.
            let out = unsafe { output_slice(value, nvr, "value") }?;
            let values = inst.get_real(refs)?;
            out.copy_from_slice(&values);
            Ok(())
        }))
    })
}

/// `fmi2SetReal`. Returns `Warning` if a non-input write was ignored.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetReal(
    c: Fmi2Component,
    vr: *const Fmi2ValueReference,
    nvr: usize,
    value: *const Fmi2Real,
) -> Fmi2Status {
    ffi_guard!({
        let result = dispatch(c, "fmi2SetReal", |inst| {
            // SAFETY: vr and value hold nvr elements per FMI 2.0.
            let refs = unsafe { input_slice(vr, nvr, "vr") }?;
            // SAFETY: as above.
            let values = unsafe { input_slice(value, nvr, "value") }?;
            inst.set_real(refs, values)
        });
        reported(result)
    })
}

// ── integer, boolean, string: none declared ────────────────────────

/// `fmi2GetInteger`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetInteger(
    c: Fmi2Component,
    _vr: *const Fmi2ValueReference,
    nvr: usize,
    _value: *mut Fmi2Integer,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2GetInteger", nvr) })
}

/// `fmi2GetBoolean`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetBoolean(
    c: Fmi2Component,
    _vr: *const Fmi2ValueReference,
    nvr: usize,
    _value: *mut Fmi2Boolean,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2GetBoolean", nvr) })
}

/// `fmi2GetString`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetString(
    c: Fmi2Component,
    _vr: *const Fmi2ValueReference,
    nvr: usize,
    _value: *mut Fmi2String,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2GetString", nvr) })
}

/// `fmi2SetInteger`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetInteger(
    c: Fmi2Component,
    _vr: *const Fmi2ValueReference,
    nvr: usize,
    _value: *const Fmi2Integer,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2SetInteger", nvr) })
}

/// `fmi2SetBoolean`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetBoolean(
    c: Fmi2Component,
    _vr: *const Fmi2ValueReference,
    nvr: usize,
    _value: *const Fmi2Boolean,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2SetBoolean", nvr) })
}

/// `fmi2SetString`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetString(
    c: Fmi2Component,
    _vr: *const Fmi2ValueReference,
    nvr: usize,
    _value: *const Fmi2String,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2SetString", nvr) })
}

// ── model exchange ─────────────────────────────────────────────────

/// `fmi2SetTime`: exchange, then advance the kernel if `time` reaches its
/// next step.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetTime(c: Fmi2Component, time: Fmi2Real) -> Fmi2Status {
    ffi_guard!({ finish(dispatch(c, "fmi2SetTime", |inst| inst.set_time(time))) })
}

/// `fmi2EnterEventMode`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2EnterEventMode(c: Fmi2Component) -> Fmi2Status {
    ffi_guard!({ finish(dispatch(c, "fmi2EnterEventMode", Instance::enter_event_mode)) })
}

/// `fmi2EnterContinuousTimeMode`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2EnterContinuousTimeMode(c: Fmi2Component) -> Fmi2Status {
    ffi_guard!({
        finish(dispatch(
            c,
            "fmi2EnterContinuousTimeMode",
            Instance::enter_continuous_time_mode,
        ))
    })
}

/// `fmi2NewDiscreteStates`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2NewDiscreteStates(
    c: Fmi2Component,
    event_info: *mut Fmi2EventInfo,
) -> Fmi2Status {
    ffi_guard!({
        finish(dispatch(c, "fmi2NewDiscreteStates", |inst| {
            // SAFETY: a non-null event_info points to a writable struct.
            let out = unsafe { event_info.as_mut() }
                .ok_or_else(|| invalid("fmi2EventInfo", "is null"))?;
            let info = inst.new_discrete_states()?;
            *out = Fmi2EventInfo {
                new_discrete_states_needed: FMI2_FALSE,
                terminate_simulation: to_fmi2(info.terminate_simulation),
                nominals_of_continuous_states_changed: FMI2_FALSE,
                values_of_continuous_states_changed: FMI2_FALSE,
                next_event_time_defined: to_fmi2(info.next_event_time.is_some()),
                next_event_time: info.next_event_time.unwrap_or(0.0),
            };
            Ok(())
        }))
    })
}

/// `fmi2CompletedIntegratorStep`: never requests an event.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2CompletedIntegratorStep(
    c: Fmi2Component,
    _no_set_fmu_state_prior: Fmi2Boolean,
    enter_event_mode: *mut Fmi2Boolean,
    terminate_simulation: *mut Fmi2Boolean,
) -> Fmi2Status {
    ffi_guard!({
        finish(dispatch(c, "fmi2CompletedIntegratorStep", |inst| {
            let (event, terminate) = inst.completed_integrator_step()?;
            // SAFETY: non-null out-pointers are writable per FMI 2.0.
            unsafe {
                if let Some(out) = enter_event_mode.as_mut() {
                    *out = to_fmi2(event);
                }
                if let Some(out) = terminate_simulation.as_mut() {
                    *out = to_fmi2(terminate);
                }
            }
            Ok(())
        }))
    })
}

/// `fmi2SetContinuousStates`. The bridged model has no continuous states.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetContinuousStates(
    c: Fmi2Component,
    _x: *const Fmi2Real,
    nx: usize,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2SetContinuousStates", nx) })
}

/// `fmi2GetDerivatives`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetDerivatives(
    c: Fmi2Component,
    _derivatives: *mut Fmi2Real,
    nx: usize,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2GetDerivatives", nx) })
}

/// `fmi2GetEventIndicators`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetEventIndicators(
    c: Fmi2Component,
    _event_indicators: *mut Fmi2Real,
    ni: usize,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2GetEventIndicators", ni) })
}

/// `fmi2GetContinuousStates`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetContinuousStates(
    c: Fmi2Component,
    _x: *mut Fmi2Real,
    nx: usize,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2GetContinuousStates", nx) })
}

/// `fmi2GetNominalsOfContinuousStates`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetNominalsOfContinuousStates(
    c: Fmi2Component,
    _x_nominal: *mut Fmi2Real,
    nx: usize,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2GetNominalsOfContinuousStates", nx) })
}

// ── co-simulation ──────────────────────────────────────────────────

/// `fmi2DoStep`: advance to `current + step`.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2DoStep(
    c: Fmi2Component,
    current_communication_point: Fmi2Real,
    communication_step_size: Fmi2Real,
    _no_set_fmu_state_prior: Fmi2Boolean,
) -> Fmi2Status {
    ffi_guard!({
        finish(dispatch(c, "fmi2DoStep", |inst| {
            inst.do_step(current_communication_point, communication_step_size)
        }))
    })
}

/// `fmi2CancelStep`. Steps are synchronous, so this is always an error.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2CancelStep(c: Fmi2Component) -> Fmi2Status {
    ffi_guard!({ finish(dispatch(c, "fmi2CancelStep", |inst| inst.cancel_step())) })
}

/// `fmi2GetStatus`: there is never a pending step to report on.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetStatus(c: Fmi2Component, s: i32, _value: *mut Fmi2Status) -> Fmi2Status {
    ffi_guard!({ no_status(c, "fmi2GetStatus", s) })
}

/// `fmi2GetRealStatus`. Only `fmi2LastSuccessfulTime` is answered.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetRealStatus(c: Fmi2Component, s: i32, value: *mut Fmi2Real) -> Fmi2Status {
    ffi_guard!({
        reported(dispatch(c, "fmi2GetRealStatus", |inst| {
            if status_kind(s)? != Fmi2StatusKind::LastSuccessfulTime {
                return inst.no_status("fmi2GetRealStatus");
            }
            let time = inst.last_successful_time()?;
            // SAFETY: value points to one fmi2Real per FMI 2.0.
            let out = unsafe { output_slice(value, 1, "value") }?;
            out[0] = time;
            Ok(Fmi2Status::Ok)
        }))
    })
}

/// `fmi2GetIntegerStatus`: no kind carries an integer.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetIntegerStatus(
    c: Fmi2Component,
    s: i32,
    _value: *mut Fmi2Integer,
) -> Fmi2Status {
    ffi_guard!({ no_status(c, "fmi2GetIntegerStatus", s) })
}

/// `fmi2GetBooleanStatus`. Only `fmi2Terminated` is answered: true once the
/// kernel has stopped.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetBooleanStatus(
    c: Fmi2Component,
    s: i32,
    value: *mut Fmi2Boolean,
) -> Fmi2Status {
    ffi_guard!({
        reported(dispatch(c, "fmi2GetBooleanStatus", |inst| {
            if status_kind(s)? != Fmi2StatusKind::Terminated {
                return inst.no_status("fmi2GetBooleanStatus");
            }
            let finished = inst.kernel_finished()?;
            // SAFETY: value points to one fmi2Boolean per FMI 2.0.
            let out = unsafe { output_slice(value, 1, "value") }?;
            out[0] = to_fmi2(finished);
            Ok(Fmi2Status::Ok)
        }))
    })
}

/// `fmi2GetStringStatus`: no pending step, so no progress message.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetStringStatus(
    c: Fmi2Component,
    s: i32,
    _value: *mut Fmi2String,
) -> Fmi2Status {
    ffi_guard!({ no_status(c, "fmi2GetStringStatus", s) })
}

/// `fmi2SetRealInputDerivatives`. No input has derivatives.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2SetRealInputDerivatives(
    c: Fmi2Component,
    _vr: *const Fmi2ValueReference,
    nvr: usize,
    _order: *const Fmi2Integer,
    _value: *const Fmi2Real,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2SetRealInputDerivatives", nvr) })
}

/// `fmi2GetRealOutputDerivatives`. No output has derivatives.
#[no_mangle]
#[allow(unsafe_code)]
pub extern "C" fn fmi2GetRealOutputDerivatives(
    c: Fmi2Component,
    _vr: *const Fmi2ValueReference,
    nvr: usize,
    _order: *const Fmi2Integer,
    _value: *mut Fmi2Real,
) -> Fmi2Status {
    ffi_guard!({ empty_access(c, "fmi2GetRealOutputDerivatives", nvr) })
}
