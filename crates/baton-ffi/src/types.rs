//! C layouts from `fmi2TypesPlatform.h` and `fmi2FunctionTypes.h`.

use std::ffi::{c_char, c_void, CStr};

use crate::status::Fmi2Status;

/// `fmi2Component`: opaque instance pointer.
pub type Fmi2Component = *mut c_void;
/// `fmi2ComponentEnvironment`: opaque master pointer passed back to callbacks.
pub type Fmi2ComponentEnvironment = *mut c_void;
/// `fmi2ValueReference`.
pub type Fmi2ValueReference = u32;
/// `fmi2Real`.
pub type Fmi2Real = f64;
/// `fmi2Integer`.
pub type Fmi2Integer = i32;
/// `fmi2Boolean`.
pub type Fmi2Boolean = i32;
/// `fmi2String`.
pub type Fmi2String = *const c_char;

/// `fmi2True`.
pub const FMI2_TRUE: Fmi2Boolean = 1;
/// `fmi2False`.
pub const FMI2_FALSE: Fmi2Boolean = 0;

/// Value of `fmi2TypesPlatform`.
pub const TYPES_PLATFORM: &CStr = c"default";
/// Value of `fmi2Version`.
pub const VERSION: &CStr = c"2.0";

/// Convert a C boolean.
pub fn is_true(b: Fmi2Boolean) -> bool {
    b != FMI2_FALSE
}

/// Convert to a C boolean.
pub fn to_fmi2(b: bool) -> Fmi2Boolean {
    if b {
        FMI2_TRUE
    } else {
        FMI2_FALSE
    }
}

/// `fmi2Type`: the interface the master instantiates.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fmi2Type {
    /// Model exchange.
    ModelExchange = 0,
    /// Co-simulation.
    CoSimulation = 1,
}

impl Fmi2Type {
    /// Decode the raw C value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::ModelExchange),
            1 => Some(Self::CoSimulation),
            _ => None,
        }
    }
}

/// `fmi2StatusKind`: what `fmi2Get*Status` is asked about.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fmi2StatusKind {
    /// Status of a pending asynchronous `fmi2DoStep`.
    DoStepStatus = 0,
    /// Progress message of a pending step.
    PendingStatus = 1,
    /// Time of the last successfully completed step.
    LastSuccessfulTime = 2,
    /// Whether the slave wants the simulation to end.
    Terminated = 3,
}

impl Fmi2StatusKind {
    /// Decode the raw C value.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::DoStepStatus),
            1 => Some(Self::PendingStatus),
            2 => Some(Self::LastSuccessfulTime),
            3 => Some(Self::Terminated),
            _ => None,
        }
    }
}

/// `fmi2CallbackLogger`. The message is a printf format.
pub type Fmi2CallbackLogger = Option<
    unsafe extern "C" fn(
        Fmi2ComponentEnvironment,
        Fmi2String,
        Fmi2Status,
        Fmi2String,
        Fmi2String,
        ...
    ),
>;
/// `fmi2CallbackAllocateMemory`.
pub type Fmi2CallbackAllocateMemory = Option<unsafe extern "C" fn(usize, usize) -> *mut c_void>;
/// `fmi2CallbackFreeMemory`.
pub type Fmi2CallbackFreeMemory = Option<unsafe extern "C" fn(*mut c_void)>;
/// `fmi2StepFinished`.
pub type Fmi2StepFinished = Option<unsafe extern "C" fn(Fmi2ComponentEnvironment, Fmi2Status)>;

/// `fmi2CallbackFunctions`. Only the logger is used; memory is managed
/// on the Rust side.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Fmi2CallbackFunctions {
    /// Logger callback.
    pub logger: Fmi2CallbackLogger,
    /// Allocator (unused).
    pub allocate_memory: Fmi2CallbackAllocateMemory,
    /// Deallocator (unused).
    pub free_memory: Fmi2CallbackFreeMemory,
    /// Asynchronous step completion (unused).
    pub step_finished: Fmi2StepFinished,
    /// Passed back as the logger's first argument.
    pub component_environment: Fmi2ComponentEnvironment,
}

/// `fmi2EventInfo`, filled by `fmi2NewDiscreteStates`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Fmi2EventInfo {
    /// Another event iteration is required.
    pub new_discrete_states_needed: Fmi2Boolean,
    /// The simulation should end.
    pub terminate_simulation: Fmi2Boolean,
    /// Nominal values of continuous states changed.
    pub nominals_of_continuous_states_changed: Fmi2Boolean,
    /// Values of continuous states changed.
    pub values_of_continuous_states_changed: Fmi2Boolean,
    /// `next_event_time` is meaningful.
    pub next_event_time_defined: Fmi2Boolean,
    /// Time of the next time event.
    pub next_event_time: Fmi2Real,
}
