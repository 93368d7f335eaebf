//! `fmi2Status` and the mapping from Rust errors onto it.
//!
//! Every recoverable failure is `Error`: the master may free the instance
//! or reset it. `Fatal` is reserved for a panic caught at the boundary,
//! after which only `fmi2FreeInstance` is meaningful.

use baton_engine::BridgeError;
use baton_registry::RegistryError;

use crate::dispatcher::DispatchError;

/// C-compatible `fmi2Status`. Values are ABI-stable.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Fmi2Status {
    /// Success.
    Ok = 0,
    /// Success, but something deserves the master's attention.
    Warning = 1,
    /// The call was not carried out; the instance is unchanged.
    Discard = 2,
    /// The call failed. The instance may be reset or freed.
    Error = 3,
    /// The instance is unusable. Only `fmi2FreeInstance` may follow.
    Fatal = 4,
    /// Asynchronous completion pending. Never returned by Baton.
    Pending = 5,
}

impl Fmi2Status {
    /// The more severe of two statuses.
    pub fn worst(self, other: Self) -> Self {
        self.max(other)
    }

    /// Status to report a successful call that produced `warned`.
    pub fn ok_or_warning(warned: bool) -> Self {
        if warned {
            Self::Warning
        } else {
            Self::Ok
        }
    }
}

impl From<&RegistryError> for Fmi2Status {
    fn from(_: &RegistryError) -> Self {
        Fmi2Status::Error
    }
}

impl From<&BridgeError> for Fmi2Status {
    fn from(e: &BridgeError) -> Self {
        match e {
            BridgeError::Registry(inner) => inner.into(),
            _ => Fmi2Status::Error,
        }
    }
}

impl From<&DispatchError> for Fmi2Status {
    fn from(e: &DispatchError) -> Self {
        match e {
            DispatchError::Bridge(inner) => inner.into(),
            DispatchError::Poisoned
            | DispatchError::Panicked(_)
            | DispatchError::InstanceFatal => Fmi2Status::Fatal,
            _ => Fmi2Status::Error,
        }
    }
}
