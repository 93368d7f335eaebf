//! Errors raised by a simulation kernel.

use thiserror::Error;

use crate::kernel::KernelRef;
use crate::KernelHandle;

/// Errors reported by a kernel through the [`KernelIo`](crate::KernelIo)
/// and [`Kernel`](crate::Kernel) traits.
///
/// Kernel errors are opaque to the bridge: a failing [`Kernel::run`]
/// becomes a deferred fault that surfaces on the master's next call.
///
/// [`Kernel::run`]: crate::Kernel::run
#[derive(Clone, Debug, PartialEq, Error)]
pub enum KernelError {
    /// The kernel has no referent matching the requested reference.
    #[error("kernel has no referent for {0}")]
    UnknownReferent(KernelRef),
    /// A handle was passed that the kernel never issued.
    #[error("kernel handle {0} is not valid")]
    InvalidHandle(KernelHandle),
    /// The referent cannot be written (sensors are read-only).
    #[error("kernel referent {0} is read-only")]
    ReadOnly(KernelHandle),
    /// The simulation itself failed.
    #[error("simulation failed: {reason}")]
    SimulationFailed {
        /// Human-readable description of the failure.
        reason: String,
    },
    /// The kernel thread panicked; the payload message is preserved.
    #[error("kernel panicked: {0}")]
    Panicked(String),
}

impl KernelError {
    /// Shorthand for [`KernelError::SimulationFailed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::SimulationFailed {
            reason: reason.into(),
        }
    }
}
