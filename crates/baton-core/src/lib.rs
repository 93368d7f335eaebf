//! Core types and traits for the Baton co-simulation bridge.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the vocabulary shared by every other crate in the workspace: value
//! references, physical units and their conversions, the error types of
//! the kernel boundary, and the traits a simulation kernel implements to
//! be driven step by step from a foreign master.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;
pub mod kernel;
pub mod units;

pub use error::KernelError;
pub use id::{KernelHandle, ValueRef};
pub use kernel::{
    Kernel, KernelClock, KernelIo, KernelPhase, KernelRef, LogLevel, StepDriver, StepFlow,
};
pub use units::{Quantity, UnitError, UnitType};
