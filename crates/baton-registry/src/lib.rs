//! Variable registry for the Baton co-simulation bridge.
//!
//! The registry holds every variable the master can see, indexed by a
//! dense [`ValueRef`](baton_core::ValueRef) and by name. Each variable is
//! tagged with a [`Causality`] that decides who may write it: the master
//! writes inputs, the kernel (through [`Registry::exchange`]) writes
//! outputs and parameters. Values are cached in the master's units and
//! converted at the kernel boundary.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod registry;
pub mod variable;

pub use error::RegistryError;
pub use registry::{Registry, WriteOutcome};
pub use variable::{Causality, Variable, VariableSpec};
