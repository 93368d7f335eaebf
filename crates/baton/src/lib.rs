//! Baton: hand a simulation kernel's main loop to a co-simulation master,
//! one step at a time.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Baton sub-crates. A host that wraps a kernel as an FMU only needs
//! this crate: implement [`types::Kernel`], install a
//! [`ffi::KernelFactory`] with [`ffi::install`], and the `fmi2*` symbols of
//! the shared library do the rest.
//!
//! # Quick start
//!
//! ```rust
//! use baton::prelude::*;
//! use baton_test_utils::{fixtures, Script, ScriptedKernel};
//!
//! let kernel = ScriptedKernel::new(Script::default());
//! let mut bridge = Bridge::new(
//!     BridgeConfig::named("zone"),
//!     Box::new(kernel),
//!     fixtures::zone_variables(),
//! )
//! .unwrap();
//!
//! bridge.start().unwrap();
//! bridge.set_value_by_name("Q_flow", 1_000.0).unwrap();
//! bridge.set_time(3_600.0).unwrap();
//! assert_eq!(bridge.current_time().unwrap(), 3_600.0);
//!
//! // Zone temperature, reported in kelvin.
//! let t = bridge.get_value_by_name("T").unwrap();
//! assert!(t > 273.15);
//! bridge.stop().unwrap();
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `baton-core` | value references, units, kernel traits |
//! | [`registry`] | `baton-registry` | causality-tagged variables and value exchange |
//! | [`engine`] | `baton-engine` | step synchronizer and [`engine::Bridge`] |
//! | [`ffi`] | `baton-ffi` | FMI 2.0 entry points, dispatcher, status codes |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and traits (`baton-core`).
///
/// The kernel boundary lives here: [`types::Kernel`], [`types::KernelIo`]
/// and [`types::StepDriver`], plus [`types::UnitType`] conversions.
pub use baton_core as types;

/// Variable registry (`baton-registry`).
pub use baton_registry as registry;

/// Step synchronizer and bridge (`baton-engine`).
///
/// [`engine::Bridge`] is the Rust-side entry point; [`engine::sync`] holds
/// the turn-taking protocol on its own.
pub use baton_engine as engine;

/// FMI 2.0 call boundary (`baton-ffi`).
pub use baton_ffi as ffi;

/// Common imports for typical Baton usage.
///
/// ```rust
/// use baton::prelude::*;
/// ```
pub mod prelude {
    // Core types and traits
    pub use baton_core::{
        Kernel, KernelClock, KernelHandle, KernelIo, KernelPhase, KernelRef, LogLevel,
        StepDriver, StepFlow, UnitType, ValueRef,
    };

    // Errors
    pub use baton_core::{KernelError, UnitError};
    pub use baton_engine::{BridgeError, ConfigError};
    pub use baton_registry::RegistryError;

    // Registry
    pub use baton_registry::{Causality, VariableSpec, WriteOutcome};

    // Engine
    pub use baton_engine::{Bridge, BridgeConfig, LogSink};

    // FFI host setup
    pub use baton_ffi::{install, InstantiateRequest, KernelBundle, KernelFactory};
}
