//! Variable declarations and per-variable runtime state.

use std::fmt;

use baton_core::{KernelHandle, KernelRef, UnitType, ValueRef};

/// Who is allowed to write a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Causality {
    /// Written by the master, pushed into the kernel at each exchange.
    Input,
    /// Computed by the kernel, pulled at each exchange.
    Output,
    /// Fixed by the kernel model, pulled once after start.
    Parameter,
}

impl Causality {
    /// Whether the master may write variables of this causality.
    pub fn is_writable(self) -> bool {
        matches!(self, Causality::Input)
    }
}

impl fmt::Display for Causality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "input",
            Self::Output => "output",
            Self::Parameter => "parameter",
        })
    }
}

/// Declaration of one exchanged variable.
///
/// Produced by whatever reads the model description; the registry assigns
/// value references in declaration order.
#[derive(Clone, Debug, PartialEq)]
pub struct VariableSpec {
    /// Unique name seen by the master.
    pub name: String,
    /// Who writes the variable.
    pub causality: Causality,
    /// The kernel-side referent.
    pub referent: KernelRef,
    /// Unit of values read from and written to the kernel.
    pub kernel_unit: UnitType,
    /// Unit of values exchanged with the master.
    pub external_unit: UnitType,
}

impl VariableSpec {
    /// A variable with the same unit on both sides.
    pub fn new(name: &str, causality: Causality, referent: KernelRef, unit: UnitType) -> Self {
        Self {
            name: name.into(),
            causality,
            referent,
            kernel_unit: unit,
            external_unit: unit,
        }
    }

    /// Shorthand for an [`Causality::Input`] variable.
    pub fn input(name: &str, referent: KernelRef, unit: UnitType) -> Self {
        Self::new(name, Causality::Input, referent, unit)
    }

    /// Shorthand for an [`Causality::Output`] variable.
    pub fn output(name: &str, referent: KernelRef, unit: UnitType) -> Self {
        Self::new(name, Causality::Output, referent, unit)
    }

    /// Shorthand for a [`Causality::Parameter`] variable.
    pub fn parameter(name: &str, referent: KernelRef, unit: UnitType) -> Self {
        Self::new(name, Causality::Parameter, referent, unit)
    }

    /// Expose the variable to the master in `unit` instead of the kernel unit.
    pub fn with_external_unit(mut self, unit: UnitType) -> Self {
        self.external_unit = unit;
        self
    }
}

/// A registered variable and its cached state.
#[derive(Clone, Debug)]
pub struct Variable {
    value_ref: ValueRef,
    spec: VariableSpec,
    value: Option<f64>,
    handle: Option<KernelHandle>,
}

impl Variable {
    pub(crate) fn new(value_ref: ValueRef, spec: VariableSpec) -> Self {
        Self {
            value_ref,
            spec,
            value: None,
            handle: None,
        }
    }

    /// The variable's value reference.
    pub fn value_ref(&self) -> ValueRef {
        self.value_ref
    }

    /// The variable's name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The variable's causality.
    pub fn causality(&self) -> Causality {
        self.spec.causality
    }

    /// The declaration this variable was built from.
    pub fn spec(&self) -> &VariableSpec {
        &self.spec
    }

    /// The cached value in external units, if any.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// The memoized kernel handle, once resolved.
    pub fn handle(&self) -> Option<KernelHandle> {
        self.handle
    }

    pub(crate) fn set_cached(&mut self, value: f64) {
        self.value = Some(value);
    }

    pub(crate) fn set_handle(&mut self, handle: KernelHandle) {
        self.handle = Some(handle);
    }
}
