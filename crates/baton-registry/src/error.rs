//! Registry error types.

use baton_core::{KernelError, UnitError, ValueRef};
use thiserror::Error;

/// Errors from registry construction, value access and exchange.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum RegistryError {
    /// The value reference does not name a registered variable.
    #[error("attempt to use an invalid reference: {0}")]
    InvalidReference(ValueRef),
    /// No variable has this name.
    #[error("attempt to retrieve an invalid variable name: {0}")]
    UnknownName(String),
    /// The variable exists but nothing has written it yet.
    #[error("variable '{name}' has no value set")]
    NoValueSet {
        /// Name of the variable.
        name: String,
    },
    /// The master wrote NaN or an infinity to an input.
    #[error("variable '{name}' cannot take the non-finite value {value}")]
    NonFinite {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: f64,
    },
    /// Two variable specs share a name.
    #[error("duplicate variable name '{0}'")]
    DuplicateVariable(String),
    /// More variables than a value reference can address.
    #[error("too many variables: {0}")]
    TooManyVariables(usize),
    /// The variable's kernel and external units cannot be converted.
    #[error("variable '{name}': {source}")]
    Unit {
        /// Name of the variable.
        name: String,
        /// The conversion failure.
        #[source]
        source: UnitError,
    },
    /// The kernel rejected an access for this variable.
    #[error("kernel exchange failed for '{name}': {source}")]
    Kernel {
        /// Name of the variable.
        name: String,
        /// The kernel's error.
        #[source]
        source: KernelError,
    },
    /// The kernel failed to recompute after inputs were pushed.
    #[error("kernel recompute failed: {0}")]
    Recompute(#[source] KernelError),
}

impl RegistryError {
    /// Whether the error is a bad reference (by index or by name).
    pub fn is_invalid_reference(&self) -> bool {
        matches!(self, Self::InvalidReference(_) | Self::UnknownName(_))
    }
}
