//! The variable registry and its kernel exchange.

use baton_core::{KernelHandle, KernelIo, Quantity, ValueRef};
use indexmap::IndexMap;

use crate::error::RegistryError;
use crate::variable::{Causality, Variable, VariableSpec};

/// What [`Registry::set_value`] did with a write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value was stored and will be pushed at the next exchange.
    Applied,
    /// The value matched the cached one; nothing to push.
    Unchanged,
    /// The variable is not writable by the master; the write was dropped.
    Ignored,
}

/// All variables of one bridged instance.
///
/// Value references are positions in declaration order, so they are dense
/// and stable for the registry's lifetime. Kernel handles are resolved on
/// first exchange and never re-resolved: the kernel must keep a referent's
/// identity stable once the run period has started.
#[derive(Debug)]
pub struct Registry {
    vars: IndexMap<String, Variable>,
    dirty: bool,
    parameters_pulled: bool,
}

impl Registry {
    /// Build a registry from declarations.
    ///
    /// Fails on duplicate names, or when a variable's kernel and external
    /// units have no conversion between them.
    pub fn new(specs: impl IntoIterator<Item = VariableSpec>) -> Result<Self, RegistryError> {
        let mut vars = IndexMap::new();
        for spec in specs {
            if vars.contains_key(&spec.name) {
                return Err(RegistryError::DuplicateVariable(spec.name));
            }
            if !spec.kernel_unit.converts_to(spec.external_unit) {
                return Err(RegistryError::Unit {
                    name: spec.name.clone(),
                    source: baton_core::UnitError::NoConversion {
                        from: spec.kernel_unit,
                        to: spec.external_unit,
                    },
                });
            }
            let index = u32::try_from(vars.len())
                .map_err(|_| RegistryError::TooManyVariables(vars.len()))?;
            vars.insert(spec.name.clone(), Variable::new(ValueRef(index), spec));
        }
        Ok(Self {
            vars,
            dirty: false,
            parameters_pulled: false,
        })
    }

    /// Number of registered variables.
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether the registry has no variables.
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Whether inputs changed since the last exchange.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Look up the value reference for a variable name.
    pub fn index_of(&self, name: &str) -> Result<ValueRef, RegistryError> {
        self.vars
            .get(name)
            .map(Variable::value_ref)
            .ok_or_else(|| RegistryError::UnknownName(name.to_string()))
    }

    /// The variable behind a value reference.
    pub fn get(&self, vr: ValueRef) -> Result<&Variable, RegistryError> {
        self.vars
            .get_index(vr.index())
            .map(|(_, var)| var)
            .ok_or(RegistryError::InvalidReference(vr))
    }

    /// Iterate variables in value-reference order.
    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }

    /// Value references of every variable with the given causality.
    pub fn refs_with(&self, causality: Causality) -> Vec<ValueRef> {
        self.iter()
            .filter(|var| var.causality() == causality)
            .map(Variable::value_ref)
            .collect()
    }

    /// Cached value in external units.
    pub fn get_value(&self, vr: ValueRef) -> Result<f64, RegistryError> {
        let var = self.get(vr)?;
        var.value().ok_or_else(|| RegistryError::NoValueSet {
            name: var.name().to_string(),
        })
    }

    /// [`get_value`](Self::get_value) by variable name.
    pub fn get_value_by_name(&self, name: &str) -> Result<f64, RegistryError> {
        self.get_value(self.index_of(name)?)
    }

    /// Write a value from the master, in external units.
    ///
    /// Only inputs accept writes. Writes to outputs and parameters are
    /// logged and reported as [`WriteOutcome::Ignored`]. NaN and infinities
    /// are rejected with [`RegistryError::NonFinite`]. A write within
    /// single-precision epsilon of the cached value leaves the registry
    /// clean, except near zero where every write counts.
    pub fn set_value(&mut self, vr: ValueRef, value: f64) -> Result<WriteOutcome, RegistryError> {
        let var = self
            .vars
            .get_index_mut(vr.index())
            .map(|(_, var)| var)
            .ok_or(RegistryError::InvalidReference(vr))?;

        if !var.causality().is_writable() {
            tracing::info!(
                variable = var.name(),
                causality = %var.causality(),
                "Attempt to write a value to the {} named, {}, which is not allowed",
                var.causality(),
                var.name()
            );
            return Ok(WriteOutcome::Ignored);
        }

        if !value.is_finite() {
            return Err(RegistryError::NonFinite {
                name: var.name().to_string(),
                value,
            });
        }

        let eps = f64::from(f32::EPSILON);
        let changed = match var.value() {
            None => true,
            Some(current) => value.abs() <= eps || (current - value).abs() > eps,
        };
        if !changed {
            return Ok(WriteOutcome::Unchanged);
        }
        var.set_cached(value);
        self.dirty = true;
        Ok(WriteOutcome::Applied)
    }

    /// [`set_value`](Self::set_value) by variable name.
    pub fn set_value_by_name(
        &mut self,
        name: &str,
        value: f64,
    ) -> Result<WriteOutcome, RegistryError> {
        let vr = self.index_of(name)?;
        self.set_value(vr, value)
    }

    /// The value the kernel should see for an input, in kernel units.
    ///
    /// Fails with [`RegistryError::NoValueSet`] if the master never wrote it.
    pub fn kernel_value(&self, vr: ValueRef) -> Result<f64, RegistryError> {
        let var = self.get(vr)?;
        let value = var.value().ok_or_else(|| RegistryError::NoValueSet {
            name: var.name().to_string(),
        })?;
        to_kernel_units(var, value)
    }

    /// Synchronize with a paused kernel.
    ///
    /// Does nothing unless `force` is set or inputs changed. Otherwise
    /// pushes every input (unset inputs release their kernel override),
    /// asks the kernel to recompute, pulls every output, and pulls
    /// parameters the first time round.
    pub fn exchange(&mut self, kernel: &mut dyn KernelIo, force: bool) -> Result<(), RegistryError> {
        if !force && !self.dirty {
            return Ok(());
        }

        for var in self.vars.values_mut() {
            if var.causality() != Causality::Input {
                continue;
            }
            let handle = resolve(var, kernel)?;
            let result = match var.value() {
                Some(value) => {
                    let kernel_value = to_kernel_units(var, value)?;
                    kernel.write(handle, kernel_value)
                }
                None => kernel.reset(handle),
            };
            result.map_err(|source| RegistryError::Kernel {
                name: var.name().to_string(),
                source,
            })?;
        }

        kernel.recompute().map_err(RegistryError::Recompute)?;

        let pull_parameters = !self.parameters_pulled;
        for var in self.vars.values_mut() {
            match var.causality() {
                Causality::Output => {}
                Causality::Parameter if pull_parameters => {}
                _ => continue,
            }
            let handle = resolve(var, kernel)?;
            let raw = kernel.read(handle).map_err(|source| RegistryError::Kernel {
                name: var.name().to_string(),
                source,
            })?;
            let spec = var.spec();
            let external = Quantity::new(raw, spec.kernel_unit)
                .convert(spec.external_unit)
                .map_err(|source| RegistryError::Unit {
                    name: spec.name.clone(),
                    source,
                })?;
            var.set_cached(external.value);
        }

        self.parameters_pulled = true;
        self.dirty = false;
        Ok(())
    }
}

fn resolve(var: &mut Variable, kernel: &mut dyn KernelIo) -> Result<KernelHandle, RegistryError> {
    if let Some(handle) = var.handle() {
        return Ok(handle);
    }
    let handle = kernel
        .resolve(&var.spec().referent)
        .map_err(|source| RegistryError::Kernel {
            name: var.name().to_string(),
            source,
        })?;
    var.set_handle(handle);
    Ok(handle)
}

fn to_kernel_units(var: &Variable, value: f64) -> Result<f64, RegistryError> {
    let spec = var.spec();
    Quantity::new(value, spec.external_unit)
        .convert(spec.kernel_unit)
        .map(|q| q.value)
        .map_err(|source| RegistryError::Unit {
            name: spec.name.clone(),
            source,
        })
}
