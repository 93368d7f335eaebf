//! Variable declarations matching [`ScriptedKernel`](crate::ScriptedKernel).
//!
//! | vr | name      | causality | kernel unit | external unit |
//! |----|-----------|-----------|-------------|---------------|
//! | 0  | `Q_flow`  | input     | W           | W             |
//! | 1  | `T`       | output    | degC        | K             |
//! | 2  | `TOut`    | output    | degC        | K             |
//! | 3  | `QLoss`   | output    | W           | W             |
//! | 4  | `V`       | parameter | m3          | L             |

use baton_core::{KernelRef, UnitType, ValueRef};
use baton_registry::VariableSpec;

pub const Q_FLOW: ValueRef = ValueRef(0);
pub const T_ZONE: ValueRef = ValueRef(1);
pub const T_OUT: ValueRef = ValueRef(2);
pub const Q_LOSS: ValueRef = ValueRef(3);
pub const VOLUME: ValueRef = ValueRef(4);

pub fn heater() -> KernelRef {
    KernelRef::actuator("Heater", "Power", "CORE")
}

pub fn zone_temperature() -> KernelRef {
    KernelRef::entity("Zone", "CORE", "T")
}

pub fn zone_volume() -> KernelRef {
    KernelRef::entity("Zone", "CORE", "V")
}

pub fn outdoor_temperature() -> KernelRef {
    KernelRef::sensor("Site Outdoor Air Drybulb Temperature", "Environment")
}

pub fn heat_loss() -> KernelRef {
    KernelRef::sensor("Zone Heat Loss Rate", "CORE")
}

/// The standard single-zone variable set.
pub fn zone_variables() -> Vec<VariableSpec> {
    vec![
        VariableSpec::input("Q_flow", heater(), UnitType::Watt),
        VariableSpec::output("T", zone_temperature(), UnitType::Celsius)
            .with_external_unit(UnitType::Kelvin),
        VariableSpec::output("TOut", outdoor_temperature(), UnitType::Celsius)
            .with_external_unit(UnitType::Kelvin),
        VariableSpec::output("QLoss", heat_loss(), UnitType::Watt),
        VariableSpec::parameter("V", zone_volume(), UnitType::CubicMetre)
            .with_external_unit(UnitType::Litre),
    ]
}

/// Output value references of [`zone_variables`].
pub fn zone_outputs() -> [ValueRef; 3] {
    [T_ZONE, T_OUT, Q_LOSS]
}
