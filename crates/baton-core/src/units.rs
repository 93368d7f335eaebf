//! Physical units and linear unit conversion.
//!
//! Every exchanged value is tagged with a [`UnitType`]. The kernel and the
//! master may disagree on units for the same variable (the kernel works in
//! Celsius, the master in Kelvin); [`Quantity::convert`] bridges the two
//! with a fixed table of `value * factor + offset` conversions, applied in
//! reverse as `(value - offset) / factor`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// A physical unit understood by the bridge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitType {
    /// Degrees Celsius (`degC`).
    Celsius,
    /// Kelvin (`K`).
    Kelvin,
    /// Dimensionless (`1`).
    One,
    /// Humidity ratio (`kgWater/kgDryAir`).
    KgWaterPerKgDryAir,
    /// Percent (`%`).
    Percent,
    /// Pascal (`Pa`).
    Pascal,
    /// Metres per second (`m/s`).
    MetrePerSecond,
    /// Degrees of arc (`deg`).
    Degree,
    /// Radians (`rad`).
    Radian,
    /// Watt (`W`).
    Watt,
    /// Watt per square metre (`W/m2`).
    WattPerSquareMetre,
    /// Heat transfer coefficient (`W/m2.K`).
    WattPerSquareMetreKelvin,
    /// Joule (`J`).
    Joule,
    /// Joule per kilogram (`J/kg`).
    JoulePerKilogram,
    /// Metre (`m`).
    Metre,
    /// Square metre (`m2`).
    SquareMetre,
    /// Cubic metre (`m3`).
    CubicMetre,
    /// Litre (`L`).
    Litre,
    /// Volumetric flow (`m3/s`).
    CubicMetrePerSecond,
    /// Second (`s`).
    Second,
    /// Hour (`hr`).
    Hour,
    /// Kilogram (`kg`).
    Kilogram,
    /// Density (`kg/m3`).
    KilogramPerCubicMetre,
    /// Mass flow (`kg/s`).
    KilogramPerSecond,
    /// Candela steradian (`cd.sr`).
    CandelaSteradian,
    /// Lumen (`lm`).
    Lumen,
    /// Lumen per square metre (`lm/m2`).
    LumenPerSquareMetre,
    /// Lux (`lux`).
    Lux,
    /// Luminous efficacy (`lm/W`).
    LumenPerWatt,
}

const SYMBOLS: [(UnitType, &str); 29] = [
    (UnitType::Celsius, "degC"),
    (UnitType::Kelvin, "K"),
    (UnitType::One, "1"),
    (UnitType::KgWaterPerKgDryAir, "kgWater/kgDryAir"),
    (UnitType::Percent, "%"),
    (UnitType::Pascal, "Pa"),
    (UnitType::MetrePerSecond, "m/s"),
    (UnitType::Degree, "deg"),
    (UnitType::Radian, "rad"),
    (UnitType::Watt, "W"),
    (UnitType::WattPerSquareMetre, "W/m2"),
    (UnitType::WattPerSquareMetreKelvin, "W/m2.K"),
    (UnitType::Joule, "J"),
    (UnitType::JoulePerKilogram, "J/kg"),
    (UnitType::Metre, "m"),
    (UnitType::SquareMetre, "m2"),
    (UnitType::CubicMetre, "m3"),
    (UnitType::Litre, "L"),
    (UnitType::CubicMetrePerSecond, "m3/s"),
    (UnitType::Second, "s"),
    (UnitType::Hour, "hr"),
    (UnitType::Kilogram, "kg"),
    (UnitType::KilogramPerCubicMetre, "kg/m3"),
    (UnitType::KilogramPerSecond, "kg/s"),
    (UnitType::CandelaSteradian, "cd.sr"),
    (UnitType::Lumen, "lm"),
    (UnitType::LumenPerSquareMetre, "lm/m2"),
    (UnitType::Lux, "lux"),
    (UnitType::LumenPerWatt, "lm/W"),
];

/// A linear conversion `to = from * factor + offset`.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Conversion {
    factor: f64,
    offset: f64,
}

const CONVERSIONS: [(UnitType, UnitType, Conversion); 8] = [
    (
        UnitType::Kelvin,
        UnitType::Celsius,
        Conversion {
            factor: 1.0,
            offset: -273.15,
        },
    ),
    (
        UnitType::One,
        UnitType::Percent,
        Conversion {
            factor: 100.0,
            offset: 0.0,
        },
    ),
    (
        UnitType::One,
        UnitType::KgWaterPerKgDryAir,
        Conversion {
            factor: 1.0,
            offset: 0.0,
        },
    ),
    (
        UnitType::Radian,
        UnitType::Degree,
        Conversion {
            factor: 57.295779513,
            offset: 0.0,
        },
    ),
    (
        UnitType::CubicMetre,
        UnitType::Litre,
        Conversion {
            factor: 1000.0,
            offset: 0.0,
        },
    ),
    // 1 hr = 3600 s; the factor runs hr -> s.
    (
        UnitType::Hour,
        UnitType::Second,
        Conversion {
            factor: 3600.0,
            offset: 0.0,
        },
    ),
    (
        UnitType::CandelaSteradian,
        UnitType::Lumen,
        Conversion {
            factor: 1.0,
            offset: 0.0,
        },
    ),
    (
        UnitType::LumenPerSquareMetre,
        UnitType::Lux,
        Conversion {
            factor: 1.0,
            offset: 0.0,
        },
    ),
];

impl UnitType {
    /// Every unit, in declaration order.
    pub const ALL: [UnitType; 29] = {
        let mut all = [UnitType::One; 29];
        let mut i = 0;
        while i < SYMBOLS.len() {
            all[i] = SYMBOLS[i].0;
            i += 1;
        }
        all
    };

    /// The canonical symbol, as used in model descriptions.
    pub fn symbol(self) -> &'static str {
        SYMBOLS
            .iter()
            .find(|(unit, _)| *unit == self)
            .map(|(_, symbol)| *symbol)
            .unwrap_or("")
    }

    /// Whether a value can be converted from `self` to `target`.
    pub fn converts_to(self, target: UnitType) -> bool {
        self == target || conversion(self, target).is_some()
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for UnitType {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SYMBOLS
            .iter()
            .find(|(_, symbol)| *symbol == s)
            .map(|(unit, _)| *unit)
            .ok_or_else(|| UnitError::UnknownUnit(s.to_string()))
    }
}

/// Errors from unit parsing and conversion.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum UnitError {
    /// The symbol does not name a known unit.
    #[error("unknown unit symbol '{0}'")]
    UnknownUnit(String),
    /// No conversion path exists between the two units.
    #[error("no unit conversion from {from} to {to}")]
    NoConversion {
        /// Source unit.
        from: UnitType,
        /// Requested target unit.
        to: UnitType,
    },
}

/// A value tagged with its unit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quantity {
    /// The numeric value.
    pub value: f64,
    /// The unit `value` is expressed in.
    pub unit: UnitType,
}

impl Quantity {
    /// Create a quantity.
    pub fn new(value: f64, unit: UnitType) -> Self {
        Self { value, unit }
    }

    /// Convert to `target`.
    ///
    /// Identity when the units match. Looks up the direct conversion first,
    /// then the reverse one. Returns [`UnitError::NoConversion`] when the
    /// table has neither.
    pub fn convert(self, target: UnitType) -> Result<Quantity, UnitError> {
        if self.unit == target {
            return Ok(self);
        }
        let value = match conversion(self.unit, target) {
            Some(Direction::Forward(c)) => self.value * c.factor + c.offset,
            Some(Direction::Reverse(c)) => (self.value - c.offset) / c.factor,
            None => {
                return Err(UnitError::NoConversion {
                    from: self.unit,
                    to: target,
                })
            }
        };
        Ok(Quantity::new(value, target))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

enum Direction {
    Forward(Conversion),
    Reverse(Conversion),
}

fn conversion(from: UnitType, to: UnitType) -> Option<Direction> {
    CONVERSIONS.iter().find_map(|&(a, b, c)| {
        if a == from && b == to {
            Some(Direction::Forward(c))
        } else if a == to && b == from {
            Some(Direction::Reverse(c))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn symbols_round_trip_through_from_str() {
        for unit in UnitType::ALL {
            assert_eq!(unit.symbol().parse::<UnitType>(), Ok(unit));
        }
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        assert_eq!(
            "furlong".parse::<UnitType>(),
            Err(UnitError::UnknownUnit("furlong".into()))
        );
    }

    #[test]
    fn kelvin_to_celsius() {
        let q = Quantity::new(293.15, UnitType::Kelvin)
            .convert(UnitType::Celsius)
            .unwrap();
        assert_eq!(q.unit, UnitType::Celsius);
        assert!((q.value - 20.0).abs() < 1e-9);
    }

    #[test]
    fn reverse_direction_uses_inverse() {
        let q = Quantity::new(20.0, UnitType::Celsius)
            .convert(UnitType::Kelvin)
            .unwrap();
        assert!((q.value - 293.15).abs() < 1e-9);

        let q = Quantity::new(50.0, UnitType::Percent)
            .convert(UnitType::One)
            .unwrap();
        assert!((q.value - 0.5).abs() < 1e-12);
    }

    #[test]
    fn identity_conversion_is_exact() {
        let q = Quantity::new(-12.5, UnitType::Watt);
        assert_eq!(q.convert(UnitType::Watt), Ok(q));
    }

    #[test]
    fn missing_path_is_an_error() {
        let err = Quantity::new(1.0, UnitType::Watt)
            .convert(UnitType::Kelvin)
            .unwrap_err();
        assert_eq!(
            err,
            UnitError::NoConversion {
                from: UnitType::Watt,
                to: UnitType::Kelvin
            }
        );
        assert!(!UnitType::Watt.converts_to(UnitType::Kelvin));
        assert!(UnitType::Celsius.converts_to(UnitType::Kelvin));
    }

    proptest! {
        #[test]
        fn convert_there_and_back_is_close(value in -1.0e6f64..1.0e6) {
            for &(a, b, _) in CONVERSIONS.iter() {
                let there = Quantity::new(value, a).convert(b).unwrap();
                let back = there.convert(a).unwrap();
                let tol = 1e-9 * value.abs().max(1.0);
                prop_assert!((back.value - value).abs() <= tol,
                    "{a} -> {b} -> {a}: {value} became {}", back.value);
            }
        }
    }
}
