//! Compile-time unit safety for network quantities.
//!
//! Prevents mixing incompatible units like MW and Mvar, or radians and
//! degrees. All types use `#[repr(transparent)]` so they carry no runtime
//! overhead over a bare `f64`.
//!
//! # Usage
//!
//! ```
//! use dsat_core::units::{Megawatts, Megavars, Degrees};
//!
//! let p = Megawatts(60.0);
//! let total = p + Megawatts(15.0);
//!
//! // let wrong = p + Megavars(5.0);  // does not compile
//!
//! let angle = Degrees(30.0).to_radians();
//! assert!((angle.value() - 0.5236).abs() < 1e-3);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Implements the shared arithmetic surface for a unit newtype.
macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl Div<$type> for $type {
            type Output = f64;
            fn div(self, rhs: $type) -> Self::Output {
                self.0 / rhs.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.4} {}", self.0, $unit_name)
            }
        }

        impl $type {
            /// Create a new value
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Get the raw numeric value
            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            /// Absolute value
            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }
        }
    };
}

/// Dimensionless per-unit quantity (voltage magnitude, susceptance, ...)
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PerUnit(pub f64);
impl_unit_ops!(PerUnit, "pu");

/// Angle in radians
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Radians(pub f64);
impl_unit_ops!(Radians, "rad");

/// Angle in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Degrees(pub f64);
impl_unit_ops!(Degrees, "deg");

/// Voltage level in kilovolts
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Kilovolts(pub f64);
impl_unit_ops!(Kilovolts, "kV");

/// Active power in megawatts
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Megawatts(pub f64);
impl_unit_ops!(Megawatts, "MW");

/// Reactive power in megavars
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Megavars(pub f64);
impl_unit_ops!(Megavars, "Mvar");

/// Current in kiloamperes
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Kiloamperes(pub f64);
impl_unit_ops!(Kiloamperes, "kA");

impl Radians {
    /// Convert to degrees
    pub fn to_degrees(self) -> Degrees {
        Degrees(self.0.to_degrees())
    }
}

impl Degrees {
    /// Convert to radians
    pub fn to_radians(self) -> Radians {
        Radians(self.0.to_radians())
    }
}
