//! Scalar measurement values shared between the instrument drivers, the scan grid and the
//! persisted tables.
//!
//! An instrument works either in a real-valued mode (spectrum analyzer level readings) or in
//! a complex-valued mode (vector network analyzer S-parameters). The mode is fixed for the
//! duration of an acquisition, so a grid holds values of a single [`ValueKind`].
//!
//! # Text format
//!
//! Values are persisted as text. Real values use Rust's shortest round-trip float
//! representation. Complex values use the `a+bj` / `a-bj` notation (the imaginary unit is
//! written as `j`), which [`Scalar::from_str`](std::str::FromStr) parses back exactly.
//! Surrounding parentheses, as in `(1.5-0.25j)`, are accepted on input.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of decimals used when a measurement is rounded for display.
pub const DISPLAY_DECIMALS: u32 = 3;

/// Whether a value is real or complex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Real-valued readings (e.g. level in dBm)
    Real,
    /// Complex-valued readings (e.g. S-parameters)
    Complex,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Real => write!(f, "real"),
            ValueKind::Complex => write!(f, "complex"),
        }
    }
}

/// A single instrument reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    /// Real reading
    Real(f64),
    /// Complex reading
    Complex(Complex64),
}

impl Scalar {
    /// Build a complex scalar from its parts.
    pub fn complex(re: f64, im: f64) -> Self {
        Scalar::Complex(Complex64::new(re, im))
    }

    /// Kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Scalar::Real(_) => ValueKind::Real,
            Scalar::Complex(_) => ValueKind::Complex,
        }
    }

    /// Round to `decimals` places. Complex values round the real and imaginary parts
    /// independently.
    pub fn rounded(&self, decimals: u32) -> Self {
        match self {
            Scalar::Real(v) => Scalar::Real(round_to(*v, decimals)),
            Scalar::Complex(c) => Scalar::complex(round_to(c.re, decimals), round_to(c.im, decimals)),
        }
    }

    /// Value rounded for display ([`DISPLAY_DECIMALS`] places).
    pub fn for_display(&self) -> Self {
        self.rounded(DISPLAY_DECIMALS)
    }

    /// Magnitude of the reading; the absolute value for real readings.
    pub fn magnitude(&self) -> f64 {
        match self {
            Scalar::Real(v) => v.abs(),
            Scalar::Complex(c) => c.norm(),
        }
    }

    /// Phase in radians; zero or pi for real readings.
    pub fn phase(&self) -> f64 {
        match self {
            Scalar::Real(v) => {
                if *v < 0.0 {
                    std::f64::consts::PI
                } else {
                    0.0
                }
            }
            Scalar::Complex(c) => c.arg(),
        }
    }

    /// Compare within an absolute tolerance (component-wise for complex values).
    pub fn approx_eq(&self, other: &Scalar, tolerance: f64) -> bool {
        match (self, other) {
            (Scalar::Real(a), Scalar::Real(b)) => {
                (a.is_nan() && b.is_nan()) || (a - b).abs() <= tolerance
            }
            (Scalar::Complex(a), Scalar::Complex(b)) => {
                (a.re - b.re).abs() <= tolerance && (a.im - b.im).abs() <= tolerance
            }
            _ => false,
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Real(value)
    }
}

impl From<Complex64> for Scalar {
    fn from(value: Complex64) -> Self {
        Scalar::Complex(value)
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Real(v) => write!(f, "{}", v),
            Scalar::Complex(c) => {
                if c.im.is_sign_negative() && !c.im.is_nan() {
                    write!(f, "{}-{}j", c.re, -c.im)
                } else {
                    write!(f, "{}+{}j", c.re, c.im)
                }
            }
        }
    }
}

/// Error returned when a cell cannot be parsed as a [`Scalar`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot parse '{0}' as a real or complex value")]
pub struct ParseScalarError(pub String);

impl FromStr for Scalar {
    type Err = ParseScalarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseScalarError(s.to_string());
        let trimmed = s.trim();
        let body = trimmed
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or(trimmed)
            .trim();

        let Some(without_unit) = body.strip_suffix(['j', 'J']) else {
            return body.parse::<f64>().map(Scalar::Real).map_err(|_| err());
        };

        // Split at the sign that separates the real and imaginary parts: the last '+' or '-'
        // that is neither leading nor part of an exponent.
        let bytes = without_unit.as_bytes();
        let split = (1..bytes.len())
            .rev()
            .find(|&i| (bytes[i] == b'+' || bytes[i] == b'-') && !matches!(bytes[i - 1], b'e' | b'E'));

        match split {
            Some(i) => {
                let re = without_unit[..i].parse::<f64>().map_err(|_| err())?;
                let im = match &without_unit[i..] {
                    "+" => 1.0,
                    "-" => -1.0,
                    part => part.parse::<f64>().map_err(|_| err())?,
                };
                Ok(Scalar::complex(re, im))
            }
            None => {
                let im = match without_unit {
                    "" | "+" => 1.0,
                    "-" => -1.0,
                    part => part.parse::<f64>().map_err(|_| err())?,
                };
                Ok(Scalar::complex(0.0, im))
            }
        }
    }
}
