//! Fixed-point NUMERIC / DECIMAL values
//!
//! The server stores exact numerics as scaled integers: the column's scale is
//! a non-positive power of ten, so `value * 10^scale` is the represented
//! number (`12345` with scale `-2` is `123.45`).

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Exact decimal value as transferred on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Numeric {
    /// Unscaled integer
    pub value: i64,
    /// Power of ten applied to `value` (zero or negative)
    pub scale: i32,
}

impl Numeric {
    /// Create a new numeric from its unscaled value and scale
    pub fn new(value: i64, scale: i32) -> Self {
        Self { value, scale }
    }

    /// Approximate value as f64
    pub fn to_f64(&self) -> f64 {
        self.value as f64 * 10f64.powi(self.scale)
    }

    /// Unscaled value at another scale, for binding against a column
    ///
    /// Increasing precision multiplies; reducing it rounds half away from zero.
    pub fn rescale(&self, scale: i32) -> Result<i64> {
        let diff = self.scale - scale;
        if diff >= 0 {
            let factor = 10i64
                .checked_pow(diff as u32)
                .ok_or_else(|| overflow(self, scale))?;
            self.value
                .checked_mul(factor)
                .ok_or_else(|| overflow(self, scale))
        } else {
            let factor = 10i64
                .checked_pow((-diff) as u32)
                .ok_or_else(|| overflow(self, scale))?;
            let quotient = self.value / factor;
            let remainder = self.value % factor;
            if remainder.abs() * 2 >= factor {
                Ok(quotient + self.value.signum())
            } else {
                Ok(quotient)
            }
        }
    }

    /// Scale a float to an unscaled integer at `scale`
    pub fn from_f64(value: f64, scale: i32) -> Result<Self> {
        let scaled = (value * 10f64.powi(-scale)).round();
        if !scaled.is_finite() || scaled.abs() >= i64::MAX as f64 {
            return Err(Error::DataConversion(format!(
                "{} does not fit NUMERIC with scale {}",
                value, scale
            )));
        }
        Ok(Self::new(scaled as i64, scale))
    }
}

fn overflow(n: &Numeric, scale: i32) -> Error {
    Error::DataConversion(format!("{} does not fit NUMERIC with scale {}", n, scale))
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale >= 0 {
            write!(f, "{}", self.value)?;
            for _ in 0..self.scale {
                write!(f, "0")?;
            }
            return Ok(());
        }
        let digits = self.value.unsigned_abs().to_string();
        let frac_len = (-self.scale) as usize;
        let sign = if self.value < 0 { "-" } else { "" };
        if digits.len() > frac_len {
            let (int, frac) = digits.split_at(digits.len() - frac_len);
            write!(f, "{}{}.{}", sign, int, frac)
        } else {
            write!(f, "{}0.{:0>width$}", sign, digits, width = frac_len)
        }
    }
}

impl FromStr for Numeric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = || Error::DataConversion(format!("invalid numeric literal {:?}", s));
        let (int, frac) = match s.split_once('.') {
            Some((int, frac)) => (int, frac),
            None => (s, ""),
        };
        if frac.chars().any(|c| !c.is_ascii_digit()) {
            return Err(invalid());
        }
        let digits = format!("{}{}", int, frac);
        let value: i64 = digits.parse().map_err(|_| invalid())?;
        Ok(Self::new(value, -(frac.len() as i32)))
    }
}
