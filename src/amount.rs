//! Monetary amounts
//!
//! Meters store prices and balances as integers in units of 1/100000 of a
//! currency unit. `Amount` keeps that integer as-is, so scaling to and from
//! the wire is exact and no floating point is involved.

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{AMOUNT_DECIMALS, AMOUNT_SCALE};
use crate::error::{EmopError, Result};

/// Fixed-point amount with five decimal places
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);
    pub const ONE: Amount = Amount(AMOUNT_SCALE);

    /// Scale a wire integer: `raw / 100000`
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// Wire integer: `amount * 100000`
    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Wire form for unsigned 32-bit fields (prices, charges)
    pub fn to_u32_raw(self) -> Result<u32> {
        u32::try_from(self.0).map_err(|_| {
            EmopError::invalid("amount", format!("{} does not fit an unsigned meter field", self))
        })
    }

    /// Wire form for signed 32-bit fields (balances)
    pub fn to_i32_raw(self) -> Result<i32> {
        i32::try_from(self.0)
            .map_err(|_| EmopError::invalid("amount", format!("{} does not fit a meter field", self)))
    }

    /// Unit rates must not exceed 1.00000
    pub fn validate_rate(self) -> Result<Self> {
        if self > Self::ONE {
            return Err(EmopError::invalid(
                "rate",
                format!("{} can't be greater than 1", self),
            ));
        }
        Ok(self)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = AMOUNT_SCALE as u64;
        let whole = abs / scale;
        let frac = abs % scale;
        if frac == 0 {
            return write!(f, "{}{}", sign, whole);
        }
        let digits = format!("{:0width$}", frac, width = AMOUNT_DECIMALS as usize);
        write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Error for unparseable amount text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAmountError {
    input: String,
    reason: &'static str,
}

impl fmt::Display for ParseAmountError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid amount '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseAmountError {}

impl FromStr for Amount {
    type Err = ParseAmountError;

    /// Plain decimal notation, at most five decimal places
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let err = |reason| ParseAmountError {
            input: s.to_string(),
            reason,
        };
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (whole, frac) = body.split_once('.').unwrap_or((body, ""));

        if whole.is_empty() && frac.is_empty() {
            return Err(err("no digits"));
        }
        if !whole.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(err("not a plain decimal number"));
        }
        if frac.len() > AMOUNT_DECIMALS as usize {
            return Err(err("meters store at most 5 decimal places"));
        }

        let whole: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| err("too large"))?
        };
        let frac_units: i64 = if frac.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", frac, width = AMOUNT_DECIMALS as usize);
            padded.parse().map_err(|_| err("not a plain decimal number"))?
        };

        let units = whole
            .checked_mul(AMOUNT_SCALE)
            .and_then(|v| v.checked_add(frac_units))
            .ok_or_else(|| err("too large"))?;
        Ok(Self(if negative { -units } else { units }))
    }
}
