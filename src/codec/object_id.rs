//! 24-bit object identifiers
//!
//! Every readable/writable element of a meter is addressed by a 3 byte id,
//! big-endian on the wire. Ids are usually written as 6 hex digits
//! (`600100`) or as an OBIS-style triplet of hex bytes (`60.01.00`).

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CodecError;

/// Object identifier (24 significant bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub const MAX: u32 = 0x00FF_FFFF;

    /// Build from a raw value. Returns `None` above 24 bits.
    pub const fn new(value: u32) -> Option<Self> {
        if value > Self::MAX {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Build from a value known to fit in 24 bits (extra bits are masked)
    pub const fn from_u24(value: u32) -> Self {
        Self(value & Self::MAX)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Wire form, big-endian
    pub const fn to_bytes(self) -> [u8; 3] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    pub const fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    /// Read the first 3 bytes of `buf`
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        match buf {
            [a, b, c, ..] => Ok(Self::from_bytes([*a, *b, *c])),
            _ => Err(CodecError::truncated(3, buf.len())),
        }
    }

    /// OBIS-style triplet, e.g. `60.01.00`
    pub fn to_triplet(self) -> String {
        let [a, b, c] = self.to_bytes();
        format!("{:02X}.{:02X}.{:02X}", a, b, c)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}", self.0)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Error for unparseable object id text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseObjectIdError(String);

impl fmt::Display for ParseObjectIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "'{}' is not an object id (expected 6 hex digits, XX.XX.XX or 0x-prefixed hex)",
            self.0
        )
    }
}

impl std::error::Error for ParseObjectIdError {}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    /// Accepts `600100`, `0x600100` and `60.01.00`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseObjectIdError(s.to_string());
        let s = s.trim();

        if s.contains('.') {
            let parts: Vec<&str> = s.split('.').collect();
            if parts.len() != 3 {
                return Err(err());
            }
            let mut bytes = [0u8; 3];
            for (slot, part) in bytes.iter_mut().zip(&parts) {
                if part.is_empty() || part.len() > 2 {
                    return Err(err());
                }
                *slot = u8::from_str_radix(part, 16).map_err(|_| err())?;
            }
            return Ok(Self::from_bytes(bytes));
        }

        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if digits.is_empty() || digits.len() > 6 {
            return Err(err());
        }
        let value = u32::from_str_radix(digits, 16).map_err(|_| err())?;
        Self::new(value).ok_or_else(err)
    }
}
