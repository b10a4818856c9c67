//! Record shapes and the values they decode to
//!
//! A response payload is not self-describing: the caller knows which object
//! it asked for, the registry maps that object to a `RecordShape`, and the
//! shape says how to turn bytes into a `Record`.
//!
//! Conventions:
//! - integers are little-endian
//! - ASCII text is trimmed of trailing NUL padding on decode
//! - bit-packed fields are read most significant bit first, in layout order
//! - fixed shapes read exactly their width; trailing bytes are ignored

use bytes::{BufMut, BytesMut};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

use crate::error::CodecError;

// =============================================================================
// Shapes
// =============================================================================

/// Byte width of a variable-size shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Fixed(usize),
    /// Whatever is left of the payload
    Remainder,
}

/// One named field of a bit-packed record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub name: &'static str,
    pub bits: u8,
}

const fn bit(name: &'static str, bits: u8) -> BitField {
    BitField { name, bits }
}

/// Signal quality byte: 3 bit network operator, 5 bit CSQ
pub const CSQ_NET_OP_FIELDS: &[BitField] = &[bit("network_operator", 3), bit("csq", 5)];

/// Threshold mask byte: rate1 is the least significant bit
pub const THRESHOLD_MASK_FIELDS: &[BitField] = &[
    bit("rate8", 1),
    bit("rate7", 1),
    bit("rate6", 1),
    bit("rate5", 1),
    bit("rate4", 1),
    bit("rate3", 1),
    bit("rate2", 1),
    bit("rate1", 1),
];

/// Number of block thresholds in a threshold values record
pub const THRESHOLD_COUNT: usize = 7;

/// Size of a tariff time switch settings block
pub const TIME_SWITCH_BLOCK_LEN: usize = 80;

/// Wire layout of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordShape {
    U1,
    U2Le,
    U4Le,
    S4Le,
    Ascii(Width),
    BitPacked(&'static [BitField]),
    /// Fixed count of u16le values
    U2LeArray(usize),
    /// Undecoded bytes
    Block(Width),
    /// year, month, date, hour, minute, second, day of week
    Time,
    /// 8 undecoded bytes, u32le payment time, s32le payment value
    TransactionDetails,
    Empty,
}

impl RecordShape {
    /// Fallback for objects without a known layout
    pub const RAW: RecordShape = RecordShape::Block(Width::Remainder);

    pub fn name(&self) -> &'static str {
        match self {
            Self::U1 => "u1",
            Self::U2Le => "u2le",
            Self::U4Le => "u4le",
            Self::S4Le => "s4le",
            Self::Ascii(_) => "ascii",
            Self::BitPacked(_) => "bit_packed",
            Self::U2LeArray(_) => "u2le_array",
            Self::Block(Width::Remainder) => "raw",
            Self::Block(Width::Fixed(_)) => "block",
            Self::Time => "time",
            Self::TransactionDetails => "transaction_details",
            Self::Empty => "empty",
        }
    }

    /// Exact byte width, `None` for remainder shapes
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::U1 => Some(1),
            Self::U2Le => Some(2),
            Self::U4Le | Self::S4Le => Some(4),
            Self::Ascii(Width::Fixed(n)) | Self::Block(Width::Fixed(n)) => Some(*n),
            Self::Ascii(Width::Remainder) | Self::Block(Width::Remainder) => None,
            Self::BitPacked(fields) => Some(bit_width(fields) / 8),
            Self::U2LeArray(n) => Some(n * 2),
            Self::Time => Some(7),
            Self::TransactionDetails => Some(16),
            Self::Empty => Some(0),
        }
    }
}

impl fmt::Display for RecordShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascii(Width::Fixed(n)) => write!(f, "ascii[{}]", n),
            Self::Block(Width::Fixed(n)) => write!(f, "block[{}]", n),
            Self::U2LeArray(n) => write!(f, "u2le[{}]", n),
            Self::BitPacked(fields) => {
                let names: Vec<String> =
                    fields.iter().map(|b| format!("{}:{}", b.name, b.bits)).collect();
                write!(f, "bits({})", names.join(","))
            }
            other => write!(f, "{}", other.name()),
        }
    }
}

fn bit_width(fields: &[BitField]) -> usize {
    fields.iter().map(|f| f.bits as usize).sum()
}

// =============================================================================
// Values
// =============================================================================

/// Day of week as the meter counts it (Monday = 0)
///
/// Bytes above 6 are kept as `Unknown` so an odd clock byte does not spoil
/// the rest of the reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DayOfWeek {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
    Unknown(u8),
}

impl From<u8> for DayOfWeek {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Monday,
            1 => Self::Tuesday,
            2 => Self::Wednesday,
            3 => Self::Thursday,
            4 => Self::Friday,
            5 => Self::Saturday,
            6 => Self::Sunday,
            other => Self::Unknown(other),
        }
    }
}

impl DayOfWeek {
    /// Wire byte
    pub fn code(self) -> u8 {
        match self {
            Self::Monday => 0,
            Self::Tuesday => 1,
            Self::Wednesday => 2,
            Self::Thursday => 3,
            Self::Friday => 4,
            Self::Saturday => 5,
            Self::Sunday => 6,
            Self::Unknown(code) => code,
        }
    }
}

/// Meter clock reading. `year` counts from 2000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MeterTime {
    pub year: u8,
    pub month: u8,
    pub date: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub day_of_week: DayOfWeek,
}

/// Entry of the prepay transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransactionDetails {
    #[serde(serialize_with = "serialize_hex")]
    pub reserved: [u8; 8],
    pub payment_time: u32,
    pub payment_value: i32,
}

/// Decoded bit-packed fields, in layout order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitValues {
    fields: Vec<(&'static str, u32)>,
}

impl BitValues {
    /// Pair `values` with the field names of `layout`
    ///
    /// # Errors
    ///
    /// `ShapeMismatch` if the counts differ or a value overflows its field.
    pub fn from_layout(layout: &'static [BitField], values: &[u32]) -> Result<Self, CodecError> {
        if layout.len() != values.len() {
            return Err(CodecError::ShapeMismatch {
                shape: "bit_packed",
                reason: format!("{} fields, {} values", layout.len(), values.len()),
            });
        }
        let mut fields = Vec::with_capacity(layout.len());
        for (field, &value) in layout.iter().zip(values) {
            if u64::from(value) >= 1u64 << field.bits {
                return Err(CodecError::ShapeMismatch {
                    shape: "bit_packed",
                    reason: format!("{}={} exceeds {} bits", field.name, value, field.bits),
                });
            }
            fields.push((field.name, value));
        }
        Ok(Self { fields })
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)> + '_ {
        self.fields.iter().copied()
    }
}

impl Serialize for BitValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Decoded record value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Record {
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    Text(String),
    Bits(BitValues),
    U16Array(Vec<u16>),
    Block(#[serde(serialize_with = "serialize_hex")] Vec<u8>),
    Time(MeterTime),
    TransactionDetails(TransactionDetails),
    Empty,
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::U8(_) => "u8",
            Self::U16(_) => "u16",
            Self::U32(_) => "u32",
            Self::I32(_) => "i32",
            Self::Text(_) => "text",
            Self::Bits(_) => "bits",
            Self::U16Array(_) => "u16 array",
            Self::Block(_) => "block",
            Self::Time(_) => "time",
            Self::TransactionDetails(_) => "transaction details",
            Self::Empty => "empty",
        }
    }

    /// Unsigned integer value, widened
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::U8(v) => Some(u32::from(*v)),
            Self::U16(v) => Some(u32::from(*v)),
            Self::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Any integer value, widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I32(v) => Some(i64::from(*v)),
            other => other.as_u32().map(i64::from),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bits(&self) -> Option<&BitValues> {
        match self {
            Self::Bits(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Block(b) => Some(b),
            _ => None,
        }
    }
}

fn serialize_hex<S: Serializer, T: AsRef<[u8]>>(bytes: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

// =============================================================================
// Decode
// =============================================================================

fn take(buf: &[u8], n: usize) -> Result<&[u8], CodecError> {
    buf.get(..n).ok_or(CodecError::truncated(n, buf.len()))
}

fn take_array<const N: usize>(buf: &[u8]) -> Result<[u8; N], CodecError> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(buf, N)?);
    Ok(out)
}

fn decode_ascii(bytes: &[u8]) -> Result<String, CodecError> {
    if let Some(pos) = bytes.iter().position(|b| !b.is_ascii()) {
        return Err(CodecError::InvalidEncoding {
            field: "ascii",
            reason: format!("byte 0x{:02x} at offset {}", bytes[pos], pos),
        });
    }
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    Ok(bytes[..end].iter().map(|&b| b as char).collect())
}

/// Decode a payload as `shape`
///
/// # Errors
///
/// - `TruncatedPayload` when `buf` is shorter than the shape
/// - `InvalidEncoding` on non-ASCII text
pub fn decode(shape: &RecordShape, buf: &[u8]) -> Result<Record, CodecError> {
    let record = match shape {
        RecordShape::U1 => Record::U8(take_array::<1>(buf)?[0]),
        RecordShape::U2Le => Record::U16(u16::from_le_bytes(take_array(buf)?)),
        RecordShape::U4Le => Record::U32(u32::from_le_bytes(take_array(buf)?)),
        RecordShape::S4Le => Record::I32(i32::from_le_bytes(take_array(buf)?)),
        RecordShape::Ascii(Width::Fixed(n)) => Record::Text(decode_ascii(take(buf, *n)?)?),
        RecordShape::Ascii(Width::Remainder) => Record::Text(decode_ascii(buf)?),
        RecordShape::BitPacked(layout) => Record::Bits(decode_bits(layout, buf)?),
        RecordShape::U2LeArray(n) => {
            let bytes = take(buf, n * 2)?;
            Record::U16Array(
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect(),
            )
        }
        RecordShape::Block(Width::Fixed(n)) => Record::Block(take(buf, *n)?.to_vec()),
        RecordShape::Block(Width::Remainder) => Record::Block(buf.to_vec()),
        RecordShape::Time => {
            let b = take_array::<7>(buf)?;
            Record::Time(MeterTime {
                year: b[0],
                month: b[1],
                date: b[2],
                hour: b[3],
                minute: b[4],
                second: b[5],
                day_of_week: DayOfWeek::from(b[6]),
            })
        }
        RecordShape::TransactionDetails => {
            let b = take_array::<16>(buf)?;
            let mut reserved = [0u8; 8];
            reserved.copy_from_slice(&b[..8]);
            Record::TransactionDetails(TransactionDetails {
                reserved,
                payment_time: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
                payment_value: i32::from_le_bytes([b[12], b[13], b[14], b[15]]),
            })
        }
        RecordShape::Empty => Record::Empty,
    };
    Ok(record)
}

fn decode_bits(layout: &'static [BitField], buf: &[u8]) -> Result<BitValues, CodecError> {
    let total = bit_width(layout);
    let bytes = take(buf, total / 8)?;
    let word = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));

    let mut remaining = total;
    let mut fields = Vec::with_capacity(layout.len());
    for field in layout {
        remaining -= field.bits as usize;
        let mask = (1u64 << field.bits) - 1;
        fields.push((field.name, ((word >> remaining) & mask) as u32));
    }
    Ok(BitValues { fields })
}

// =============================================================================
// Encode
// =============================================================================

fn mismatch(shape: &RecordShape, record: &Record) -> CodecError {
    CodecError::ShapeMismatch {
        shape: shape.name(),
        reason: format!("got {} value", record.kind()),
    }
}

/// Append `record` to `out` in the layout of `shape`
///
/// Writes exactly the shape width. Remainder shapes take their width from
/// the value; fixed ASCII is NUL padded.
///
/// # Errors
///
/// `ShapeMismatch` if the value is the wrong kind or does not fit.
pub fn encode(shape: &RecordShape, record: &Record, out: &mut BytesMut) -> Result<(), CodecError> {
    match (shape, record) {
        (RecordShape::U1, Record::U8(v)) => out.put_u8(*v),
        (RecordShape::U2Le, Record::U16(v)) => out.put_u16_le(*v),
        (RecordShape::U4Le, Record::U32(v)) => out.put_u32_le(*v),
        (RecordShape::S4Le, Record::I32(v)) => out.put_i32_le(*v),
        (RecordShape::Ascii(width), Record::Text(text)) => {
            if !text.is_ascii() {
                return Err(CodecError::ShapeMismatch {
                    shape: shape.name(),
                    reason: "text is not ASCII".to_string(),
                });
            }
            match width {
                Width::Fixed(n) if text.len() > *n => {
                    return Err(CodecError::ShapeMismatch {
                        shape: shape.name(),
                        reason: format!("{} chars exceed width {}", text.len(), n),
                    })
                }
                Width::Fixed(n) => {
                    out.put_slice(text.as_bytes());
                    out.put_bytes(0, n - text.len());
                }
                Width::Remainder => out.put_slice(text.as_bytes()),
            }
        }
        (RecordShape::BitPacked(layout), Record::Bits(values)) => {
            let names_match = layout.len() == values.fields.len()
                && layout.iter().zip(&values.fields).all(|(l, (n, _))| l.name == *n);
            if !names_match {
                return Err(CodecError::ShapeMismatch {
                    shape: shape.name(),
                    reason: "fields do not match layout".to_string(),
                });
            }
            let mut word = 0u64;
            for (field, (_, value)) in layout.iter().zip(&values.fields) {
                if u64::from(*value) >= 1u64 << field.bits {
                    return Err(CodecError::ShapeMismatch {
                        shape: shape.name(),
                        reason: format!("{}={} exceeds {} bits", field.name, value, field.bits),
                    });
                }
                word = (word << field.bits) | u64::from(*value);
            }
            let width = bit_width(layout) / 8;
            out.put_slice(&word.to_be_bytes()[8 - width..]);
        }
        (RecordShape::U2LeArray(n), Record::U16Array(values)) => {
            if values.len() != *n {
                return Err(CodecError::ShapeMismatch {
                    shape: shape.name(),
                    reason: format!("expected {} values, got {}", n, values.len()),
                });
            }
            for v in values {
                out.put_u16_le(*v);
            }
        }
        (RecordShape::Block(width), Record::Block(bytes)) => {
            if let Width::Fixed(n) = width {
                if bytes.len() != *n {
                    return Err(CodecError::ShapeMismatch {
                        shape: shape.name(),
                        reason: format!("expected {} bytes, got {}", n, bytes.len()),
                    });
                }
            }
            out.put_slice(bytes);
        }
        (RecordShape::Time, Record::Time(t)) => {
            out.put_slice(&[
                t.year,
                t.month,
                t.date,
                t.hour,
                t.minute,
                t.second,
                t.day_of_week.code(),
            ]);
        }
        (RecordShape::TransactionDetails, Record::TransactionDetails(d)) => {
            out.put_slice(&d.reserved);
            out.put_u32_le(d.payment_time);
            out.put_i32_le(d.payment_value);
        }
        (RecordShape::Empty, Record::Empty) => {}
        (shape, record) => return Err(mismatch(shape, record)),
    }
    Ok(())
}

/// Convenience: encode into a fresh buffer
pub fn encode_to_vec(shape: &RecordShape, record: &Record) -> Result<Vec<u8>, CodecError> {
    let mut out = BytesMut::with_capacity(shape.width().unwrap_or(16));
    encode(shape, record, &mut out)?;
    Ok(out.to_vec())
}

// =============================================================================
// Tests
// =============================================================================
