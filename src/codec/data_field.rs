//! EMOP data field
//!
//! The part of a frame between control byte and CRC. A one byte format tag
//! selects the layout:
//! - `1` default record: object id (3, BE), read/write flag, payload
//! - `3`/`4` profile log 1/2: timestamp (u32le), optional 80 byte block
//!
//! The declared length (format byte included) comes from the frame header,
//! so decoding takes exactly the data field bytes.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::fmt;

use super::object_id::ObjectId;
use crate::constants::{DEFAULT_RECORD_HEADER_LEN, PROFILE_LOG_HEADER_LEN, PROFILE_LOG_PAYLOAD_LEN};
use crate::error::CodecError;

/// Data field format tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFormat {
    Default = 1,
    ProfileLog1 = 3,
    ProfileLog2 = 4,
}

impl TryFrom<u8> for RecordFormat {
    type Error = CodecError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(Self::Default),
            3 => Ok(Self::ProfileLog1),
            4 => Ok(Self::ProfileLog2),
            other => Err(CodecError::UnknownFormat(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadWrite {
    Read = 0,
    Write = 1,
}

impl TryFrom<u8> for ReadWrite {
    type Error = CodecError;

    fn try_from(flag: u8) -> Result<Self, Self::Error> {
        match flag {
            0 => Ok(Self::Read),
            1 => Ok(Self::Write),
            other => Err(CodecError::InvalidEncoding {
                field: "read_write",
                reason: format!("flag {} is neither read (0) nor write (1)", other),
            }),
        }
    }
}

/// Which of the two profile logs a request targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProfileLogFormat {
    /// Profile log 1 (format tag 3)
    First,
    /// Profile log 2 (format tag 4)
    Second,
}

impl ProfileLogFormat {
    pub fn format(self) -> RecordFormat {
        match self {
            Self::First => RecordFormat::ProfileLog1,
            Self::Second => RecordFormat::ProfileLog2,
        }
    }
}

/// Object read or write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefaultRecord {
    pub object_id: ObjectId,
    pub read_write: ReadWrite,
    #[serde(serialize_with = "serialize_hex")]
    pub payload: Bytes,
}

impl DefaultRecord {
    pub fn read(object_id: ObjectId) -> Self {
        Self {
            object_id,
            read_write: ReadWrite::Read,
            payload: Bytes::new(),
        }
    }

    pub fn write(object_id: ObjectId, payload: impl Into<Bytes>) -> Self {
        Self {
            object_id,
            read_write: ReadWrite::Write,
            payload: payload.into(),
        }
    }
}

/// Profile log request (no payload) or response (80 byte block)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileLogRecord {
    /// Seconds since 2000-01-01T00:00:00Z
    pub timestamp: u32,
    #[serde(serialize_with = "serialize_opt_hex")]
    pub payload: Option<Box<[u8; PROFILE_LOG_PAYLOAD_LEN]>>,
}

/// Decoded data field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum DataField {
    Default(DefaultRecord),
    ProfileLog {
        log: ProfileLogFormat,
        record: ProfileLogRecord,
    },
}

impl DataField {
    pub fn format(&self) -> RecordFormat {
        match self {
            Self::Default(_) => RecordFormat::Default,
            Self::ProfileLog { log, .. } => log.format(),
        }
    }

    /// Bytes this field occupies on the wire, format byte included
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Default(rec) => DEFAULT_RECORD_HEADER_LEN + rec.payload.len(),
            Self::ProfileLog { record, .. } => {
                PROFILE_LOG_HEADER_LEN + record.payload.as_ref().map_or(0, |_| PROFILE_LOG_PAYLOAD_LEN)
            }
        }
    }

    /// Payload carried back to the caller: the default record payload or the
    /// profile log block (empty when absent)
    pub fn payload(&self) -> Bytes {
        match self {
            Self::Default(rec) => rec.payload.clone(),
            Self::ProfileLog { record, .. } => record
                .payload
                .as_ref()
                .map_or_else(Bytes::new, |p| Bytes::copy_from_slice(&p[..])),
        }
    }

    /// Decode a data field occupying all of `buf`
    ///
    /// # Errors
    ///
    /// - `TruncatedPayload` if `buf` is empty or shorter than its header
    /// - `UnknownFormat` for tags other than 1, 3, 4
    /// - `InvalidEncoding` for a read/write flag other than 0 or 1
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let tag = *buf.first().ok_or(CodecError::truncated(1, 0))?;
        let format = RecordFormat::try_from(tag)?;

        match format {
            RecordFormat::Default => {
                if buf.len() < DEFAULT_RECORD_HEADER_LEN {
                    return Err(CodecError::truncated(DEFAULT_RECORD_HEADER_LEN, buf.len()));
                }
                Ok(Self::Default(DefaultRecord {
                    object_id: ObjectId::read(&buf[1..])?,
                    read_write: ReadWrite::try_from(buf[4])?,
                    payload: Bytes::copy_from_slice(&buf[DEFAULT_RECORD_HEADER_LEN..]),
                }))
            }
            RecordFormat::ProfileLog1 | RecordFormat::ProfileLog2 => {
                if buf.len() < PROFILE_LOG_HEADER_LEN {
                    return Err(CodecError::truncated(PROFILE_LOG_HEADER_LEN, buf.len()));
                }
                let timestamp = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
                let payload = if buf.len() > PROFILE_LOG_HEADER_LEN {
                    let end = PROFILE_LOG_HEADER_LEN + PROFILE_LOG_PAYLOAD_LEN;
                    let block = buf
                        .get(PROFILE_LOG_HEADER_LEN..end)
                        .ok_or(CodecError::truncated(end, buf.len()))?;
                    let mut out = Box::new([0u8; PROFILE_LOG_PAYLOAD_LEN]);
                    out.copy_from_slice(block);
                    Some(out)
                } else {
                    None
                };
                let log = if format == RecordFormat::ProfileLog1 {
                    ProfileLogFormat::First
                } else {
                    ProfileLogFormat::Second
                };
                Ok(Self::ProfileLog {
                    log,
                    record: ProfileLogRecord { timestamp, payload },
                })
            }
        }
    }

    /// Append the wire form to `out`; the tag comes from the variant
    pub fn encode(&self, out: &mut BytesMut) {
        out.reserve(self.encoded_len());
        out.put_u8(self.format() as u8);
        match self {
            Self::Default(rec) => {
                out.put_slice(&rec.object_id.to_bytes());
                out.put_u8(rec.read_write as u8);
                out.put_slice(&rec.payload);
            }
            Self::ProfileLog { record, .. } => {
                out.put_u32_le(record.timestamp);
                if let Some(block) = &record.payload {
                    out.put_slice(&block[..]);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out.freeze()
    }
}

impl fmt::Display for DataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default(rec) => write!(
                f,
                "default {:?} {} [{}]",
                rec.read_write,
                rec.object_id,
                hex::encode(&rec.payload)
            ),
            Self::ProfileLog { log, record } => write!(
                f,
                "profile log {:?} ts={} payload={}",
                log,
                record.timestamp,
                record.payload.as_ref().map_or(0, |_| PROFILE_LOG_PAYLOAD_LEN)
            ),
        }
    }
}

fn serialize_hex<S: serde::Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

fn serialize_opt_hex<S: serde::Serializer>(
    bytes: &Option<Box<[u8; PROFILE_LOG_PAYLOAD_LEN]>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(b) => serializer.serialize_some(&hex::encode(&b[..])),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(s: &str) -> Vec<u8> {
        hex::decode(s).unwrap()
    }

    #[test]
    fn test_decode_default_read() {
        let field = DataField::decode(&hex("010002010033303230")).unwrap();
        match &field {
            DataField::Default(rec) => {
                assert_eq!(rec.object_id.value(), 0x000201);
                assert_eq!(rec.read_write, ReadWrite::Read);
                assert_eq!(&rec.payload[..], &hex("33303230")[..]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(field.encoded_len(), 9);
    }

    #[test]
    fn test_encode_default_record() {
        let field = DataField::Default(DefaultRecord {
            object_id: ObjectId::from_u24(0x600100),
            read_write: ReadWrite::Read,
            payload: Bytes::from_static(&[0xff, 0x00, 0xaa]),
        });
        assert_eq!(hex::encode(field.to_bytes()), "0160010000ff00aa");
    }

    #[test]
    fn test_encode_write_flag() {
        let field = DataField::Default(DefaultRecord::write(
            ObjectId::from_u24(0xffff0d),
            vec![0x01],
        ));
        assert_eq!(hex::encode(field.to_bytes()), "01ffff0d0101");
    }

    #[test]
    fn test_decode_unknown_format() {
        assert_eq!(
            DataField::decode(&hex("0260010000")),
            Err(CodecError::UnknownFormat(2))
        );
    }

    #[test]
    fn test_decode_empty_and_short() {
        assert!(matches!(
            DataField::decode(&[]),
            Err(CodecError::TruncatedPayload { needed: 1, available: 0 })
        ));
        assert!(matches!(
            DataField::decode(&hex("016001")),
            Err(CodecError::TruncatedPayload { needed: 5, available: 3 })
        ));
    }

    #[test]
    fn test_profile_log_request_has_no_payload() {
        let field = DataField::decode(&hex("0300087bbb")).unwrap_or_else(|e| panic!("{}", e));
        match field {
            DataField::ProfileLog { log, record } => {
                assert_eq!(log, ProfileLogFormat::First);
                assert_eq!(record.timestamp, 0xbb7b0800);
                assert!(record.payload.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_profile_log_response_block() {
        let mut bytes = hex("040008bb2d");
        bytes.extend((0..80).map(|i| i as u8));
        let field = DataField::decode(&bytes).unwrap();
        assert_eq!(field.format(), RecordFormat::ProfileLog2);
        assert_eq!(field.encoded_len(), 85);
        assert_eq!(field.payload().len(), 80);
        assert_eq!(field.payload()[79], 79);
        assert_eq!(field.to_bytes().to_vec(), bytes);
    }

    #[test]
    fn test_profile_log_short_block() {
        let mut bytes = hex("040008bb2d");
        bytes.extend([0u8; 10]);
        assert!(matches!(
            DataField::decode(&bytes),
            Err(CodecError::TruncatedPayload { needed: 85, available: 15 })
        ));
    }

    #[test]
    fn test_bad_read_write_flag() {
        assert!(matches!(
            DataField::decode(&hex("0160010002")),
            Err(CodecError::InvalidEncoding { field: "read_write", .. })
        ));
    }
}
