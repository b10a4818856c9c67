//! EMOP wire codec
//!
//! Pure encode/decode, no I/O:
//! - **frame**: delimiter, addressing, control byte, CRC
//! - **data_field**: format tag and default / profile log layouts
//! - **record**: typed payloads, shape chosen by object id
//! - **registry**: object id to name and shape
//! - **crc**: CRC-16/CCITT-FALSE
//!
//! # Example
//!
//! ```ignore
//! let data = DataField::Default(DefaultRecord::read(ObjectId::from_u24(0x600100)));
//! let request = Frame::request(5, data)?.encode()?;
//!
//! let response = Frame::decode_verified(&reply)?;
//! let record = decode_payload(ObjectId::from_u24(0x600100), &response.data.payload())?;
//! ```

pub mod crc;
pub mod data_field;
pub mod frame;
pub mod object_id;
pub mod record;
pub mod registry;

pub use data_field::{
    DataField, DefaultRecord, ProfileLogFormat, ProfileLogRecord, ReadWrite, RecordFormat,
};
pub use frame::{AckNak, DeviceAddress, Frame};
pub use object_id::ObjectId;
pub use record::{BitValues, DayOfWeek, MeterTime, Record, RecordShape, TransactionDetails, Width};
pub use registry::ObjectEntry;

use crate::error::CodecError;
use serde::Serialize;

/// Decode a response payload with the shape registered for `id`
pub fn decode_payload(id: ObjectId, payload: &[u8]) -> Result<Record, CodecError> {
    record::decode(&registry::shape_for(id), payload)
}

/// Encode a record with the shape registered for `id`
pub fn encode_payload(id: ObjectId, value: &Record) -> Result<Vec<u8>, CodecError> {
    record::encode_to_vec(&registry::shape_for(id), value)
}

/// A decoded frame with its payload decoded where the shape allows
///
/// A payload that does not fit its registered shape keeps the frame and
/// reports why in `record_error`.
#[derive(Debug, Serialize)]
pub struct FrameReport {
    pub frame: Frame,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<Record>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_error: Option<String>,
}

impl FrameReport {
    pub fn new(frame: Frame) -> Self {
        let decoded = match &frame.data {
            DataField::Default(rec) if !rec.payload.is_empty() => {
                Some(decode_payload(rec.object_id, &rec.payload))
            }
            _ => None,
        };
        let (record, record_error) = match decoded {
            Some(Ok(record)) => (Some(record), None),
            Some(Err(e)) => (None, Some(e.to_string())),
            None => (None, None),
        };
        Self {
            frame,
            record,
            record_error,
        }
    }
}
