//! EMOP frame
//!
//! ```text
//! 0      1       2     3..6      6     7..10    10       11..11+N  11+N..
//! 0x7E | len | dst type | dst addr | src type | src addr | control | data | crc16
//! ```
//!
//! `len` counts every byte after the delimiter (CRC included), so the data
//! field is `len - 12` bytes. Multi-byte header fields and the CRC are
//! big-endian. The CRC covers `[1, 11 + N)`.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Serialize, Serializer};
use std::fmt;

use super::crc::frame_checksum;
use super::data_field::DataField;
use crate::constants::{
    DEFAULT_DESTINATION_ADDRESS, DEFAULT_DEVICE_TYPE, DEFAULT_SOURCE_ADDRESS, FRAME_CRC_LEN,
    FRAME_DELIMITER, FRAME_HEADER_LEN, FRAME_OVERHEAD,
};
use crate::error::CodecError;

// =============================================================================
// Header Types
// =============================================================================

/// One end of a frame: device type plus 24-bit address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceAddress {
    pub device_type: u8,
    #[serde(serialize_with = "serialize_address")]
    pub address: [u8; 3],
}

impl DeviceAddress {
    pub const fn new(device_type: u8, address: u32) -> Self {
        let b = address.to_be_bytes();
        Self {
            device_type,
            address: [b[1], b[2], b[3]],
        }
    }

    pub fn address_value(&self) -> u32 {
        u32::from_be_bytes([0, self.address[0], self.address[1], self.address[2]])
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{}", self.device_type, hex::encode(self.address))
    }
}

fn serialize_address<S: Serializer>(address: &[u8; 3], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(address))
}

/// Meter acknowledgement codes
///
/// The code is taken as `control & 0x80`, so only `Ok` (bit clear) can be
/// told apart from a set bit, which shows up as `Unrecognized(0x80)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckNak {
    Ok,
    FcsError,
    FormatError,
    FrameLenIncorrect,
    MaxDataPayloadExceeded,
    UnknownObjectId,
    SecurityNotGranted,
    FrameAddrIncorrect,
    Unrecognized(u8),
}

impl AckNak {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::FcsError,
            2 => Self::FormatError,
            3 => Self::FrameLenIncorrect,
            4 => Self::MaxDataPayloadExceeded,
            5 => Self::UnknownObjectId,
            6 => Self::SecurityNotGranted,
            7 => Self::FrameAddrIncorrect,
            other => Self::Unrecognized(other),
        }
    }
}

// =============================================================================
// Frame
// =============================================================================

/// A complete EMOP frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub frame_length: u8,
    pub destination: DeviceAddress,
    pub source: DeviceAddress,
    pub control: u8,
    pub data: DataField,
    pub crc16: u16,
}

impl Frame {
    /// Build a frame around `data`, computing `frame_length`
    ///
    /// The CRC is filled in by [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// `MalformedFrame` if the data field does not fit the one byte length.
    pub fn new(
        destination: DeviceAddress,
        source: DeviceAddress,
        control: u8,
        data: DataField,
    ) -> Result<Self, CodecError> {
        let total = FRAME_OVERHEAD + data.encoded_len();
        let frame_length = u8::try_from(total).map_err(|_| {
            CodecError::malformed(format!("frame length {} exceeds 255", total))
        })?;
        Ok(Self {
            frame_length,
            destination,
            source,
            control,
            data,
            crc16: 0,
        })
    }

    /// Request frame with the standard client addressing
    pub fn request(control: u8, data: DataField) -> Result<Self, CodecError> {
        Self::new(
            DeviceAddress::new(DEFAULT_DEVICE_TYPE, DEFAULT_DESTINATION_ADDRESS),
            DeviceAddress::new(DEFAULT_DEVICE_TYPE, DEFAULT_SOURCE_ADDRESS),
            control,
            data,
        )
    }

    /// Length of the data field
    pub fn len_data(&self) -> usize {
        usize::from(self.frame_length).saturating_sub(FRAME_OVERHEAD)
    }

    pub fn seq_num(&self) -> u8 {
        self.control & 0x01
    }

    pub fn ack_nak_code(&self) -> u8 {
        self.control & 0x80
    }

    pub fn ack_nak(&self) -> AckNak {
        AckNak::from_code(self.ack_nak_code())
    }

    /// Decode a frame from the start of `buf`
    ///
    /// The CRC is read but not checked; use [`Frame::decode_verified`] to
    /// reject corrupted frames. Bytes past `frame_length + 1` are ignored.
    ///
    /// # Errors
    ///
    /// - `BadDelimiter` if the first byte is not 0x7E
    /// - `MalformedFrame` if `frame_length` is below the fixed overhead
    /// - `TruncatedPayload` if `buf` ends before the frame does
    /// - any data field error
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let total = Self::checked_total_len(buf)?;

        let frame_length = buf[1];
        let destination = DeviceAddress {
            device_type: buf[2],
            address: [buf[3], buf[4], buf[5]],
        };
        let source = DeviceAddress {
            device_type: buf[6],
            address: [buf[7], buf[8], buf[9]],
        };
        let control = buf[10];

        let data_end = total - FRAME_CRC_LEN;
        let data = DataField::decode(&buf[FRAME_HEADER_LEN..data_end])?;
        let crc16 = u16::from_be_bytes([buf[data_end], buf[data_end + 1]]);

        Ok(Self {
            frame_length,
            destination,
            source,
            control,
            data,
            crc16,
        })
    }

    /// Decode and check the CRC
    ///
    /// # Errors
    ///
    /// As [`Frame::decode`], plus `ChecksumMismatch`.
    pub fn decode_verified(buf: &[u8]) -> Result<Self, CodecError> {
        let total = Self::checked_total_len(buf)?;
        verify_checksum(&buf[..total])?;
        Self::decode(buf)
    }

    /// Validate delimiter and length field, returning the full frame size
    fn checked_total_len(buf: &[u8]) -> Result<usize, CodecError> {
        let first = *buf.first().ok_or(CodecError::truncated(1, 0))?;
        if first != FRAME_DELIMITER {
            return Err(CodecError::BadDelimiter(first));
        }
        if buf.len() < FRAME_HEADER_LEN {
            return Err(CodecError::truncated(FRAME_HEADER_LEN, buf.len()));
        }
        let frame_length = usize::from(buf[1]);
        if frame_length < FRAME_OVERHEAD {
            return Err(CodecError::malformed(format!(
                "frame length {} below fixed overhead {}",
                frame_length, FRAME_OVERHEAD
            )));
        }
        let total = frame_length + 1;
        if buf.len() < total {
            return Err(CodecError::truncated(total, buf.len()));
        }
        Ok(total)
    }

    fn write(&self, crc16: u16, out: &mut BytesMut) {
        out.put_u8(FRAME_DELIMITER);
        out.put_u8(self.frame_length);
        out.put_u8(self.destination.device_type);
        out.put_slice(&self.destination.address);
        out.put_u8(self.source.device_type);
        out.put_slice(&self.source.address);
        out.put_u8(self.control);
        self.data.encode(out);
        out.put_u16(crc16);
    }

    /// Serialize with a freshly computed CRC
    ///
    /// Two passes: the frame is written once with a zero CRC, the checksum is
    /// taken over that output, then the frame is written again with it.
    ///
    /// # Errors
    ///
    /// `MalformedFrame` if `frame_length` disagrees with the data field.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let expected = FRAME_OVERHEAD + self.data.encoded_len();
        if usize::from(self.frame_length) != expected {
            return Err(CodecError::malformed(format!(
                "frame length {} but data field needs {}",
                self.frame_length, expected
            )));
        }
        let size = expected + 1;

        let mut zeroed = BytesMut::with_capacity(size);
        self.write(0x0000, &mut zeroed);
        let crc16 = frame_checksum(&zeroed);

        let mut out = BytesMut::with_capacity(size);
        self.write(crc16, &mut out);
        Ok(out.freeze())
    }
}

/// Check the CRC of one complete serialized frame
pub fn verify_checksum(frame: &[u8]) -> Result<(), CodecError> {
    if frame.len() < FRAME_HEADER_LEN + FRAME_CRC_LEN {
        return Err(CodecError::truncated(FRAME_HEADER_LEN + FRAME_CRC_LEN, frame.len()));
    }
    let at = frame.len() - FRAME_CRC_LEN;
    let actual = u16::from_be_bytes([frame[at], frame[at + 1]]);
    let expected = frame_checksum(frame);
    if actual != expected {
        return Err(CodecError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "len={} dst={} src={} control={:02x} seq={} data=[{}] crc={:04x}",
            self.frame_length,
            self.destination,
            self.source,
            self.control,
            self.seq_num(),
            self.data,
            self.crc16
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
