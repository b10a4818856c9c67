//! Frame checksum
//!
//! CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no reflection, no final xor.
//! The `crc` catalogue lists this parameter set as CRC-16/IBM-3740.

use crc::{Crc, CRC_16_IBM_3740};

use crate::constants::FRAME_CRC_LEN;

const CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Checksum over an arbitrary byte slice
pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    CCITT_FALSE.checksum(bytes)
}

/// Checksum of a complete serialized frame
///
/// Covers everything between the delimiter and the CRC itself, i.e.
/// `frame[1..len - 2]`. Frames shorter than delimiter + CRC checksum to the
/// empty-input value.
pub fn frame_checksum(frame: &[u8]) -> u16 {
    if frame.len() < 1 + FRAME_CRC_LEN {
        return crc16_ccitt_false(&[]);
    }
    crc16_ccitt_false(&frame[1..frame.len() - FRAME_CRC_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value() {
        assert_eq!(crc16_ccitt_false(b"123456789"), 0x29B1);
    }

    #[test]
    fn empty_input_is_init_value() {
        assert_eq!(crc16_ccitt_false(&[]), 0xFFFF);
    }

    #[test]
    fn serial_read_request_vector() {
        let covered = hex::decode("11000000000021ae42050160010000").unwrap();
        assert_eq!(crc16_ccitt_false(&covered), 0xc02f);
    }

    #[test]
    fn frame_checksum_skips_delimiter_and_crc() {
        let frame = hex::decode("7e11000000000021ae42050160010000c02f").unwrap();
        assert_eq!(frame_checksum(&frame), 0xc02f);

        let response = hex::decode("7E15C06F0093000018B0010100020100333032309DBD").unwrap();
        assert_eq!(frame_checksum(&response), 0x9dbd);
    }
}
