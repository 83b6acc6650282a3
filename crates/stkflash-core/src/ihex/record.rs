//! Single Intel HEX record parsing

use heapless::Vec;

use super::{MAX_DATA_LEN, RECORD_MARK};
use crate::error::HexErrorKind;

/// Decoded header + payload + checksum bytes of the longest record
const MAX_RECORD_BYTES: usize = 1 + 2 + 1 + MAX_DATA_LEN + 1;

/// Intel HEX record types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Payload bytes at `base + load offset`
    Data = 0x00,
    /// Last record of the file
    EndOfFile = 0x01,
    /// Sets the base address to `value * 16`
    ExtendedSegmentAddress = 0x02,
    /// 80x86 CS:IP entry point
    StartSegmentAddress = 0x03,
    /// Sets the base address to `value * 65536`
    ExtendedLinearAddress = 0x04,
    /// 32-bit entry point
    StartLinearAddress = 0x05,
}

impl RecordType {
    /// Payload length this record type requires, if fixed
    pub fn required_len(self) -> Option<u8> {
        match self {
            RecordType::Data => None,
            RecordType::EndOfFile => Some(0),
            RecordType::ExtendedSegmentAddress | RecordType::ExtendedLinearAddress => Some(2),
            RecordType::StartSegmentAddress | RecordType::StartLinearAddress => Some(4),
        }
    }
}

impl TryFrom<u8> for RecordType {
    type Error = HexErrorKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(RecordType::Data),
            0x01 => Ok(RecordType::EndOfFile),
            0x02 => Ok(RecordType::ExtendedSegmentAddress),
            0x03 => Ok(RecordType::StartSegmentAddress),
            0x04 => Ok(RecordType::ExtendedLinearAddress),
            0x05 => Ok(RecordType::StartLinearAddress),
            other => Err(HexErrorKind::UnknownRecordType(other)),
        }
    }
}

/// One parsed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record type
    pub record_type: RecordType,
    /// 16-bit load offset from the header
    pub load_offset: u16,
    /// Payload bytes (`byte count` of them)
    pub data: Vec<u8, MAX_DATA_LEN>,
    /// Checksum byte carried by the record
    pub checksum: u8,
}

impl Record {
    /// Parse a complete record line
    ///
    /// `line` must start with the record mark and must not include the line
    /// terminator.
    pub fn parse(line: &[u8]) -> Result<Self, HexErrorKind> {
        let (&mark, digits) = line
            .split_first()
            .ok_or(HexErrorKind::MalformedRecord)?;
        if mark != RECORD_MARK {
            return Err(HexErrorKind::MissingRecordMark { found: mark });
        }

        let mut bytes: Vec<u8, MAX_RECORD_BYTES> = Vec::new();
        for pair in digits.chunks(2) {
            if pair.len() != 2 {
                return Err(HexErrorKind::MalformedRecord);
            }
            let byte = hex_byte(pair[0], pair[1])?;
            bytes
                .push(byte)
                .map_err(|_| HexErrorKind::RecordTooLong)?;
        }

        // count + offset (2) + type + checksum
        if bytes.len() < 5 {
            return Err(HexErrorKind::MalformedRecord);
        }

        let declared = bytes[0];
        let actual = bytes.len() - 5;
        if declared as usize != actual {
            return Err(HexErrorKind::LengthMismatch { declared, actual });
        }

        let (body, tail) = bytes.split_at(bytes.len() - 1);
        let expected = tail[0];
        let computed = checksum(body);
        if expected != computed {
            return Err(HexErrorKind::ChecksumMismatch { expected, computed });
        }

        let record_type = RecordType::try_from(body[3])?;
        if let Some(required) = record_type.required_len() {
            if declared != required {
                return Err(HexErrorKind::InvalidRecordLength {
                    record_type: record_type as u8,
                    length: declared,
                });
            }
        }

        let mut data = Vec::new();
        // Cannot fail: actual <= MAX_DATA_LEN since declared is a u8
        let _ = data.extend_from_slice(&body[4..]);

        Ok(Record {
            record_type,
            load_offset: u16::from_be_bytes([body[1], body[2]]),
            data,
            checksum: expected,
        })
    }

    /// Payload of an extended address record as a big-endian 16-bit value
    pub fn address_word(&self) -> u16 {
        match self.data.as_slice() {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        }
    }

    /// Payload of a start address record as a big-endian 32-bit value
    pub fn address_dword(&self) -> u32 {
        match self.data.as_slice() {
            [a, b, c, d, ..] => u32::from_be_bytes([*a, *b, *c, *d]),
            _ => 0,
        }
    }
}

/// Two's complement of the sum of `bytes`
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

fn hex_nibble(c: u8) -> Result<u8, HexErrorKind> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(HexErrorKind::InvalidHexDigit { found: c }),
    }
}

fn hex_byte(hi: u8, lo: u8) -> Result<u8, HexErrorKind> {
    Ok((hex_nibble(hi)? << 4) | hex_nibble(lo)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_record() {
        let rec = Record::parse(b":10010000214601360121470136007EFE09D2190140").unwrap();
        assert_eq!(rec.record_type, RecordType::Data);
        assert_eq!(rec.load_offset, 0x0100);
        assert_eq!(rec.data.len(), 16);
        assert_eq!(rec.data[0], 0x21);
        assert_eq!(rec.checksum, 0x40);
    }

    #[test]
    fn test_parse_lowercase() {
        let rec = Record::parse(b":0400000001020304f2").unwrap();
        assert_eq!(rec.data.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_eof() {
        let rec = Record::parse(b":00000001FF").unwrap();
        assert_eq!(rec.record_type, RecordType::EndOfFile);
        assert!(rec.data.is_empty());
    }

    #[test]
    fn test_extended_linear_value() {
        let rec = Record::parse(b":020000040800F2").unwrap();
        assert_eq!(rec.record_type, RecordType::ExtendedLinearAddress);
        assert_eq!(rec.address_word(), 0x0800);
    }

    #[test]
    fn test_bad_checksum() {
        assert_eq!(
            Record::parse(b":00000001FE"),
            Err(HexErrorKind::ChecksumMismatch {
                expected: 0xFE,
                computed: 0xFF
            })
        );
    }

    #[test]
    fn test_length_mismatch() {
        assert_eq!(
            Record::parse(b":0300000001020304F2"),
            Err(HexErrorKind::LengthMismatch {
                declared: 3,
                actual: 4
            })
        );
    }

    #[test]
    fn test_invalid_digit() {
        assert_eq!(
            Record::parse(b":0400000001020G04F2"),
            Err(HexErrorKind::InvalidHexDigit { found: b'G' })
        );
    }

    #[test]
    fn test_odd_digit_count() {
        assert_eq!(
            Record::parse(b":00000001F"),
            Err(HexErrorKind::MalformedRecord)
        );
    }

    #[test]
    fn test_unknown_type_and_bad_length() {
        assert_eq!(
            Record::parse(b":00000006FA"),
            Err(HexErrorKind::UnknownRecordType(6))
        );
        // Extended linear address with a single payload byte
        assert_eq!(
            Record::parse(b":0100000408F3"),
            Err(HexErrorKind::InvalidRecordLength {
                record_type: 4,
                length: 1
            })
        );
    }

    #[test]
    fn test_checksum() {
        assert_eq!(checksum(&[0x00, 0x00, 0x00, 0x01]), 0xFF);
        assert_eq!(checksum(&[0x02, 0x00, 0x00, 0x04, 0x08, 0x00]), 0xF2);
    }
}
