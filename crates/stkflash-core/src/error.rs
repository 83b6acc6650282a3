//! Error types for stkflash-core
//!
//! This module provides no_std compatible error types that can be used
//! throughout the crate and by the link implementations in other crates.

use core::fmt;

/// Why an Intel HEX record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexErrorKind {
    /// A byte other than whitespace or `:` was found where a record must start
    MissingRecordMark {
        /// The offending byte
        found: u8,
    },
    /// A character that is not a hexadecimal digit
    InvalidHexDigit {
        /// The offending byte
        found: u8,
    },
    /// The record has an odd number of hex digits or is shorter than a header
    MalformedRecord,
    /// The record line is longer than any valid record can be
    RecordTooLong,
    /// The declared byte count does not match the number of payload bytes
    LengthMismatch {
        /// Byte count from the record header
        declared: u8,
        /// Payload bytes actually present
        actual: usize,
    },
    /// The checksum does not balance the record to zero
    ChecksumMismatch {
        /// Checksum byte carried by the record
        expected: u8,
        /// Checksum computed over the record contents
        computed: u8,
    },
    /// Record type byte is not one of the six defined types
    UnknownRecordType(u8),
    /// Payload length is wrong for the record type (e.g. an address record
    /// with other than two bytes)
    InvalidRecordLength {
        /// Record type byte
        record_type: u8,
        /// Payload length found
        length: u8,
    },
    /// A data record would land beyond the addressable image
    AddressOverflow,
    /// Input ended in the middle of a record
    UnexpectedEnd,
    /// Input ended without an end-of-file record
    MissingEndOfFile,
}

/// A fatal Intel HEX decode failure with its position in the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexError {
    /// What went wrong
    pub kind: HexErrorKind,
    /// Cumulative byte offset in the input where the failing record starts
    pub offset: usize,
    /// 1-based line number of the failing record
    pub line: usize,
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Intel HEX decoding failed
    Hex(HexError),

    // Image errors
    /// Address is beyond the addressable image
    AddressOutOfBounds,

    // Link errors
    /// I/O error on the serial link
    IoError,
    /// Read from the byte source failed
    ReadError,
    /// The link does not support the requested baud rate or framing
    UnsupportedSetting,
    /// The serial port or reset line could not be used
    ResourceUnavailable,
}

impl fmt::Display for HexErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRecordMark { found } => {
                write!(f, "expected record mark ':', found 0x{:02X}", found)
            }
            Self::InvalidHexDigit { found } => write!(f, "invalid hex digit 0x{:02X}", found),
            Self::MalformedRecord => write!(f, "malformed record"),
            Self::RecordTooLong => write!(f, "record too long"),
            Self::LengthMismatch { declared, actual } => write!(
                f,
                "record declares {} data bytes but carries {}",
                declared, actual
            ),
            Self::ChecksumMismatch { expected, computed } => write!(
                f,
                "checksum mismatch: record has 0x{:02X}, computed 0x{:02X}",
                expected, computed
            ),
            Self::UnknownRecordType(t) => write!(f, "unknown record type 0x{:02X}", t),
            Self::InvalidRecordLength {
                record_type,
                length,
            } => write!(
                f,
                "invalid length {} for record type 0x{:02X}",
                length, record_type
            ),
            Self::AddressOverflow => write!(f, "data address beyond addressable image"),
            Self::UnexpectedEnd => write!(f, "input ended inside a record"),
            Self::MissingEndOfFile => write!(f, "input ended without an end-of-file record"),
        }
    }
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Intel HEX error at byte {} (line {}): {}",
            self.offset, self.line, self.kind
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hex(e) => write!(f, "{}", e),
            Self::AddressOutOfBounds => write!(f, "address out of bounds"),
            Self::IoError => write!(f, "I/O error"),
            Self::ReadError => write!(f, "read operation failed"),
            Self::UnsupportedSetting => write!(f, "unsupported link setting"),
            Self::ResourceUnavailable => write!(f, "serial port or reset line unavailable"),
        }
    }
}

impl From<HexError> for Error {
    fn from(e: HexError) -> Self {
        Error::Hex(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HexError {}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
