//! Intel HEX support
//!
//! Intel HEX encodes binary data as checksummed, address-tagged ASCII
//! records of the form `:LLOOOOTTDD…DDCC`:
//!
//! | Field | Digits | Meaning |
//! |-------|--------|---------|
//! | `:`   | -      | Record mark |
//! | `LL`  | 2      | Payload byte count |
//! | `OOOO`| 4      | Load offset (big endian) |
//! | `TT`  | 2      | Record type |
//! | `DD…` | 2×LL   | Payload |
//! | `CC`  | 2      | Two's complement of the byte sum |
//!
//! [`HexDecoder`] consumes this text incrementally and writes the payload of
//! data records into an [`ImageSink`] at `base address + load offset`.

mod decoder;
#[cfg(feature = "alloc")]
mod encoder;
mod record;

pub use decoder::{EntryPoint, HexDecoder, ImageSink};
#[cfg(feature = "alloc")]
pub use decoder::decode;
#[cfg(feature = "alloc")]
pub use encoder::{encode, encode_image, DEFAULT_RECORD_LEN};
pub use record::{checksum, Record, RecordType};

/// Character that starts every record
pub const RECORD_MARK: u8 = b':';

/// Largest payload a single record can carry
pub const MAX_DATA_LEN: usize = 255;

/// Longest possible record line, excluding the line terminator
///
/// Record mark plus two hex digits for each of: count, offset (2 bytes),
/// type, payload and checksum.
pub const MAX_RECORD_CHARS: usize = 1 + 2 * (1 + 2 + 1 + MAX_DATA_LEN + 1);
