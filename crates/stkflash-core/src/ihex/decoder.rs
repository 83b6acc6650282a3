//! Incremental Intel HEX decoder
//!
//! The decoder can be fed arbitrary chunks of input, down to a single byte at
//! a time. Partial records are kept in a fixed-size line buffer between calls,
//! so the decoder never allocates.

use heapless::Vec;

use super::record::{Record, RecordType};
use super::{MAX_RECORD_CHARS, RECORD_MARK};
use crate::error::{Error, HexError, HexErrorKind};

#[cfg(feature = "alloc")]
use crate::image::BinaryImage;

/// Size of the scratch buffer used by [`HexDecoder::decode_from`]
const READ_CHUNK_SIZE: usize = 256;

/// Destination for decoded data records
///
/// The decoder only ever writes; ownership of the storage stays with the
/// caller across the decode and program steps.
pub trait ImageSink {
    /// Write `data` at absolute byte address `address`
    fn write_at(&mut self, address: u32, data: &[u8]) -> crate::Result<()>;
}

impl<S: ImageSink + ?Sized> ImageSink for &mut S {
    fn write_at(&mut self, address: u32, data: &[u8]) -> crate::Result<()> {
        (**self).write_at(address, data)
    }
}

#[cfg(feature = "alloc")]
impl ImageSink for BinaryImage {
    fn write_at(&mut self, address: u32, data: &[u8]) -> crate::Result<()> {
        BinaryImage::write_at(self, address, data)
    }
}

/// Entry point announced by a start address record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// 80x86 real mode CS:IP
    Segment {
        /// Code segment
        cs: u16,
        /// Instruction pointer
        ip: u16,
    },
    /// 32-bit linear address
    Linear(u32),
}

/// Streaming Intel HEX decoder writing into an [`ImageSink`]
pub struct HexDecoder<S: ImageSink> {
    sink: S,
    line: Vec<u8, MAX_RECORD_CHARS>,
    in_record: bool,
    record_offset: usize,
    record_line: usize,
    position: usize,
    line_number: usize,
    base_address: u32,
    decoded_bytes: usize,
    entry_point: Option<EntryPoint>,
    eof: bool,
    error: Option<HexError>,
}

impl<S: ImageSink> HexDecoder<S> {
    /// Create a decoder writing into `sink`
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            line: Vec::new(),
            in_record: false,
            record_offset: 0,
            record_line: 1,
            position: 0,
            line_number: 1,
            base_address: 0,
            decoded_bytes: 0,
            entry_point: None,
            eof: false,
            error: None,
        }
    }

    /// Feed the next chunk of input text
    ///
    /// Errors are sticky: once a record has been rejected every further call
    /// returns the same error. Input after the end-of-file record is ignored.
    pub fn parse(&mut self, chunk: &[u8]) -> Result<(), HexError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        for &byte in chunk {
            let offset = self.position;
            self.position += 1;

            if self.eof {
                continue;
            }

            if self.in_record {
                if byte.is_ascii_whitespace() {
                    self.in_record = false;
                    self.process_line()?;
                    if byte == b'\n' {
                        self.line_number += 1;
                    }
                } else if self.line.push(byte).is_err() {
                    return Err(self.fail(HexErrorKind::RecordTooLong));
                }
                continue;
            }

            match byte {
                RECORD_MARK => {
                    self.line.clear();
                    // Buffer is empty, the record mark always fits
                    let _ = self.line.push(byte);
                    self.in_record = true;
                    self.record_offset = offset;
                    self.record_line = self.line_number;
                }
                b'\n' => self.line_number += 1,
                b if b.is_ascii_whitespace() => {}
                other => {
                    self.record_offset = offset;
                    self.record_line = self.line_number;
                    return Err(self.fail(HexErrorKind::MissingRecordMark { found: other }));
                }
            }
        }

        Ok(())
    }

    /// Signal the end of input
    ///
    /// A final record without a line terminator is processed here. Fails if
    /// the input stopped inside a record or no end-of-file record was seen.
    pub fn finish(&mut self) -> Result<(), HexError> {
        if let Some(err) = self.error {
            return Err(err);
        }

        if self.in_record {
            self.in_record = false;
            if let Err(err) = self.process_line() {
                // A record cut short by the end of input is a truncation, not
                // a malformed record
                if matches!(
                    err.kind,
                    HexErrorKind::MalformedRecord | HexErrorKind::LengthMismatch { .. }
                ) {
                    return Err(self.fail(HexErrorKind::UnexpectedEnd));
                }
                return Err(err);
            }
        }

        if !self.eof {
            self.record_offset = self.position;
            self.record_line = self.line_number;
            return Err(self.fail(HexErrorKind::MissingEndOfFile));
        }

        Ok(())
    }

    /// Drain an [`embedded_io::Read`] source and finish decoding
    ///
    /// Returns the number of payload bytes decoded.
    pub fn decode_from<R: embedded_io::Read>(&mut self, reader: &mut R) -> crate::Result<usize> {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            let n = reader.read(&mut buf).map_err(|_| Error::ReadError)?;
            if n == 0 {
                break;
            }
            self.parse(&buf[..n])?;
        }
        self.finish()?;
        Ok(self.decoded_bytes)
    }

    /// Whether the end-of-file record has been seen
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Number of payload bytes decoded so far
    pub fn decoded_bytes(&self) -> usize {
        self.decoded_bytes
    }

    /// Number of input bytes consumed so far
    pub fn position(&self) -> usize {
        self.position
    }

    /// Current base address set by extended address records
    pub fn base_address(&self) -> u32 {
        self.base_address
    }

    /// Entry point from a start address record, if any
    pub fn entry_point(&self) -> Option<EntryPoint> {
        self.entry_point
    }

    /// Borrow the sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the decoder and return the sink
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn fail(&mut self, kind: HexErrorKind) -> HexError {
        let err = HexError {
            kind,
            offset: self.record_offset,
            line: self.record_line,
        };
        log::debug!("ihex: {}", err);
        self.error = Some(err);
        err
    }

    fn process_line(&mut self) -> Result<(), HexError> {
        let record = match Record::parse(&self.line) {
            Ok(record) => record,
            Err(kind) => return Err(self.fail(kind)),
        };
        self.line.clear();

        match record.record_type {
            RecordType::Data => {
                let address = match self.base_address.checked_add(record.load_offset as u32) {
                    Some(addr) => addr,
                    None => return Err(self.fail(HexErrorKind::AddressOverflow)),
                };
                if record.data.is_empty() {
                    return Ok(());
                }
                if self.sink.write_at(address, &record.data).is_err() {
                    return Err(self.fail(HexErrorKind::AddressOverflow));
                }
                self.decoded_bytes += record.data.len();
                log::trace!(
                    "ihex: {} data bytes at 0x{:08X}",
                    record.data.len(),
                    address
                );
            }
            RecordType::EndOfFile => {
                self.eof = true;
                log::debug!(
                    "ihex: end of file after {} data bytes",
                    self.decoded_bytes
                );
            }
            RecordType::ExtendedSegmentAddress => {
                self.base_address = (record.address_word() as u32) << 4;
                log::trace!("ihex: segment base 0x{:08X}", self.base_address);
            }
            RecordType::ExtendedLinearAddress => {
                self.base_address = (record.address_word() as u32) << 16;
                log::trace!("ihex: linear base 0x{:08X}", self.base_address);
            }
            RecordType::StartSegmentAddress => {
                let value = record.address_dword();
                self.entry_point = Some(EntryPoint::Segment {
                    cs: (value >> 16) as u16,
                    ip: value as u16,
                });
            }
            RecordType::StartLinearAddress => {
                self.entry_point = Some(EntryPoint::Linear(record.address_dword()));
            }
        }

        Ok(())
    }
}

/// Decode a complete Intel HEX text into a new [`BinaryImage`]
#[cfg(feature = "alloc")]
pub fn decode(text: &[u8]) -> Result<BinaryImage, HexError> {
    let mut image = BinaryImage::new();
    let mut decoder = HexDecoder::new(&mut image);
    decoder.parse(text)?;
    decoder.finish()?;
    Ok(image)
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    use super::*;
    use crate::ihex::encode;
    use alloc::vec;
    use alloc::vec::Vec as AllocVec;

    const SIMPLE: &[u8] = b":0400000001020304F2\r\n:00000001FF\r\n";

    #[test]
    fn test_decode_simple() {
        let image = decode(SIMPLE).unwrap();
        assert_eq!(image.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_data_record_adds_nothing() {
        let text = b":00100000F0\n:0400000001020304F2\n:00000001FF\n";
        let mut image = BinaryImage::new();
        let mut decoder = HexDecoder::new(&mut image);
        decoder.parse(text).unwrap();
        decoder.finish().unwrap();
        assert_eq!(decoder.decoded_bytes(), 4);
        assert_eq!(image.len(), 4);
        assert_eq!(image.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut image = BinaryImage::new();
        let mut decoder = HexDecoder::new(&mut image);
        for b in SIMPLE {
            decoder.parse(core::slice::from_ref(b)).unwrap();
        }
        assert!(decoder.is_eof());
        assert_eq!(decoder.decoded_bytes(), 4);
        decoder.finish().unwrap();
        assert_eq!(image.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_round_trip() {
        let images: [AllocVec<u8>; 3] = [
            (0..=255u8).collect(),
            (0..1000u32).map(|i| (i * 7) as u8).collect(),
            vec![0x5A; 1],
        ];
        for original in &images {
            for record_len in [1usize, 16, 32, 255] {
                let text = encode(original, 0, record_len);
                let image = decode(text.as_bytes()).unwrap();
                assert_eq!(image.as_bytes(), original.as_slice());
            }
        }
    }

    #[test]
    fn test_round_trip_across_64k_boundary() {
        let original: AllocVec<u8> = (0..0x10100u32).map(|i| (i ^ (i >> 8)) as u8).collect();
        let text = encode(&original, 0, 32);
        assert!(text.contains(":020000040001F9"));
        let image = decode(text.as_bytes()).unwrap();
        assert_eq!(image.len(), 0x10100);
        assert_eq!(image.as_bytes(), original.as_slice());
    }

    #[test]
    fn test_extended_linear_address() {
        let text = b":020000040001F9\n:02000000AABB99\n:00000001FF\n";
        let image = decode(text).unwrap();
        assert_eq!(image.len(), 0x10002);
        assert_eq!(&image.as_bytes()[0x10000..], &[0xAA, 0xBB]);
        assert!(image.as_bytes()[..0x10000].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_extended_segment_address() {
        // Base 0x1000 * 16 = 0x10000, offset 0x0010
        let text = b":020000021000EC\n:0100100042AD\n:00000001FF\n";
        let mut image = BinaryImage::new();
        let mut decoder = HexDecoder::new(&mut image);
        decoder.parse(text).unwrap();
        assert_eq!(decoder.base_address(), 0x10000);
        decoder.finish().unwrap();
        assert_eq!(image.as_bytes()[0x10010], 0x42);
    }

    #[test]
    fn test_out_of_order_records() {
        let text = b":02000200334485\n:020000001122CB\n:00000001FF\n";
        let image = decode(text).unwrap();
        assert_eq!(image.as_bytes(), &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn test_corrupt_checksum_reports_offset() {
        let good = b":0400000001020304F2\n";
        let bad = b":0400040005060708DD\n";
        let mut text = AllocVec::new();
        text.extend_from_slice(good);
        text.extend_from_slice(bad);
        text.extend_from_slice(b":00000001FF\n");

        let mut image = BinaryImage::new();
        let mut decoder = HexDecoder::new(&mut image);
        let err = decoder.parse(&text).unwrap_err();
        assert_eq!(err.offset, good.len());
        assert_eq!(err.line, 2);
        assert!(matches!(err.kind, HexErrorKind::ChecksumMismatch { .. }));
        assert!(!decoder.is_eof());

        // Sticky
        assert_eq!(decoder.parse(b":00000001FF\n"), Err(err));
        assert_eq!(decoder.finish(), Err(err));
    }

    #[test]
    fn test_missing_record_mark() {
        let err = decode(b"\n0400000001020304F2\n").unwrap_err();
        assert_eq!(err.kind, HexErrorKind::MissingRecordMark { found: b'0' });
        assert_eq!(err.offset, 1);
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_data_after_eof_ignored() {
        let mut image = BinaryImage::new();
        let mut decoder = HexDecoder::new(&mut image);
        decoder.parse(SIMPLE).unwrap();
        decoder.parse(b":0400000009090909D8\ngarbage").unwrap();
        decoder.finish().unwrap();
        assert_eq!(image.as_bytes(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_final_record_without_newline() {
        let image = decode(b":0400000001020304F2\n:00000001FF").unwrap();
        assert_eq!(image.len(), 4);
    }

    #[test]
    fn test_truncated_input() {
        let mut image = BinaryImage::new();
        let mut decoder = HexDecoder::new(&mut image);
        decoder.parse(b":0400000001020304F2\n:04000400050607").unwrap();
        assert_eq!(decoder.finish().unwrap_err().kind, HexErrorKind::UnexpectedEnd);
    }

    #[test]
    fn test_missing_eof() {
        let err = decode(b":0400000001020304F2\n").unwrap_err();
        assert_eq!(err.kind, HexErrorKind::MissingEndOfFile);
    }

    #[test]
    fn test_record_too_long() {
        let mut text = AllocVec::new();
        text.push(b':');
        text.extend(core::iter::repeat(b'0').take(MAX_RECORD_CHARS + 1));
        let err = decode(&text).unwrap_err();
        assert_eq!(err.kind, HexErrorKind::RecordTooLong);
        assert_eq!(err.offset, 0);
    }

    #[test]
    fn test_start_linear_address() {
        let text = b":0400000500000100F6\n:00000001FF\n";
        let mut image = BinaryImage::new();
        let mut decoder = HexDecoder::new(&mut image);
        decoder.parse(text).unwrap();
        assert_eq!(decoder.entry_point(), Some(EntryPoint::Linear(0x100)));
        decoder.finish().unwrap();
        assert!(image.is_empty());
    }

    #[test]
    fn test_decode_from_reader() {
        let mut image = BinaryImage::new();
        let mut decoder = HexDecoder::new(&mut image);
        let mut reader: &[u8] = SIMPLE;
        assert_eq!(decoder.decode_from(&mut reader).unwrap(), 4);
        assert_eq!(image.as_bytes(), &[1, 2, 3, 4]);
    }
}
