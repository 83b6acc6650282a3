//! Intel HEX encoding
//!
//! Used to dump flash read back from a target in the same format it was
//! programmed from.

use alloc::string::String;
use core::fmt::Write;

use super::record::{checksum, RecordType};
use super::MAX_DATA_LEN;
use crate::image::BinaryImage;

/// Payload bytes per data record unless told otherwise
pub const DEFAULT_RECORD_LEN: usize = 16;

/// Encode `data`, loaded at `start_address`, as Intel HEX text
///
/// Extended linear address records are emitted whenever the upper 16 bits
/// of the address change, and no data record crosses a 64 KiB boundary.
/// `record_len` is clamped to `1..=255`.
pub fn encode(data: &[u8], start_address: u32, record_len: usize) -> String {
    let record_len = record_len.clamp(1, MAX_DATA_LEN);
    let mut out = String::new();
    let mut upper: u16 = 0;
    let mut offset = 0usize;

    while offset < data.len() {
        let address = start_address.wrapping_add(offset as u32);
        let high = (address >> 16) as u16;
        if high != upper {
            push_record(
                &mut out,
                RecordType::ExtendedLinearAddress,
                0,
                &high.to_be_bytes(),
            );
            upper = high;
        }

        let low = (address & 0xFFFF) as usize;
        let room = 0x1_0000 - low;
        let len = record_len.min(room).min(data.len() - offset);
        push_record(
            &mut out,
            RecordType::Data,
            low as u16,
            &data[offset..offset + len],
        );
        offset += len;
    }

    push_record(&mut out, RecordType::EndOfFile, 0, &[]);
    out
}

/// Encode a whole image loaded at address 0
pub fn encode_image(image: &BinaryImage, record_len: usize) -> String {
    encode(image.as_bytes(), 0, record_len)
}

fn push_record(out: &mut String, record_type: RecordType, offset: u16, data: &[u8]) {
    let [hi, lo] = offset.to_be_bytes();
    let header = [data.len() as u8, hi, lo, record_type as u8];
    let sum = checksum(&header).wrapping_sub(data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b)));

    out.push(':');
    for b in header.iter().chain(data) {
        // Writing to a String cannot fail
        let _ = write!(out, "{:02X}", b);
    }
    let _ = write!(out, "{:02X}", sum);
    out.push('\n');
}
