//! Binary flash images
//!
//! A [`BinaryImage`] is the decoded, address-ordered form of a firmware file.
//! The HEX decoder writes into it at absolute addresses; the programming
//! engine walks it page by page.

use alloc::vec::Vec;

use crate::error::{Error, Result};

/// The erased value for flash memory (all bits set)
pub const ERASED_VALUE: u8 = 0xFF;

/// Largest image accepted, far above any AVR flash
pub const MAX_IMAGE_SIZE: usize = 16 * 1024 * 1024;

/// Contiguous firmware image addressed from 0
///
/// Bytes between written ranges hold [`ERASED_VALUE`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryImage {
    data: Vec<u8>,
}

impl BinaryImage {
    /// Create an empty image
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Create an image from raw binary contents (decoder bypassed)
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() > MAX_IMAGE_SIZE {
            return Err(Error::AddressOutOfBounds);
        }
        Ok(Self { data })
    }

    /// Total image length in bytes (highest written address + 1)
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the image contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the image and return its contents
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Write `bytes` at absolute `address`, growing the image as needed
    ///
    /// Existing bytes in the range are overwritten. An empty write leaves
    /// the image untouched.
    pub fn write_at(&mut self, address: u32, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let start = address as usize;
        let end = start
            .checked_add(bytes.len())
            .ok_or(Error::AddressOutOfBounds)?;
        if end > MAX_IMAGE_SIZE {
            return Err(Error::AddressOutOfBounds);
        }

        if end > self.data.len() {
            self.data.resize(end, ERASED_VALUE);
        }
        self.data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Iterate over page-sized slices of the image
    ///
    /// The final page is shorter when the image length is not a multiple of
    /// `page_size`. A `page_size` of 0 yields nothing.
    pub fn pages(&self, page_size: usize) -> Pages<'_> {
        Pages {
            data: &self.data,
            page_size,
            index: 0,
        }
    }

    /// Number of pages of `page_size` bytes needed to hold the image
    pub fn page_count(&self, page_size: usize) -> usize {
        if page_size == 0 {
            return 0;
        }
        self.data.len().div_ceil(page_size)
    }
}

/// One page-sized slice of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page<'a> {
    /// Zero-based page index
    pub index: usize,
    /// Byte address of the first byte of the page
    pub address: u32,
    /// Page contents, at most `page_size` bytes
    pub data: &'a [u8],
}

/// Iterator returned by [`BinaryImage::pages`]
#[derive(Debug, Clone)]
pub struct Pages<'a> {
    data: &'a [u8],
    page_size: usize,
    index: usize,
}

impl<'a> Iterator for Pages<'a> {
    type Item = Page<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page_size == 0 {
            return None;
        }
        let start = self.index.checked_mul(self.page_size)?;
        if start >= self.data.len() {
            return None;
        }
        let end = core::cmp::min(start + self.page_size, self.data.len());
        let page = Page {
            index: self.index,
            address: start as u32,
            data: &self.data[start..end],
        };
        self.index += 1;
        Some(page)
    }
}
