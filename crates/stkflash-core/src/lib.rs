//! stkflash-core - Core library for AVR in-system programming
//!
//! This crate provides the hardware-independent half of the programming
//! pipeline: an incremental Intel HEX decoder, the binary image it fills,
//! target descriptions, and the link traits a protocol engine drives. It is
//! designed to be `no_std` compatible so the same code can run on the
//! ESP8266/ESP32 bridge firmware and on a host.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`), the RON
//!   target database loader and `std::error::Error` impls
//! - `alloc` - Enable heap allocation for [`image::BinaryImage`] and the
//!   HEX encoder
//!
//! # Example
//!
//! ```ignore
//! use stkflash_core::ihex::HexDecoder;
//! use stkflash_core::image::BinaryImage;
//!
//! let mut image = BinaryImage::new();
//! let mut decoder = HexDecoder::new(&mut image);
//! decoder.parse(b":0400000001020304F2\n:00000001FF\n")?;
//! decoder.finish()?;
//! assert_eq!(image.as_bytes(), &[1, 2, 3, 4]);
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod error;
pub mod ihex;
#[cfg(feature = "alloc")]
pub mod image;
pub mod link;
pub mod progress;
#[cfg(feature = "alloc")]
pub mod target;

pub use error::{Error, Result};
