//! AVR target descriptions and database
//!
//! A [`DeviceParameters`] fixes everything the programming engine needs to
//! know about a part: page geometry, signature, addressing and the raw
//! values sent with the STK500 set-device commands.

mod builtin;
mod types;

#[cfg(feature = "std")]
mod database;

pub use builtin::builtin_targets;
pub use types::*;

#[cfg(feature = "std")]
pub use database::*;
