//! stkflash-stk500 - STK500 v1 programming engine
//!
//! This crate drives an AVR bootloader speaking the STK500 v1 protocol
//! (Optiboot, the Arduino bootloaders) through a complete in-system
//! programming session.
//!
//! # Session Overview
//!
//! 1. Switch the UART to the bootloader baud rate and pulse reset
//! 2. Repeat `GetSync` until the bootloader answers `[InSync, Ok]`
//! 3. Read version parameters and the device signature
//! 4. Optionally send the device parameters, then enter programming mode
//! 5. Erase the chip
//! 6. For each page: `LoadAddress`, `ProgPage`, optionally `ReadPage`
//! 7. Leave programming mode and restore the UART baud rate
//!
//! # Example
//!
//! ```no_run
//! use stkflash_core::ihex;
//! use stkflash_core::progress::LogProgress;
//! use stkflash_core::target::TargetDatabase;
//! use stkflash_stk500::{ControlPin, SerialTransport, SessionConfig, StdClock, Stk500};
//!
//! let config = SessionConfig::default();
//! let transport = SerialTransport::open("/dev/ttyUSB0", 115200, &config)?;
//! let reset = transport.control_line(ControlPin::Dtr)?;
//! let mut stk = Stk500::new(transport, reset, StdClock::new(), config)?;
//!
//! let image = ihex::decode(&std::fs::read("blink.hex")?)?;
//! let db = TargetDatabase::builtin();
//! let target = db.find_by_name("ATmega328P").ok_or("unknown target")?;
//! let report = stk.flash(&image, target, &mut LogProgress)?;
//! println!("{} pages written", report.pages_written);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;
#[cfg(feature = "std")]
pub mod transport;

// Re-exports
pub use config::{DataBits, Parity, ResetPolarity, SessionConfig, StopBits, VerifyPolicy};
pub use engine::{BootloaderVersion, FlashReport, PageMismatch, Stk500, TargetInfo};
pub use error::{FlashError, Result, Step};
pub use session::{ProgrammingSession, SessionState};

#[cfg(feature = "std")]
pub use transport::StdClock;
#[cfg(feature = "serial")]
pub use transport::{ControlPin, SerialControlLine, SerialTransport};
