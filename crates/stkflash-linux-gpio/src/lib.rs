//! stkflash-linux-gpio - Linux GPIO reset line
//!
//! Boards without an auto-reset circuit (or a Raspberry Pi wired straight to
//! an AVR's UART pins) need RESET driven from somewhere other than the
//! serial adapter. This crate provides a [`ResetLine`] on a GPIO output via
//! the Linux character device interface (gpiocdev).
//!
//! # Example
//!
//! ```no_run
//! use stkflash_core::link::ResetLine;
//! use stkflash_linux_gpio::{GpioResetConfig, GpioResetLine};
//!
//! let mut reset = GpioResetLine::open(&GpioResetConfig::new("/dev/gpiochip0", 17))?;
//! reset.set_low()?;
//! reset.set_high()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Usage with stkflash CLI
//!
//! ```bash
//! stkflash flash -p serial:dev=/dev/serial0,reset=gpio,gpiochip=0,line=17 -t ATmega328P blink.hex
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel 4.8+ with GPIO character device support (kernel 5.5+ for v2 API)
//! - Access to `/dev/gpiochipN` devices (may require root or udev rules)
//!
//! [`ResetLine`]: stkflash_core::link::ResetLine

pub mod device;
pub mod error;

// Re-exports
pub use device::{parse_options, GpioResetConfig, GpioResetLine};
pub use error::{LinuxGpioError, Result};

/// Open a GPIO reset line from programmer options
///
/// This is a convenience function for use in the CLI programmer dispatch.
pub fn open_reset_line(
    options: &[(&str, &str)],
) -> std::result::Result<GpioResetLine, Box<dyn std::error::Error>> {
    let config = parse_options(options)?;
    Ok(GpioResetLine::open(&config)?)
}
