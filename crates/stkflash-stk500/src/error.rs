//! Error types for STK500 sessions

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use stkflash_core::error::{Error as CoreError, HexError};
use stkflash_core::target::Signature;

#[cfg(feature = "std")]
use thiserror::Error;

/// Protocol step at which a session failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// `GetSync` handshake
    Sync,
    /// `GetParameter`
    ReadParameter,
    /// `GetSignOn`
    SignOn,
    /// `ReadSignature`
    ReadSignature,
    /// `SetDevice`
    SetDevice,
    /// `SetDeviceExt`
    SetDeviceExt,
    /// `EnterProgMode`
    EnterProgMode,
    /// `ChipErase`
    ChipErase,
    /// `LoadAddress` or extended address load
    LoadAddress,
    /// `ProgPage`
    ProgramPage,
    /// `ReadPage`
    ReadPage,
    /// `LeaveProgMode`
    LeaveProgMode,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Sync => "sync",
            Step::ReadParameter => "read parameter",
            Step::SignOn => "sign-on",
            Step::ReadSignature => "read signature",
            Step::SetDevice => "set device",
            Step::SetDeviceExt => "set device ext",
            Step::EnterProgMode => "enter programming mode",
            Step::ChipErase => "chip erase",
            Step::LoadAddress => "load address",
            Step::ProgramPage => "program page",
            Step::ReadPage => "read page",
            Step::LeaveProgMode => "leave programming mode",
        };
        f.write_str(name)
    }
}

/// STK500 session errors
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(Error))]
pub enum FlashError {
    /// The Intel HEX input could not be decoded
    #[cfg_attr(feature = "std", error("{0}"))]
    Decode(HexError),

    /// The target did not answer within the bounded wait
    #[cfg_attr(
        feature = "std",
        error("target not responding during {step}{}", at_page(.page))
    )]
    ProtocolTimeout {
        /// Step that timed out
        step: Step,
        /// Page being processed, if any
        page: Option<usize>,
    },

    /// The target answered with something other than `[InSync, ..., Ok]`
    #[cfg_attr(
        feature = "std",
        error("unexpected response {} to command 0x{command:02X} during {step}{}", hex(.response), at_page(.page))
    )]
    ProtocolMismatch {
        /// Step that failed
        step: Step,
        /// Command byte sent
        command: u8,
        /// Raw response bytes received
        response: Vec<u8>,
        /// Page being processed, if any
        page: Option<usize>,
    },

    /// Flash read back differs from what was written
    #[cfg_attr(
        feature = "std",
        error("verification failed on page {page} at 0x{address:05X}: expected 0x{expected:02X}, found 0x{found:02X}")
    )]
    VerificationMismatch {
        /// Page index
        page: usize,
        /// Byte address of the first differing byte
        address: u32,
        /// Byte written
        expected: u8,
        /// Byte read back
        found: u8,
    },

    /// The device signature is not the one of the selected target
    #[cfg_attr(
        feature = "std",
        error("signature mismatch: expected {expected}, found {found}")
    )]
    SignatureMismatch {
        /// Signature of the selected target
        expected: Signature,
        /// Signature read from the device
        found: Signature,
    },

    /// The image does not fit into the target's flash
    #[cfg_attr(
        feature = "std",
        error("image of {image} bytes does not fit into {flash} bytes of flash")
    )]
    ImageTooLarge {
        /// Image length
        image: usize,
        /// Flash size
        flash: u32,
    },

    /// UART or reset line could not be opened or used
    #[cfg_attr(feature = "std", error("resource unavailable: {0}"))]
    ResourceUnavailable(String),

    /// I/O failure on the link
    #[cfg_attr(feature = "std", error("link error: {0}"))]
    Link(CoreError),

    /// Invalid configuration
    #[cfg_attr(feature = "std", error("configuration error: {0}"))]
    Config(String),
}

impl FlashError {
    /// Protocol step the error occurred at, if any
    pub fn step(&self) -> Option<Step> {
        match self {
            FlashError::ProtocolTimeout { step, .. } | FlashError::ProtocolMismatch { step, .. } => {
                Some(*step)
            }
            FlashError::VerificationMismatch { .. } => Some(Step::ReadPage),
            FlashError::SignatureMismatch { .. } => Some(Step::ReadSignature),
            _ => None,
        }
    }

    /// Page index the error occurred at, if any
    pub fn page(&self) -> Option<usize> {
        match self {
            FlashError::ProtocolTimeout { page, .. } | FlashError::ProtocolMismatch { page, .. } => {
                *page
            }
            FlashError::VerificationMismatch { page, .. } => Some(*page),
            _ => None,
        }
    }
}

impl From<CoreError> for FlashError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Hex(h) => FlashError::Decode(h),
            CoreError::ResourceUnavailable => {
                FlashError::ResourceUnavailable(String::from("serial port or reset line"))
            }
            other => FlashError::Link(other),
        }
    }
}

impl From<HexError> for FlashError {
    fn from(e: HexError) -> Self {
        FlashError::Decode(e)
    }
}

#[cfg(feature = "std")]
fn at_page(page: &Option<usize>) -> String {
    match page {
        Some(p) => alloc::format!(" (page {})", p),
        None => String::new(),
    }
}

#[cfg(feature = "std")]
fn hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return String::from("<none>");
    }
    let parts: Vec<String> = bytes.iter().map(|b| alloc::format!("{:02X}", b)).collect();
    parts.join(" ")
}

/// Result type for STK500 operations
pub type Result<T> = core::result::Result<T, FlashError>;

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_display_includes_step_and_page() {
        let e = FlashError::ProtocolTimeout {
            step: Step::ProgramPage,
            page: Some(3),
        };
        assert_eq!(e.to_string(), "target not responding during program page (page 3)");
        assert_eq!(e.step(), Some(Step::ProgramPage));
        assert_eq!(e.page(), Some(3));

        let e = FlashError::ProtocolMismatch {
            step: Step::ChipErase,
            command: 0x52,
            response: vec![0x14, 0x11],
            page: None,
        };
        assert_eq!(
            e.to_string(),
            "unexpected response 14 11 to command 0x52 during chip erase"
        );
    }

    #[test]
    fn test_core_error_mapping() {
        assert!(matches!(
            FlashError::from(CoreError::ResourceUnavailable),
            FlashError::ResourceUnavailable(_)
        ));
        assert!(matches!(
            FlashError::from(CoreError::IoError),
            FlashError::Link(CoreError::IoError)
        ));
    }
}
