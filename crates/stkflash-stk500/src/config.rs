//! Session configuration
//!
//! Loaded from TOML files with a `[session]` table:
//!
//! ```toml
//! [session]
//! baud = 57600
//! parity = "none"
//! reset_pulse_ms = 100
//! sync_attempts = 20
//! verify = "abort"
//! check_signature = true
//! ```
//!
//! Every field is optional; the defaults match Optiboot on an ATmega328P.

use alloc::format;
use alloc::string::String;

use crate::error::{FlashError, Result};

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum DataBits {
    /// 5 bits
    Five,
    /// 6 bits
    Six,
    /// 7 bits
    Seven,
    /// 8 bits
    #[default]
    Eight,
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum Parity {
    /// No parity bit
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum StopBits {
    /// One stop bit
    #[default]
    One,
    /// Two stop bits
    Two,
}

/// Level that holds the target in reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "kebab-case"))]
pub enum ResetPolarity {
    /// Driving the line low resets the target
    #[default]
    ActiveLow,
    /// Driving the line high resets the target (e.g. through a transistor)
    ActiveHigh,
}

/// What to do with read-back verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(rename_all = "lowercase"))]
pub enum VerifyPolicy {
    /// Do not read pages back
    #[default]
    Off,
    /// Read pages back, report mismatches, keep programming
    Report,
    /// Read pages back, stop at the first mismatch
    Abort,
}

impl VerifyPolicy {
    /// Whether pages are read back at all
    pub fn enabled(self) -> bool {
        !matches!(self, VerifyPolicy::Off)
    }
}

impl core::str::FromStr for VerifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(VerifyPolicy::Off),
            "report" => Ok(VerifyPolicy::Report),
            "abort" => Ok(VerifyPolicy::Abort),
            _ => Err(format!(
                "invalid verify policy '{}', expected off, report or abort",
                s
            )),
        }
    }
}

/// Parameters of one programming session
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default, deny_unknown_fields))]
pub struct SessionConfig {
    /// Bootloader baud rate
    pub baud: u32,
    /// Data bits
    pub data_bits: DataBits,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// How long reset is held
    pub reset_pulse_ms: u32,
    /// Wait after releasing reset before talking to the bootloader
    pub reset_settle_ms: u32,
    /// Reset line polarity
    pub reset_polarity: ResetPolarity,
    /// `GetSync` attempts before giving up
    pub sync_attempts: u32,
    /// Wait for each `GetSync` answer
    pub sync_timeout_ms: u32,
    /// Wait for the answer to any other command
    pub response_timeout_ms: u32,
    /// Wait for the chip erase answer
    pub erase_timeout_ms: u32,
    /// Re-sends of a command that got no answer at all
    pub command_retries: u32,
    /// Read-back verification
    pub verify: VerifyPolicy,
    /// Fail when the device signature differs from the target's
    pub check_signature: bool,
    /// Send `SetDevice` / `SetDeviceExt` before entering programming mode
    pub send_device_parameters: bool,
    /// Read hardware and software version parameters
    pub read_versions: bool,
    /// Request the sign-on string
    pub read_sign_on: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            reset_pulse_ms: 100,
            reset_settle_ms: 50,
            reset_polarity: ResetPolarity::ActiveLow,
            sync_attempts: 20,
            sync_timeout_ms: 200,
            response_timeout_ms: 1000,
            erase_timeout_ms: 5000,
            command_retries: 2,
            verify: VerifyPolicy::Off,
            check_signature: true,
            send_device_parameters: false,
            read_versions: true,
            read_sign_on: false,
        }
    }
}

impl SessionConfig {
    /// Set the bootloader baud rate
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Set the verification policy
    pub fn with_verify(mut self, verify: VerifyPolicy) -> Self {
        self.verify = verify;
        self
    }

    /// Set the reset line polarity
    pub fn with_reset_polarity(mut self, polarity: ResetPolarity) -> Self {
        self.reset_polarity = polarity;
        self
    }

    /// Enable or disable the signature check
    pub fn with_check_signature(mut self, check: bool) -> Self {
        self.check_signature = check;
        self
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.baud == 0 {
            return Err(FlashError::Config(String::from("baud rate must not be 0")));
        }
        if self.sync_attempts == 0 {
            return Err(FlashError::Config(String::from(
                "sync_attempts must be at least 1",
            )));
        }
        if self.sync_timeout_ms == 0 || self.response_timeout_ms == 0 || self.erase_timeout_ms == 0
        {
            return Err(FlashError::Config(String::from(
                "timeouts must be greater than 0",
            )));
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
mod file {
    use super::*;
    use std::fs;
    use std::path::Path;

    #[derive(Debug, Default, serde::Deserialize)]
    #[serde(deny_unknown_fields)]
    struct ConfigFile {
        #[serde(default)]
        session: SessionConfig,
    }

    impl SessionConfig {
        /// Parse a TOML document with a `[session]` table
        pub fn from_toml_str(content: &str) -> Result<Self> {
            let file: ConfigFile =
                toml::from_str(content).map_err(|e| FlashError::Config(e.to_string()))?;
            file.session.validate()?;
            Ok(file.session)
        }

        /// Load a TOML configuration file
        pub fn load(path: &Path) -> Result<Self> {
            let content = fs::read_to_string(path).map_err(|e| {
                FlashError::Config(format!("failed to read {}: {}", path.display(), e))
            })?;
            Self::from_toml_str(&content)
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.baud, 115_200);
        assert_eq!(cfg.sync_attempts, 20);
        assert_eq!(cfg.reset_pulse_ms, 100);
        assert_eq!(cfg.data_bits, DataBits::Eight);
        assert_eq!(cfg.parity, Parity::None);
        assert_eq!(cfg.stop_bits, StopBits::One);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let cfg = SessionConfig::from_toml_str(
            r#"
[session]
baud = 57600
parity = "even"
stop_bits = "two"
reset_polarity = "active-high"
verify = "abort"
send_device_parameters = true
"#,
        )
        .unwrap();
        assert_eq!(cfg.baud, 57600);
        assert_eq!(cfg.parity, Parity::Even);
        assert_eq!(cfg.stop_bits, StopBits::Two);
        assert_eq!(cfg.reset_polarity, ResetPolarity::ActiveHigh);
        assert_eq!(cfg.verify, VerifyPolicy::Abort);
        assert!(cfg.send_device_parameters);
        // Untouched fields keep their defaults
        assert_eq!(cfg.sync_attempts, 20);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(
            SessionConfig::from_toml_str("").unwrap(),
            SessionConfig::default()
        );
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            SessionConfig::from_toml_str("[session]\nbaud = 0\n"),
            Err(FlashError::Config(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("[session]\nbogus = 1\n"),
            Err(FlashError::Config(_))
        ));
        assert!(matches!(
            SessionConfig::from_toml_str("[session]\nverify = \"sometimes\"\n"),
            Err(FlashError::Config(_))
        ));
    }

    #[test]
    fn test_verify_from_str() {
        assert_eq!("Abort".parse::<VerifyPolicy>(), Ok(VerifyPolicy::Abort));
        assert_eq!("off".parse::<VerifyPolicy>(), Ok(VerifyPolicy::Off));
        assert!("maybe".parse::<VerifyPolicy>().is_err());
    }
}
