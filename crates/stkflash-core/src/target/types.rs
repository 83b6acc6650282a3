//! Target type definitions

use alloc::string::String;
use core::fmt;

/// How the bootloader interprets `LoadAddress` values for flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub enum AddressMode {
    /// Address counts 16-bit words (byte address / 2), as on every AVR
    #[default]
    Word,
    /// Address counts bytes
    Byte,
}

impl AddressMode {
    /// Convert a byte address to the value sent in `LoadAddress`
    pub fn load_address(self, byte_address: u32) -> u32 {
        match self {
            AddressMode::Word => byte_address / 2,
            AddressMode::Byte => byte_address,
        }
    }
}

/// Three-byte device signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
pub struct Signature(pub [u8; 3]);

impl Signature {
    /// Create a signature from its three bytes
    pub const fn new(b0: u8, b1: u8, b2: u8) -> Self {
        Self([b0, b1, b2])
    }

    /// Signature bytes
    pub fn bytes(&self) -> [u8; 3] {
        self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X} {:02X}", self.0[0], self.0[1], self.0[2])
    }
}

/// Raw values for the STK500 `SetDevice` / `SetDeviceExt` commands
///
/// Bootloaders such as Optiboot ignore most of these; a real STK500 uses
/// them to drive the target in ISP mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "std", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "std", serde(default))]
pub struct IspParameters {
    /// STK500 device code
    pub device_code: u8,
    /// Device revision
    pub revision: u8,
    /// 0 for parallel and serial, 1 for parallel only
    pub prog_type: u8,
    /// Parallel interface mode
    pub par_mode: u8,
    /// Polling supported
    pub polling: u8,
    /// Self-timed programming
    pub self_timed: u8,
    /// Number of lock bytes
    pub lock_bytes: u8,
    /// Number of fuse bytes
    pub fuse_bytes: u8,
    /// Flash polling values
    pub flash_poll: [u8; 2],
    /// EEPROM polling values
    pub eeprom_poll: [u8; 2],
    /// PAGEL signal mapping
    pub signal_pagel: u8,
    /// BS2 signal mapping
    pub signal_bs2: u8,
    /// Reset pin disabled
    pub reset_disable: u8,
}

impl Default for IspParameters {
    fn default() -> Self {
        Self {
            device_code: 0x86,
            revision: 0,
            prog_type: 0,
            par_mode: 1,
            polling: 1,
            self_timed: 1,
            lock_bytes: 1,
            fuse_bytes: 3,
            flash_poll: [0xFF, 0xFF],
            eeprom_poll: [0xFF, 0xFF],
            signal_pagel: 0xD7,
            signal_bs2: 0xC2,
            reset_disable: 0,
        }
    }
}

/// Description of one AVR part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParameters {
    /// Part name (e.g. "ATmega328P")
    pub name: String,
    /// Expected device signature
    pub signature: Signature,
    /// Flash size in bytes
    pub flash_size: u32,
    /// Flash page size in bytes
    pub page_size: u16,
    /// EEPROM size in bytes
    pub eeprom_size: u16,
    /// EEPROM page size in bytes
    pub eeprom_page_size: u8,
    /// Flash address mapping
    pub address_mode: AddressMode,
    /// Values for the set-device commands
    pub isp: IspParameters,
}

impl DeviceParameters {
    /// Number of flash pages
    pub fn flash_pages(&self) -> u32 {
        if self.page_size == 0 {
            return 0;
        }
        self.flash_size / self.page_size as u32
    }

    /// Check if the given signature belongs to this part
    pub fn matches_signature(&self, signature: &Signature) -> bool {
        self.signature == *signature
    }

    /// Flash size in KiB
    pub fn flash_size_kib(&self) -> u32 {
        self.flash_size / 1024
    }
}

impl fmt::Display for DeviceParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (signature {}, {} KiB flash, {} byte pages)",
            self.name,
            self.signature,
            self.flash_size_kib(),
            self.page_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_addressing() {
        assert_eq!(AddressMode::Word.load_address(0x100), 0x80);
        assert_eq!(AddressMode::Byte.load_address(0x100), 0x100);
    }

    #[test]
    fn test_signature_display() {
        let text = alloc::format!("{}", Signature::new(0x1E, 0x95, 0x0F));
        assert_eq!(text, "1E 95 0F");
    }
}
