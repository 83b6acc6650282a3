//! STK500 protocol constants and frame builders
//!
//! Based on Atmel application note AVR061 (STK500 communication protocol,
//! version 1), restricted to what serial bootloaders such as Optiboot
//! implement.
//!
//! Every request ends with [`CRC_EOP`]. Every accepted request is answered
//! with `[InSync, <reply bytes>..., Ok]`.

use alloc::vec::Vec;

use stkflash_core::target::DeviceParameters;

/// End-of-packet marker terminating every request
pub const CRC_EOP: u8 = 0x20;

/// Request command bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Synchronize with the target
    GetSync = 0x30,
    /// Request the sign-on string
    GetSignOn = 0x31,
    /// Write a parameter
    SetParameter = 0x40,
    /// Read a parameter
    GetParameter = 0x41,
    /// Send device programming parameters
    SetDevice = 0x42,
    /// Send extended device parameters
    SetDeviceExt = 0x45,
    /// Enter programming mode
    EnterProgMode = 0x50,
    /// Leave programming mode
    LeaveProgMode = 0x51,
    /// Erase the whole chip
    ChipErase = 0x52,
    /// Query address auto-increment support
    CheckAutoinc = 0x53,
    /// Set the address for the next page operation
    LoadAddress = 0x55,
    /// Raw 4-byte ISP instruction
    Universal = 0x56,
    /// Program a single flash word
    ProgFlash = 0x60,
    /// Program a block of memory
    ProgPage = 0x64,
    /// Read a single flash word
    ReadFlash = 0x70,
    /// Read a block of memory
    ReadPage = 0x74,
    /// Read the device signature
    ReadSignature = 0x75,
}

impl Command {
    /// Command byte
    pub fn byte(self) -> u8 {
        self as u8
    }
}

/// Response bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Response {
    /// Command completed
    Ok = 0x10,
    /// Command failed
    Failed = 0x11,
    /// Unknown command
    Unknown = 0x12,
    /// No target device
    NoDevice = 0x13,
    /// Request was framed correctly
    InSync = 0x14,
    /// Request was not terminated by `CRC_EOP`
    NoSync = 0x15,
}

impl Response {
    /// Parse a response byte
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x10 => Some(Response::Ok),
            0x11 => Some(Response::Failed),
            0x12 => Some(Response::Unknown),
            0x13 => Some(Response::NoDevice),
            0x14 => Some(Response::InSync),
            0x15 => Some(Response::NoSync),
            _ => None,
        }
    }
}

/// Memory addressed by page commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryType {
    /// Program flash
    Flash = b'F',
    /// Data EEPROM
    Eeprom = b'E',
}

/// Parameter identifiers for `GetParameter` / `SetParameter`
pub mod param {
    /// Hardware version
    pub const HW_VER: u8 = 0x80;
    /// Firmware major version
    pub const SW_MAJOR: u8 = 0x81;
    /// Firmware minor version
    pub const SW_MINOR: u8 = 0x82;
}

/// ISP instruction that loads the extended (bits 16..23) word address
pub const LOAD_EXTENDED_ADDRESS: u8 = 0x4D;

/// Largest block a page command can carry
pub const MAX_BLOCK_SIZE: usize = 256;

/// Two-byte request without parameters
pub fn simple(cmd: Command) -> [u8; 2] {
    [cmd.byte(), CRC_EOP]
}

/// `GetParameter` request
pub fn get_parameter(id: u8) -> [u8; 3] {
    [Command::GetParameter.byte(), id, CRC_EOP]
}

/// `LoadAddress` request with the low 16 bits of `address`, little endian
pub fn load_address(address: u32) -> [u8; 4] {
    let [lo, hi, _, _] = address.to_le_bytes();
    [Command::LoadAddress.byte(), lo, hi, CRC_EOP]
}

/// `Universal` request selecting the 64K-word flash segment
pub fn load_extended_address(extended: u8) -> [u8; 6] {
    [
        Command::Universal.byte(),
        LOAD_EXTENDED_ADDRESS,
        0x00,
        extended,
        0x00,
        CRC_EOP,
    ]
}

/// `ProgPage` request: `[0x64, len_hi, len_lo, memtype, data..., CRC_EOP]`
pub fn prog_page(memory: MemoryType, data: &[u8]) -> Vec<u8> {
    let [hi, lo] = (data.len() as u16).to_be_bytes();
    let mut frame = Vec::with_capacity(data.len() + 5);
    frame.extend_from_slice(&[Command::ProgPage.byte(), hi, lo, memory as u8]);
    frame.extend_from_slice(data);
    frame.push(CRC_EOP);
    frame
}

/// `ReadPage` request for `len` bytes
pub fn read_page(memory: MemoryType, len: usize) -> [u8; 5] {
    let [hi, lo] = (len as u16).to_be_bytes();
    [Command::ReadPage.byte(), hi, lo, memory as u8, CRC_EOP]
}

/// `SetDevice` request carrying the 20 device parameter bytes
pub fn set_device(target: &DeviceParameters) -> [u8; 22] {
    let isp = &target.isp;
    let [page_hi, page_lo] = target.page_size.to_be_bytes();
    let [ee_hi, ee_lo] = target.eeprom_size.to_be_bytes();
    let [f3, f2, f1, f0] = target.flash_size.to_be_bytes();
    [
        Command::SetDevice.byte(),
        isp.device_code,
        isp.revision,
        isp.prog_type,
        isp.par_mode,
        isp.polling,
        isp.self_timed,
        isp.lock_bytes,
        isp.fuse_bytes,
        isp.flash_poll[0],
        isp.flash_poll[1],
        isp.eeprom_poll[0],
        isp.eeprom_poll[1],
        page_hi,
        page_lo,
        ee_hi,
        ee_lo,
        f3,
        f2,
        f1,
        f0,
        CRC_EOP,
    ]
}

/// `SetDeviceExt` request: command size followed by four parameters
pub fn set_device_ext(target: &DeviceParameters) -> [u8; 7] {
    let isp = &target.isp;
    [
        Command::SetDeviceExt.byte(),
        5,
        target.eeprom_page_size,
        isp.signal_pagel,
        isp.signal_bs2,
        isp.reset_disable,
        CRC_EOP,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use stkflash_core::target::builtin_targets;

    #[test]
    fn test_load_address_little_endian() {
        assert_eq!(load_address(0x1234), [0x55, 0x34, 0x12, 0x20]);
        assert_eq!(load_address(0x2_0040), [0x55, 0x40, 0x00, 0x20]);
    }

    #[test]
    fn test_prog_page_frame() {
        let frame = prog_page(MemoryType::Flash, &[0xAA; 44]);
        assert_eq!(&frame[..4], &[0x64, 0x00, 44, b'F']);
        assert_eq!(frame.len(), 44 + 5);
        assert_eq!(*frame.last().unwrap(), CRC_EOP);

        let frame = prog_page(MemoryType::Eeprom, &[0; 256]);
        assert_eq!(&frame[..4], &[0x64, 0x01, 0x00, b'E']);
    }

    #[test]
    fn test_read_page_frame() {
        assert_eq!(
            read_page(MemoryType::Flash, 128),
            [0x74, 0x00, 0x80, 0x46, 0x20]
        );
    }

    #[test]
    fn test_set_device_layout() {
        let m328p = &builtin_targets()[0];
        let frame = set_device(m328p);
        assert_eq!(frame[0], 0x42);
        assert_eq!(frame[1], 0x86);
        // Page size, EEPROM size, flash size (big endian)
        assert_eq!(&frame[13..15], &[0x00, 0x80]);
        assert_eq!(&frame[15..17], &[0x04, 0x00]);
        assert_eq!(&frame[17..21], &[0x00, 0x00, 0x80, 0x00]);
        assert_eq!(frame[21], CRC_EOP);

        let ext = set_device_ext(m328p);
        assert_eq!(ext, [0x45, 5, 4, 0xD7, 0xC2, 0, 0x20]);
    }

    #[test]
    fn test_response_bytes() {
        assert_eq!(Response::from_byte(0x14), Some(Response::InSync));
        assert_eq!(Response::from_byte(0x10), Some(Response::Ok));
        assert_eq!(Response::from_byte(0x42), None);
    }
}
