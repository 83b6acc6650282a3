//! stkflash-dummy - Emulated STK500 bootloader target
//!
//! This crate provides an in-memory AVR with an Optiboot-like STK500 v1
//! bootloader behind a fake UART, reset line and clock. It's useful for
//! testing the programming engine without real hardware.
//!
//! The three link halves share one [`DummyTarget`], so a test can keep a
//! handle and inspect the flash contents and the command log after the
//! engine is done.
//!
//! Like the real bootloader, the emulation only listens after a reset pulse,
//! only at the configured baud rate, and stops listening once programming
//! mode is left. Time only advances through the [`DummyClock`] and through
//! reads that find nothing to return.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use stkflash_core::error::Result;
use stkflash_core::link::{Clock, ResetLine, Transport};

const CRC_EOP: u8 = 0x20;
const RESP_OK: u8 = 0x10;
const RESP_FAILED: u8 = 0x11;
const RESP_IN_SYNC: u8 = 0x14;
const RESP_NO_SYNC: u8 = 0x15;

const CMD_GET_SYNC: u8 = 0x30;
const CMD_GET_SIGN_ON: u8 = 0x31;
const CMD_SET_PARAMETER: u8 = 0x40;
const CMD_GET_PARAMETER: u8 = 0x41;
const CMD_SET_DEVICE: u8 = 0x42;
const CMD_SET_DEVICE_EXT: u8 = 0x45;
const CMD_ENTER_PROG_MODE: u8 = 0x50;
const CMD_LEAVE_PROG_MODE: u8 = 0x51;
const CMD_CHIP_ERASE: u8 = 0x52;
const CMD_LOAD_ADDRESS: u8 = 0x55;
const CMD_UNIVERSAL: u8 = 0x56;
const CMD_PROG_FLASH: u8 = 0x60;
const CMD_PROG_PAGE: u8 = 0x64;
const CMD_READ_FLASH: u8 = 0x70;
const CMD_READ_PAGE: u8 = 0x74;
const CMD_READ_SIGNATURE: u8 = 0x75;

/// Configuration for the emulated target
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Device signature
    pub signature: [u8; 3],
    /// Flash size in bytes
    pub flash_size: usize,
    /// EEPROM size in bytes
    pub eeprom_size: usize,
    /// Baud rate the bootloader listens at
    pub bootloader_baud: u32,
    /// Baud rate the fake UART starts at
    pub initial_baud: u32,
    /// `HW_VER` parameter
    pub hw_version: u8,
    /// `SW_MAJOR` parameter
    pub sw_major: u8,
    /// `SW_MINOR` parameter
    pub sw_minor: u8,
    /// Sign-on string, `None` for bootloaders that do not send one
    pub sign_on: Option<&'static str>,
    /// Word (true) or byte addressed `LoadAddress`
    pub word_addressing: bool,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            signature: [0x1E, 0x95, 0x0F], // ATmega328P
            flash_size: 32 * 1024,
            eeprom_size: 1024,
            bootloader_baud: 115_200,
            initial_baud: 115_200,
            hw_version: 0x03,
            sw_major: 8,
            sw_minor: 0,
            sign_on: None,
            word_addressing: true,
        }
    }
}

/// Misbehaviour to inject
#[derive(Debug, Clone, Default)]
pub struct DummyFaults {
    /// Never answer anything
    pub silent: bool,
    /// Answer `ChipErase` with `Failed`
    pub reject_erase: bool,
    /// Report this signature instead of the configured one
    pub signature: Option<[u8; 3]>,
    /// Flip a bit of this byte address in every `ReadPage` answer
    pub corrupt_readback_at: Option<u32>,
    /// Stop answering from the n-th `ProgPage` on (0-based)
    pub mute_after_pages: Option<usize>,
    /// Do not acknowledge `LeaveProgMode`
    pub ignore_leave: bool,
    /// Answer `GetParameter` with `Failed`
    pub reject_parameters: bool,
    /// Swallow the first request carrying this command byte
    pub lose_request: Option<u8>,
}

/// A page write seen by the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWrite {
    /// Memory type byte (`F` or `E`)
    pub memory: u8,
    /// Byte address
    pub address: u32,
    /// Number of bytes written
    pub len: usize,
}

struct Inner {
    config: DummyConfig,
    faults: DummyFaults,
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    link_baud: u32,
    now_ms: u64,
    in_reset: bool,
    listening: bool,
    pending: Vec<u8>,
    tx: VecDeque<u8>,
    address: u32,
    extended: u8,
    erased: bool,
    commands: Vec<u8>,
    page_writes: Vec<PageWrite>,
    reset_pulses: usize,
}

impl Inner {
    fn receive(&mut self, byte: u8) {
        if self.faults.silent
            || !self.listening
            || self.in_reset
            || self.link_baud != self.config.bootloader_baud
        {
            return;
        }

        self.pending.push(byte);
        let needed = match self.frame_len() {
            Some(n) => n,
            None => return,
        };
        if self.pending.len() < needed {
            return;
        }

        let frame = core::mem::take(&mut self.pending);
        if frame.last() != Some(&CRC_EOP) {
            log::trace!("dummy: frame {:02X?} without CRC_EOP", frame);
            self.tx.push_back(RESP_NO_SYNC);
            return;
        }
        self.commands.push(frame[0]);
        if self.faults.lose_request == Some(frame[0]) {
            self.faults.lose_request = None;
            log::trace!("dummy: dropping request {:02X?}", frame);
            return;
        }
        self.execute(&frame);
    }

    /// Total length of the frame in `pending`, once it can be known
    fn frame_len(&self) -> Option<usize> {
        let p = &self.pending;
        let n = match p[0] {
            CMD_GET_PARAMETER => 3,
            CMD_SET_PARAMETER => 4,
            CMD_SET_DEVICE => 22,
            CMD_SET_DEVICE_EXT => 7,
            CMD_LOAD_ADDRESS | CMD_PROG_FLASH => 4,
            CMD_UNIVERSAL => 6,
            CMD_READ_PAGE => 5,
            CMD_PROG_PAGE => {
                if p.len() < 3 {
                    return None;
                }
                let len = u16::from_be_bytes([p[1], p[2]]) as usize;
                4 + len + 1
            }
            _ => 2,
        };
        Some(n)
    }

    fn reply(&mut self, data: &[u8]) {
        self.tx.push_back(RESP_IN_SYNC);
        self.tx.extend(data.iter().copied());
        self.tx.push_back(RESP_OK);
    }

    fn fail(&mut self) {
        self.tx.push_back(RESP_IN_SYNC);
        self.tx.push_back(RESP_FAILED);
    }

    fn byte_address(&self) -> usize {
        let address = (self.extended as u32) << 16 | self.address;
        if self.config.word_addressing {
            (address as usize) * 2
        } else {
            address as usize
        }
    }

    fn execute(&mut self, frame: &[u8]) {
        match frame[0] {
            CMD_GET_PARAMETER => {
                if self.faults.reject_parameters {
                    self.fail();
                    return;
                }
                let value = match frame[1] {
                    0x80 => self.config.hw_version,
                    0x81 => self.config.sw_major,
                    0x82 => self.config.sw_minor,
                    _ => 0x03,
                };
                self.reply(&[value]);
            }
            CMD_GET_SIGN_ON => {
                let text = self.config.sign_on.unwrap_or("");
                self.reply(text.as_bytes());
            }
            CMD_READ_SIGNATURE => {
                let sig = self.faults.signature.unwrap_or(self.config.signature);
                self.reply(&sig);
            }
            CMD_CHIP_ERASE => {
                if self.faults.reject_erase {
                    self.fail();
                    return;
                }
                self.flash.fill(0xFF);
                self.erased = true;
                self.reply(&[]);
            }
            CMD_LOAD_ADDRESS => {
                self.address = u16::from_le_bytes([frame[1], frame[2]]) as u32;
                self.reply(&[]);
            }
            CMD_UNIVERSAL => {
                if frame[1] == 0x4D {
                    self.extended = frame[3];
                }
                self.reply(&[0x00]);
            }
            CMD_PROG_PAGE => self.prog_page(frame),
            CMD_READ_PAGE => self.read_page(frame),
            CMD_LEAVE_PROG_MODE => {
                // The bootloader jumps to the application
                self.listening = false;
                if !self.faults.ignore_leave {
                    self.reply(&[]);
                }
            }
            CMD_READ_FLASH => self.reply(&[0xFF, 0xFF]),
            CMD_GET_SYNC | CMD_SET_PARAMETER | CMD_SET_DEVICE | CMD_SET_DEVICE_EXT
            | CMD_ENTER_PROG_MODE | CMD_PROG_FLASH => self.reply(&[]),
            // Optiboot answers anything else with a plain acknowledgment
            _ => self.reply(&[]),
        }
    }

    fn prog_page(&mut self, frame: &[u8]) {
        let index = self
            .page_writes
            .iter()
            .filter(|w| w.memory == b'F')
            .count();
        if self.faults.mute_after_pages.is_some_and(|n| index >= n) {
            self.faults.silent = true;
            return;
        }

        let memory = frame[3];
        let data = &frame[4..frame.len() - 1];
        let start = self.byte_address();
        let mem = if memory == b'E' {
            &mut self.eeprom
        } else {
            &mut self.flash
        };
        if start + data.len() > mem.len() {
            self.fail();
            return;
        }
        // Programming can only clear bits
        for (cell, &b) in mem[start..start + data.len()].iter_mut().zip(data) {
            *cell &= b;
        }
        self.page_writes.push(PageWrite {
            memory,
            address: start as u32,
            len: data.len(),
        });
        self.reply(&[]);
    }

    fn read_page(&mut self, frame: &[u8]) {
        let len = u16::from_be_bytes([frame[1], frame[2]]) as usize;
        let start = self.byte_address();
        let mem = if frame[3] == b'E' {
            &self.eeprom
        } else {
            &self.flash
        };
        if start + len > mem.len() {
            self.fail();
            return;
        }
        let mut data = mem[start..start + len].to_vec();
        if let Some(bad) = self.faults.corrupt_readback_at {
            let bad = bad as usize;
            if (start..start + len).contains(&bad) {
                data[bad - start] ^= 0x01;
            }
        }
        self.reply(&data);
    }
}

/// Emulated target shared by its transport, reset line and clock
#[derive(Clone)]
pub struct DummyTarget {
    inner: Rc<RefCell<Inner>>,
}

impl DummyTarget {
    /// Create a target with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        let inner = Inner {
            flash: vec![0xFF; config.flash_size],
            eeprom: vec![0xFF; config.eeprom_size],
            link_baud: config.initial_baud,
            config,
            faults: DummyFaults::default(),
            now_ms: 0,
            in_reset: false,
            listening: false,
            pending: Vec::new(),
            tx: VecDeque::new(),
            address: 0,
            extended: 0,
            erased: false,
            commands: Vec::new(),
            page_writes: Vec::new(),
            reset_pulses: 0,
        };
        Self {
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    /// Create an ATmega328P running Optiboot
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Inject faults
    pub fn set_faults(&self, faults: DummyFaults) {
        self.inner.borrow_mut().faults = faults;
    }

    /// UART half
    pub fn transport(&self) -> DummyTransport {
        DummyTransport {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Reset line half
    pub fn reset_line(&self) -> DummyReset {
        DummyReset {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Clock half
    pub fn clock(&self) -> DummyClock {
        DummyClock {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Copy of the flash contents
    pub fn flash(&self) -> Vec<u8> {
        self.inner.borrow().flash.clone()
    }

    /// Overwrite flash contents starting at address 0
    pub fn load_flash(&self, data: &[u8]) {
        let mut inner = self.inner.borrow_mut();
        let len = core::cmp::min(data.len(), inner.flash.len());
        inner.flash[..len].copy_from_slice(&data[..len]);
    }

    /// Command bytes of every complete frame received, in order
    pub fn commands(&self) -> Vec<u8> {
        self.inner.borrow().commands.clone()
    }

    /// Number of frames received with the given command byte
    pub fn count(&self, command: u8) -> usize {
        self.inner
            .borrow()
            .commands
            .iter()
            .filter(|&&c| c == command)
            .count()
    }

    /// Page writes seen, in order
    pub fn page_writes(&self) -> Vec<PageWrite> {
        self.inner.borrow().page_writes.clone()
    }

    /// Whether a chip erase succeeded since creation
    pub fn erased(&self) -> bool {
        self.inner.borrow().erased
    }

    /// Number of complete reset pulses
    pub fn reset_pulses(&self) -> usize {
        self.inner.borrow().reset_pulses
    }

    /// Current baud rate of the fake UART
    pub fn link_baud(&self) -> u32 {
        self.inner.borrow().link_baud
    }

    /// Current emulated time
    pub fn now_ms(&self) -> u64 {
        self.inner.borrow().now_ms
    }
}

/// UART half of a [`DummyTarget`]
pub struct DummyTransport {
    inner: Rc<RefCell<Inner>>,
}

impl Transport for DummyTransport {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        for &b in data {
            inner.receive(b);
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if inner.tx.is_empty() {
            inner.now_ms += timeout_ms as u64;
            return Ok(0);
        }
        let mut n = 0;
        while n < buf.len() {
            match inner.tx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn discard_input(&mut self) -> Result<()> {
        self.inner.borrow_mut().tx.clear();
        Ok(())
    }

    fn baud_rate(&self) -> Result<u32> {
        Ok(self.inner.borrow().link_baud)
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.link_baud = baud;
        inner.pending.clear();
        Ok(())
    }
}

/// Reset line half of a [`DummyTarget`] (active low)
pub struct DummyReset {
    inner: Rc<RefCell<Inner>>,
}

impl ResetLine for DummyReset {
    fn set_low(&mut self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        inner.in_reset = true;
        inner.listening = false;
        inner.pending.clear();
        inner.tx.clear();
        Ok(())
    }

    fn set_high(&mut self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if inner.in_reset {
            inner.in_reset = false;
            inner.listening = true;
            inner.address = 0;
            inner.extended = 0;
            inner.reset_pulses += 1;
            log::trace!("dummy: reset released, bootloader listening");
        }
        Ok(())
    }
}

/// Clock half of a [`DummyTarget`]
pub struct DummyClock {
    inner: Rc<RefCell<Inner>>,
}

impl Clock for DummyClock {
    fn now_ms(&self) -> u64 {
        self.inner.borrow().now_ms
    }

    fn delay_ms(&mut self, ms: u32) {
        self.inner.borrow_mut().now_ms += ms as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booted() -> (DummyTarget, DummyTransport) {
        let target = DummyTarget::new_default();
        let mut reset = target.reset_line();
        reset.set_low().unwrap();
        reset.set_high().unwrap();
        let transport = target.transport();
        (target, transport)
    }

    fn exchange(t: &mut DummyTransport, frame: &[u8], n: usize) -> Vec<u8> {
        t.write(frame).unwrap();
        let mut buf = vec![0u8; n];
        let got = t.read_timeout(&mut buf, 10).unwrap();
        buf.truncate(got);
        buf
    }

    #[test]
    fn test_ignores_input_before_reset() {
        let target = DummyTarget::new_default();
        let mut t = target.transport();
        assert!(exchange(&mut t, &[CMD_GET_SYNC, CRC_EOP], 2).is_empty());
        assert_eq!(target.now_ms(), 10);
    }

    #[test]
    fn test_sync_and_signature() {
        let (target, mut t) = booted();
        assert_eq!(
            exchange(&mut t, &[CMD_GET_SYNC, CRC_EOP], 2),
            [RESP_IN_SYNC, RESP_OK]
        );
        assert_eq!(
            exchange(&mut t, &[CMD_READ_SIGNATURE, CRC_EOP], 5),
            [RESP_IN_SYNC, 0x1E, 0x95, 0x0F, RESP_OK]
        );
        assert_eq!(target.commands(), [CMD_GET_SYNC, CMD_READ_SIGNATURE]);
    }

    #[test]
    fn test_missing_eop_is_no_sync() {
        let (_target, mut t) = booted();
        assert_eq!(exchange(&mut t, &[CMD_GET_SYNC, 0x00], 2), [RESP_NO_SYNC]);
    }

    #[test]
    fn test_wrong_baud_is_ignored() {
        let (_target, mut t) = booted();
        t.set_baud_rate(57_600).unwrap();
        assert!(exchange(&mut t, &[CMD_GET_SYNC, CRC_EOP], 2).is_empty());
    }

    #[test]
    fn test_program_and_read_page() {
        let (target, mut t) = booted();
        exchange(&mut t, &[CMD_CHIP_ERASE, CRC_EOP], 2);
        // Word address 0x40 = byte address 0x80
        exchange(&mut t, &[CMD_LOAD_ADDRESS, 0x40, 0x00, CRC_EOP], 2);
        let mut frame = vec![CMD_PROG_PAGE, 0x00, 0x04, b'F', 1, 2, 3, 4];
        frame.push(CRC_EOP);
        assert_eq!(exchange(&mut t, &frame, 2), [RESP_IN_SYNC, RESP_OK]);
        assert_eq!(&target.flash()[0x80..0x84], &[1, 2, 3, 4]);
        assert_eq!(
            target.page_writes(),
            [PageWrite {
                memory: b'F',
                address: 0x80,
                len: 4
            }]
        );

        assert_eq!(
            exchange(&mut t, &[CMD_READ_PAGE, 0x00, 0x04, b'F', CRC_EOP], 6),
            [RESP_IN_SYNC, 1, 2, 3, 4, RESP_OK]
        );
    }

    #[test]
    fn test_extended_address() {
        let target = DummyTarget::new(DummyConfig {
            flash_size: 256 * 1024,
            ..DummyConfig::default()
        });
        let mut reset = target.reset_line();
        reset.set_low().unwrap();
        reset.set_high().unwrap();
        let mut t = target.transport();
        exchange(&mut t, &[CMD_UNIVERSAL, 0x4D, 0x00, 0x01, 0x00, CRC_EOP], 3);
        exchange(&mut t, &[CMD_LOAD_ADDRESS, 0x00, 0x00, CRC_EOP], 2);
        exchange(&mut t, &[CMD_PROG_PAGE, 0x00, 0x01, b'F', 0x42, CRC_EOP], 2);
        assert_eq!(target.flash()[0x2_0000], 0x42);
    }

    #[test]
    fn test_faults() {
        let (target, mut t) = booted();
        target.set_faults(DummyFaults {
            reject_erase: true,
            ..DummyFaults::default()
        });
        assert_eq!(
            exchange(&mut t, &[CMD_CHIP_ERASE, CRC_EOP], 2),
            [RESP_IN_SYNC, RESP_FAILED]
        );
        assert!(!target.erased());

        target.set_faults(DummyFaults {
            silent: true,
            ..DummyFaults::default()
        });
        assert!(exchange(&mut t, &[CMD_GET_SYNC, CRC_EOP], 2).is_empty());
    }

    #[test]
    fn test_leave_prog_mode_stops_listening() {
        let (_target, mut t) = booted();
        assert_eq!(
            exchange(&mut t, &[CMD_LEAVE_PROG_MODE, CRC_EOP], 2),
            [RESP_IN_SYNC, RESP_OK]
        );
        assert!(exchange(&mut t, &[CMD_GET_SYNC, CRC_EOP], 2).is_empty());
    }
}
