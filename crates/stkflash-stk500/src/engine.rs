//! STK500 programming engine
//!
//! [`Stk500`] owns the UART, the reset line and the clock for as long as it
//! lives. Each public operation runs one complete session: reset pulse,
//! sync, identification, programming mode and back. Every wait is bounded
//! by a deadline on the injected [`Clock`] and every retry loop has a
//! ceiling taken from [`SessionConfig`].

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use stkflash_core::ihex;
use stkflash_core::image::BinaryImage;
use stkflash_core::link::{Clock, ResetLine, Transport};
use stkflash_core::progress::FlashProgress;
use stkflash_core::target::{AddressMode, DeviceParameters, Signature};

use crate::config::{ResetPolarity, SessionConfig, VerifyPolicy};
use crate::error::{FlashError, Result, Step};
use crate::protocol::{self, param, Command, MemoryType, Response, MAX_BLOCK_SIZE};
use crate::session::{ProgrammingSession, SessionState};

/// Longest sign-on string accepted
const MAX_SIGN_ON_LEN: usize = 16;

/// Hardware and firmware version reported by the bootloader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloaderVersion {
    /// `HW_VER` parameter
    pub hardware: u8,
    /// `SW_MAJOR` parameter
    pub major: u8,
    /// `SW_MINOR` parameter
    pub minor: u8,
}

/// What identification found out about the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInfo {
    /// Device signature
    pub signature: Signature,
    /// Bootloader version, if read
    pub version: Option<BootloaderVersion>,
    /// Sign-on string, if requested and provided
    pub sign_on: Option<String>,
}

/// A page whose read-back differed from the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMismatch {
    /// Page index
    pub page: usize,
    /// Byte address of the first differing byte
    pub address: u32,
    /// Byte written
    pub expected: u8,
    /// Byte read back
    pub found: u8,
}

impl From<PageMismatch> for FlashError {
    fn from(m: PageMismatch) -> Self {
        FlashError::VerificationMismatch {
            page: m.page,
            address: m.address,
            expected: m.expected,
            found: m.found,
        }
    }
}

/// Outcome of a successful flash operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlashReport {
    /// Device signature
    pub signature: Option<Signature>,
    /// Bootloader version
    pub version: Option<BootloaderVersion>,
    /// Pages programmed
    pub pages_written: usize,
    /// Bytes programmed
    pub bytes_written: usize,
    /// Pages read back and compared
    pub pages_verified: usize,
    /// Verification failures tolerated under [`VerifyPolicy::Report`]
    pub mismatches: Vec<PageMismatch>,
    /// Requests re-sent after the target stayed silent
    pub retries: u32,
    /// Duration of the whole session
    pub elapsed_ms: u64,
}

impl FlashReport {
    /// Whether every verified page matched
    pub fn verified_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// STK500 v1 client
pub struct Stk500<T: Transport, R: ResetLine, C: Clock> {
    transport: T,
    reset: R,
    clock: C,
    config: SessionConfig,
    last_state: SessionState,
}

impl<T: Transport, R: ResetLine, C: Clock> Stk500<T, R, C> {
    /// Create an engine from its collaborators
    ///
    /// Nothing is sent until an operation is started.
    pub fn new(transport: T, reset: R, clock: C, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            reset,
            clock,
            config,
            last_state: SessionState::Idle,
        })
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the session configuration
    pub fn set_config(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Final state of the last operation
    pub fn last_state(&self) -> SessionState {
        self.last_state
    }

    /// Release the transport, reset line and clock
    pub fn into_parts(self) -> (T, R, C) {
        (self.transport, self.reset, self.clock)
    }

    /// Program `image` into the target's flash
    ///
    /// The image is rejected before any traffic if it does not fit.
    pub fn flash<P: FlashProgress + ?Sized>(
        &mut self,
        image: &BinaryImage,
        target: &DeviceParameters,
        progress: &mut P,
    ) -> Result<FlashReport> {
        if image.len() as u64 > target.flash_size as u64 {
            return Err(FlashError::ImageTooLarge {
                image: image.len(),
                flash: target.flash_size,
            });
        }
        check_page_size(target)?;

        let mut session = ProgrammingSession::new(self.clock.now_ms());
        let result = self.run_flash(&mut session, image, target, progress);
        self.finish(&mut session, result)
    }

    /// Decode Intel HEX `text` and program it
    pub fn flash_hex<P: FlashProgress + ?Sized>(
        &mut self,
        text: &[u8],
        target: &DeviceParameters,
        progress: &mut P,
    ) -> Result<FlashReport> {
        let image = ihex::decode(text)?;
        self.flash(&image, target, progress)
    }

    /// Reset the target and identify it without programming
    pub fn probe<P: FlashProgress + ?Sized>(&mut self, progress: &mut P) -> Result<TargetInfo> {
        let mut session = ProgrammingSession::new(self.clock.now_ms());
        let result = self.run_probe(&mut session, progress);
        self.finish(&mut session, result)
    }

    /// Read `len` bytes of flash starting at byte address `start`
    pub fn read_flash<P: FlashProgress + ?Sized>(
        &mut self,
        target: &DeviceParameters,
        start: u32,
        len: usize,
        progress: &mut P,
    ) -> Result<Vec<u8>> {
        check_page_size(target)?;
        if start as u64 + len as u64 > target.flash_size as u64 {
            return Err(FlashError::Config(alloc::format!(
                "read of {} bytes at 0x{:X} is beyond {} bytes of flash",
                len, start, target.flash_size
            )));
        }
        if target.address_mode == AddressMode::Word && start % 2 != 0 {
            return Err(FlashError::Config(String::from(
                "read start must be word aligned",
            )));
        }

        let mut session = ProgrammingSession::new(self.clock.now_ms());
        let result = self.run_read(&mut session, target, start, len, progress);
        self.finish(&mut session, result)
    }

    fn run_flash<P: FlashProgress + ?Sized>(
        &mut self,
        session: &mut ProgrammingSession,
        image: &BinaryImage,
        target: &DeviceParameters,
        progress: &mut P,
    ) -> Result<FlashReport> {
        self.reset_target(session)?;
        self.sync(session, progress)?;
        let info = self.identify(session, Some(target), progress)?;
        self.enter_prog_mode(session, Some(target))?;
        self.erase(session, progress)?;

        let mut report = self.program(session, image, target, progress)?;
        report.signature = session.signature;
        report.version = info.version;

        self.leave_prog_mode(session);
        report.retries = session.retries;
        report.elapsed_ms = self.clock.now_ms().saturating_sub(session.started_ms);
        progress.complete(report.bytes_written);
        log::info!(
            "stk500: wrote {} bytes in {} pages ({} ms)",
            report.bytes_written,
            report.pages_written,
            report.elapsed_ms
        );
        Ok(report)
    }

    fn run_probe<P: FlashProgress + ?Sized>(
        &mut self,
        session: &mut ProgrammingSession,
        progress: &mut P,
    ) -> Result<TargetInfo> {
        self.reset_target(session)?;
        self.sync(session, progress)?;
        let info = self.identify(session, None, progress)?;
        self.enter_prog_mode(session, None)?;
        self.leave_prog_mode(session);
        Ok(info)
    }

    fn run_read<P: FlashProgress + ?Sized>(
        &mut self,
        session: &mut ProgrammingSession,
        target: &DeviceParameters,
        start: u32,
        len: usize,
        progress: &mut P,
    ) -> Result<Vec<u8>> {
        self.reset_target(session)?;
        self.sync(session, progress)?;
        self.identify(session, Some(target), progress)?;
        self.enter_prog_mode(session, Some(target))?;

        progress.reading(len);
        let page_size = target.page_size as usize;
        let mut out = Vec::with_capacity(len);
        let mut address = start;
        let mut index = 0;
        while out.len() < len {
            let chunk = page_size.min(len - out.len());
            session.enter(SessionState::Reading { page: index });
            let data = self.read_block(session, target, address, chunk)?;
            out.extend_from_slice(&data);
            address += chunk as u32;
            index += 1;
            progress.read_progress(out.len());
        }

        self.leave_prog_mode(session);
        progress.complete(out.len());
        Ok(out)
    }

    /// Common exit path: leave programming mode after a failure, restore
    /// the link baud rate and record the terminal state
    fn finish<V>(&mut self, session: &mut ProgrammingSession, result: Result<V>) -> Result<V> {
        if let Err(e) = &result {
            log::debug!("stk500: session failed in {:?}: {:?}", session.state(), e);
            if session.in_prog_mode {
                self.leave_prog_mode(session);
            }
        }

        if let Some(saved) = session.saved_baud.take() {
            if saved != self.config.baud {
                match self.transport.set_baud_rate(saved) {
                    Ok(()) => log::debug!("stk500: restored baud rate {}", saved),
                    Err(e) => log::warn!("stk500: failed to restore baud rate {}: {:?}", saved, e),
                }
            }
        }

        session.enter(if result.is_ok() {
            SessionState::Done
        } else {
            SessionState::Failed
        });
        self.last_state = session.state();
        result
    }

    fn reset_target(&mut self, session: &mut ProgrammingSession) -> Result<()> {
        session.enter(SessionState::Resetting);

        let current = self.transport.baud_rate()?;
        session.saved_baud = Some(current);
        if current != self.config.baud {
            log::debug!(
                "stk500: switching baud rate {} -> {}",
                current,
                self.config.baud
            );
            self.transport.set_baud_rate(self.config.baud)?;
        }

        log::debug!(
            "stk500: reset pulse {} ms, settle {} ms",
            self.config.reset_pulse_ms,
            self.config.reset_settle_ms
        );
        self.set_reset(true)?;
        self.clock.delay_ms(self.config.reset_pulse_ms);
        self.set_reset(false)?;
        self.clock.delay_ms(self.config.reset_settle_ms);
        self.transport.discard_input()?;
        session.extended_address = None;
        Ok(())
    }

    fn set_reset(&mut self, asserted: bool) -> Result<()> {
        let low = match self.config.reset_polarity {
            ResetPolarity::ActiveLow => asserted,
            ResetPolarity::ActiveHigh => !asserted,
        };
        if low {
            self.reset.set_low()?;
        } else {
            self.reset.set_high()?;
        }
        Ok(())
    }

    fn sync<P: FlashProgress + ?Sized>(
        &mut self,
        session: &mut ProgrammingSession,
        progress: &mut P,
    ) -> Result<()> {
        session.enter(SessionState::AwaitingSync);
        let frame = protocol::simple(Command::GetSync);
        let expected = [Response::InSync as u8, Response::Ok as u8];

        for attempt in 1..=self.config.sync_attempts {
            self.transport.write(&frame)?;
            self.transport.flush()?;

            let mut resp = [0u8; 2];
            let n = self.read_with_deadline(&mut resp, self.config.sync_timeout_ms)?;
            if n == resp.len() && resp == expected {
                log::debug!("stk500: in sync after {} attempt(s)", attempt);
                progress.message("Target in sync");
                return Ok(());
            }

            log::trace!("stk500: sync attempt {} got {:02X?}", attempt, &resp[..n]);
            self.transport.discard_input()?;
        }

        log::debug!(
            "stk500: no sync after {} attempts",
            self.config.sync_attempts
        );
        Err(FlashError::ProtocolTimeout {
            step: Step::Sync,
            page: None,
        })
    }

    fn identify<P: FlashProgress + ?Sized>(
        &mut self,
        session: &mut ProgrammingSession,
        target: Option<&DeviceParameters>,
        progress: &mut P,
    ) -> Result<TargetInfo> {
        session.enter(SessionState::ReadingSignature);

        let version = if self.config.read_versions {
            self.read_versions(session)?
        } else {
            None
        };
        if let Some(v) = version {
            log::debug!(
                "stk500: hardware version {}, firmware {}.{}",
                v.hardware,
                v.major,
                v.minor
            );
        }

        let sign_on = if self.config.read_sign_on {
            self.read_sign_on(session)?
        } else {
            None
        };

        let mut sig = [0u8; 3];
        self.command(
            session,
            Step::ReadSignature,
            &protocol::simple(Command::ReadSignature),
            &mut sig,
            self.config.response_timeout_ms,
        )?;
        let signature = Signature(sig);
        session.signature = Some(signature);
        log::info!("stk500: device signature {}", signature);

        if let Some(target) = target {
            if target.matches_signature(&signature) {
                progress.message(&alloc::format!("Found {} ({})", target.name, signature));
            } else if self.config.check_signature {
                return Err(FlashError::SignatureMismatch {
                    expected: target.signature,
                    found: signature,
                });
            } else {
                log::warn!(
                    "stk500: signature {} does not match {} ({}), continuing",
                    signature,
                    target.name,
                    target.signature
                );
            }
        }

        Ok(TargetInfo {
            signature,
            version,
            sign_on,
        })
    }

    /// Version parameters are informational: a rejected parameter read
    /// yields `None`, only silence is fatal
    fn read_versions(
        &mut self,
        session: &mut ProgrammingSession,
    ) -> Result<Option<BootloaderVersion>> {
        let mut values = [0u8; 3];
        for (slot, id) in values
            .iter_mut()
            .zip([param::HW_VER, param::SW_MAJOR, param::SW_MINOR])
        {
            let mut value = [0u8; 1];
            match self.command(
                session,
                Step::ReadParameter,
                &protocol::get_parameter(id),
                &mut value,
                self.config.response_timeout_ms,
            ) {
                Ok(()) => *slot = value[0],
                Err(FlashError::ProtocolMismatch { response, .. }) => {
                    log::debug!(
                        "stk500: parameter 0x{:02X} rejected ({:02X?})",
                        id,
                        response
                    );
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Some(BootloaderVersion {
            hardware: values[0],
            major: values[1],
            minor: values[2],
        }))
    }

    /// The sign-on reply has no fixed length: `[InSync, text..., Ok]`
    fn read_sign_on(&mut self, session: &mut ProgrammingSession) -> Result<Option<String>> {
        let frame = protocol::simple(Command::GetSignOn);
        self.transport.write(&frame)?;
        self.transport.flush()?;

        let timeout = self.config.response_timeout_ms;
        let mut first = [0u8; 1];
        if self.read_with_deadline(&mut first, timeout)? == 0 {
            return Err(self.timeout(session, Step::SignOn));
        }
        if first[0] != Response::InSync as u8 {
            self.transport.discard_input()?;
            return Err(self.mismatch(session, Step::SignOn, Command::GetSignOn.byte(), vec![first[0]]));
        }

        let mut text = Vec::new();
        loop {
            let mut b = [0u8; 1];
            if self.read_with_deadline(&mut b, timeout)? == 0 {
                return Err(self.timeout(session, Step::SignOn));
            }
            if b[0] == Response::Ok as u8 {
                break;
            }
            text.push(b[0]);
            if text.len() > MAX_SIGN_ON_LEN {
                let mut response = vec![first[0]];
                response.extend_from_slice(&text);
                self.transport.discard_input()?;
                return Err(self.mismatch(session, Step::SignOn, Command::GetSignOn.byte(), response));
            }
        }

        if text.is_empty() {
            return Ok(None);
        }
        let sign_on = String::from_utf8_lossy(&text).into_owned();
        log::debug!("stk500: sign-on \"{}\"", sign_on);
        Ok(Some(sign_on))
    }

    fn enter_prog_mode(
        &mut self,
        session: &mut ProgrammingSession,
        target: Option<&DeviceParameters>,
    ) -> Result<()> {
        let timeout = self.config.response_timeout_ms;
        if let (true, Some(target)) = (self.config.send_device_parameters, target) {
            session.enter(SessionState::SettingDevice);
            log::debug!("stk500: sending device parameters for {}", target.name);
            self.command(
                session,
                Step::SetDevice,
                &protocol::set_device(target),
                &mut [],
                timeout,
            )?;
            self.command(
                session,
                Step::SetDeviceExt,
                &protocol::set_device_ext(target),
                &mut [],
                timeout,
            )?;
        }

        self.command(
            session,
            Step::EnterProgMode,
            &protocol::simple(Command::EnterProgMode),
            &mut [],
            timeout,
        )?;
        session.in_prog_mode = true;
        session.enter(SessionState::InProgMode);
        log::debug!("stk500: in programming mode");
        Ok(())
    }

    fn erase<P: FlashProgress + ?Sized>(
        &mut self,
        session: &mut ProgrammingSession,
        progress: &mut P,
    ) -> Result<()> {
        session.enter(SessionState::Erasing);
        progress.erasing();
        self.command(
            session,
            Step::ChipErase,
            &protocol::simple(Command::ChipErase),
            &mut [],
            self.config.erase_timeout_ms,
        )?;
        log::debug!("stk500: chip erased");
        Ok(())
    }

    fn program<P: FlashProgress + ?Sized>(
        &mut self,
        session: &mut ProgrammingSession,
        image: &BinaryImage,
        target: &DeviceParameters,
        progress: &mut P,
    ) -> Result<FlashReport> {
        let page_size = target.page_size as usize;
        let verify = self.config.verify;
        let mut report = FlashReport::default();

        progress.writing(image.page_count(page_size), image.len());

        for page in image.pages(page_size) {
            session.enter(SessionState::Programming { page: page.index });
            self.load_address(session, target, page.address)?;
            let frame = protocol::prog_page(MemoryType::Flash, page.data);
            self.command(
                session,
                Step::ProgramPage,
                &frame,
                &mut [],
                self.config.response_timeout_ms,
            )?;
            report.pages_written += 1;
            report.bytes_written += page.data.len();
            log::trace!(
                "stk500: page {} ({} bytes at 0x{:05X}) written",
                page.index,
                page.data.len(),
                page.address
            );
            progress.page_written(page.index, report.bytes_written);

            if !verify.enabled() {
                continue;
            }

            session.enter(SessionState::Verifying { page: page.index });
            let readback = self.read_block(session, target, page.address, page.data.len())?;
            report.pages_verified += 1;
            let mismatch = page
                .data
                .iter()
                .zip(&readback)
                .position(|(a, b)| a != b)
                .map(|i| PageMismatch {
                    page: page.index,
                    address: page.address + i as u32,
                    expected: page.data[i],
                    found: readback[i],
                });
            progress.page_verified(page.index, mismatch.is_none());

            if let Some(m) = mismatch {
                log::warn!(
                    "stk500: page {} differs at 0x{:05X}: wrote 0x{:02X}, read 0x{:02X}",
                    m.page,
                    m.address,
                    m.expected,
                    m.found
                );
                if verify == VerifyPolicy::Abort {
                    return Err(m.into());
                }
                report.mismatches.push(m);
            }
        }

        Ok(report)
    }

    fn read_block(
        &mut self,
        session: &mut ProgrammingSession,
        target: &DeviceParameters,
        address: u32,
        len: usize,
    ) -> Result<Vec<u8>> {
        self.load_address(session, target, address)?;
        let mut data = vec![0u8; len];
        self.command(
            session,
            Step::ReadPage,
            &protocol::read_page(MemoryType::Flash, len),
            &mut data,
            self.config.response_timeout_ms,
        )?;
        Ok(data)
    }

    /// Send `LoadAddress` for byte address `address`, selecting the
    /// extended segment first when the word address needs more than 16 bits
    fn load_address(
        &mut self,
        session: &mut ProgrammingSession,
        target: &DeviceParameters,
        address: u32,
    ) -> Result<()> {
        let value = target.address_mode.load_address(address);
        let extended = (value >> 16) as u8;
        let timeout = self.config.response_timeout_ms;

        if extended != session.extended_address.unwrap_or(0) {
            let mut ack = [0u8; 1];
            self.command(
                session,
                Step::LoadAddress,
                &protocol::load_extended_address(extended),
                &mut ack,
                timeout,
            )?;
            session.extended_address = Some(extended);
        }

        self.command(
            session,
            Step::LoadAddress,
            &protocol::load_address(value),
            &mut [],
            timeout,
        )
    }

    /// Best effort: a missing acknowledgment never fails a session
    fn leave_prog_mode(&mut self, session: &mut ProgrammingSession) {
        session.enter(SessionState::LeavingProgMode);
        match self.command(
            session,
            Step::LeaveProgMode,
            &protocol::simple(Command::LeaveProgMode),
            &mut [],
            self.config.response_timeout_ms,
        ) {
            Ok(()) => log::debug!("stk500: left programming mode"),
            Err(e) => log::warn!("stk500: no acknowledgment for leave programming mode: {:?}", e),
        }
        session.in_prog_mode = false;
    }

    /// One request/response exchange: expects `[InSync, reply..., Ok]`
    ///
    /// A request that gets no answer at all is re-sent up to
    /// `command_retries` times.
    fn command(
        &mut self,
        session: &mut ProgrammingSession,
        step: Step,
        frame: &[u8],
        reply: &mut [u8],
        timeout_ms: u32,
    ) -> Result<()> {
        let command = frame.first().copied().unwrap_or(0);
        let mut attempt = 0;

        loop {
            log::trace!("stk500: -> {:02X?}", frame);
            self.transport.write(frame)?;
            self.transport.flush()?;

            let mut first = [0u8; 1];
            if self.read_with_deadline(&mut first, timeout_ms)? == 1 {
                if first[0] != Response::InSync as u8 {
                    self.transport.discard_input()?;
                    return Err(self.mismatch(session, step, command, vec![first[0]]));
                }
                break;
            }

            if attempt >= self.config.command_retries {
                return Err(self.timeout(session, step));
            }
            attempt += 1;
            session.retries += 1;
            log::debug!(
                "stk500: no answer to 0x{:02X}, retry {}/{}",
                command,
                attempt,
                self.config.command_retries
            );
            self.transport.discard_input()?;
        }

        let mut rest = vec![0u8; reply.len() + 1];
        let n = self.read_with_deadline(&mut rest, timeout_ms)?;
        if n == 0 {
            return Err(self.timeout(session, step));
        }
        if n < rest.len() || rest[reply.len()] != Response::Ok as u8 {
            let mut response = vec![Response::InSync as u8];
            response.extend_from_slice(&rest[..n]);
            self.transport.discard_input()?;
            return Err(self.mismatch(session, step, command, response));
        }

        log::trace!("stk500: <- {:02X?}", &rest[..reply.len()]);
        reply.copy_from_slice(&rest[..reply.len()]);
        Ok(())
    }

    /// Fill `buf` from the transport until it is full or `timeout_ms`
    /// elapsed on the engine clock
    fn read_with_deadline(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
        let deadline = self.clock.now_ms() + timeout_ms as u64;
        let mut got = 0;
        while got < buf.len() {
            let now = self.clock.now_ms();
            if now >= deadline {
                break;
            }
            let remaining = (deadline - now).min(u32::MAX as u64) as u32;
            let n = self.transport.read_timeout(&mut buf[got..], remaining)?;
            if n == 0 {
                break;
            }
            got += n;
        }
        Ok(got)
    }

    fn timeout(&self, session: &ProgrammingSession, step: Step) -> FlashError {
        FlashError::ProtocolTimeout {
            step,
            page: session.page(),
        }
    }

    fn mismatch(
        &self,
        session: &ProgrammingSession,
        step: Step,
        command: u8,
        response: Vec<u8>,
    ) -> FlashError {
        log::debug!(
            "stk500: command 0x{:02X} answered with {:02X?}",
            command,
            response
        );
        FlashError::ProtocolMismatch {
            step,
            command,
            response,
            page: session.page(),
        }
    }
}

fn check_page_size(target: &DeviceParameters) -> Result<()> {
    let page_size = target.page_size as usize;
    if page_size == 0 || page_size > MAX_BLOCK_SIZE {
        return Err(FlashError::Config(alloc::format!(
            "{}: unsupported page size {}",
            target.name, page_size
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stkflash_core::progress::NoProgress;
    use stkflash_core::target::builtin_targets;
    use stkflash_dummy::{DummyClock, DummyConfig, DummyFaults, DummyReset, DummyTarget, DummyTransport};

    type DummyStk = Stk500<DummyTransport, DummyReset, DummyClock>;

    fn target(name: &str) -> DeviceParameters {
        builtin_targets()
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    }

    fn engine(dummy: &DummyTarget, config: SessionConfig) -> DummyStk {
        Stk500::new(dummy.transport(), dummy.reset_line(), dummy.clock(), config).unwrap()
    }

    fn image(len: usize) -> BinaryImage {
        let data = (0..len).map(|i| (i * 7 + 1) as u8).collect();
        BinaryImage::from_bytes(data).unwrap()
    }

    #[test]
    fn test_flash_two_pages() {
        let dummy = DummyTarget::new_default();
        let mut stk = engine(&dummy, SessionConfig::default());
        let img = image(256);

        let report = stk
            .flash(&img, &target("ATmega328P"), &mut NoProgress)
            .unwrap();

        assert_eq!(report.pages_written, 2);
        assert_eq!(report.bytes_written, 256);
        assert_eq!(report.signature, Some(Signature([0x1E, 0x95, 0x0F])));
        assert_eq!(report.retries, 0);
        assert_eq!(
            report.version,
            Some(BootloaderVersion {
                hardware: 3,
                major: 8,
                minor: 0
            })
        );
        assert_eq!(dummy.count(Command::LoadAddress.byte()), 2);
        assert_eq!(dummy.count(Command::ProgPage.byte()), 2);
        assert_eq!(dummy.commands().last(), Some(&Command::LeaveProgMode.byte()));
        assert_eq!(&dummy.flash()[..256], img.as_bytes());
        assert_eq!(dummy.reset_pulses(), 1);
        assert_eq!(stk.last_state(), SessionState::Done);
    }

    #[test]
    fn test_short_last_page() {
        let dummy = DummyTarget::new_default();
        let mut stk = engine(&dummy, SessionConfig::default());

        stk.flash(&image(300), &target("ATmega328P"), &mut NoProgress)
            .unwrap();

        let lens: Vec<usize> = dummy.page_writes().iter().map(|w| w.len).collect();
        assert_eq!(lens, [128, 128, 44]);
        let addrs: Vec<u32> = dummy.page_writes().iter().map(|w| w.address).collect();
        assert_eq!(addrs, [0, 128, 256]);
    }

    #[test]
    fn test_byte_addressed_target() {
        let dummy = DummyTarget::new(DummyConfig {
            word_addressing: false,
            ..DummyConfig::default()
        });
        let config = SessionConfig::default().with_verify(VerifyPolicy::Abort);
        let mut stk = engine(&dummy, config);
        let part = DeviceParameters {
            address_mode: AddressMode::Byte,
            ..target("ATmega328P")
        };
        let img = image(300);

        let report = stk.flash(&img, &part, &mut NoProgress).unwrap();

        assert_eq!(report.pages_verified, 3);
        let addrs: Vec<u32> = dummy.page_writes().iter().map(|w| w.address).collect();
        assert_eq!(addrs, [0, 128, 256]);
        assert_eq!(&dummy.flash()[..300], img.as_bytes());
        assert_eq!(dummy.flash()[300], 0xFF);
    }

    #[test]
    fn test_silent_request_is_resent() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            lose_request: Some(Command::ProgPage.byte()),
            ..DummyFaults::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());
        let img = image(256);

        let report = stk
            .flash(&img, &target("ATmega328P"), &mut NoProgress)
            .unwrap();

        assert_eq!(report.retries, 1);
        assert_eq!(report.pages_written, 2);
        assert_eq!(dummy.count(Command::ProgPage.byte()), 3);
        assert_eq!(dummy.page_writes().len(), 2);
        assert_eq!(&dummy.flash()[..256], img.as_bytes());
    }

    #[test]
    fn test_erase_precedes_programming() {
        let dummy = DummyTarget::new_default();
        let mut stk = engine(&dummy, SessionConfig::default());
        stk.flash(&image(64), &target("ATmega328P"), &mut NoProgress)
            .unwrap();

        let cmds = dummy.commands();
        let erase = cmds
            .iter()
            .position(|&c| c == Command::ChipErase.byte())
            .unwrap();
        let first_page = cmds
            .iter()
            .position(|&c| c == Command::ProgPage.byte())
            .unwrap();
        assert!(erase < first_page);
        assert!(dummy.erased());
    }

    #[test]
    fn test_rejected_erase_writes_nothing() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            reject_erase: true,
            ..DummyFaults::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());

        let err = stk
            .flash(&image(256), &target("ATmega328P"), &mut NoProgress)
            .unwrap_err();

        assert_eq!(err.step(), Some(Step::ChipErase));
        assert!(matches!(err, FlashError::ProtocolMismatch { .. }));
        assert_eq!(dummy.count(Command::ProgPage.byte()), 0);
        // Programming mode was entered, so it is left again
        assert_eq!(dummy.commands().last(), Some(&Command::LeaveProgMode.byte()));
        assert_eq!(stk.last_state(), SessionState::Failed);
    }

    #[test]
    fn test_silent_target_times_out_in_sync() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            silent: true,
            ..DummyFaults::default()
        });
        let config = SessionConfig::default();
        let budget = config.reset_pulse_ms as u64
            + config.reset_settle_ms as u64
            + config.sync_attempts as u64 * config.sync_timeout_ms as u64;
        let mut stk = engine(&dummy, config);

        let err = stk
            .flash(&image(16), &target("ATmega328P"), &mut NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            FlashError::ProtocolTimeout {
                step: Step::Sync,
                page: None
            }
        ));
        assert!(dummy.now_ms() <= budget);
        assert!(dummy.commands().is_empty());
    }

    #[test]
    fn test_wrong_baud_never_syncs() {
        let dummy = DummyTarget::new(DummyConfig {
            bootloader_baud: 57_600,
            ..DummyConfig::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());

        let err = stk.probe(&mut NoProgress).unwrap_err();
        assert_eq!(err.step(), Some(Step::Sync));
    }

    #[test]
    fn test_baud_restored() {
        let dummy = DummyTarget::new(DummyConfig {
            initial_baud: 9_600,
            ..DummyConfig::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());
        stk.flash(&image(16), &target("ATmega328P"), &mut NoProgress)
            .unwrap();
        assert_eq!(dummy.link_baud(), 9_600);

        dummy.set_faults(DummyFaults {
            silent: true,
            ..DummyFaults::default()
        });
        assert!(stk.probe(&mut NoProgress).is_err());
        assert_eq!(dummy.link_baud(), 9_600);
    }

    #[test]
    fn test_verify_report_collects_mismatch() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            corrupt_readback_at: Some(0x90),
            ..DummyFaults::default()
        });
        let config = SessionConfig::default().with_verify(VerifyPolicy::Report);
        let mut stk = engine(&dummy, config);
        let img = image(256);

        let report = stk
            .flash(&img, &target("ATmega328P"), &mut NoProgress)
            .unwrap();

        assert_eq!(report.pages_verified, 2);
        assert!(!report.verified_ok());
        assert_eq!(
            report.mismatches,
            [PageMismatch {
                page: 1,
                address: 0x90,
                expected: img.as_bytes()[0x90],
                found: img.as_bytes()[0x90] ^ 0x01,
            }]
        );
        assert_eq!(dummy.count(Command::ReadPage.byte()), 2);
    }

    #[test]
    fn test_verify_abort_stops_at_bad_page() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            corrupt_readback_at: Some(0x10),
            ..DummyFaults::default()
        });
        let config = SessionConfig::default().with_verify(VerifyPolicy::Abort);
        let mut stk = engine(&dummy, config);

        let err = stk
            .flash(&image(512), &target("ATmega328P"), &mut NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            FlashError::VerificationMismatch {
                page: 0,
                address: 0x10,
                ..
            }
        ));
        assert_eq!(dummy.count(Command::ProgPage.byte()), 1);
        assert_eq!(dummy.commands().last(), Some(&Command::LeaveProgMode.byte()));
    }

    #[test]
    fn test_signature_mismatch() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            signature: Some([0x1E, 0x94, 0x06]),
            ..DummyFaults::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());

        let err = stk
            .flash(&image(16), &target("ATmega328P"), &mut NoProgress)
            .unwrap_err();
        assert_eq!(
            err,
            FlashError::SignatureMismatch {
                expected: Signature([0x1E, 0x95, 0x0F]),
                found: Signature([0x1E, 0x94, 0x06]),
            }
        );
        assert_eq!(dummy.count(Command::EnterProgMode.byte()), 0);

        // Unchecked signatures only warn
        stk.set_config(SessionConfig::default().with_check_signature(false))
            .unwrap();
        assert!(stk
            .flash(&image(16), &target("ATmega328P"), &mut NoProgress)
            .is_ok());
    }

    #[test]
    fn test_image_too_large_sends_nothing() {
        let dummy = DummyTarget::new_default();
        let mut stk = engine(&dummy, SessionConfig::default());

        let err = stk
            .flash(&image(40 * 1024), &target("ATmega328P"), &mut NoProgress)
            .unwrap_err();

        assert_eq!(
            err,
            FlashError::ImageTooLarge {
                image: 40 * 1024,
                flash: 32 * 1024
            }
        );
        assert_eq!(dummy.reset_pulses(), 0);
        assert!(dummy.commands().is_empty());
    }

    #[test]
    fn test_lost_page_ack_reports_page() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            mute_after_pages: Some(1),
            ..DummyFaults::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());

        let err = stk
            .flash(&image(256), &target("ATmega328P"), &mut NoProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            FlashError::ProtocolTimeout {
                step: Step::ProgramPage,
                page: Some(1)
            }
        ));
    }

    #[test]
    fn test_missing_leave_ack_is_not_fatal() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            ignore_leave: true,
            ..DummyFaults::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());

        assert!(stk
            .flash(&image(16), &target("ATmega328P"), &mut NoProgress)
            .is_ok());
        assert_eq!(stk.last_state(), SessionState::Done);
    }

    #[test]
    fn test_rejected_parameters_are_not_fatal() {
        let dummy = DummyTarget::new_default();
        dummy.set_faults(DummyFaults {
            reject_parameters: true,
            ..DummyFaults::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());

        let info = stk.probe(&mut NoProgress).unwrap();
        assert_eq!(info.version, None);
        assert_eq!(info.signature, Signature([0x1E, 0x95, 0x0F]));
    }

    #[test]
    fn test_probe_with_sign_on() {
        let dummy = DummyTarget::new(DummyConfig {
            sign_on: Some("AVR ISP"),
            ..DummyConfig::default()
        });
        let config = SessionConfig {
            read_sign_on: true,
            ..SessionConfig::default()
        };
        let mut stk = engine(&dummy, config);

        let info = stk.probe(&mut NoProgress).unwrap();
        assert_eq!(info.sign_on.as_deref(), Some("AVR ISP"));
        assert_eq!(dummy.count(Command::ChipErase.byte()), 0);
        assert_eq!(dummy.commands().last(), Some(&Command::LeaveProgMode.byte()));
    }

    #[test]
    fn test_device_parameters_sent_when_enabled() {
        let dummy = DummyTarget::new_default();
        let config = SessionConfig {
            send_device_parameters: true,
            ..SessionConfig::default()
        };
        let mut stk = engine(&dummy, config);
        stk.flash(&image(16), &target("ATmega328P"), &mut NoProgress)
            .unwrap();

        let cmds = dummy.commands();
        let set_device = cmds
            .iter()
            .position(|&c| c == Command::SetDevice.byte())
            .unwrap();
        let enter = cmds
            .iter()
            .position(|&c| c == Command::EnterProgMode.byte())
            .unwrap();
        assert_eq!(cmds[set_device + 1], Command::SetDeviceExt.byte());
        assert!(set_device < enter);
    }

    #[test]
    fn test_read_flash() {
        let dummy = DummyTarget::new_default();
        let img = image(300);
        dummy.load_flash(img.as_bytes());
        let mut stk = engine(&dummy, SessionConfig::default());

        let data = stk
            .read_flash(&target("ATmega328P"), 0, 300, &mut NoProgress)
            .unwrap();
        assert_eq!(data, img.as_bytes());
        assert_eq!(dummy.count(Command::ReadPage.byte()), 3);
        assert_eq!(dummy.count(Command::ChipErase.byte()), 0);

        let err = stk
            .read_flash(&target("ATmega328P"), 32 * 1024 - 16, 32, &mut NoProgress)
            .unwrap_err();
        assert!(matches!(err, FlashError::Config(_)));
        assert!(stk
            .read_flash(&target("ATmega328P"), 1, 16, &mut NoProgress)
            .is_err());
    }

    #[test]
    fn test_extended_address_for_large_parts() {
        let dummy = DummyTarget::new(DummyConfig {
            signature: [0x1E, 0x98, 0x01],
            flash_size: 256 * 1024,
            eeprom_size: 4096,
            ..DummyConfig::default()
        });
        let mut stk = engine(&dummy, SessionConfig::default());
        let mut img = BinaryImage::new();
        img.write_at(0x1_FFF0, &[0x11; 16]).unwrap();
        img.write_at(0x2_0000, &[0x42; 16]).unwrap();

        stk.flash(&img, &target("ATmega2560"), &mut NoProgress)
            .unwrap();

        let flash = dummy.flash();
        assert_eq!(&flash[0x1_FFF0..0x2_0000], &[0x11; 16]);
        assert_eq!(&flash[0x2_0000..0x2_0010], &[0x42; 16]);
        assert_eq!(dummy.count(Command::Universal.byte()), 1);
    }

    #[test]
    fn test_flash_hex() {
        let dummy = DummyTarget::new_default();
        let mut stk = engine(&dummy, SessionConfig::default());
        let text = b":0400000001020304F2\n:00000001FF\n";

        let report = stk
            .flash_hex(text, &target("ATmega328P"), &mut NoProgress)
            .unwrap();
        assert_eq!(report.bytes_written, 4);
        assert_eq!(&dummy.flash()[..4], &[1, 2, 3, 4]);

        let err = stk
            .flash_hex(
                b":0400000001020304F3\n:00000001FF\n",
                &target("ATmega328P"),
                &mut NoProgress,
            )
            .unwrap_err();
        assert!(matches!(err, FlashError::Decode(_)));
        assert_eq!(dummy.reset_pulses(), 1);
    }

    #[test]
    fn test_active_high_reset_inverts_pulse() {
        let dummy = DummyTarget::new_default();
        let config = SessionConfig::default().with_reset_polarity(ResetPolarity::ActiveHigh);
        let mut stk = engine(&dummy, config);

        // The dummy boots on a low-to-high edge; an inverted pulse ends low
        assert!(stk.probe(&mut NoProgress).is_err());
        assert_eq!(dummy.reset_pulses(), 0);
    }
}
