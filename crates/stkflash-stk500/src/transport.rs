//! Host-side link implementations
//!
//! A serial port carries the STK500 traffic; one of its modem control
//! lines can double as the reset line, the way USB-serial adapters with an
//! auto-reset capacitor are wired on Arduino-style boards.

#[cfg(feature = "std")]
pub use clock::StdClock;

#[cfg(feature = "serial")]
pub use serial::{ControlPin, SerialControlLine, SerialTransport};

#[cfg(feature = "std")]
mod clock {
    use std::time::{Duration, Instant};

    use stkflash_core::link::Clock;

    /// Monotonic clock over [`std::time::Instant`]
    #[derive(Debug, Clone, Copy)]
    pub struct StdClock {
        origin: Instant,
    }

    impl StdClock {
        /// Create a clock whose origin is now
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
            }
        }
    }

    impl Default for StdClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Clock for StdClock {
        fn now_ms(&self) -> u64 {
            self.origin.elapsed().as_millis() as u64
        }

        fn delay_ms(&mut self, ms: u32) {
            std::thread::sleep(Duration::from_millis(ms as u64));
        }
    }
}

#[cfg(feature = "serial")]
mod serial {
    //! Serial port transport implementation

    use std::io::{Read, Write};
    use std::time::Duration;

    use serialport::{ClearBuffer, FlowControl, SerialPort};
    use stkflash_core::error::{Error as CoreError, Result as CoreResult};
    use stkflash_core::link::{ResetLine, Transport};

    use crate::config::{DataBits, Parity, SessionConfig, StopBits};
    use crate::error::{FlashError, Result};

    fn data_bits(bits: DataBits) -> serialport::DataBits {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }

    fn parity(parity: Parity) -> serialport::Parity {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }

    fn stop_bits(bits: StopBits) -> serialport::StopBits {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }

    fn io_error(e: std::io::Error) -> CoreError {
        log::debug!("serial: {}", e);
        CoreError::IoError
    }

    fn port_error(e: serialport::Error) -> CoreError {
        log::debug!("serial: {}", e);
        match e.kind() {
            serialport::ErrorKind::InvalidInput => CoreError::UnsupportedSetting,
            serialport::ErrorKind::NoDevice => CoreError::ResourceUnavailable,
            _ => CoreError::IoError,
        }
    }

    /// Serial port transport
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
        device: String,
    }

    impl SerialTransport {
        /// Open a serial port at `baud` with the framing from `config`
        ///
        /// The engine switches to `config.baud` for the session and back to
        /// `baud` afterwards.
        pub fn open(device: &str, baud: u32, config: &SessionConfig) -> Result<Self> {
            let port = serialport::new(device, baud)
                .data_bits(data_bits(config.data_bits))
                .parity(parity(config.parity))
                .stop_bits(stop_bits(config.stop_bits))
                .flow_control(FlowControl::None)
                .timeout(Duration::from_millis(config.response_timeout_ms as u64))
                .open()
                .map_err(|e| FlashError::ResourceUnavailable(format!("{}: {}", device, e)))?;

            log::info!("Opened serial port {} at {} baud", device, baud);

            Ok(Self {
                port,
                device: device.to_string(),
            })
        }

        /// Device path the port was opened from
        pub fn device(&self) -> &str {
            &self.device
        }

        /// Get a reset line driven by one of the port's control lines
        pub fn control_line(&self, pin: ControlPin) -> Result<SerialControlLine> {
            let port = self.port.try_clone().map_err(|e| {
                FlashError::ResourceUnavailable(format!("{}: {}", self.device, e))
            })?;
            log::debug!("serial: driving reset with {:?} on {}", pin, self.device);
            Ok(SerialControlLine { port, pin })
        }
    }

    impl Transport for SerialTransport {
        fn write(&mut self, data: &[u8]) -> CoreResult<()> {
            self.port.write_all(data).map_err(io_error)
        }

        fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> CoreResult<usize> {
            self.port
                .set_timeout(Duration::from_millis(timeout_ms as u64))
                .map_err(port_error)?;

            match self.port.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(io_error(e)),
            }
        }

        fn flush(&mut self) -> CoreResult<()> {
            self.port.flush().map_err(io_error)
        }

        fn discard_input(&mut self) -> CoreResult<()> {
            self.port.clear(ClearBuffer::Input).map_err(port_error)
        }

        fn baud_rate(&self) -> CoreResult<u32> {
            self.port.baud_rate().map_err(port_error)
        }

        fn set_baud_rate(&mut self, baud: u32) -> CoreResult<()> {
            self.port.set_baud_rate(baud).map_err(port_error)
        }
    }

    /// Modem control line used as reset
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum ControlPin {
        /// Data Terminal Ready
        Dtr,
        /// Request To Send
        Rts,
    }

    /// Reset line on a serial port's DTR or RTS output
    ///
    /// The RS-232 levels are inverted: asserting the signal drives the
    /// adapter's pin low.
    pub struct SerialControlLine {
        port: Box<dyn SerialPort>,
        pin: ControlPin,
    }

    impl SerialControlLine {
        fn set_signal(&mut self, asserted: bool) -> CoreResult<()> {
            match self.pin {
                ControlPin::Dtr => self.port.write_data_terminal_ready(asserted),
                ControlPin::Rts => self.port.write_request_to_send(asserted),
            }
            .map_err(port_error)
        }
    }

    impl ResetLine for SerialControlLine {
        fn set_low(&mut self) -> CoreResult<()> {
            self.set_signal(true)
        }

        fn set_high(&mut self) -> CoreResult<()> {
            self.set_signal(false)
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use stkflash_core::link::Clock;

    #[test]
    fn test_std_clock_is_monotonic() {
        let mut clock = StdClock::new();
        let t0 = clock.now_ms();
        clock.delay_ms(5);
        assert!(clock.now_ms() >= t0 + 5);
    }
}
