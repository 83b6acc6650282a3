//! Link abstractions between a programming engine and the target
//!
//! An engine talks to the target through three collaborators it owns for
//! the length of a session:
//!
//! - a [`Transport`], the UART
//! - a [`ResetLine`], the digital line wired to the target's reset pin
//! - a [`Clock`], the monotonic time source for every bounded wait
//!
//! Implementations live in the device crates (serial port, Linux GPIO,
//! in-memory emulator).

use crate::error::Result;

/// A byte-oriented serial link
pub trait Transport {
    /// Write all of `data`
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`
    ///
    /// Returns the number of bytes read, or 0 if nothing arrived in time.
    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize>;

    /// Flush any buffered output
    fn flush(&mut self) -> Result<()>;

    /// Drop any bytes received but not yet read
    fn discard_input(&mut self) -> Result<()>;

    /// Current baud rate
    fn baud_rate(&self) -> Result<u32>;

    /// Change the baud rate
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;
}

/// A digital output driving the target's reset pin
///
/// `set_low` asserts reset on an active-low AVR reset pin. Inverting
/// hardware is handled by the implementation.
pub trait ResetLine {
    /// Drive the line low
    fn set_low(&mut self) -> Result<()>;

    /// Drive the line high
    fn set_high(&mut self) -> Result<()>;
}

/// Monotonic time source
pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin
    fn now_ms(&self) -> u64;

    /// Block for `ms` milliseconds
    fn delay_ms(&mut self, ms: u32);
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
        (**self).read_timeout(buf, timeout_ms)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn baud_rate(&self) -> Result<u32> {
        (**self).baud_rate()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baud_rate(baud)
    }
}

impl<R: ResetLine + ?Sized> ResetLine for &mut R {
    fn set_low(&mut self) -> Result<()> {
        (**self).set_low()
    }

    fn set_high(&mut self) -> Result<()> {
        (**self).set_high()
    }
}

impl<C: Clock + ?Sized> Clock for &mut C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

#[cfg(feature = "alloc")]
impl<T: Transport + ?Sized> Transport for alloc::boxed::Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize> {
        (**self).read_timeout(buf, timeout_ms)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn discard_input(&mut self) -> Result<()> {
        (**self).discard_input()
    }

    fn baud_rate(&self) -> Result<u32> {
        (**self).baud_rate()
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        (**self).set_baud_rate(baud)
    }
}

#[cfg(feature = "alloc")]
impl<R: ResetLine + ?Sized> ResetLine for alloc::boxed::Box<R> {
    fn set_low(&mut self) -> Result<()> {
        (**self).set_low()
    }

    fn set_high(&mut self) -> Result<()> {
        (**self).set_high()
    }
}

#[cfg(feature = "alloc")]
impl<C: Clock + ?Sized> Clock for alloc::boxed::Box<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }

    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

/// Reset line that does nothing
///
/// For targets reset by hand or by a USB-serial chip's auto-reset circuit.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReset;

impl ResetLine for NoReset {
    fn set_low(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reset line wrapper swapping high and low
#[derive(Debug, Clone)]
pub struct Inverted<R>(pub R);

impl<R: ResetLine> ResetLine for Inverted<R> {
    fn set_low(&mut self) -> Result<()> {
        self.0.set_high()
    }

    fn set_high(&mut self) -> Result<()> {
        self.0.set_low()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        levels: [Option<bool>; 4],
        n: usize,
    }

    impl ResetLine for Recorder {
        fn set_low(&mut self) -> Result<()> {
            self.levels[self.n] = Some(false);
            self.n += 1;
            Ok(())
        }

        fn set_high(&mut self) -> Result<()> {
            self.levels[self.n] = Some(true);
            self.n += 1;
            Ok(())
        }
    }

    #[test]
    fn test_inverted_reset_line() {
        let mut line = Inverted(Recorder::default());
        line.set_low().unwrap();
        line.set_high().unwrap();
        assert_eq!(line.0.levels[..2], [Some(true), Some(false)]);
    }
}
