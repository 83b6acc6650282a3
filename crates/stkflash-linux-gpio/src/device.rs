//! GPIO reset line implementation
//!
//! Drives the target's RESET pin from one GPIO output through the Linux
//! character device interface. The line is requested high so the target
//! keeps running until the engine pulses it.

use crate::error::{LinuxGpioError, Result};

use gpiocdev::line::{Offset, Value};
use gpiocdev::request::{Config, Request};

use stkflash_core::error::{Error as CoreError, Result as CoreResult};
use stkflash_core::link::ResetLine;

/// Consumer label shown by `gpioinfo`
const CONSUMER: &str = "stkflash";

/// Configuration for opening a GPIO reset line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GpioResetConfig {
    /// Device path (e.g., "/dev/gpiochip0")
    pub device: String,
    /// Line offset wired to RESET
    pub line: Offset,
}

impl GpioResetConfig {
    /// Create a new configuration with the given device path and line
    pub fn new(device: impl Into<String>, line: Offset) -> Self {
        Self {
            device: device.into(),
            line,
        }
    }
}

/// Reset line driven by a Linux GPIO
pub struct GpioResetLine {
    request: Request,
    line: Offset,
}

impl GpioResetLine {
    /// Request the line as an output, initially high
    pub fn open(config: &GpioResetConfig) -> Result<Self> {
        if config.device.is_empty() {
            return Err(LinuxGpioError::NoDevice);
        }

        log::debug!(
            "linux_gpio: requesting line {} on {}",
            config.line,
            config.device
        );

        let mut req_config = Config::default();
        req_config.with_line(config.line).as_output(Value::Active);

        let request = Request::from_config(req_config)
            .on_chip(&config.device)
            .with_consumer(CONSUMER)
            .request()
            .map_err(|source| LinuxGpioError::LineRequestFailed {
                path: config.device.clone(),
                line: config.line,
                source,
            })?;

        log::info!(
            "linux_gpio: reset on {} line {}",
            config.device,
            config.line
        );

        Ok(Self {
            request,
            line: config.line,
        })
    }

    fn set(&mut self, value: Value) -> CoreResult<()> {
        self.request.set_value(self.line, value).map_err(|e| {
            log::debug!("linux_gpio: set line {}: {}", self.line, e);
            CoreError::IoError
        })?;
        Ok(())
    }
}

impl ResetLine for GpioResetLine {
    fn set_low(&mut self) -> CoreResult<()> {
        self.set(Value::Inactive)
    }

    fn set_high(&mut self) -> CoreResult<()> {
        self.set(Value::Active)
    }
}

/// Parse reset line options from `(key, value)` pairs
///
/// Recognised keys are `gpiodev`, `gpiochip` and `line`. Other keys are
/// left to the caller, so the same option list can also configure the
/// serial side.
pub fn parse_options(options: &[(&str, &str)]) -> Result<GpioResetConfig> {
    let mut config = GpioResetConfig::default();
    let mut have_line = false;
    let mut gpiochip: Option<u32> = None;

    for (key, value) in options {
        match *key {
            "gpiodev" => {
                config.device = value.to_string();
            }
            "gpiochip" => {
                gpiochip = Some(value.parse().map_err(|_| {
                    LinuxGpioError::InvalidParameter(format!("gpiochip={}", value))
                })?);
            }
            "line" => {
                config.line = value.parse().map_err(|_| {
                    LinuxGpioError::InvalidParameter(format!("line={}", value))
                })?;
                have_line = true;
            }
            _ => {}
        }
    }

    if config.device.is_empty() {
        match gpiochip {
            Some(n) => config.device = format!("/dev/gpiochip{}", n),
            None => return Err(LinuxGpioError::NoDevice),
        }
    } else if gpiochip.is_some() {
        return Err(LinuxGpioError::InvalidParameter(
            "only one of 'gpiodev' or 'gpiochip' can be specified".to_string(),
        ));
    }

    if !have_line {
        return Err(LinuxGpioError::MissingParameter("line"));
    }

    Ok(config)
}
