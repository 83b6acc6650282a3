//! Programmer registration and dispatch
//!
//! This module provides a centralized registry for all programmers, with support
//! for feature-gated inclusion and dynamic help text generation.
//!
//! A programmer string picks the link to the target and configures it:
//!
//! - `serial:dev=/dev/ttyUSB0` - serial port, reset on DTR
//! - `serial:dev=/dev/ttyUSB0,reset=rts,invert=1` - reset on RTS through an inverter
//! - `serial:dev=/dev/serial0,reset=gpio,gpiochip=0,line=17` - reset on a Linux GPIO
//! - `dummy:target=ATmega2560` - emulated target

use stkflash_core::link::{Clock, ResetLine, Transport};
use stkflash_core::target::TargetDatabase;
use stkflash_stk500::{SessionConfig, Stk500};

/// Engine over whichever link the programmer string selected
pub type BoxedStk500 = Stk500<Box<dyn Transport>, Box<dyn ResetLine>, Box<dyn Clock>>;

/// Information about a programmer
pub struct ProgrammerInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names/aliases
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all available programmers (enabled at compile time)
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_programmers() -> Vec<ProgrammerInfo> {
    let mut programmers = Vec::new();

    #[cfg(feature = "serial")]
    programmers.push(ProgrammerInfo {
        name: "serial",
        aliases: &["arduino", "stk500v1"],
        description: "STK500 bootloader on a serial port \
                      (dev=<port>,baud=<rate>,reset=dtr|rts|gpio|none,invert=<0|1>)",
    });

    #[cfg(feature = "dummy")]
    programmers.push(ProgrammerInfo {
        name: "dummy",
        aliases: &[],
        description: "Emulated Optiboot target for testing (target=<name>)",
    });

    programmers
}

/// Generate help text listing all available programmers
pub fn programmer_help() -> String {
    let programmers = available_programmers();

    if programmers.is_empty() {
        return "No programmers available (recompile with programmer features enabled)".to_string();
    }

    let mut help = String::from("Available programmers:\n");
    for p in &programmers {
        help.push_str(&format!("  {:8} - {}\n", p.name, p.description));
        if !p.aliases.is_empty() {
            help.push_str(&format!("  {:8}   aliases: {}\n", "", p.aliases.join(", ")));
        }
    }

    #[cfg(feature = "linux-gpio")]
    help.push_str("\nGPIO reset options: gpiochip=<n> or gpiodev=<path>, line=<offset>\n");

    help
}

/// Resolve a programmer name or alias to its primary name
pub fn find_programmer(name: &str) -> Option<&'static str> {
    available_programmers()
        .into_iter()
        .find(|p| p.name == name || p.aliases.contains(&name))
        .map(|p| p.name)
}

/// Parse a programmer string into name and options
///
/// Format: "name" or "name:option1=value1,option2=value2"
pub fn parse_programmer_string(s: &str) -> (&str, Vec<(&str, &str)>) {
    if let Some((name, opts)) = s.split_once(':') {
        let options: Vec<_> = opts
            .split(',')
            .filter_map(|opt| opt.split_once('='))
            .collect();
        (name, options)
    } else {
        (s, Vec::new())
    }
}

fn option<'a>(options: &[(&str, &'a str)], key: &str) -> Option<&'a str> {
    options.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn flag(options: &[(&str, &str)], key: &str) -> Result<bool, Box<dyn std::error::Error>> {
    match option(options, key) {
        None => Ok(false),
        Some("1" | "true" | "yes") => Ok(true),
        Some("0" | "false" | "no") => Ok(false),
        Some(v) => Err(format!("Invalid {} value: {}", key, v).into()),
    }
}

/// Open the programmer described by `programmer` and build an engine on it
///
/// A `baud=` option overrides the configured bootloader baud rate.
#[allow(unused_variables, unused_mut)]
pub fn open_programmer(
    programmer: &str,
    mut config: SessionConfig,
    db: &TargetDatabase,
) -> Result<BoxedStk500, Box<dyn std::error::Error>> {
    let (name, options) = parse_programmer_string(programmer);

    let canonical_name = match find_programmer(name) {
        Some(n) => n,
        None => return Err(unknown_programmer_error(name)),
    };

    if let Some(baud) = option(&options, "baud") {
        config.baud = baud
            .parse()
            .map_err(|_| format!("Invalid baud value: {}", baud))?;
    }

    match canonical_name {
        #[cfg(feature = "serial")]
        "serial" => open_serial(&options, config),

        #[cfg(feature = "dummy")]
        "dummy" => {
            use stkflash_dummy::{DummyConfig, DummyTarget};

            let target_name = option(&options, "target").unwrap_or("ATmega328P");
            let target = db
                .find_by_name(target_name)
                .ok_or_else(|| format!("Unknown target: {}", target_name))?;

            log::info!("Opening dummy programmer emulating {}", target.name);
            let dummy = DummyTarget::new(DummyConfig {
                signature: target.signature.0,
                flash_size: target.flash_size as usize,
                eeprom_size: target.eeprom_size as usize,
                bootloader_baud: config.baud,
                initial_baud: config.baud,
                ..DummyConfig::default()
            });
            let stk = Stk500::new(
                Box::new(dummy.transport()) as Box<dyn Transport>,
                Box::new(dummy.reset_line()) as Box<dyn ResetLine>,
                Box::new(dummy.clock()) as Box<dyn Clock>,
                config,
            )?;
            Ok(stk)
        }

        _ => Err(unknown_programmer_error(name)),
    }
}

#[cfg(feature = "serial")]
fn open_serial(
    options: &[(&str, &str)],
    config: SessionConfig,
) -> Result<BoxedStk500, Box<dyn std::error::Error>> {
    use stkflash_core::link::{Inverted, NoReset};
    use stkflash_stk500::{ControlPin, SerialTransport, StdClock};

    let device = option(options, "dev").ok_or(
        "serial requires a port.\n\
         Usage: serial:dev=/dev/ttyUSB0[,baud=115200][,reset=dtr|rts|gpio|none]",
    )?;

    log::info!("Opening serial programmer on {}...", device);
    let transport = SerialTransport::open(device, config.baud, &config)?;

    let reset: Box<dyn ResetLine> = match option(options, "reset").unwrap_or("dtr") {
        "dtr" => Box::new(transport.control_line(ControlPin::Dtr)?),
        "rts" => Box::new(transport.control_line(ControlPin::Rts)?),
        #[cfg(feature = "linux-gpio")]
        "gpio" => Box::new(
            stkflash_linux_gpio::open_reset_line(options)
                .map_err(|e| format!("Failed to open GPIO reset line: {}", e))?,
        ),
        "none" => Box::new(NoReset),
        other => return Err(format!("Unsupported reset line: {}", other).into()),
    };
    let reset: Box<dyn ResetLine> = if flag(options, "invert")? {
        Box::new(Inverted(reset))
    } else {
        reset
    };

    let stk = Stk500::new(
        Box::new(transport) as Box<dyn Transport>,
        reset,
        Box::new(StdClock::new()) as Box<dyn Clock>,
        config,
    )?;
    Ok(stk)
}

fn unknown_programmer_error(name: &str) -> Box<dyn std::error::Error> {
    let mut msg = format!("Unknown programmer: {}\n\n", name);
    msg.push_str(&programmer_help());
    msg.push_str("\nUse 'stkflash list-programmers' for more details");
    msg.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_programmer_string() {
        let (name, options) =
            parse_programmer_string("serial:dev=/dev/ttyUSB0,reset=gpio,gpiochip=0,line=17");
        assert_eq!(name, "serial");
        assert_eq!(
            options,
            [
                ("dev", "/dev/ttyUSB0"),
                ("reset", "gpio"),
                ("gpiochip", "0"),
                ("line", "17")
            ]
        );

        let (name, options) = parse_programmer_string("dummy");
        assert_eq!(name, "dummy");
        assert!(options.is_empty());
    }

    #[test]
    fn test_flag() {
        assert!(flag(&[("invert", "1")], "invert").unwrap());
        assert!(!flag(&[], "invert").unwrap());
        assert!(flag(&[("invert", "maybe")], "invert").is_err());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_programmer_probe() {
        use stkflash_core::progress::NoProgress;

        let db = TargetDatabase::builtin();
        let mut stk =
            open_programmer("dummy:target=ATmega2560", SessionConfig::default(), &db).unwrap();
        let info = stk.probe(&mut NoProgress).unwrap();
        assert_eq!(info.signature.0, [0x1E, 0x98, 0x01]);
    }

    #[test]
    fn test_unknown_programmer() {
        let db = TargetDatabase::builtin();
        assert!(open_programmer("nope", SessionConfig::default(), &db).is_err());
        assert_eq!(find_programmer("nope"), None);
    }

    #[cfg(feature = "serial")]
    #[test]
    fn test_alias() {
        assert_eq!(find_programmer("arduino"), Some("serial"));
    }
}
