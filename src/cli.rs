//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use stkflash_stk500::VerifyPolicy;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

const PROGRAMMER_HELP: &str = "Programmer to use, e.g. serial:dev=/dev/ttyUSB0 or dummy \
                               (see list-programmers)";

/// Firmware file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ImageFormat {
    /// Intel HEX text
    Hex,
    /// Raw binary, loaded at address 0
    Bin,
}

#[derive(Parser)]
#[command(name = "stkflash")]
#[command(author, version, about = "AVR in-system programmer for STK500 bootloaders", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Session configuration file (TOML with a [session] table)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Extra target definitions (.ron file or directory of .ron files)
    #[arg(long, global = true)]
    pub targets: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Program a firmware image into the target's flash
    Flash {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Input file path
        #[arg(short, long)]
        input: PathBuf,

        /// Target name (auto-detected from the signature if not specified)
        #[arg(short, long)]
        target: Option<String>,

        /// Input format (guessed from the file extension if not specified)
        #[arg(short, long, value_enum)]
        format: Option<ImageFormat>,

        /// Read pages back after writing: off, report or abort
        #[arg(long)]
        verify: Option<VerifyPolicy>,

        /// Bootloader baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Continue when the signature does not match the target
        #[arg(long)]
        force: bool,
    },

    /// Reset the target and show its signature and bootloader version
    Probe {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Bootloader baud rate
        #[arg(short, long)]
        baud: Option<u32>,
    },

    /// Read flash contents to a file
    Read {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Target name (auto-detected from the signature if not specified)
        #[arg(short, long)]
        target: Option<String>,

        /// Start address (hex, e.g., 0x100)
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        start: u32,

        /// Number of bytes to read (default: up to the end of flash)
        #[arg(short, long, value_parser = parse_hex_u32)]
        length: Option<u32>,

        /// Output format (guessed from the file extension if not specified)
        #[arg(short, long, value_enum)]
        format: Option<ImageFormat>,

        /// Bootloader baud rate
        #[arg(short, long)]
        baud: Option<u32>,
    },

    /// Convert an Intel HEX file to a raw binary image
    Decode {
        /// Input file (Intel HEX)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file (raw binary)
        #[arg(short, long)]
        output: PathBuf,
    },

    /// List supported targets
    ListTargets {
        /// Filter by name
        #[arg(long)]
        name: Option<String>,
    },

    /// List supported programmers
    ListProgrammers,
}
