//! stkflash - AVR in-system programmer for STK500 bootloaders
//!
//! Decodes Intel HEX firmware and programs it through an Optiboot-style
//! STK500 v1 bootloader over a serial port, resetting the target with a
//! modem control line or a Linux GPIO.
//!
//! # Architecture
//!
//! - `stkflash-core` decodes the firmware into a `BinaryImage` and knows the
//!   target parameters
//! - `stkflash-stk500` runs the programming session over any `Transport`,
//!   `ResetLine` and `Clock`
//! - the programmer string picks the concrete link (serial port, GPIO reset,
//!   or the in-memory dummy target)

mod cli;
mod commands;
mod programmers;

use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use stkflash_core::target::TargetDatabase;
use stkflash_stk500::SessionConfig;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let db = match load_target_database(cli.targets.as_deref()) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to load target database: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("Loaded {} target definitions", db.len());

    let config = load_session_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Flash {
            programmer,
            input,
            target,
            format,
            verify,
            baud,
            force,
        } => {
            let mut config = config;
            if let Some(verify) = verify {
                config = config.with_verify(verify);
            }
            if let Some(baud) = baud {
                config = config.with_baud(baud);
            }
            if force {
                config = config.with_check_signature(false);
            }
            let mut stk = programmers::open_programmer(&programmer, config, &db)?;
            commands::run_flash(&mut stk, &db, &input, format, target.as_deref())
        }
        Commands::Probe { programmer, baud } => {
            let config = match baud {
                Some(baud) => config.with_baud(baud),
                None => config,
            };
            let mut stk = programmers::open_programmer(&programmer, config, &db)?;
            commands::run_probe(&mut stk, &db)
        }
        Commands::Read {
            programmer,
            output,
            target,
            start,
            length,
            format,
            baud,
        } => {
            let config = match baud {
                Some(baud) => config.with_baud(baud),
                None => config,
            };
            let mut stk = programmers::open_programmer(&programmer, config, &db)?;
            commands::run_read(
                &mut stk,
                &db,
                &output,
                target.as_deref(),
                start,
                length,
                format,
            )
        }
        Commands::Decode { input, output } => commands::run_decode(&input, &output),
        Commands::ListTargets { name } => {
            commands::list_targets(&db, name.as_deref());
            Ok(())
        }
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
    }
}

/// Built-in targets plus any definitions from `path`
///
/// Without a path, `targets/` and the system share directories are tried.
fn load_target_database(path: Option<&Path>) -> Result<TargetDatabase, Box<dyn std::error::Error>> {
    let mut db = TargetDatabase::builtin();

    if let Some(path) = path {
        if path.is_dir() {
            db.load_dir(path)?;
        } else if path.is_file() {
            db.load_file(path)?;
        } else {
            return Err(format!("Target database path not found: {}", path.display()).into());
        }
        return Ok(db);
    }

    let default_paths = [
        Path::new("targets"),
        Path::new("/usr/share/stkflash/targets"),
        Path::new("/usr/local/share/stkflash/targets"),
    ];
    for dir in default_paths {
        if dir.is_dir() {
            match db.load_dir(dir) {
                Ok(count) => log::debug!("Loaded {} targets from {}", count, dir.display()),
                Err(e) => log::warn!("Failed to load targets from {}: {}", dir.display(), e),
            }
        }
    }

    Ok(db)
}

/// Session configuration from `path`, or the defaults
fn load_session_config(path: Option<&Path>) -> Result<SessionConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let config = SessionConfig::load(path)?;
            log::info!("Loaded session configuration from {}", path.display());
            Ok(config)
        }
        None => Ok(SessionConfig::default()),
    }
}
