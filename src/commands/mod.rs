//! CLI command implementations
//!
//! Each command opens the programmer, runs one engine operation and prints
//! the outcome. Engine failures are reported with the step and page they
//! happened at before being returned to `main`.

mod decode;
mod flash;
mod list;
mod probe;
mod progress;
mod read;

pub use decode::run_decode;
pub use flash::run_flash;
pub use list::{list_programmers, list_targets};
pub use probe::run_probe;
pub use progress::IndicatifProgress;
pub use read::run_read;

use std::fs::File;
use std::path::Path;

use stkflash_core::ihex::HexDecoder;
use stkflash_core::image::BinaryImage;
use stkflash_core::target::{DeviceParameters, TargetDatabase};
use stkflash_stk500::{FlashError, TargetInfo};

use crate::cli::ImageFormat;
use crate::programmers::BoxedStk500;

/// Guess the image format from a file extension
pub fn format_for_path(path: &Path) -> ImageFormat {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("hex") | Some("ihx") | Some("ihex") => ImageFormat::Hex,
        _ => ImageFormat::Bin,
    }
}

/// Load a firmware file as a binary image
pub fn load_image(
    path: &Path,
    format: Option<ImageFormat>,
) -> Result<BinaryImage, Box<dyn std::error::Error>> {
    let format = format.unwrap_or_else(|| format_for_path(path));
    let image = match format {
        ImageFormat::Hex => {
            let file = File::open(path)?;
            let mut reader = embedded_io_adapters::std::FromStd::new(file);
            let mut decoder = HexDecoder::new(BinaryImage::new());
            decoder
                .decode_from(&mut reader)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            if let Some(entry) = decoder.entry_point() {
                log::debug!("Entry point {:?} (ignored)", entry);
            }
            decoder.into_sink()
        }
        ImageFormat::Bin => BinaryImage::from_bytes(std::fs::read(path)?)?,
    };
    println!("Read {} bytes from {:?}", image.len(), path);
    Ok(image)
}

/// Pick the target by name, or identify it from its signature
pub fn resolve_target<'a>(
    stk: &mut BoxedStk500,
    db: &'a TargetDatabase,
    name: Option<&str>,
    progress: &mut IndicatifProgress,
) -> Result<&'a DeviceParameters, Box<dyn std::error::Error>> {
    if let Some(name) = name {
        return db
            .find_by_name(name)
            .ok_or_else(|| format!("Unknown target: {} (see list-targets)", name).into());
    }

    let info = stk.probe(progress).map_err(report)?;
    db.find_by_signature(&info.signature)
        .ok_or_else(|| format!("No target with signature {} in the database", info.signature).into())
}

/// Print the identification result
pub fn print_target_info(info: &TargetInfo, target: Option<&DeviceParameters>) {
    println!("Signature:  {}", info.signature);
    match target {
        Some(t) => println!("Target:     {}", t),
        None => println!("Target:     unknown"),
    }
    if let Some(v) = info.version {
        println!("Bootloader: hw {}, sw {}.{}", v.hardware, v.major, v.minor);
    }
    if let Some(s) = &info.sign_on {
        println!("Sign-on:    {}", s);
    }
}

/// Log an engine failure with its step and page, then hand it back
pub fn report(e: FlashError) -> Box<dyn std::error::Error> {
    match (e.step(), e.page()) {
        (Some(step), Some(page)) => log::error!("Failed during {} at page {}: {}", step, page, e),
        (Some(step), None) => log::error!("Failed during {}: {}", step, e),
        _ => log::error!("{}", e),
    }
    Box::new(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_for_path() {
        assert_eq!(format_for_path(Path::new("blink.HEX")), ImageFormat::Hex);
        assert_eq!(format_for_path(Path::new("dump.bin")), ImageFormat::Bin);
        assert_eq!(format_for_path(Path::new("noext")), ImageFormat::Bin);
    }
}
