//! Read command implementation

use std::fs::File;
use std::io::Write;
use std::path::Path;

use stkflash_core::ihex;
use stkflash_core::image::BinaryImage;
use stkflash_core::target::TargetDatabase;

use super::{format_for_path, report, resolve_target, IndicatifProgress};
use crate::cli::ImageFormat;
use crate::programmers::BoxedStk500;

/// Run the read command
pub fn run_read(
    stk: &mut BoxedStk500,
    db: &TargetDatabase,
    output: &Path,
    target: Option<&str>,
    start: u32,
    length: Option<u32>,
    format: Option<ImageFormat>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut progress = IndicatifProgress::new();
    let target = resolve_target(stk, db, target, &mut progress)?;
    let len = match length {
        Some(len) => len as usize,
        None => target.flash_size.saturating_sub(start) as usize,
    };

    println!("Reading {} bytes from {} at 0x{:05X}", len, target.name, start);
    let data = match stk.read_flash(target, start, len, &mut progress) {
        Ok(data) => data,
        Err(e) => {
            progress.abandon();
            return Err(report(e));
        }
    };

    let format = format.unwrap_or_else(|| format_for_path(output));
    let mut file = File::create(output)?;
    match format {
        ImageFormat::Bin => file.write_all(&data)?,
        ImageFormat::Hex => {
            let text = if start == 0 {
                ihex::encode_image(&BinaryImage::from_bytes(data)?, ihex::DEFAULT_RECORD_LEN)
            } else {
                ihex::encode(&data, start, ihex::DEFAULT_RECORD_LEN)
            };
            file.write_all(text.as_bytes())?;
        }
    }

    println!("Wrote {} bytes to {:?}", len, output);
    Ok(())
}
