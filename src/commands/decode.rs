//! Decode command implementation

use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::load_image;
use crate::cli::ImageFormat;

/// Convert an Intel HEX file into a raw binary image
pub fn run_decode(input: &Path, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let image = load_image(input, Some(ImageFormat::Hex))?;
    let mut file = File::create(output)?;
    file.write_all(image.as_bytes())?;
    println!("Wrote {} bytes to {:?}", image.len(), output);
    Ok(())
}
