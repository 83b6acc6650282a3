//! Flash command implementation

use std::path::Path;

use stkflash_core::target::TargetDatabase;

use super::{load_image, report, resolve_target, IndicatifProgress};
use crate::cli::ImageFormat;
use crate::programmers::BoxedStk500;

/// Run the flash command
pub fn run_flash(
    stk: &mut BoxedStk500,
    db: &TargetDatabase,
    input: &Path,
    format: Option<ImageFormat>,
    target: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let image = load_image(input, format)?;
    if image.is_empty() {
        return Err(format!("{:?} contains no data", input).into());
    }

    let mut progress = IndicatifProgress::new();
    let target = resolve_target(stk, db, target, &mut progress)?;
    println!(
        "Flashing {} bytes to {} ({} pages of {} bytes)",
        image.len(),
        target.name,
        image.page_count(target.page_size as usize),
        target.page_size
    );

    let report = match stk.flash(&image, target, &mut progress) {
        Ok(report) => report,
        Err(e) => {
            progress.abandon();
            return Err(report(e));
        }
    };

    println!(
        "Wrote {} bytes in {} pages ({} ms)",
        report.bytes_written, report.pages_written, report.elapsed_ms
    );
    if report.retries > 0 {
        log::warn!("{} request(s) had to be re-sent", report.retries);
    }
    if report.pages_verified > 0 {
        if report.verified_ok() {
            println!("Verified {} pages", report.pages_verified);
        } else {
            for m in &report.mismatches {
                println!(
                    "  page {}: 0x{:05X} wrote 0x{:02X}, read 0x{:02X}",
                    m.page, m.address, m.expected, m.found
                );
            }
            return Err(format!(
                "Verification failed: {} of {} pages differ",
                report.mismatches.len(),
                report.pages_verified
            )
            .into());
        }
    }

    Ok(())
}
