//! Probe command implementation

use stkflash_core::target::TargetDatabase;

use super::{print_target_info, report, IndicatifProgress};
use crate::programmers::BoxedStk500;

/// Run the probe command
pub fn run_probe(
    stk: &mut BoxedStk500,
    db: &TargetDatabase,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut progress = IndicatifProgress::new();
    let info = stk.probe(&mut progress).map_err(report)?;
    print_target_info(&info, db.find_by_signature(&info.signature));
    Ok(())
}
