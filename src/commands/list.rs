//! List commands implementation

use stkflash_core::target::TargetDatabase;

use crate::programmers;

/// List all supported programmers
pub fn list_programmers() {
    print!("{}", programmers::programmer_help());
}

/// List all known targets
pub fn list_targets(db: &TargetDatabase, name_filter: Option<&str>) {
    println!("Supported targets:");
    println!();
    println!(
        "{:<12} {:>10} {:>10} {:>8} {:>8}",
        "Name", "Signature", "Flash", "Page", "EEPROM"
    );
    println!("{}", "-".repeat(52));

    for target in db.targets() {
        if let Some(filter) = name_filter {
            if !target.name.to_lowercase().contains(&filter.to_lowercase()) {
                continue;
            }
        }

        println!(
            "{:<12} {:>10} {:>10} {:>8} {:>8}",
            target.name,
            target.signature.to_string(),
            format_size(target.flash_size),
            target.page_size,
            target.eeprom_size
        );
    }
}

fn format_size(bytes: u32) -> String {
    if bytes >= 1024 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(32 * 1024), "32 KiB");
        assert_eq!(format_size(512), "512 B");
    }
}
