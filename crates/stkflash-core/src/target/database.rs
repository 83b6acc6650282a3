//! Target database for runtime loading and lookup
//!
//! Parts beyond the built-in table are described in RON files:
//!
//! ```ron
//! (
//!     targets: [
//!         (
//!             name: "ATmega644P",
//!             signature: (0x1E, 0x96, 0x0A),
//!             flash_size: KiB(64),
//!             page_size: 256,
//!             eeprom_size: KiB(2),
//!             eeprom_page_size: 8,
//!             isp: (device_code: 0x82),
//!         ),
//!     ],
//! )
//! ```

use alloc::{format, string::String, vec::Vec};
use std::fs;
use std::io;
use std::path::Path;

use super::builtin::builtin_targets;
use super::types::{AddressMode, DeviceParameters, IspParameters, Signature};

/// Error type for target database operations
#[derive(Debug, thiserror::Error)]
pub enum TargetDbError {
    /// I/O error reading files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// RON parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),
    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Size specification with human-readable units (for RON parsing)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
}

impl Size {
    /// Convert to bytes, `None` if the size does not fit a `u32`
    pub fn to_bytes(self) -> Option<u32> {
        match self {
            Size::B(n) => Some(n),
            Size::KiB(n) => n.checked_mul(1024),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct TargetDef {
    name: String,
    signature: [u8; 3],
    flash_size: Size,
    page_size: u16,
    #[serde(default = "default_eeprom_size")]
    eeprom_size: Size,
    #[serde(default = "default_eeprom_page_size")]
    eeprom_page_size: u8,
    #[serde(default)]
    address_mode: AddressMode,
    #[serde(default)]
    isp: IspParameters,
}

fn default_eeprom_size() -> Size {
    Size::B(0)
}

fn default_eeprom_page_size() -> u8 {
    4
}

#[derive(Debug, Clone, serde::Deserialize)]
struct TargetFileDef {
    targets: Vec<TargetDef>,
}

impl TargetDef {
    fn into_parameters(self) -> Result<DeviceParameters, TargetDbError> {
        let flash_size = self.flash_size.to_bytes().ok_or_else(|| {
            TargetDbError::Validation(format!("{}: flash size too large", self.name))
        })?;
        if self.page_size == 0 || flash_size % self.page_size as u32 != 0 {
            return Err(TargetDbError::Validation(format!(
                "{}: flash size {} is not a multiple of page size {}",
                self.name, flash_size, self.page_size
            )));
        }
        let eeprom_size = self
            .eeprom_size
            .to_bytes()
            .and_then(|n| u16::try_from(n).ok())
            .ok_or_else(|| {
                TargetDbError::Validation(format!("{}: EEPROM size too large", self.name))
            })?;

        Ok(DeviceParameters {
            name: self.name,
            signature: Signature(self.signature),
            flash_size,
            page_size: self.page_size,
            eeprom_size,
            eeprom_page_size: self.eeprom_page_size,
            address_mode: self.address_mode,
            isp: self.isp,
        })
    }
}

/// Runtime target database
#[derive(Debug, Clone, Default)]
pub struct TargetDatabase {
    targets: Vec<DeviceParameters>,
}

impl TargetDatabase {
    /// Create an empty target database
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
        }
    }

    /// Create a database holding the built-in parts
    pub fn builtin() -> Self {
        Self {
            targets: builtin_targets(),
        }
    }

    /// Load target definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, TargetDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load target definitions from a RON string
    ///
    /// A definition whose name matches an existing entry replaces it.
    pub fn load_ron(&mut self, content: &str) -> Result<usize, TargetDbError> {
        let file: TargetFileDef = ron::from_str(content)?;
        let count = file.targets.len();

        for def in file.targets {
            let params = def.into_parameters()?;
            match self
                .targets
                .iter_mut()
                .find(|t| t.name.eq_ignore_ascii_case(&params.name))
            {
                Some(existing) => *existing = params,
                None => self.targets.push(params),
            }
        }

        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, TargetDbError> {
        let mut total = 0;

        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();

            if path.extension().is_some_and(|ext| ext == "ron") {
                total += self.load_file(&path)?;
            }
        }

        Ok(total)
    }

    /// Get all targets in the database
    pub fn targets(&self) -> &[DeviceParameters] {
        &self.targets
    }

    /// Get the number of targets in the database
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Check if the database is empty
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Find a target by name (case-insensitive)
    pub fn find_by_name(&self, name: &str) -> Option<&DeviceParameters> {
        self.targets
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    /// Find a target by its signature
    pub fn find_by_signature(&self, signature: &Signature) -> Option<&DeviceParameters> {
        self.targets
            .iter()
            .find(|t| t.matches_signature(signature))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RON: &str = r#"
(
    targets: [
        (
            name: "ATmega644P",
            signature: (0x1E, 0x96, 0x0A),
            flash_size: KiB(64),
            page_size: 256,
            eeprom_size: KiB(2),
            eeprom_page_size: 8,
            isp: (device_code: 0x82),
        ),
        (
            name: "ATmega328P",
            signature: (0x1E, 0x95, 0x0F),
            flash_size: KiB(30),
            page_size: 128,
            address_mode: Byte,
        ),
    ],
)
"#;

    #[test]
    fn test_builtin_lookup() {
        let db = TargetDatabase::builtin();
        assert!(!db.is_empty());
        let t = db.find_by_name("atmega328p").unwrap();
        assert_eq!(t.page_size, 128);
        assert_eq!(t.flash_size, 32 * 1024);
        let t = db.find_by_signature(&Signature::new(0x1E, 0x98, 0x01)).unwrap();
        assert_eq!(t.name, "ATmega2560");
        assert!(db.find_by_name("ATtiny85").is_none());
    }

    #[test]
    fn test_load_ron() {
        let mut db = TargetDatabase::builtin();
        let before = db.len();
        assert_eq!(db.load_ron(RON).unwrap(), 2);
        // One new part, one replacement
        assert_eq!(db.len(), before + 1);

        let t = db.find_by_name("ATmega644P").unwrap();
        assert_eq!(t.flash_size, 64 * 1024);
        assert_eq!(t.eeprom_size, 2048);
        assert_eq!(t.isp.device_code, 0x82);
        assert_eq!(t.isp.fuse_bytes, IspParameters::default().fuse_bytes);
        assert_eq!(t.address_mode, AddressMode::Word);

        let t = db.find_by_name("ATmega328P").unwrap();
        assert_eq!(t.flash_size, 30 * 1024);
        assert_eq!(t.address_mode, AddressMode::Byte);
        assert_eq!(t.eeprom_size, 0);
    }

    #[test]
    fn test_load_ron_rejects_bad_geometry() {
        let mut db = TargetDatabase::new();
        let bad = r#"(targets: [(name: "X", signature: (1, 2, 3), flash_size: B(100), page_size: 64)])"#;
        assert!(matches!(
            db.load_ron(bad),
            Err(TargetDbError::Validation(_))
        ));
    }

    #[test]
    fn test_load_ron_rejects_oversized() {
        let mut db = TargetDatabase::new();
        let huge_flash = r#"(targets: [(name: "X", signature: (1, 2, 3), flash_size: KiB(4194304), page_size: 128)])"#;
        assert!(matches!(
            db.load_ron(huge_flash),
            Err(TargetDbError::Validation(_))
        ));
        let huge_eeprom = r#"(targets: [(name: "Y", signature: (1, 2, 3), flash_size: KiB(32), page_size: 128, eeprom_size: KiB(64))])"#;
        assert!(matches!(
            db.load_ron(huge_eeprom),
            Err(TargetDbError::Validation(_))
        ));
        assert!(db.is_empty());
    }

    #[test]
    fn test_load_ron_parse_error() {
        let mut db = TargetDatabase::new();
        assert!(matches!(
            db.load_ron("(targets: [("),
            Err(TargetDbError::Parse(_))
        ));
    }
}
