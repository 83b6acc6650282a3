//! Built-in target table

use alloc::string::String;
use alloc::vec::Vec;

use super::types::{AddressMode, DeviceParameters, IspParameters, Signature};

struct Part {
    name: &'static str,
    signature: [u8; 3],
    flash_kib: u32,
    page_size: u16,
    eeprom_size: u16,
    eeprom_page_size: u8,
    device_code: u8,
}

const PARTS: &[Part] = &[
    Part {
        name: "ATmega328P",
        signature: [0x1E, 0x95, 0x0F],
        flash_kib: 32,
        page_size: 128,
        eeprom_size: 1024,
        eeprom_page_size: 4,
        device_code: 0x86,
    },
    Part {
        name: "ATmega328",
        signature: [0x1E, 0x95, 0x14],
        flash_kib: 32,
        page_size: 128,
        eeprom_size: 1024,
        eeprom_page_size: 4,
        device_code: 0x86,
    },
    Part {
        name: "ATmega168",
        signature: [0x1E, 0x94, 0x06],
        flash_kib: 16,
        page_size: 128,
        eeprom_size: 512,
        eeprom_page_size: 4,
        device_code: 0x86,
    },
    Part {
        name: "ATmega168P",
        signature: [0x1E, 0x94, 0x0B],
        flash_kib: 16,
        page_size: 128,
        eeprom_size: 512,
        eeprom_page_size: 4,
        device_code: 0x86,
    },
    Part {
        name: "ATmega88",
        signature: [0x1E, 0x93, 0x0A],
        flash_kib: 8,
        page_size: 64,
        eeprom_size: 512,
        eeprom_page_size: 4,
        device_code: 0x73,
    },
    Part {
        name: "ATmega8",
        signature: [0x1E, 0x93, 0x07],
        flash_kib: 8,
        page_size: 64,
        eeprom_size: 512,
        eeprom_page_size: 4,
        device_code: 0x70,
    },
    Part {
        name: "ATmega32U4",
        signature: [0x1E, 0x95, 0x87],
        flash_kib: 32,
        page_size: 128,
        eeprom_size: 1024,
        eeprom_page_size: 4,
        device_code: 0x86,
    },
    Part {
        name: "ATmega1284P",
        signature: [0x1E, 0x97, 0x05],
        flash_kib: 128,
        page_size: 256,
        eeprom_size: 4096,
        eeprom_page_size: 8,
        device_code: 0x82,
    },
    Part {
        name: "ATmega2560",
        signature: [0x1E, 0x98, 0x01],
        flash_kib: 256,
        page_size: 256,
        eeprom_size: 4096,
        eeprom_page_size: 8,
        device_code: 0xB2,
    },
];

/// Parts known without loading any database file
pub fn builtin_targets() -> Vec<DeviceParameters> {
    PARTS
        .iter()
        .map(|p| DeviceParameters {
            name: String::from(p.name),
            signature: Signature(p.signature),
            flash_size: p.flash_kib * 1024,
            page_size: p.page_size,
            eeprom_size: p.eeprom_size,
            eeprom_page_size: p.eeprom_page_size,
            address_mode: AddressMode::Word,
            isp: IspParameters {
                device_code: p.device_code,
                ..IspParameters::default()
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_geometry() {
        let targets = builtin_targets();
        assert_eq!(targets.len(), PARTS.len());
        for t in &targets {
            assert_eq!(t.flash_size % t.page_size as u32, 0, "{}", t.name);
            assert_eq!(t.signature.0[0], 0x1E, "{}", t.name);
        }
        let m328p = &targets[0];
        assert_eq!(m328p.name, "ATmega328P");
        assert_eq!(m328p.flash_pages(), 256);
    }
}
