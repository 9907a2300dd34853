//! Device descriptor types
//!
//! A descriptor is the immutable per-part configuration record a protocol
//! driver is built from: memory sizes, programming times, identification
//! values and family quirks for PIC parts, and the serial instruction
//! templates for AVR parts. Descriptors come out of the RON device database
//! and never change during a programming session.

use std::fmt;

use crate::device::instruction::Instruction;
use crate::error::{Error, Result};
use crate::memmap::{MemoryMap, RegionKind};

/// Protocol family and quirk selection for PIC parts
///
/// Each variant picks the erase/protect/write paths inside the PIC16 and
/// PIC18 drivers; anything not covered by a quirk uses the shared mid-range
/// or PIC18 base protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PicFamily {
    /// Generic mid-range flash (16F87x class)
    Pic16,
    /// 16F83/84/84A: unlock-sequence bulk erase
    Pic16f8xx,
    /// 16F62x: unlock-sequence bulk erase, EEPROM present
    Pic16f6xx,
    /// 16F7x: no EEPROM, explicit end-program command
    Pic16f7x,
    /// 12F629/675 and 16F630/676: OSCCAL and bandgap preservation
    Pic12f6xx,
    /// 16F87xA: single chip-erase command clears protection
    Pic16f87xA,
    /// 16F88x: two config words, wide bulk erase
    Pic16f88x,
    /// PIC18 with multi-panel write buffers (18F4x2 class)
    Pic18,
    /// PIC18 single-panel, 8-byte write buffer (18F1220/2220/4320 class)
    Pic18fxx20,
    /// PIC18 USB-era parts, 32-byte write buffer (18F2455/2550 class)
    Pic18f2xx0,
}

impl PicFamily {
    /// Whether this is a 16-bit-core PIC18 family
    pub fn is_pic18(self) -> bool {
        matches!(
            self,
            PicFamily::Pic18 | PicFamily::Pic18fxx20 | PicFamily::Pic18f2xx0
        )
    }

    /// Significant bits per program word
    pub fn word_bits(self) -> u8 {
        if self.is_pic18() {
            16
        } else {
            14
        }
    }

    /// Display label
    pub fn label(self) -> &'static str {
        match self {
            PicFamily::Pic16 => "PIC16",
            PicFamily::Pic16f8xx => "PIC16F8xx",
            PicFamily::Pic16f6xx => "PIC16F6xx",
            PicFamily::Pic16f7x => "PIC16F7x",
            PicFamily::Pic12f6xx => "PIC12F6xx",
            PicFamily::Pic16f87xA => "PIC16F87xA",
            PicFamily::Pic16f88x => "PIC16F88x",
            PicFamily::Pic18 => "PIC18",
            PicFamily::Pic18fxx20 => "PIC18Fxx20",
            PicFamily::Pic18f2xx0 => "PIC18F2xx0",
        }
    }
}

impl fmt::Display for PicFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Voltage range in millivolts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoltageRange {
    /// Lower bound in millivolts
    pub min_mv: u16,
    /// Upper bound in millivolts
    pub max_mv: u16,
}

impl fmt::Display for VoltageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}-{:.1} V",
            self.min_mv as f32 / 1000.0,
            self.max_mv as f32 / 1000.0
        )
    }
}

/// One flagged descriptor problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Parameter the problem concerns
    pub param: String,
    /// What is wrong with it
    pub reason: String,
}

impl ConfigIssue {
    fn new(param: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.param, self.reason)
    }
}

/// Descriptor for a PIC part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PicDescriptor {
    /// Part name ("PIC16F877A")
    pub name: String,
    /// Vendor name from the database file
    pub vendor: String,
    /// Protocol family
    pub family: PicFamily,
    /// Program memory size in words
    pub code_words: u32,
    /// ID locations (words on PIC16, bytes on PIC18)
    pub id_words: u32,
    /// Config words (words on PIC16, bytes on PIC18)
    pub config_words: u32,
    /// EEPROM data size in bytes, 0 if absent
    pub data_bytes: u32,
    /// Programming pulse width in microseconds
    pub program_time_us: u32,
    /// Bulk-erase wait in microseconds
    pub erase_time_us: u32,
    /// Maximum base programming attempts per location
    pub program_count: u32,
    /// Over-programming cycles per successful attempt
    pub program_multiplier: u32,
    /// Programmable-bit masks, one per config word
    pub config_masks: Vec<u16>,
    /// Code-protect bits in the first config word; 0 disables detection
    pub cp_mask: u16,
    /// Data-protect bits in the first config word
    pub cpd_mask: u16,
    /// Part carries a factory OSCCAL word at the top of program memory
    pub has_osccal: bool,
    /// Bandgap bits of the first config word to preserve across erase
    pub bandgap_mask: u16,
    /// Expected device ID, if the part implements one
    pub device_id: Option<u16>,
    /// Bits of the device ID to compare (revision bits excluded)
    pub device_id_mask: u16,
    /// Panels for multi-panel PIC18 writes
    pub panel_count: u32,
    /// Panel size in bytes for multi-panel PIC18 writes
    pub panel_bytes: u32,
    /// Write buffer size in bytes for buffered PIC18 writes
    pub write_buffer_bytes: u32,
    /// Programming voltage range
    pub vpp: VoltageRange,
    /// Supply voltage range
    pub vdd: VoltageRange,
}

impl PicDescriptor {
    /// Blank (erased) program word value
    pub fn blank_word(&self) -> u16 {
        if self.family.is_pic18() {
            0xFFFF
        } else {
            0x3FFF
        }
    }

    /// Implemented-bit mask for config word `index`, full-width when unlisted
    pub fn config_mask(&self, index: u32) -> u16 {
        self.config_masks
            .get(index as usize)
            .copied()
            .unwrap_or_else(|| self.blank_word())
    }

    /// Build the packed memory map: program, ID, config, EEPROM
    pub fn memory_map(&self) -> MemoryMap {
        let mut map = MemoryMap::new();
        let word_bits = self.family.word_bits();
        map.push(RegionKind::Code, self.code_words, word_bits);
        if self.family.is_pic18() {
            map.push(RegionKind::Id, self.id_words, 8);
            map.push(RegionKind::Config, self.config_words, 8);
        } else {
            map.push(RegionKind::Id, self.id_words, 14);
            map.push(RegionKind::Config, self.config_words, 14);
        }
        map.push(RegionKind::Eeprom, self.data_bytes, 8);
        map
    }

    /// Collect every descriptor problem without failing
    pub fn problems(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.code_words == 0 {
            issues.push(ConfigIssue::new("code_words", "must be non-zero"));
        }
        if self.program_count == 0 {
            issues.push(ConfigIssue::new("program_count", "must be at least 1"));
        }
        if self.config_masks.len() != self.config_words as usize {
            issues.push(ConfigIssue::new(
                "config_masks",
                format!(
                    "{} masks for {} config words",
                    self.config_masks.len(),
                    self.config_words
                ),
            ));
        }
        if self.device_id.is_some() && self.device_id_mask == 0 {
            issues.push(ConfigIssue::new(
                "device_id_mask",
                "must be non-zero when a device ID is given",
            ));
        }
        match self.family {
            PicFamily::Pic18 => {
                let code_bytes = self.code_words * 2;
                if self.panel_count == 0 || self.panel_bytes == 0 {
                    issues.push(ConfigIssue::new(
                        "panel_count",
                        "multi-panel parts need panel_count and panel_bytes",
                    ));
                } else if self.panel_count * self.panel_bytes != code_bytes {
                    issues.push(ConfigIssue::new(
                        "panel_bytes",
                        format!(
                            "{} panels of {} bytes do not cover {} code bytes",
                            self.panel_count, self.panel_bytes, code_bytes
                        ),
                    ));
                } else if self.panel_bytes % 8 != 0 {
                    issues.push(ConfigIssue::new(
                        "panel_bytes",
                        "must be a multiple of the 8-byte panel write group",
                    ));
                }
            }
            PicFamily::Pic18fxx20 | PicFamily::Pic18f2xx0 => {
                let code_bytes = self.code_words * 2;
                if self.write_buffer_bytes == 0 {
                    issues.push(ConfigIssue::new(
                        "write_buffer_bytes",
                        "buffered parts need a write buffer size",
                    ));
                } else if code_bytes % self.write_buffer_bytes != 0 {
                    issues.push(ConfigIssue::new(
                        "write_buffer_bytes",
                        format!(
                            "{} does not divide {} code bytes",
                            self.write_buffer_bytes, code_bytes
                        ),
                    ));
                }
            }
            _ => {
                if self.has_osccal && self.code_words < 1 {
                    issues.push(ConfigIssue::new(
                        "has_osccal",
                        "OSCCAL needs program memory to live in",
                    ));
                }
            }
        }
        if self.vdd.min_mv > self.vdd.max_mv {
            issues.push(ConfigIssue::new("vdd", "min above max"));
        }
        if self.vpp.min_mv > self.vpp.max_mv {
            issues.push(ConfigIssue::new("vpp", "min above max"));
        }
        issues
    }
}

/// Lock byte offset inside the AVR fuse region
pub const FUSE_LOCK: u32 = 0;
/// Low fuse byte offset inside the AVR fuse region
pub const FUSE_LOW: u32 = 1;
/// High fuse byte offset inside the AVR fuse region
pub const FUSE_HIGH: u32 = 2;
/// Extended fuse byte offset inside the AVR fuse region
pub const FUSE_EXT: u32 = 3;
/// AVR fuse region length in the memory map
pub const FUSE_WORDS: u32 = 4;

/// One AVR memory (flash or EEPROM)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvrMemory {
    /// Total size in bytes; 0 marks the memory absent
    pub bytes: u32,
    /// Page size in bytes; equals `bytes` for unpaged memories
    pub page_bytes: u32,
    /// Page count; 1 for unpaged memories
    pub pages: u32,
    /// Values the part returns while a write is still in progress
    pub read_back: [u8; 2],
    /// Worst-case write time in microseconds
    pub write_time_us: u32,
}

impl AvrMemory {
    /// Absent memory
    pub fn none() -> Self {
        Self {
            bytes: 0,
            page_bytes: 0,
            pages: 0,
            read_back: [0xFF, 0xFF],
            write_time_us: 0,
        }
    }

    /// Whether the memory exists at all
    pub fn present(&self) -> bool {
        self.bytes > 0
    }

    /// Whether writes go through a page buffer
    pub fn paged(&self) -> bool {
        self.pages > 1
    }

    /// Whether `value` matches a read-back sentinel, making completion
    /// polling unusable for it
    pub fn is_read_back_value(&self, value: u8) -> bool {
        value == self.read_back[0] || value == self.read_back[1]
    }
}

/// The per-part AVR serial instruction set
///
/// Any instruction may be not-valid; validation decides which ones a usable
/// part must have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)] // field names are the instruction names
pub struct AvrInstructionSet {
    pub programming_enable: Instruction,
    pub chip_erase: Instruction,
    pub load_ext_addr: Instruction,
    pub read_flash: Instruction,
    pub write_flash: Instruction,
    pub load_flash_page: Instruction,
    pub write_flash_page: Instruction,
    pub read_eeprom: Instruction,
    pub write_eeprom: Instruction,
    pub load_eeprom_page: Instruction,
    pub write_eeprom_page: Instruction,
    pub read_fuse: Instruction,
    pub write_fuse: Instruction,
    pub read_high_fuse: Instruction,
    pub write_high_fuse: Instruction,
    pub read_ext_fuse: Instruction,
    pub write_ext_fuse: Instruction,
    pub read_lock: Instruction,
    pub write_lock: Instruction,
    pub read_signature: Instruction,
    pub read_calibration: Instruction,
}

/// Descriptor for an AVR part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvrDescriptor {
    /// Part name ("ATmega32")
    pub name: String,
    /// Vendor name from the database file
    pub vendor: String,
    /// Expected signature bytes
    pub signature: [u8; 3],
    /// Minimum supply in millivolts
    pub vcc_min_mv: u16,
    /// Maximum supply in millivolts
    pub vcc_max_mv: u16,
    /// Calibration bytes readable from the part
    pub calibration_bytes: u32,
    /// Wait after a reset pulse before the first sync attempt
    pub reset_delay_us: u32,
    /// Chip-erase wait
    pub erase_time_us: u32,
    /// Fuse/lock write wait
    pub fuse_time_us: u32,
    /// Power-cycle between writing and reading back a fuse byte
    pub power_off_after_write_fuse: bool,
    /// Flash geometry
    pub flash: AvrMemory,
    /// EEPROM geometry
    pub eeprom: AvrMemory,
    /// Parsed instruction templates
    pub instructions: AvrInstructionSet,
}

impl AvrDescriptor {
    /// Flash size in 16-bit words
    pub fn flash_words(&self) -> u32 {
        self.flash.bytes / 2
    }

    /// Build the packed memory map: signature, fuses, calibration, code, data
    pub fn memory_map(&self) -> MemoryMap {
        let mut map = MemoryMap::new();
        map.push(RegionKind::Signature, 3, 8);
        map.push(RegionKind::Fuses, FUSE_WORDS, 8);
        map.push(RegionKind::Calibration, self.calibration_bytes, 8);
        map.push(RegionKind::Code, self.flash_words(), 16);
        map.push(RegionKind::Eeprom, self.eeprom.bytes, 8);
        map
    }

    fn check_memory(&self, name: &str, mem: &AvrMemory, issues: &mut Vec<ConfigIssue>) {
        if !mem.present() {
            return;
        }
        if mem.pages == 0 || mem.page_bytes == 0 {
            issues.push(ConfigIssue::new(
                name,
                "present memory needs a page geometry (pages >= 1)",
            ));
        } else if mem.page_bytes * mem.pages != mem.bytes {
            issues.push(ConfigIssue::new(
                name,
                format!(
                    "{} pages of {} bytes do not equal {} bytes",
                    mem.pages, mem.page_bytes, mem.bytes
                ),
            ));
        }
    }

    /// Collect every descriptor problem without failing
    ///
    /// This is the silent load-time mode; re-running it on an unchanged
    /// descriptor yields the identical list.
    pub fn problems(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let ins = &self.instructions;

        if self.vcc_min_mv > self.vcc_max_mv {
            issues.push(ConfigIssue::new("vcc", "min above max"));
        }
        if !self.flash.present() {
            issues.push(ConfigIssue::new("flash", "flash size must be non-zero"));
        }
        if self.flash.bytes % 2 != 0 {
            issues.push(ConfigIssue::new("flash", "flash size must be word-aligned"));
        }
        self.check_memory("flash", &self.flash, &mut issues);
        self.check_memory("eeprom", &self.eeprom, &mut issues);

        for (name, inst) in [
            ("programming_enable", &ins.programming_enable),
            ("chip_erase", &ins.chip_erase),
            ("read_signature", &ins.read_signature),
            ("read_flash", &ins.read_flash),
        ] {
            if !inst.is_valid() {
                issues.push(ConfigIssue::new(name, "mandatory instruction missing"));
            }
        }

        let paged_flash = ins.load_flash_page.is_valid() && ins.write_flash_page.is_valid();
        if self.flash.paged() {
            if !paged_flash {
                issues.push(ConfigIssue::new(
                    "load_flash_page",
                    "paged flash needs load_flash_page and write_flash_page",
                ));
            }
        } else if !ins.write_flash.is_valid() && !paged_flash {
            issues.push(ConfigIssue::new(
                "write_flash",
                "no flash write instruction configured",
            ));
        }

        if self.eeprom.present() {
            if !ins.read_eeprom.is_valid() {
                issues.push(ConfigIssue::new("read_eeprom", "EEPROM present but unreadable"));
            }
            let paged_eeprom = self.eeprom.paged()
                && ins.load_eeprom_page.is_valid()
                && ins.write_eeprom_page.is_valid();
            if !paged_eeprom && !ins.write_eeprom.is_valid() {
                issues.push(ConfigIssue::new(
                    "write_eeprom",
                    "no EEPROM write instruction configured",
                ));
            }
        }

        if ins.read_high_fuse.is_valid() != ins.write_high_fuse.is_valid() {
            issues.push(ConfigIssue::new(
                "high_fuse",
                "read_high_fuse and write_high_fuse must be paired",
            ));
        }
        if ins.read_ext_fuse.is_valid() != ins.write_ext_fuse.is_valid() {
            issues.push(ConfigIssue::new(
                "ext_fuse",
                "read_ext_fuse and write_ext_fuse must be paired",
            ));
        }
        if self.calibration_bytes > 0 && !ins.read_calibration.is_valid() {
            issues.push(ConfigIssue::new(
                "read_calibration",
                "calibration bytes configured but not readable",
            ));
        }
        issues
    }
}

/// Any supported device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceDescriptor {
    /// A PIC part (PIC12/PIC16/PIC18)
    Pic(PicDescriptor),
    /// An AVR part
    Avr(AvrDescriptor),
}

impl DeviceDescriptor {
    /// Part name
    pub fn name(&self) -> &str {
        match self {
            DeviceDescriptor::Pic(d) => &d.name,
            DeviceDescriptor::Avr(d) => &d.name,
        }
    }

    /// Vendor name
    pub fn vendor(&self) -> &str {
        match self {
            DeviceDescriptor::Pic(d) => &d.vendor,
            DeviceDescriptor::Avr(d) => &d.vendor,
        }
    }

    /// Family label for listings
    pub fn family_label(&self) -> &'static str {
        match self {
            DeviceDescriptor::Pic(d) => d.family.label(),
            DeviceDescriptor::Avr(_) => "AVR",
        }
    }

    /// Build the part's memory map
    pub fn memory_map(&self) -> MemoryMap {
        match self {
            DeviceDescriptor::Pic(d) => d.memory_map(),
            DeviceDescriptor::Avr(d) => d.memory_map(),
        }
    }

    /// Silent validation: collect all problems
    pub fn problems(&self) -> Vec<ConfigIssue> {
        match self {
            DeviceDescriptor::Pic(d) => d.problems(),
            DeviceDescriptor::Avr(d) => d.problems(),
        }
    }

    /// Raising validation: fail on the first problem
    pub fn validate(&self) -> Result<()> {
        match self.problems().into_iter().next() {
            None => Ok(()),
            Some(issue) => Err(Error::Config {
                param: format!("{}: {}", self.name(), issue.param),
                reason: issue.reason,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn small_pic16() -> PicDescriptor {
        PicDescriptor {
            name: "PIC16TEST".into(),
            vendor: "Microchip".into(),
            family: PicFamily::Pic16,
            code_words: 1024,
            id_words: 4,
            config_words: 1,
            data_bytes: 0,
            program_time_us: 4000,
            erase_time_us: 10000,
            program_count: 1,
            program_multiplier: 0,
            config_masks: vec![0x3FFF],
            cp_mask: 0,
            cpd_mask: 0,
            has_osccal: false,
            bandgap_mask: 0,
            device_id: None,
            device_id_mask: 0x3FE0,
            panel_count: 0,
            panel_bytes: 0,
            write_buffer_bytes: 0,
            vpp: VoltageRange {
                min_mv: 12750,
                max_mv: 13250,
            },
            vdd: VoltageRange {
                min_mv: 4500,
                max_mv: 5500,
            },
        }
    }

    #[test]
    fn pic16_map_orders_program_id_config_eeprom() {
        let mut desc = small_pic16();
        desc.data_bytes = 64;
        let map = desc.memory_map();
        let kinds: Vec<_> = map.regions().iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RegionKind::Code,
                RegionKind::Id,
                RegionKind::Config,
                RegionKind::Eeprom
            ]
        );
        for pair in map.regions().windows(2) {
            assert_eq!(pair[1].start, pair[0].end());
        }
        assert_eq!(map.total_words(), 1024 + 4 + 1 + 64);
    }

    #[test]
    fn pic_problems_flag_bad_fields() {
        let mut desc = small_pic16();
        desc.program_count = 0;
        desc.config_masks.clear();
        let issues = desc.problems();
        assert!(issues.iter().any(|i| i.param == "program_count"));
        assert!(issues.iter().any(|i| i.param == "config_masks"));
        // Idempotent.
        assert_eq!(desc.problems(), issues);
    }

    #[test]
    fn pic18_panel_geometry_is_checked() {
        let mut desc = small_pic16();
        desc.family = PicFamily::Pic18;
        desc.code_words = 16384;
        desc.config_masks = vec![0xFF];
        desc.panel_count = 4;
        desc.panel_bytes = 4096;
        assert!(desc.problems().iter().any(|i| i.param == "panel_bytes"));
        desc.panel_bytes = 0;
        assert!(desc.problems().iter().any(|i| i.param == "panel_count"));
    }
}
