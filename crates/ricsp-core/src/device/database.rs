//! Device database for runtime loading and lookup
//!
//! Device descriptors live in RON files, one per vendor, and are loaded
//! through intermediate serde types so the on-disk format can default the
//! fields a part does not care about. AVR instruction templates are parsed
//! at load time; a malformed template is a database error naming the device
//! and the instruction.

use std::fs;
use std::io;
use std::path::Path;

use log::warn;
use thiserror::Error;

use crate::device::instruction::{Instruction, TemplateError};
use crate::device::types::{
    AvrDescriptor, AvrInstructionSet, AvrMemory, DeviceDescriptor, PicDescriptor, PicFamily,
    VoltageRange,
};

/// Error type for device database operations
#[derive(Debug, Error)]
pub enum DeviceDbError {
    /// I/O error reading files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// RON parsing error
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// A template string failed to parse
    #[error("Device {device}, instruction {instruction}: {source}")]
    Template {
        device: String,
        instruction: &'static str,
        #[source]
        source: TemplateError,
    },
}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Size specification with human-readable units (for RON parsing)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
}

impl Size {
    /// Convert to bytes
    pub fn to_bytes(self) -> u32 {
        match self {
            Size::B(n) => n,
            Size::KiB(n) => n * 1024,
        }
    }
}

/// Voltage range in millivolts (RON format)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
struct VoltageDef {
    min: u16,
    max: u16,
}

impl From<VoltageDef> for VoltageRange {
    fn from(def: VoltageDef) -> Self {
        VoltageRange {
            min_mv: def.min,
            max_mv: def.max,
        }
    }
}

fn default_vpp() -> VoltageDef {
    VoltageDef {
        min: 12750,
        max: 13250,
    }
}

fn default_vdd() -> VoltageDef {
    VoltageDef {
        min: 4500,
        max: 5500,
    }
}

/// PIC family (RON format)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
enum PicFamilyDef {
    Pic16,
    Pic16f8xx,
    Pic16f6xx,
    Pic16f7x,
    Pic12f6xx,
    Pic16f87xA,
    Pic16f88x,
    Pic18,
    Pic18fxx20,
    Pic18f2xx0,
}

impl From<PicFamilyDef> for PicFamily {
    fn from(def: PicFamilyDef) -> Self {
        match def {
            PicFamilyDef::Pic16 => PicFamily::Pic16,
            PicFamilyDef::Pic16f8xx => PicFamily::Pic16f8xx,
            PicFamilyDef::Pic16f6xx => PicFamily::Pic16f6xx,
            PicFamilyDef::Pic16f7x => PicFamily::Pic16f7x,
            PicFamilyDef::Pic12f6xx => PicFamily::Pic12f6xx,
            PicFamilyDef::Pic16f87xA => PicFamily::Pic16f87xA,
            PicFamilyDef::Pic16f88x => PicFamily::Pic16f88x,
            PicFamilyDef::Pic18 => PicFamily::Pic18,
            PicFamilyDef::Pic18fxx20 => PicFamily::Pic18fxx20,
            PicFamilyDef::Pic18f2xx0 => PicFamily::Pic18f2xx0,
        }
    }
}

/// Single PIC definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct PicDef {
    name: String,
    family: PicFamilyDef,
    code_words: u32,
    #[serde(default)]
    id_words: Option<u32>,
    #[serde(default)]
    config_words: Option<u32>,
    #[serde(default)]
    data_bytes: u32,
    #[serde(default)]
    program_time_us: Option<u32>,
    #[serde(default)]
    erase_time_us: Option<u32>,
    #[serde(default = "default_program_count")]
    program_count: u32,
    #[serde(default)]
    program_multiplier: u32,
    #[serde(default)]
    config_masks: Option<Vec<u16>>,
    #[serde(default)]
    cp_mask: u16,
    #[serde(default)]
    cpd_mask: u16,
    #[serde(default)]
    has_osccal: bool,
    #[serde(default)]
    bandgap_mask: u16,
    #[serde(default)]
    device_id: Option<u16>,
    #[serde(default)]
    device_id_mask: Option<u16>,
    #[serde(default)]
    panel_count: u32,
    #[serde(default)]
    panel_bytes: u32,
    #[serde(default)]
    write_buffer_bytes: u32,
    #[serde(default = "default_vpp")]
    vpp: VoltageDef,
    #[serde(default = "default_vdd")]
    vdd: VoltageDef,
}

fn default_program_count() -> u32 {
    1
}

impl PicDef {
    fn into_descriptor(self, vendor: &str) -> PicDescriptor {
        let family: PicFamily = self.family.into();
        let pic18 = family.is_pic18();
        let config_words = self
            .config_words
            .unwrap_or(if pic18 { 14 } else { 1 });
        let word_mask: u16 = if pic18 { 0xFF } else { 0x3FFF };
        PicDescriptor {
            name: self.name,
            vendor: vendor.to_string(),
            family,
            code_words: self.code_words,
            id_words: self.id_words.unwrap_or(if pic18 { 8 } else { 4 }),
            config_words,
            data_bytes: self.data_bytes,
            program_time_us: self
                .program_time_us
                .unwrap_or(if pic18 { 1000 } else { 4000 }),
            erase_time_us: self.erase_time_us.unwrap_or(10000),
            program_count: self.program_count,
            program_multiplier: self.program_multiplier,
            config_masks: self
                .config_masks
                .unwrap_or_else(|| vec![word_mask; config_words as usize]),
            cp_mask: self.cp_mask,
            cpd_mask: self.cpd_mask,
            has_osccal: self.has_osccal,
            bandgap_mask: self.bandgap_mask,
            device_id: self.device_id,
            device_id_mask: self
                .device_id_mask
                .unwrap_or(if pic18 { 0xFFE0 } else { 0x3FE0 }),
            panel_count: self.panel_count,
            panel_bytes: self.panel_bytes,
            write_buffer_bytes: self.write_buffer_bytes,
            vpp: self.vpp.into(),
            vdd: self.vdd.into(),
        }
    }
}

/// One AVR memory (RON format)
#[derive(Debug, Clone, Copy, serde::Deserialize)]
struct AvrMemoryDef {
    size: Size,
    #[serde(default)]
    page_size: u32,
    #[serde(default = "default_pages")]
    pages: u32,
    #[serde(default = "default_read_back")]
    read_back: (u8, u8),
    #[serde(default = "default_write_time")]
    write_time_us: u32,
}

fn default_pages() -> u32 {
    1
}

fn default_read_back() -> (u8, u8) {
    (0xFF, 0xFF)
}

fn default_write_time() -> u32 {
    9000
}

impl Default for AvrMemoryDef {
    fn default() -> Self {
        Self {
            size: Size::B(0),
            page_size: 0,
            pages: 1,
            read_back: default_read_back(),
            write_time_us: default_write_time(),
        }
    }
}

impl From<AvrMemoryDef> for AvrMemory {
    fn from(def: AvrMemoryDef) -> Self {
        let bytes = def.size.to_bytes();
        if bytes == 0 {
            return AvrMemory::none();
        }
        let (pages, page_bytes) = if def.pages <= 1 {
            (1, bytes)
        } else {
            (def.pages, def.page_size)
        };
        AvrMemory {
            bytes,
            page_bytes,
            pages,
            read_back: [def.read_back.0, def.read_back.1],
            write_time_us: def.write_time_us,
        }
    }
}

/// Instruction templates (RON format); empty string means not supported
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
struct AvrInstructionsDef {
    programming_enable: String,
    chip_erase: String,
    load_ext_addr: String,
    read_flash: String,
    write_flash: String,
    load_flash_page: String,
    write_flash_page: String,
    read_eeprom: String,
    write_eeprom: String,
    load_eeprom_page: String,
    write_eeprom_page: String,
    read_fuse: String,
    write_fuse: String,
    read_high_fuse: String,
    write_high_fuse: String,
    read_ext_fuse: String,
    write_ext_fuse: String,
    read_lock: String,
    write_lock: String,
    read_signature: String,
    read_calibration: String,
}

impl AvrInstructionsDef {
    fn parse(self, device: &str) -> Result<AvrInstructionSet, DeviceDbError> {
        let parse = |template: &str, instruction: &'static str| {
            Instruction::parse(template).map_err(|source| DeviceDbError::Template {
                device: device.to_string(),
                instruction,
                source,
            })
        };
        Ok(AvrInstructionSet {
            programming_enable: parse(&self.programming_enable, "programming_enable")?,
            chip_erase: parse(&self.chip_erase, "chip_erase")?,
            load_ext_addr: parse(&self.load_ext_addr, "load_ext_addr")?,
            read_flash: parse(&self.read_flash, "read_flash")?,
            write_flash: parse(&self.write_flash, "write_flash")?,
            load_flash_page: parse(&self.load_flash_page, "load_flash_page")?,
            write_flash_page: parse(&self.write_flash_page, "write_flash_page")?,
            read_eeprom: parse(&self.read_eeprom, "read_eeprom")?,
            write_eeprom: parse(&self.write_eeprom, "write_eeprom")?,
            load_eeprom_page: parse(&self.load_eeprom_page, "load_eeprom_page")?,
            write_eeprom_page: parse(&self.write_eeprom_page, "write_eeprom_page")?,
            read_fuse: parse(&self.read_fuse, "read_fuse")?,
            write_fuse: parse(&self.write_fuse, "write_fuse")?,
            read_high_fuse: parse(&self.read_high_fuse, "read_high_fuse")?,
            write_high_fuse: parse(&self.write_high_fuse, "write_high_fuse")?,
            read_ext_fuse: parse(&self.read_ext_fuse, "read_ext_fuse")?,
            write_ext_fuse: parse(&self.write_ext_fuse, "write_ext_fuse")?,
            read_lock: parse(&self.read_lock, "read_lock")?,
            write_lock: parse(&self.write_lock, "write_lock")?,
            read_signature: parse(&self.read_signature, "read_signature")?,
            read_calibration: parse(&self.read_calibration, "read_calibration")?,
        })
    }
}

/// Single AVR definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
struct AvrDef {
    name: String,
    signature: (u8, u8, u8),
    #[serde(default = "default_vcc")]
    vcc: VoltageDef,
    #[serde(default)]
    calibration_bytes: u32,
    #[serde(default = "default_reset_delay")]
    reset_delay_us: u32,
    #[serde(default = "default_erase_time")]
    erase_time_us: u32,
    #[serde(default = "default_fuse_time")]
    fuse_time_us: u32,
    #[serde(default)]
    power_off_after_write_fuse: bool,
    flash: AvrMemoryDef,
    #[serde(default)]
    eeprom: AvrMemoryDef,
    instructions: AvrInstructionsDef,
}

fn default_vcc() -> VoltageDef {
    VoltageDef {
        min: 4500,
        max: 5500,
    }
}

fn default_reset_delay() -> u32 {
    25000
}

fn default_erase_time() -> u32 {
    18000
}

fn default_fuse_time() -> u32 {
    4500
}

impl AvrDef {
    fn into_descriptor(self, vendor: &str) -> Result<AvrDescriptor, DeviceDbError> {
        let instructions = self.instructions.parse(&self.name)?;
        Ok(AvrDescriptor {
            name: self.name,
            vendor: vendor.to_string(),
            signature: [self.signature.0, self.signature.1, self.signature.2],
            vcc_min_mv: self.vcc.min,
            vcc_max_mv: self.vcc.max,
            calibration_bytes: self.calibration_bytes,
            reset_delay_us: self.reset_delay_us,
            erase_time_us: self.erase_time_us,
            fuse_time_us: self.fuse_time_us,
            power_off_after_write_fuse: self.power_off_after_write_fuse,
            flash: self.flash.into(),
            eeprom: self.eeprom.into(),
            instructions,
        })
    }
}

/// Single device definition in RON format
#[derive(Debug, Clone, serde::Deserialize)]
enum DeviceDef {
    Pic(PicDef),
    Avr(AvrDef),
}

/// Vendor definition containing multiple devices
#[derive(Debug, Clone, serde::Deserialize)]
struct VendorDef {
    vendor: String,
    devices: Vec<DeviceDef>,
}

// ============================================================================
// Device database
// ============================================================================

/// Runtime device database
///
/// Holds the device descriptors loaded from RON files.
#[derive(Debug, Clone, Default)]
pub struct DeviceDatabase {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceDatabase {
    /// Create an empty database
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Load device definitions from a single RON file
    pub fn load_file(&mut self, path: &Path) -> Result<usize, DeviceDbError> {
        let content = fs::read_to_string(path)?;
        self.load_ron(&content)
    }

    /// Load device definitions from a RON string
    ///
    /// Optional fields are written bare in the files, without `Some(..)`.
    pub fn load_ron(&mut self, content: &str) -> Result<usize, DeviceDbError> {
        let options = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME);
        let vendor_def: VendorDef = options.from_str(content)?;
        let count = vendor_def.devices.len();

        for def in vendor_def.devices {
            let descriptor = match def {
                DeviceDef::Pic(pic) => {
                    DeviceDescriptor::Pic(pic.into_descriptor(&vendor_def.vendor))
                }
                DeviceDef::Avr(avr) => {
                    DeviceDescriptor::Avr(avr.into_descriptor(&vendor_def.vendor)?)
                }
            };
            for issue in descriptor.problems() {
                warn!("device {}: {}", descriptor.name(), issue);
            }
            self.devices.push(descriptor);
        }

        Ok(count)
    }

    /// Load all RON files from a directory
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, DeviceDbError> {
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

    /// All loaded devices
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// Number of devices in the database
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the database is empty
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Exact name lookup, case-insensitive
    pub fn find(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices
            .iter()
            .find(|d| d.name().eq_ignore_ascii_case(name))
    }

    /// Find devices by name (case-insensitive partial match)
    pub fn find_by_name(&self, name: &str) -> Vec<&DeviceDescriptor> {
        let name_lower = name.to_lowercase();
        self.devices
            .iter()
            .filter(|d| d.name().to_lowercase().contains(&name_lower))
            .collect()
    }

    /// Find devices by vendor (case-insensitive partial match)
    pub fn find_by_vendor(&self, vendor: &str) -> Vec<&DeviceDescriptor> {
        let vendor_lower = vendor.to_lowercase();
        self.devices
            .iter()
            .filter(|d| d.vendor().to_lowercase().contains(&vendor_lower))
            .collect()
    }

    /// Iterate over all devices
    pub fn iter(&self) -> impl Iterator<Item = &DeviceDescriptor> {
        self.devices.iter()
    }
}
