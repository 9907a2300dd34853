//! PIC18 (16-bit core) ICSP driver
//!
//! PIC18 programming commands are 4 bits wide, sent LSB first, and most are
//! followed by a 16-bit payload. Memory is byte-addressed through a 24-bit
//! table pointer loaded with MOVLW/MOVWF core-instruction sequences, so any
//! location is reachable directly, unlike the forward-only counter of the
//! midrange parts.
//!
//! Code memory goes through the part's write buffers. Classic parts program
//! several panels at once (the same eight-byte slice of every panel is
//! loaded, then one pulse commits them all), later parts use a single
//! per-block holding buffer. The programming pulse is a NOP command whose
//! fourth command clock is stretched high for the programming time, then
//! released with a high-voltage discharge delay before the payload bits.
//!
//! Data EEPROM is reached through the EECON1/EEADR/EEDATA register file with
//! core instructions, polling the WR bit for write completion.

use log::debug;

use crate::buffer::ImageBuffer;
use crate::device::types::{PicDescriptor, PicFamily};
use crate::error::{Error, Result};
use crate::io::{shift_bits_in, shift_bits_out, shift_bits_out_hold, IcspIo};
use crate::memmap::{MemoryMap, Region, RegionKind};
use crate::progress::{DumpSink, Operation, ProgressMeter, ProgressSink};
use crate::target::{
    apply_word, check_image, dump_image, pic_power_entry, pic_power_off, ProbeInfo, Target,
};

// 4-bit programming commands
const CMD_CORE_INST: u32 = 0x0;
const CMD_SHIFT_TABLAT: u32 = 0x2;
const CMD_TABLE_READ_POSTINC: u32 = 0x9;
const CMD_TABLE_WRITE: u32 = 0xC;
const CMD_TABLE_WRITE_POSTINC2: u32 = 0xD;
const CMD_TABLE_WRITE_STARTPGM: u32 = 0xF;

// Core instructions issued over the wire
const OP_NOP: u16 = 0x0000;
const OP_MOVLW: u16 = 0x0E00;
const OP_MOVWF_TBLPTRU: u16 = 0x6EF8;
const OP_MOVWF_TBLPTRH: u16 = 0x6EF7;
const OP_MOVWF_TBLPTRL: u16 = 0x6EF6;
const OP_MOVWF_TABLAT: u16 = 0x6EF5;
const OP_BSF_EEPGD: u16 = 0x8EA6;
const OP_BCF_EEPGD: u16 = 0x9EA6;
const OP_BSF_CFGS: u16 = 0x8CA6;
const OP_BCF_CFGS: u16 = 0x9CA6;
const OP_BSF_WREN: u16 = 0x84A6;
const OP_BSF_WR: u16 = 0x82A6;
const OP_BSF_RD: u16 = 0x80A6;
const OP_MOVF_EECON1_W: u16 = 0x50A6;
const OP_MOVF_EEDATA_W: u16 = 0x50A8;
const OP_MOVWF_EEDATA: u16 = 0x6EA8;
const OP_MOVWF_EECON2: u16 = 0x6EA7;
const OP_MOVWF_EEADR: u16 = 0x6EA9;
const OP_MOVWF_EEADRH: u16 = 0x6EAA;

// EECON1 write-in-progress bit
const EECON1_WR: u8 = 0x02;

// Programming register file addresses
const ID_BASE: u32 = 0x20_0000;
const CONFIG_BASE: u32 = 0x30_0000;
const BULK_ERASE_LOW: u32 = 0x3C_0004;
const BULK_ERASE_HIGH: u32 = 0x3C_0005;
const PANEL_CFG_REG: u32 = 0x3C_0006;
const DEVICE_ID_BASE: u32 = 0x3F_FFFE;

// Panel configuration register values
const PANEL_MODE_SINGLE: u16 = 0x0000;
const PANEL_MODE_MULTI: u16 = 0x0040;

// Words loaded into each panel per programming pulse
const PANEL_GROUP_WORDS: u32 = 4;

const T_SET_US: u32 = 1;
const T_HOLD_US: u32 = 1;
const T_GAP_US: u32 = 2;
const T_POWER_US: u32 = 1000;
// P10, high-voltage discharge after the held pulse clock
const T_DISCHARGE_US: u32 = 100;

const EEPROM_POLL_STEP_US: u32 = 100;
const EEPROM_POLL_LIMIT: u32 = 5000;

/// ICSP driver for the 16-bit-core PIC18 families
pub struct Pic18Target<IO> {
    desc: PicDescriptor,
    map: MemoryMap,
    io: IO,
}

impl<IO: IcspIo> Pic18Target<IO> {
    /// Build a driver for `desc` talking through `io`
    pub fn new(desc: PicDescriptor, io: IO) -> Self {
        let map = desc.memory_map();
        Pic18Target { desc, map, io }
    }

    fn power_entry(&mut self) {
        pic_power_entry(&mut self.io, T_POWER_US);
    }

    fn power_off(&mut self) {
        pic_power_off(&mut self.io, T_POWER_US);
    }

    fn command(&mut self, cmd: u32) {
        shift_bits_out(&mut self.io, cmd, 4, T_SET_US, T_HOLD_US);
        self.io.delay_us(T_GAP_US);
    }

    fn write_payload(&mut self, value: u16) {
        shift_bits_out(&mut self.io, u32::from(value), 16, T_SET_US, T_HOLD_US);
        self.io.delay_us(T_GAP_US);
    }

    fn read_payload(&mut self) -> u16 {
        let value = shift_bits_in(&mut self.io, 16, T_SET_US, T_HOLD_US) as u16;
        self.io.delay_us(T_GAP_US);
        value
    }

    fn core_instruction(&mut self, opcode: u16) {
        self.command(CMD_CORE_INST);
        self.write_payload(opcode);
    }

    /// The part shifts the byte out in the upper half of the payload
    fn shift_tablat(&mut self) -> u8 {
        self.command(CMD_SHIFT_TABLAT);
        (self.read_payload() >> 8) as u8
    }

    fn table_read_postinc(&mut self) -> u8 {
        self.command(CMD_TABLE_READ_POSTINC);
        (self.read_payload() >> 8) as u8
    }

    fn table_write(&mut self, cmd: u32, value: u16) {
        self.command(cmd);
        self.write_payload(value);
    }

    fn set_table_pointer(&mut self, addr: u32) {
        self.core_instruction(OP_MOVLW | ((addr >> 16) & 0x3F) as u16);
        self.core_instruction(OP_MOVWF_TBLPTRU);
        self.core_instruction(OP_MOVLW | ((addr >> 8) & 0xFF) as u16);
        self.core_instruction(OP_MOVWF_TBLPTRH);
        self.core_instruction(OP_MOVLW | (addr & 0xFF) as u16);
        self.core_instruction(OP_MOVWF_TBLPTRL);
    }

    /// NOP whose fourth command clock is stretched into the write pulse
    fn program_pulse(&mut self) {
        shift_bits_out_hold(&mut self.io, CMD_CORE_INST, 4, T_SET_US, T_HOLD_US);
        self.io.delay_us(self.desc.program_time_us);
        self.io.set_clock(false);
        self.io.delay_us(T_DISCHARGE_US);
        self.write_payload(OP_NOP);
    }

    /// Final word of a buffer load, committed with a programming pulse
    fn start_write(&mut self, value: u16) {
        self.table_write(CMD_TABLE_WRITE_STARTPGM, value);
        self.program_pulse();
    }

    /// NOP with the erase executing between command and payload
    fn erase_pulse(&mut self) {
        self.command(CMD_CORE_INST);
        self.io.delay_us(self.desc.erase_time_us);
        self.write_payload(OP_NOP);
    }

    fn code_space(&mut self) {
        self.core_instruction(OP_BSF_EEPGD);
        self.core_instruction(OP_BCF_CFGS);
    }

    fn config_space(&mut self) {
        self.core_instruction(OP_BSF_EEPGD);
        self.core_instruction(OP_BSF_CFGS);
    }

    fn data_space(&mut self) {
        self.core_instruction(OP_BCF_EEPGD);
        self.core_instruction(OP_BCF_CFGS);
    }

    /// Classic parts select single- or multi-panel writes in config space
    fn set_panel_mode(&mut self, mode: u16) {
        self.config_space();
        self.set_table_pointer(PANEL_CFG_REG);
        self.start_write(mode);
    }

    fn set_eeprom_addr(&mut self, offset: u32) {
        self.core_instruction(OP_MOVLW | (offset & 0xFF) as u16);
        self.core_instruction(OP_MOVWF_EEADR);
        if self.desc.data_bytes > 256 {
            self.core_instruction(OP_MOVLW | ((offset >> 8) & 0xFF) as u16);
            self.core_instruction(OP_MOVWF_EEADRH);
        }
    }

    fn eecon1_status(&mut self) -> u8 {
        self.core_instruction(OP_MOVF_EECON1_W);
        self.core_instruction(OP_MOVWF_TABLAT);
        self.shift_tablat()
    }

    fn read_eeprom_byte(&mut self, offset: u32) -> u8 {
        self.data_space();
        self.set_eeprom_addr(offset);
        self.core_instruction(OP_BSF_RD);
        self.core_instruction(OP_MOVF_EEDATA_W);
        self.core_instruction(OP_MOVWF_TABLAT);
        self.shift_tablat()
    }

    /// Write one data EEPROM byte and poll WR until the cell commits.
    ///
    /// `address` is the buffer address, only used for error reporting.
    fn write_eeprom_byte(&mut self, offset: u32, value: u8, address: u32) -> Result<()> {
        self.data_space();
        self.set_eeprom_addr(offset);
        self.core_instruction(OP_MOVLW | u16::from(value));
        self.core_instruction(OP_MOVWF_EEDATA);
        self.core_instruction(OP_BSF_WREN);
        if self.desc.family == PicFamily::Pic18f2xx0 {
            self.core_instruction(OP_MOVLW | 0x55);
            self.core_instruction(OP_MOVWF_EECON2);
            self.core_instruction(OP_MOVLW | 0xAA);
            self.core_instruction(OP_MOVWF_EECON2);
        }
        self.core_instruction(OP_BSF_WR);
        for _ in 0..EEPROM_POLL_LIMIT {
            if self.eecon1_status() & EECON1_WR == 0 {
                return Ok(());
            }
            self.io.delay_us(EEPROM_POLL_STEP_US);
        }
        Err(Error::WriteTimeout {
            what: "EEPROM",
            address,
        })
    }

    fn probe_identity(&mut self) -> Result<ProbeInfo> {
        self.set_table_pointer(DEVICE_ID_BASE);
        let low = u16::from(self.table_read_postinc());
        let high = u16::from(self.table_read_postinc());
        let raw = low | (high << 8);
        let mask = self.desc.device_id_mask;
        if let Some(expected) = self.desc.device_id {
            if raw & mask != expected & mask {
                return Err(Error::DeviceIdMismatch {
                    expected: expected & mask,
                    found: raw & mask,
                    mask,
                });
            }
        }
        Ok(ProbeInfo {
            device_id: Some(raw & mask),
            revision: Some(raw & !mask),
            signature: None,
        })
    }

    fn verify_device_id(&mut self) -> Result<()> {
        if self.desc.device_id.is_some() {
            self.probe_identity()?;
        }
        Ok(())
    }

    fn erase_inner(&mut self) -> Result<()> {
        self.verify_device_id()?;
        self.config_space();
        match self.desc.family {
            PicFamily::Pic18f2xx0 => {
                self.set_table_pointer(BULK_ERASE_HIGH);
                self.table_write(CMD_TABLE_WRITE, 0x3F3F);
                self.set_table_pointer(BULK_ERASE_LOW);
                self.table_write(CMD_TABLE_WRITE, 0x8F8F);
            }
            _ => {
                // chip erase, clears code protection as well
                self.set_table_pointer(BULK_ERASE_LOW);
                self.table_write(CMD_TABLE_WRITE, 0x0080);
            }
        }
        self.erase_pulse();
        Ok(())
    }

    fn program_code(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        if self.desc.family == PicFamily::Pic18 {
            self.program_code_panels(image, region, meter)
        } else {
            self.program_code_buffered(image, region, meter)
        }
    }

    /// Multi-panel write: every panel's holding registers are loaded for the
    /// same eight-byte slice, the final table write starts one shared pulse.
    fn program_code_panels(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        let panels = self.desc.panel_count;
        let panel_words = self.desc.panel_bytes / 2;
        if panels == 0 || panel_words == 0 || panel_words % PANEL_GROUP_WORDS != 0 {
            return Err(Error::config("panel_bytes", "multi-panel geometry is not set"));
        }
        if panels * panel_words != region.len {
            return Err(Error::config(
                "panel_count",
                "panel geometry does not cover code memory",
            ));
        }
        self.set_panel_mode(PANEL_MODE_MULTI);
        self.code_space();
        for group in 0..panel_words / PANEL_GROUP_WORDS {
            let mut blank = true;
            for panel in 0..panels {
                let base = region.start + panel * panel_words + group * PANEL_GROUP_WORDS;
                if !image.range_blank(base..base + PANEL_GROUP_WORDS)? {
                    blank = false;
                    break;
                }
            }
            if !blank {
                for panel in 0..panels {
                    let word_base = panel * panel_words + group * PANEL_GROUP_WORDS;
                    self.set_table_pointer(word_base * 2);
                    for word in 0..PANEL_GROUP_WORDS {
                        let value = image.get(region.start + word_base + word)? as u16;
                        if panel == panels - 1 && word == PANEL_GROUP_WORDS - 1 {
                            self.start_write(value);
                        } else {
                            self.table_write(CMD_TABLE_WRITE_POSTINC2, value);
                        }
                    }
                }
            }
            let last = region.start + (panels - 1) * panel_words + group * PANEL_GROUP_WORDS;
            meter.advance(last, u64::from(panels * PANEL_GROUP_WORDS));
        }
        Ok(())
    }

    /// Single-buffer write: load one block, commit, move to the next.
    /// Blank blocks are skipped outright.
    fn program_code_buffered(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        let block_words = self.desc.write_buffer_bytes / 2;
        if block_words == 0 || region.len % block_words != 0 {
            return Err(Error::config(
                "write_buffer_bytes",
                "write buffer geometry does not cover code memory",
            ));
        }
        self.code_space();
        for block in 0..region.len / block_words {
            let base = region.start + block * block_words;
            if !image.range_blank(base..base + block_words)? {
                self.set_table_pointer(block * block_words * 2);
                for word in 0..block_words {
                    let value = image.get(base + word)? as u16;
                    if word == block_words - 1 {
                        self.start_write(value);
                    } else {
                        self.table_write(CMD_TABLE_WRITE_POSTINC2, value);
                    }
                }
            }
            meter.advance(base, u64::from(block_words));
        }
        Ok(())
    }

    fn program_id(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        if !image.region_blank(region) {
            if self.desc.family == PicFamily::Pic18 {
                self.set_panel_mode(PANEL_MODE_SINGLE);
            }
            self.code_space();
            self.set_table_pointer(ID_BASE);
            let words = region.len / 2;
            for word in 0..words {
                let low = image.get(region.start + word * 2)? as u16;
                let high = image.get(region.start + word * 2 + 1)? as u16;
                let value = low | (high << 8);
                if word == words - 1 {
                    self.start_write(value);
                } else {
                    self.table_write(CMD_TABLE_WRITE_POSTINC2, value);
                }
            }
        }
        meter.advance(region.start + region.len - 1, u64::from(region.len));
        Ok(())
    }

    fn program_config(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        self.config_space();
        for offset in 0..region.len {
            let addr = region.start + offset;
            if !image.is_blank(addr)? {
                let value = image.get(addr)? as u16 & 0xFF;
                self.set_table_pointer(CONFIG_BASE + offset);
                // both byte lanes carry the value, the address LSB picks one
                self.start_write((value << 8) | value);
            }
            meter.tick(addr);
        }
        Ok(())
    }

    fn program_eeprom(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        for offset in 0..region.len {
            let addr = region.start + offset;
            if !image.is_blank(addr)? {
                let value = image.get(addr)? as u8;
                self.write_eeprom_byte(offset, value, addr)?;
            }
            meter.tick(addr);
        }
        Ok(())
    }

    fn program_inner(&mut self, image: &ImageBuffer, meter: &mut ProgressMeter<'_>) -> Result<()> {
        check_image(image, &self.map)?;
        self.verify_device_id()?;
        let regions: Vec<Region> = self.map.regions().to_vec();

        for region in &regions {
            if region.kind == RegionKind::Code {
                self.program_code(image, region, meter)?;
            }
        }
        for region in &regions {
            if region.kind == RegionKind::Eeprom {
                self.program_eeprom(image, region, meter)?;
            }
        }
        for region in &regions {
            if region.kind == RegionKind::Id {
                self.program_id(image, region, meter)?;
            }
        }
        for region in &regions {
            if region.kind == RegionKind::Config {
                self.program_config(image, region, meter)?;
            }
        }
        Ok(())
    }

    fn read_inner(
        &mut self,
        image: &mut ImageBuffer,
        verify: bool,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        check_image(image, &self.map)?;
        self.verify_device_id()?;
        let regions: Vec<Region> = self.map.regions().to_vec();

        for region in &regions {
            match region.kind {
                RegionKind::Code => {
                    self.set_table_pointer(0);
                    for offset in 0..region.len {
                        let low = u32::from(self.table_read_postinc());
                        let high = u32::from(self.table_read_postinc());
                        let addr = region.start + offset;
                        apply_word(image, verify, addr, low | (high << 8), 0xFFFF)?;
                        meter.tick(addr);
                    }
                }
                RegionKind::Id => {
                    self.set_table_pointer(ID_BASE);
                    for offset in 0..region.len {
                        let byte = u32::from(self.table_read_postinc());
                        let addr = region.start + offset;
                        apply_word(image, verify, addr, byte, 0xFF)?;
                        meter.tick(addr);
                    }
                }
                RegionKind::Config => {
                    self.set_table_pointer(CONFIG_BASE);
                    for offset in 0..region.len {
                        let byte = u32::from(self.table_read_postinc());
                        let addr = region.start + offset;
                        let mask = u32::from(self.desc.config_mask(offset)) & 0xFF;
                        apply_word(image, verify, addr, byte, mask)?;
                        meter.tick(addr);
                    }
                }
                RegionKind::Eeprom => {
                    for offset in 0..region.len {
                        let byte = u32::from(self.read_eeprom_byte(offset));
                        let addr = region.start + offset;
                        apply_word(image, verify, addr, byte, 0xFF)?;
                        meter.tick(addr);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl<IO: IcspIo> Target for Pic18Target<IO> {
    fn name(&self) -> &str {
        &self.desc.name
    }

    fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    fn enter_program_mode(&mut self) -> Result<()> {
        debug!("{}: entering program mode", self.desc.name);
        self.power_entry();
        Ok(())
    }

    fn exit_program_mode(&mut self) -> Result<()> {
        debug!("{}: leaving program mode", self.desc.name);
        self.power_off();
        Ok(())
    }

    fn probe(&mut self) -> Result<ProbeInfo> {
        self.probe_identity()
    }

    fn erase(&mut self, progress: &mut dyn ProgressSink) -> Result<()> {
        debug!("{}: chip erase", self.desc.name);
        let mut meter = ProgressMeter::begin(progress, Operation::Erase, 1);
        let result = self.erase_inner();
        if result.is_ok() {
            meter.tick(0);
        }
        meter.finish();
        result
    }

    fn program(&mut self, image: &ImageBuffer, progress: &mut dyn ProgressSink) -> Result<()> {
        debug!("{}: programming", self.desc.name);
        let total = u64::from(self.map.total_words());
        let mut meter = ProgressMeter::begin(progress, Operation::Program, total);
        let result = self.program_inner(image, &mut meter);
        meter.finish();
        result
    }

    fn read(
        &mut self,
        image: &mut ImageBuffer,
        verify: bool,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        let op = if verify {
            Operation::Verify
        } else {
            Operation::Read
        };
        debug!("{}: {}", self.desc.name, op);
        let total = u64::from(self.map.total_words());
        let mut meter = ProgressMeter::begin(progress, op, total);
        let result = self.read_inner(image, verify, &mut meter);
        meter.finish();
        result
    }

    fn dump(&mut self, sink: &mut dyn DumpSink, progress: &mut dyn ProgressSink) -> Result<()> {
        let mut image = ImageBuffer::new(&self.map);
        let total = u64::from(self.map.total_words());
        let mut meter = ProgressMeter::begin(progress, Operation::Dump, total);
        let result = self.read_inner(&mut image, false, &mut meter);
        meter.finish();
        result?;
        dump_image(&image, sink);
        Ok(())
    }
}
