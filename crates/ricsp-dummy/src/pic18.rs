//! Simulated PIC18 part
//!
//! Decodes 4-bit commands and their 16-bit payloads off the falling clock
//! edges and runs the core instructions the programming executive relies on:
//! `MOVLW`/`MOVWF` into the table pointer and EEPROM registers, the EECON
//! bit operations and the `EECON2` unlock sequence. Table writes collect in
//! holding registers and land on the start-programming command, so buffered
//! and multi-panel writes behave like the real flash array.

use log::{debug, trace};

use ricsp_core::device::types::{PicDescriptor, PicFamily};
use ricsp_core::io::{IcspIo, VddState, VppState};

// 4-bit programming commands
const CMD_CORE_INST: u32 = 0x0;
const CMD_SHIFT_TABLAT: u32 = 0x2;
const CMD_TABLE_READ_POSTINC: u32 = 0x9;
const CMD_TABLE_WRITE: u32 = 0xC;
const CMD_TABLE_WRITE_POSTINC2: u32 = 0xD;
const CMD_TABLE_WRITE_STARTPGM: u32 = 0xF;

const ID_BASE: u32 = 0x20_0000;
const CONFIG_BASE: u32 = 0x30_0000;
const BULK_ERASE_LOW: u32 = 0x3C_0004;
const BULK_ERASE_HIGH: u32 = 0x3C_0005;
const PANEL_CFG_REG: u32 = 0x3C_0006;
const DEVICE_ID_BASE: u32 = 0x3F_FFFE;

/// EECON1 reads with WR still set after a data write starts
const WR_BUSY_POLLS: u32 = 2;

#[derive(Clone, Copy)]
enum PayloadKind {
    /// Core instruction to execute
    Core,
    /// Direct table write, no pointer movement
    Write,
    /// Table write, pointer advances by two
    WritePostinc,
    /// Table write followed by an internally timed program cycle
    WriteStart,
}

#[derive(Clone, Copy)]
enum Wire {
    /// Collecting a 4-bit command, LSB first
    Command { shift: u32, count: u8 },
    /// Collecting a 16-bit payload
    Payload {
        kind: PayloadKind,
        shift: u32,
        count: u8,
    },
    /// Driving a 16-bit read frame back at the programmer
    Drive { frame: u32, bit: u8 },
}

/// Bit-level simulation of a PIC18 part
///
/// Construct one from the descriptor of the part it should impersonate and
/// hand it to [`Pic18Target`] as its I/O backend; the memories start blank
/// and can be pre-loaded or inspected through the accessors.
///
/// [`Pic18Target`]: ricsp_core::target::Pic18Target
pub struct DummyPic18 {
    desc: PicDescriptor,
    code: Vec<u8>,
    id: Vec<u8>,
    config: Vec<u8>,
    eeprom: Vec<u8>,
    device_id: u16,
    // core registers the programming sequences touch
    w: u8,
    tblptr: u32,
    tablat: u8,
    eepgd: bool,
    cfgs: bool,
    wren: bool,
    eeadr: u8,
    eeadrh: u8,
    eedata: u8,
    /// EECON2 unlock progress: 0x55 seen, then 0x55+0xAA
    unlock: u8,
    wr_busy: u32,
    panel_mode: u16,
    /// Write latches waiting for a program cycle
    staged: Vec<(u32, u8)>,
    clock: bool,
    out_bit: bool,
    in_bit: bool,
    state: Wire,
    vpp: VppState,
}

impl DummyPic18 {
    /// Create a blank part impersonating `desc`
    pub fn new(desc: &PicDescriptor) -> Self {
        DummyPic18 {
            code: vec![0xFF; desc.code_words as usize * 2],
            id: vec![0xFF; desc.id_words as usize],
            config: vec![0xFF; desc.config_words as usize],
            eeprom: vec![0xFF; desc.data_bytes as usize],
            device_id: desc.device_id.unwrap_or(0xFFFF),
            desc: desc.clone(),
            w: 0,
            tblptr: 0,
            tablat: 0,
            eepgd: false,
            cfgs: false,
            wren: false,
            eeadr: 0,
            eeadrh: 0,
            eedata: 0,
            unlock: 0,
            wr_busy: 0,
            panel_mode: 0,
            staged: Vec::new(),
            clock: false,
            out_bit: false,
            in_bit: false,
            state: Wire::Command { shift: 0, count: 0 },
            vpp: VppState::Gnd,
        }
    }

    /// Program memory bytes, low byte of each word first
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Mutable program memory bytes
    pub fn code_mut(&mut self) -> &mut [u8] {
        &mut self.code
    }

    /// ID location bytes
    pub fn id(&self) -> &[u8] {
        &self.id
    }

    /// Mutable ID location bytes
    pub fn id_mut(&mut self) -> &mut [u8] {
        &mut self.id
    }

    /// Config bytes
    pub fn config(&self) -> &[u8] {
        &self.config
    }

    /// Mutable config bytes
    pub fn config_mut(&mut self) -> &mut [u8] {
        &mut self.config
    }

    /// EEPROM data bytes
    pub fn eeprom(&self) -> &[u8] {
        &self.eeprom
    }

    /// Mutable EEPROM data bytes
    pub fn eeprom_mut(&mut self) -> &mut [u8] {
        &mut self.eeprom
    }

    fn config_range(&self, addr: u32) -> bool {
        addr >= CONFIG_BASE && addr < CONFIG_BASE + self.config.len() as u32
    }

    /// Byte served by a table read at `addr`
    fn read_byte(&self, addr: u32) -> u8 {
        if let Some(&byte) = self.code.get(addr as usize) {
            return byte;
        }
        if addr >= ID_BASE && addr < ID_BASE + self.id.len() as u32 {
            return self.id[(addr - ID_BASE) as usize];
        }
        if self.config_range(addr) {
            return self.config[(addr - CONFIG_BASE) as usize];
        }
        match addr {
            DEVICE_ID_BASE => self.device_id as u8,
            a if a == DEVICE_ID_BASE + 1 => (self.device_id >> 8) as u8,
            _ => 0xFF,
        }
    }

    /// Queue one table write into the holding registers. Config bytes latch
    /// only the addressed half of the word; everywhere else both bytes land.
    fn stage_word(&mut self, frame: u16) {
        let base = self.tblptr;
        if self.config_range(base) {
            let byte = if base & 1 == 0 { frame } else { frame >> 8 };
            self.staged.push((base, byte as u8));
        } else {
            self.staged.push((base & !1, frame as u8));
            self.staged.push(((base & !1) | 1, (frame >> 8) as u8));
        }
    }

    /// Programming can only clear flash bits; the panel register is plain
    /// logic and takes the value as written
    fn apply_write(&mut self, addr: u32, byte: u8) {
        if let Some(cell) = self.code.get_mut(addr as usize) {
            *cell &= byte;
            return;
        }
        if addr >= ID_BASE && addr < ID_BASE + self.id.len() as u32 {
            self.id[(addr - ID_BASE) as usize] &= byte;
            return;
        }
        if self.config_range(addr) {
            self.config[(addr - CONFIG_BASE) as usize] &= byte;
            return;
        }
        match addr {
            PANEL_CFG_REG => self.panel_mode = (self.panel_mode & 0xFF00) | u16::from(byte),
            a if a == PANEL_CFG_REG + 1 => {
                self.panel_mode = (self.panel_mode & 0x00FF) | (u16::from(byte) << 8)
            }
            _ => trace!(
                "dummy {}: write to unmapped address {:#08X}",
                self.desc.name,
                addr
            ),
        }
    }

    fn commit_staged(&mut self) {
        let staged = std::mem::take(&mut self.staged);
        for (addr, byte) in staged {
            self.apply_write(addr, byte);
        }
    }

    fn chip_erase(&mut self) {
        debug!("dummy {}: chip erase", self.desc.name);
        self.code.fill(0xFF);
        self.id.fill(0xFF);
        self.config.fill(0xFF);
        self.eeprom.fill(0xFF);
        self.staged.clear();
    }

    /// A write to EECON1.WR starts the data EEPROM cycle; on parts with the
    /// EECON2 interlock nothing happens without the 0x55/0xAA sequence
    fn start_eeprom_write(&mut self) {
        let unlocked =
            self.desc.family != PicFamily::Pic18f2xx0 || self.unlock == 2;
        self.unlock = 0;
        if !self.wren || !unlocked {
            trace!("dummy {}: EEPROM write ignored", self.desc.name);
            return;
        }
        let addr = usize::from(self.eeadr) | usize::from(self.eeadrh) << 8;
        if let Some(cell) = self.eeprom.get_mut(addr) {
            *cell = self.eedata;
        }
        self.wr_busy = WR_BUSY_POLLS;
    }

    /// Compose EECON1; the WR bit stays up for a few polls after a write
    fn eecon1(&mut self) -> u8 {
        let mut value = 0;
        if self.eepgd {
            value |= 0x80;
        }
        if self.cfgs {
            value |= 0x40;
        }
        if self.wren {
            value |= 0x04;
        }
        if self.wr_busy > 0 {
            self.wr_busy -= 1;
            value |= 0x02;
        }
        value
    }

    fn execute(&mut self, op: u16) {
        match op {
            0x0000 => {}
            0x6EF8 => self.tblptr = (self.tblptr & 0x00_FFFF) | (u32::from(self.w & 0x3F) << 16),
            0x6EF7 => self.tblptr = (self.tblptr & 0x3F_00FF) | (u32::from(self.w) << 8),
            0x6EF6 => self.tblptr = (self.tblptr & 0x3F_FF00) | u32::from(self.w),
            0x6EF5 => self.tablat = self.w,
            0x8EA6 => self.eepgd = true,
            0x9EA6 => self.eepgd = false,
            0x8CA6 => self.cfgs = true,
            0x9CA6 => self.cfgs = false,
            0x84A6 => self.wren = true,
            0x82A6 => self.start_eeprom_write(),
            0x80A6 => {
                let addr = usize::from(self.eeadr) | usize::from(self.eeadrh) << 8;
                self.eedata = self.eeprom.get(addr).copied().unwrap_or(0xFF);
            }
            0x50A6 => self.w = self.eecon1(),
            0x50A8 => self.w = self.eedata,
            0x6EA8 => self.eedata = self.w,
            0x6EA7 => {
                self.unlock = match (self.unlock, self.w) {
                    (0, 0x55) => 1,
                    (1, 0xAA) => 2,
                    _ => 0,
                };
            }
            0x6EA9 => self.eeadr = self.w,
            0x6EAA => self.eeadrh = self.w,
            _ if op & 0xFF00 == 0x0E00 => self.w = op as u8,
            _ => trace!(
                "dummy {}: unhandled core instruction {:#06X}",
                self.desc.name,
                op
            ),
        }
    }

    fn dispatch(&mut self, cmd: u32) -> Wire {
        let command = Wire::Command { shift: 0, count: 0 };
        match cmd {
            CMD_CORE_INST => Wire::Payload {
                kind: PayloadKind::Core,
                shift: 0,
                count: 0,
            },
            CMD_SHIFT_TABLAT => Wire::Drive {
                frame: u32::from(self.tablat) << 8,
                bit: 0,
            },
            CMD_TABLE_READ_POSTINC => {
                let frame = u32::from(self.read_byte(self.tblptr)) << 8;
                self.tblptr = self.tblptr.wrapping_add(1);
                Wire::Drive { frame, bit: 0 }
            }
            CMD_TABLE_WRITE => Wire::Payload {
                kind: PayloadKind::Write,
                shift: 0,
                count: 0,
            },
            CMD_TABLE_WRITE_POSTINC2 => Wire::Payload {
                kind: PayloadKind::WritePostinc,
                shift: 0,
                count: 0,
            },
            CMD_TABLE_WRITE_STARTPGM => Wire::Payload {
                kind: PayloadKind::WriteStart,
                shift: 0,
                count: 0,
            },
            _ => {
                trace!("dummy {}: unknown command {:#03X}", self.desc.name, cmd);
                command
            }
        }
    }

    fn handle_payload(&mut self, kind: PayloadKind, frame: u16) {
        match kind {
            PayloadKind::Core => self.execute(frame),
            PayloadKind::Write => match self.tblptr {
                // Writing the erase register wipes the whole part; the high
                // register is half of the newer two-register sequence and
                // takes effect with the low write.
                BULK_ERASE_LOW => self.chip_erase(),
                BULK_ERASE_HIGH => {}
                _ => self.stage_word(frame),
            },
            PayloadKind::WritePostinc => {
                self.stage_word(frame);
                self.tblptr = self.tblptr.wrapping_add(2);
            }
            PayloadKind::WriteStart => {
                self.stage_word(frame);
                self.commit_staged();
            }
        }
    }

    fn falling_edge(&mut self) {
        self.state = match self.state {
            Wire::Command {
                mut shift,
                mut count,
            } => {
                if self.out_bit {
                    shift |= 1 << count;
                }
                count += 1;
                if count == 4 {
                    self.dispatch(shift)
                } else {
                    Wire::Command { shift, count }
                }
            }
            Wire::Payload {
                kind,
                mut shift,
                mut count,
            } => {
                if self.out_bit {
                    shift |= 1 << count;
                }
                count += 1;
                if count == 16 {
                    self.handle_payload(kind, shift as u16);
                    Wire::Command { shift: 0, count: 0 }
                } else {
                    Wire::Payload { kind, shift, count }
                }
            }
            Wire::Drive { frame, bit } => {
                if bit + 1 == 16 {
                    Wire::Command { shift: 0, count: 0 }
                } else {
                    Wire::Drive {
                        frame,
                        bit: bit + 1,
                    }
                }
            }
        };
    }

    /// Program-mode entry resets the interface and the core registers
    fn reset_interface(&mut self) {
        trace!("dummy {}: program mode entry", self.desc.name);
        self.w = 0;
        self.tblptr = 0;
        self.tablat = 0;
        self.eepgd = false;
        self.cfgs = false;
        self.wren = false;
        self.eeadr = 0;
        self.eeadrh = 0;
        self.eedata = 0;
        self.unlock = 0;
        self.wr_busy = 0;
        self.panel_mode = 0;
        self.staged.clear();
        self.state = Wire::Command { shift: 0, count: 0 };
    }
}

impl IcspIo for DummyPic18 {
    fn set_clock(&mut self, high: bool) {
        if self.clock && !high {
            self.falling_edge();
        }
        if !self.clock && high {
            if let Wire::Drive { frame, bit } = self.state {
                self.in_bit = (frame >> bit) & 1 != 0;
            }
        }
        self.clock = high;
    }

    fn set_data(&mut self, high: bool) {
        self.out_bit = high;
    }

    fn data(&self) -> bool {
        self.in_bit
    }

    fn set_vpp(&mut self, state: VppState) {
        if state == VppState::Vih && self.vpp != VppState::Vih {
            self.reset_interface();
        }
        self.vpp = state;
    }

    fn set_vdd(&mut self, _state: VddState) {}

    fn delay_us(&self, _us: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use ricsp_core::buffer::ImageBuffer;
    use ricsp_core::device::types::VoltageRange;
    use ricsp_core::error::Error;
    use ricsp_core::io::{shift_bits_in, shift_bits_out};
    use ricsp_core::memmap::RegionKind;
    use ricsp_core::progress::NoProgress;
    use ricsp_core::target::{Pic18Target, Target};

    const PANEL_MODE_MULTI: u16 = 0x0040;

    fn test_desc(family: PicFamily) -> PicDescriptor {
        PicDescriptor {
            name: "SIM18".into(),
            vendor: "Test".into(),
            family,
            code_words: 32,
            id_words: 8,
            config_words: 4,
            data_bytes: 16,
            program_time_us: 0,
            erase_time_us: 0,
            program_count: 1,
            program_multiplier: 1,
            config_masks: vec![0x00FF; 4],
            cp_mask: 0,
            cpd_mask: 0,
            has_osccal: false,
            bandgap_mask: 0,
            device_id: Some(0x0840),
            device_id_mask: 0xFFE0,
            panel_count: 2,
            panel_bytes: 32,
            write_buffer_bytes: 8,
            vpp: VoltageRange {
                min_mv: 12_750,
                max_mv: 13_250,
            },
            vdd: VoltageRange {
                min_mv: 4_500,
                max_mv: 5_500,
            },
        }
    }

    fn command(sim: &mut DummyPic18, cmd: u32) {
        shift_bits_out(sim, cmd, 4, 0, 0);
    }

    fn core(sim: &mut DummyPic18, op: u16) {
        command(sim, CMD_CORE_INST);
        shift_bits_out(sim, u32::from(op), 16, 0, 0);
    }

    fn shift_tablat(sim: &mut DummyPic18) -> u8 {
        command(sim, CMD_SHIFT_TABLAT);
        (shift_bits_in(sim, 16, 0, 0) >> 8) as u8
    }

    #[test]
    fn core_instructions_move_through_w() {
        let desc = test_desc(PicFamily::Pic18);
        let mut sim = DummyPic18::new(&desc);
        core(&mut sim, 0x0E5A);
        core(&mut sim, 0x6EF5);
        assert_eq!(shift_tablat(&mut sim), 0x5A);
    }

    #[test]
    fn table_pointer_reads_post_increment() {
        let desc = test_desc(PicFamily::Pic18);
        let mut sim = DummyPic18::new(&desc);
        sim.code_mut()[4] = 0x12;
        sim.code_mut()[5] = 0x34;
        core(&mut sim, 0x0E00);
        core(&mut sim, 0x6EF8);
        core(&mut sim, 0x0E00);
        core(&mut sim, 0x6EF7);
        core(&mut sim, 0x0E04);
        core(&mut sim, 0x6EF6);
        command(&mut sim, CMD_TABLE_READ_POSTINC);
        let low = (shift_bits_in(&mut sim, 16, 0, 0) >> 8) as u8;
        command(&mut sim, CMD_TABLE_READ_POSTINC);
        let high = (shift_bits_in(&mut sim, 16, 0, 0) >> 8) as u8;
        assert_eq!((low, high), (0x12, 0x34));
    }

    #[test]
    fn probe_reads_the_device_id() {
        let desc = test_desc(PicFamily::Pic18fxx20);
        let mut sim = DummyPic18::new(&desc);
        let mut target = Pic18Target::new(desc.clone(), &mut sim);
        target.enter_program_mode().unwrap();
        let info = target.probe().unwrap();
        target.exit_program_mode().unwrap();
        assert_eq!(info.device_id, Some(0x0840));
    }

    #[test]
    fn probe_reports_a_foreign_device_id() {
        let impersonated = {
            let mut d = test_desc(PicFamily::Pic18fxx20);
            d.device_id = Some(0x1200);
            d
        };
        let mut sim = DummyPic18::new(&impersonated);
        let mut target = Pic18Target::new(test_desc(PicFamily::Pic18fxx20), &mut sim);
        target.enter_program_mode().unwrap();
        match target.probe().unwrap_err() {
            Error::DeviceIdMismatch { expected, found, .. } => {
                assert_eq!(expected, 0x0840);
                assert_eq!(found, 0x1200);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn buffered_program_and_read_back_through_the_driver() {
        let desc = test_desc(PicFamily::Pic18fxx20);
        let mut sim = DummyPic18::new(&desc);
        {
            let mut target = Pic18Target::new(desc.clone(), &mut sim);
            let mut image = ImageBuffer::new(target.memory_map());
            let code = *target.memory_map().region(RegionKind::Code).unwrap();
            let id = *target.memory_map().region(RegionKind::Id).unwrap();
            let config = *target.memory_map().region(RegionKind::Config).unwrap();
            image.set(code.start, 0xEF12).unwrap();
            image.set(code.start + 1, 0xF000).unwrap();
            // second write block
            image.set(code.start + 6, 0x0E55).unwrap();
            image.set(id.start + 2, 0xA7).unwrap();
            image.set(config.start + 1, 0x1E).unwrap();

            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.program(&image, &mut sink).unwrap();

            let mut found = ImageBuffer::new(target.memory_map());
            target.read(&mut found, false, &mut sink).unwrap();
            target.exit_program_mode().unwrap();
            assert_eq!(found.get(code.start).unwrap(), 0xEF12);
            assert_eq!(found.get(code.start + 1).unwrap(), 0xF000);
            assert_eq!(found.get(code.start + 6).unwrap(), 0x0E55);
            assert_eq!(found.get(code.start + 7).unwrap(), 0xFFFF);
            assert_eq!(found.get(id.start + 2).unwrap(), 0xA7);
            assert_eq!(found.get(config.start + 1).unwrap(), 0x1E);
        }
        assert_eq!(&sim.code()[..4], &[0x12, 0xEF, 0x00, 0xF0]);
        assert_eq!(&sim.code()[12..14], &[0x55, 0x0E]);
        assert_eq!(sim.id()[2], 0xA7);
        assert_eq!(sim.config()[1], 0x1E);
    }

    #[test]
    fn multi_panel_program_uses_panel_writes() {
        let desc = test_desc(PicFamily::Pic18);
        let mut sim = DummyPic18::new(&desc);
        {
            let mut target = Pic18Target::new(desc.clone(), &mut sim);
            let mut image = ImageBuffer::new(target.memory_map());
            let code = *target.memory_map().region(RegionKind::Code).unwrap();
            // one word in each 16-word panel
            image.set(code.start + 1, 0x6000).unwrap();
            image.set(code.start + 17, 0x9FFF).unwrap();
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.program(&image, &mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert_eq!(&sim.code()[2..4], &[0x00, 0x60]);
        assert_eq!(&sim.code()[34..36], &[0xFF, 0x9F]);
        assert_eq!(sim.panel_mode, PANEL_MODE_MULTI);
    }

    #[test]
    fn eeprom_round_trip_with_wr_polling() {
        let desc = test_desc(PicFamily::Pic18f2xx0);
        let mut sim = DummyPic18::new(&desc);
        {
            let mut target = Pic18Target::new(desc.clone(), &mut sim);
            let mut image = ImageBuffer::new(target.memory_map());
            let eeprom = *target.memory_map().region(RegionKind::Eeprom).unwrap();
            image.set(eeprom.start + 5, 0x42).unwrap();
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.program(&image, &mut sink).unwrap();

            let mut found = ImageBuffer::new(target.memory_map());
            target.read(&mut found, false, &mut sink).unwrap();
            target.exit_program_mode().unwrap();
            assert_eq!(found.get(eeprom.start + 5).unwrap(), 0x42);
        }
        assert_eq!(sim.eeprom()[5], 0x42);
        assert_eq!(sim.wr_busy, 0);
    }

    #[test]
    fn eeprom_write_without_the_unlock_is_ignored() {
        let desc = test_desc(PicFamily::Pic18f2xx0);
        let mut sim = DummyPic18::new(&desc);
        core(&mut sim, 0x9EA6);
        core(&mut sim, 0x9CA6);
        core(&mut sim, 0x0E03);
        core(&mut sim, 0x6EA9);
        core(&mut sim, 0x0E42);
        core(&mut sim, 0x6EA8);
        core(&mut sim, 0x84A6);
        core(&mut sim, 0x82A6);
        assert_eq!(sim.eeprom()[3], 0xFF);
        // same write with the 0x55/0xAA sequence lands
        core(&mut sim, 0x0E55);
        core(&mut sim, 0x6EA7);
        core(&mut sim, 0x0EAA);
        core(&mut sim, 0x6EA7);
        core(&mut sim, 0x82A6);
        assert_eq!(sim.eeprom()[3], 0x42);
    }

    #[test]
    fn chip_erase_wipes_everything() {
        let desc = test_desc(PicFamily::Pic18);
        let mut sim = DummyPic18::new(&desc);
        sim.code_mut().fill(0x00);
        sim.id_mut().fill(0x00);
        sim.config_mut().fill(0x00);
        sim.eeprom_mut().fill(0x00);
        {
            let mut target = Pic18Target::new(desc.clone(), &mut sim);
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.erase(&mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert!(sim.code().iter().all(|&b| b == 0xFF));
        assert!(sim.id().iter().all(|&b| b == 0xFF));
        assert!(sim.config().iter().all(|&b| b == 0xFF));
        assert!(sim.eeprom().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn newer_parts_erase_through_both_registers() {
        let desc = test_desc(PicFamily::Pic18f2xx0);
        let mut sim = DummyPic18::new(&desc);
        sim.code_mut().fill(0x00);
        {
            let mut target = Pic18Target::new(desc.clone(), &mut sim);
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.erase(&mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert!(sim.code().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn programming_cannot_set_flash_bits() {
        let desc = test_desc(PicFamily::Pic18);
        let mut sim = DummyPic18::new(&desc);
        sim.code_mut()[0] = 0x0F;
        core(&mut sim, 0x0E00);
        core(&mut sim, 0x6EF8);
        core(&mut sim, 0x0E00);
        core(&mut sim, 0x6EF7);
        core(&mut sim, 0x0E00);
        core(&mut sim, 0x6EF6);
        command(&mut sim, CMD_TABLE_WRITE_STARTPGM);
        shift_bits_out(&mut sim, 0xFFF0, 16, 0, 0);
        assert_eq!(sim.code()[0], 0x00);
        assert_eq!(sim.code()[1], 0xFF);
    }
}
