//! Simulated 14-bit mid-range part
//!
//! Decodes the 6-bit command set off the clock and data lines the way real
//! silicon does: command and load frames latch on falling clock edges, read
//! frames drive the data line while the clock is high. The forward-only
//! program counter, the jump into config space, code and data protection,
//! the erase-before-write versus program-only distinction and the
//! setup-command erase unlock are all modelled, so the mid-range driver sees
//! a faithful part rather than a scripted mock.

use log::{debug, trace};

use ricsp_core::device::types::PicDescriptor;
use ricsp_core::io::{IcspIo, VddState, VppState};

// 6-bit programming commands
const CMD_LOAD_CONFIG: u32 = 0x00;
const CMD_LOAD_PROG: u32 = 0x02;
const CMD_READ_PROG: u32 = 0x04;
const CMD_INC_ADDR: u32 = 0x06;
const CMD_BEGIN_ERASE_PROG: u32 = 0x08;
const CMD_BEGIN_PROG_ONLY: u32 = 0x18;
const CMD_END_PROG: u32 = 0x0E;
const CMD_LOAD_DATA: u32 = 0x03;
const CMD_READ_DATA: u32 = 0x05;
const CMD_BULK_ERASE_PROG: u32 = 0x09;
const CMD_BULK_ERASE_DATA: u32 = 0x0B;
const CMD_BULK_ERASE_SETUP1: u32 = 0x01;
const CMD_BULK_ERASE_SETUP2: u32 = 0x07;
const CMD_CHIP_ERASE: u32 = 0x1F;

/// Counter value `LOAD_CONFIG` jumps to
const CONFIG_BASE: u32 = 0x2000;
const DEVICE_ID_OFFSET: u32 = 6;
const CONFIG_WORD_OFFSET: u32 = 7;

#[derive(Clone, Copy)]
enum Wire {
    /// Collecting a 6-bit command, LSB first
    Command { shift: u32, count: u8 },
    /// Collecting the 16-bit frame of a load command
    Load { shift: u32, count: u8 },
    /// Driving a 16-bit read frame back at the programmer
    Drive { frame: u32, bit: u8 },
}

/// Bit-level simulation of a mid-range PIC
///
/// Construct one from the descriptor of the part it should impersonate and
/// hand it to [`Pic16Target`] as its I/O backend; the memories start blank
/// and can be pre-loaded or inspected through the accessors.
///
/// [`Pic16Target`]: ricsp_core::target::Pic16Target
pub struct DummyPic16 {
    desc: PicDescriptor,
    code: Vec<u16>,
    id: Vec<u16>,
    config: Vec<u16>,
    eeprom: Vec<u8>,
    device_id: u16,
    /// Forward-only program counter, `CONFIG_BASE`-relative once jumped
    pc: u32,
    latch: u16,
    /// Last load command selected data memory
    data_latch: bool,
    /// Erase unlock progress: setup1 seen, then setup1+setup2
    unlock: u8,
    clock: bool,
    out_bit: bool,
    in_bit: bool,
    state: Wire,
    vpp: VppState,
}

impl DummyPic16 {
    /// Create a blank part impersonating `desc`
    pub fn new(desc: &PicDescriptor) -> Self {
        let blank = desc.blank_word();
        DummyPic16 {
            code: vec![blank; desc.code_words as usize],
            id: vec![blank; desc.id_words as usize],
            config: vec![blank; desc.config_words as usize],
            eeprom: vec![0xFF; desc.data_bytes as usize],
            device_id: desc.device_id.unwrap_or(blank),
            desc: desc.clone(),
            pc: 0,
            latch: blank,
            data_latch: false,
            unlock: 0,
            clock: false,
            out_bit: false,
            in_bit: false,
            state: Wire::Command { shift: 0, count: 0 },
            vpp: VppState::Gnd,
        }
    }

    /// Program memory words
    pub fn code(&self) -> &[u16] {
        &self.code
    }

    /// Mutable program memory words
    pub fn code_mut(&mut self) -> &mut [u16] {
        &mut self.code
    }

    /// ID location words
    pub fn id(&self) -> &[u16] {
        &self.id
    }

    /// Mutable ID location words
    pub fn id_mut(&mut self) -> &mut [u16] {
        &mut self.id
    }

    /// Config words
    pub fn config(&self) -> &[u16] {
        &self.config
    }

    /// Mutable config words; clearing a code-protect bit protects the part
    pub fn config_mut(&mut self) -> &mut [u16] {
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

    fn code_protected(&self) -> bool {
        let cp = self.desc.cp_mask;
        cp != 0 && self.config.first().is_some_and(|c| c & cp != cp)
    }

    fn data_protected(&self) -> bool {
        let cpd = self.desc.cpd_mask;
        cpd != 0 && self.config.first().is_some_and(|c| c & cpd != cpd)
    }

    /// Word served by `READ_PROG` at the current counter
    fn program_word(&self) -> u16 {
        let blank = self.desc.blank_word();
        if self.pc >= CONFIG_BASE {
            let offset = self.pc - CONFIG_BASE;
            if offset == DEVICE_ID_OFFSET {
                return self.device_id;
            }
            if let Some(&word) = self.id.get(offset as usize) {
                return word;
            }
            return self
                .config
                .get((offset.wrapping_sub(CONFIG_WORD_OFFSET)) as usize)
                .copied()
                .unwrap_or(blank);
        }
        if self.code_protected() {
            return 0;
        }
        self.code.get(self.pc as usize).copied().unwrap_or(blank)
    }

    /// Byte served by `READ_DATA` at the current counter
    fn data_word(&self) -> u16 {
        if self.data_protected() {
            return 0;
        }
        self.eeprom
            .get(self.pc as usize)
            .copied()
            .unwrap_or(0xFF)
            .into()
    }

    /// Commit the latch at the current counter. Programming a flash cell
    /// without an erase can only clear bits.
    fn commit(&mut self, erase_first: bool) {
        fn apply(cell: &mut u16, value: u16, erase_first: bool) {
            if erase_first {
                *cell = value;
            } else {
                *cell &= value;
            }
        }
        if self.data_latch {
            let value = self.latch & 0xFF;
            if let Some(cell) = self.eeprom.get_mut(self.pc as usize) {
                if erase_first {
                    *cell = value as u8;
                } else {
                    *cell &= value as u8;
                }
            }
            return;
        }
        let latch = self.latch;
        if self.pc >= CONFIG_BASE {
            let offset = self.pc - CONFIG_BASE;
            if offset == DEVICE_ID_OFFSET {
                return;
            }
            if let Some(cell) = self.id.get_mut(offset as usize) {
                apply(cell, latch, erase_first);
            } else if let Some(cell) = self
                .config
                .get_mut((offset.wrapping_sub(CONFIG_WORD_OFFSET)) as usize)
            {
                apply(cell, latch, erase_first);
            }
            return;
        }
        if let Some(cell) = self.code.get_mut(self.pc as usize) {
            apply(cell, latch, erase_first);
        }
    }

    /// Program memory, ID locations and config words to blank, dropping any
    /// protection with them
    fn erase_program_and_config(&mut self) {
        let blank = self.desc.blank_word();
        self.code.fill(blank);
        self.id.fill(blank);
        self.config.fill(blank);
    }

    /// Setup-unlocked erase; the preceding load command picked the memory
    fn unlock_erase(&mut self) {
        if self.data_latch {
            debug!("dummy {}: unlock erase of data memory", self.desc.name);
            self.eeprom.fill(0xFF);
            return;
        }
        debug!("dummy {}: unlock erase of program memory", self.desc.name);
        self.erase_program_and_config();
        if self.pc >= CONFIG_BASE {
            // Run from config space this is the protection-disable erase,
            // which takes the data memory with it.
            self.eeprom.fill(0xFF);
        }
    }

    /// Plain bulk erase; run from config space it covers config and ID too
    fn bulk_erase_program(&mut self) {
        if self.pc >= CONFIG_BASE {
            debug!("dummy {}: bulk erase from config space", self.desc.name);
            self.erase_program_and_config();
        } else {
            debug!("dummy {}: bulk erase of program memory", self.desc.name);
            let blank = self.desc.blank_word();
            self.code.fill(blank);
        }
    }

    fn handle_command(&mut self, cmd: u32) -> Wire {
        let command = Wire::Command { shift: 0, count: 0 };
        let armed = self.unlock == 2;
        self.unlock = match cmd {
            CMD_BULK_ERASE_SETUP1 => 1,
            CMD_BULK_ERASE_SETUP2 if self.unlock == 1 => 2,
            _ => 0,
        };
        match cmd {
            CMD_LOAD_CONFIG => {
                self.pc = CONFIG_BASE;
                self.data_latch = false;
                Wire::Load { shift: 0, count: 0 }
            }
            CMD_LOAD_PROG => {
                self.data_latch = false;
                Wire::Load { shift: 0, count: 0 }
            }
            CMD_LOAD_DATA => {
                self.data_latch = true;
                Wire::Load { shift: 0, count: 0 }
            }
            CMD_READ_PROG => Wire::Drive {
                frame: u32::from(self.program_word()) << 1,
                bit: 0,
            },
            CMD_READ_DATA => Wire::Drive {
                frame: u32::from(self.data_word()) << 1,
                bit: 0,
            },
            CMD_INC_ADDR => {
                self.pc += 1;
                command
            }
            CMD_BEGIN_ERASE_PROG => {
                if armed {
                    self.unlock_erase();
                } else {
                    self.commit(true);
                }
                command
            }
            CMD_BEGIN_PROG_ONLY => {
                self.commit(false);
                command
            }
            CMD_END_PROG | CMD_BULK_ERASE_SETUP1 | CMD_BULK_ERASE_SETUP2 => command,
            CMD_BULK_ERASE_PROG => {
                self.bulk_erase_program();
                command
            }
            CMD_BULK_ERASE_DATA => {
                debug!("dummy {}: bulk erase of data memory", self.desc.name);
                self.eeprom.fill(0xFF);
                command
            }
            CMD_CHIP_ERASE => {
                debug!("dummy {}: chip erase", self.desc.name);
                self.erase_program_and_config();
                self.eeprom.fill(0xFF);
                command
            }
            _ => {
                trace!("dummy {}: unknown command {:#04X}", self.desc.name, cmd);
                command
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
                if count == 6 {
                    self.handle_command(shift)
                } else {
                    Wire::Command { shift, count }
                }
            }
            Wire::Load {
                mut shift,
                mut count,
            } => {
                if self.out_bit {
                    shift |= 1 << count;
                }
                count += 1;
                if count == 16 {
                    self.latch = ((shift >> 1) & 0x3FFF) as u16;
                    Wire::Command { shift: 0, count: 0 }
                } else {
                    Wire::Load { shift, count }
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

    /// Program-mode entry: counter back at zero, interface idle
    fn reset_interface(&mut self) {
        trace!("dummy {}: program mode entry", self.desc.name);
        self.pc = 0;
        self.latch = self.desc.blank_word();
        self.data_latch = false;
        self.unlock = 0;
        self.state = Wire::Command { shift: 0, count: 0 };
    }
}

impl IcspIo for DummyPic16 {
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
    use ricsp_core::device::types::{PicFamily, VoltageRange};
    use ricsp_core::error::Error;
    use ricsp_core::io::{shift_bits_in, shift_bits_out};
    use ricsp_core::memmap::RegionKind;
    use ricsp_core::progress::NoProgress;
    use ricsp_core::target::{Target, Pic16Target};

    fn test_desc(family: PicFamily) -> PicDescriptor {
        PicDescriptor {
            name: "SIM16".into(),
            vendor: "Test".into(),
            family,
            code_words: 32,
            id_words: 4,
            config_words: 1,
            data_bytes: 8,
            program_time_us: 0,
            erase_time_us: 0,
            program_count: 3,
            program_multiplier: 1,
            config_masks: vec![0x3FFF],
            cp_mask: 0x0010,
            cpd_mask: 0x0040,
            has_osccal: false,
            bandgap_mask: 0,
            device_id: Some(0x0560),
            device_id_mask: 0x3FE0,
            panel_count: 0,
            panel_bytes: 0,
            write_buffer_bytes: 0,
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

    fn command(sim: &mut DummyPic16, cmd: u32) {
        shift_bits_out(sim, cmd, 6, 0, 0);
    }

    fn load(sim: &mut DummyPic16, cmd: u32, word: u16) {
        command(sim, cmd);
        shift_bits_out(sim, (u32::from(word) << 1) & 0x7FFE, 16, 0, 0);
    }

    fn read_prog(sim: &mut DummyPic16) -> u16 {
        command(sim, CMD_READ_PROG);
        ((shift_bits_in(sim, 16, 0, 0) >> 1) & 0x3FFF) as u16
    }

    #[test]
    fn load_and_begin_program_a_cell() {
        let desc = test_desc(PicFamily::Pic16f8xx);
        let mut sim = DummyPic16::new(&desc);
        load(&mut sim, CMD_LOAD_PROG, 0x1234);
        command(&mut sim, CMD_BEGIN_ERASE_PROG);
        assert_eq!(sim.code()[0], 0x1234);
        assert_eq!(read_prog(&mut sim), 0x1234);
    }

    #[test]
    fn program_only_never_sets_bits() {
        let desc = test_desc(PicFamily::Pic16f7x);
        let mut sim = DummyPic16::new(&desc);
        sim.code_mut()[0] = 0x1200;
        load(&mut sim, CMD_LOAD_PROG, 0x3034);
        command(&mut sim, CMD_BEGIN_PROG_ONLY);
        command(&mut sim, CMD_END_PROG);
        assert_eq!(sim.code()[0], 0x1000);
    }

    #[test]
    fn load_config_jumps_the_counter() {
        let desc = test_desc(PicFamily::Pic16f8xx);
        let mut sim = DummyPic16::new(&desc);
        sim.id_mut()[2] = 0x2AAA;
        load(&mut sim, CMD_LOAD_CONFIG, 0x3FFF);
        command(&mut sim, CMD_INC_ADDR);
        command(&mut sim, CMD_INC_ADDR);
        assert_eq!(read_prog(&mut sim), 0x2AAA);
        // four more steps reach the device ID at offset 6
        for _ in 0..4 {
            command(&mut sim, CMD_INC_ADDR);
        }
        assert_eq!(read_prog(&mut sim), 0x0560);
    }

    #[test]
    fn program_and_read_back_through_the_driver() {
        let desc = test_desc(PicFamily::Pic16f8xx);
        let mut sim = DummyPic16::new(&desc);
        {
            let mut target = Pic16Target::new(desc.clone(), &mut sim);
            let mut image = ImageBuffer::new(target.memory_map());
            let code = *target.memory_map().region(RegionKind::Code).unwrap();
            let id = *target.memory_map().region(RegionKind::Id).unwrap();
            let config = *target.memory_map().region(RegionKind::Config).unwrap();
            let eeprom = *target.memory_map().region(RegionKind::Eeprom).unwrap();
            image.set(code.start, 0x2817).unwrap();
            image.set(code.start + 9, 0x0123).unwrap();
            image.set(id.start + 1, 0x1FFF).unwrap();
            image.set(config.start, 0x3FF1).unwrap();
            image.set(eeprom.start + 3, 0x5A).unwrap();

            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.program(&image, &mut sink).unwrap();

            let mut found = ImageBuffer::new(target.memory_map());
            target.read(&mut found, false, &mut sink).unwrap();
            target.exit_program_mode().unwrap();
            assert_eq!(found.get(code.start).unwrap(), 0x2817);
            assert_eq!(found.get(code.start + 9).unwrap(), 0x0123);
            assert_eq!(found.get(code.start + 1).unwrap(), 0x3FFF);
            assert_eq!(found.get(id.start + 1).unwrap(), 0x1FFF);
            assert_eq!(found.get(config.start).unwrap(), 0x3FF1);
            assert_eq!(found.get(eeprom.start + 3).unwrap(), 0x5A);
        }
        assert_eq!(sim.code()[0], 0x2817);
        assert_eq!(sim.eeprom()[3], 0x5A);
    }

    #[test]
    fn protected_code_reads_as_zero() {
        let desc = test_desc(PicFamily::Pic16f8xx);
        let mut sim = DummyPic16::new(&desc);
        sim.code_mut()[4] = 0x1234;
        sim.config_mut()[0] = 0x3FFF & !0x0010;
        assert_eq!(read_prog(&mut sim), 0);
        // config space stays readable on a protected part
        load(&mut sim, CMD_LOAD_CONFIG, 0x3FFF);
        for _ in 0..7 {
            command(&mut sim, CMD_INC_ADDR);
        }
        assert_eq!(read_prog(&mut sim), 0x3FFF & !0x0010);
    }

    #[test]
    fn erase_clears_protection_through_the_driver() {
        let desc = test_desc(PicFamily::Pic16f8xx);
        let mut sim = DummyPic16::new(&desc);
        sim.code_mut().fill(0x0000);
        sim.eeprom_mut().fill(0x00);
        sim.config_mut()[0] = 0x3FFF & !0x0010;
        {
            let mut target = Pic16Target::new(desc.clone(), &mut sim);
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.erase(&mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert_eq!(sim.config()[0], 0x3FFF);
        assert!(sim.code().iter().all(|&w| w == 0x3FFF));
        assert!(sim.eeprom().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn unarmed_begin_after_an_unlock_does_not_bulk_erase() {
        let desc = test_desc(PicFamily::Pic16f8xx);
        let mut sim = DummyPic16::new(&desc);
        sim.code_mut()[5] = 0x0123;
        // completed unlock dance leaves its trailing setup pair behind
        load(&mut sim, CMD_LOAD_PROG, 0x3FFF);
        command(&mut sim, CMD_BULK_ERASE_SETUP1);
        command(&mut sim, CMD_BULK_ERASE_SETUP2);
        command(&mut sim, CMD_BEGIN_ERASE_PROG);
        command(&mut sim, CMD_BULK_ERASE_SETUP1);
        command(&mut sim, CMD_BULK_ERASE_SETUP2);
        assert!(sim.code().iter().all(|&w| w == 0x3FFF));
        // a normal program cycle right after must only touch its own cell
        load(&mut sim, CMD_LOAD_PROG, 0x2AAA);
        command(&mut sim, CMD_BEGIN_ERASE_PROG);
        assert_eq!(sim.code()[0], 0x2AAA);
        assert_eq!(sim.code()[1], 0x3FFF);
    }

    #[test]
    fn osccal_and_bandgap_survive_a_driver_erase() {
        let mut desc = test_desc(PicFamily::Pic12f6xx);
        desc.has_osccal = true;
        desc.bandgap_mask = 0x3000;
        desc.cp_mask = 0;
        desc.cpd_mask = 0;
        let mut sim = DummyPic16::new(&desc);
        let last = sim.code().len() - 1;
        sim.code_mut()[last] = 0x3456;
        sim.config_mut()[0] = 0x2FFF;
        {
            let mut target = Pic16Target::new(desc.clone(), &mut sim);
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.erase(&mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert_eq!(sim.code()[last], 0x3456);
        assert_eq!(sim.config()[0] & 0x3000, 0x2000);
        assert!(sim.code()[..last].iter().all(|&w| w == 0x3FFF));
    }

    #[test]
    fn device_id_mismatch_is_reported() {
        let mut impersonated = test_desc(PicFamily::Pic16f8xx);
        impersonated.device_id = Some(0x07C0);
        let mut sim = DummyPic16::new(&impersonated);
        let mut target = Pic16Target::new(test_desc(PicFamily::Pic16f8xx), &mut sim);
        target.enter_program_mode().unwrap();
        let err = target.probe().unwrap_err();
        match err {
            Error::DeviceIdMismatch {
                expected, found, ..
            } => {
                assert_eq!(expected, 0x0560);
                assert_eq!(found, 0x07C0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn power_cycle_rewinds_the_counter() {
        let desc = test_desc(PicFamily::Pic16f8xx);
        let mut sim = DummyPic16::new(&desc);
        sim.code_mut()[0] = 0x0111;
        sim.code_mut()[3] = 0x0333;
        sim.set_vpp(VppState::Vih);
        for _ in 0..3 {
            command(&mut sim, CMD_INC_ADDR);
        }
        assert_eq!(read_prog(&mut sim), 0x0333);
        sim.set_vpp(VppState::Gnd);
        sim.set_vdd(VddState::Off);
        sim.set_vdd(VddState::On);
        sim.set_vpp(VppState::Vih);
        assert_eq!(read_prog(&mut sim), 0x0111);
    }
}
