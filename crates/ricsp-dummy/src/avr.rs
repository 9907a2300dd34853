//! Simulated AVR part
//!
//! Models the four-byte SPI programming exchange with the real one-byte lag:
//! every response byte echoes the byte received before it, and data reads
//! come back in the fourth byte. Addresses are decoded from the classic
//! instruction layout, word address in the middle two bytes and the byte
//! selector in bit 3 of the opcode, which every descriptor in the database
//! follows. Page loads collect in a buffer until the commit instruction, a
//! started write cycle answers reads with the read-back value until it has
//! been polled or waited out, and the interface can start out of bit
//! alignment to exercise the synchronization retry loop.

use std::cell::Cell;

use log::{debug, trace};

use ricsp_core::device::types::{
    AvrDescriptor, FUSE_EXT, FUSE_HIGH, FUSE_LOCK, FUSE_LOW,
};
use ricsp_core::io::{IcspIo, VddState, VppState};

/// Reads served with the read-back value after a write starts
const BUSY_READS: u32 = 2;

/// Bit-level simulation of an AVR part on the SPI programming interface
///
/// Construct one from the descriptor of the part it should impersonate and
/// hand it to [`AvrTarget`] as its I/O backend; the memories start erased
/// and can be pre-loaded or inspected through the accessors.
///
/// [`AvrTarget`]: ricsp_core::target::AvrTarget
pub struct DummyAvr {
    desc: AvrDescriptor,
    signature: [u8; 3],
    flash: Vec<u8>,
    eeprom: Vec<u8>,
    fuses: [u8; 4],
    calibration: Vec<u8>,
    page_buffer: Vec<u8>,
    ext_addr: u32,
    /// Reset pulses still needed before the serial logic lines up
    misaligned: u32,
    busy: Cell<u32>,
    busy_sentinel: u8,
    busy_clear_us: u32,
    clock: bool,
    out_bit: bool,
    in_bit: bool,
    bit: u8,
    in_bytes: [u8; 4],
    response: [u8; 4],
    vpp: VppState,
}

impl DummyAvr {
    /// Create an erased part impersonating `desc`
    pub fn new(desc: &AvrDescriptor) -> Self {
        DummyAvr {
            signature: desc.signature,
            flash: vec![0xFF; desc.flash.bytes as usize],
            eeprom: vec![0xFF; desc.eeprom.bytes as usize],
            fuses: [0xFF; 4],
            calibration: vec![0xFF; desc.calibration_bytes as usize],
            page_buffer: vec![0xFF; desc.flash.page_bytes as usize],
            desc: desc.clone(),
            ext_addr: 0,
            misaligned: 0,
            busy: Cell::new(0),
            busy_sentinel: 0xFF,
            busy_clear_us: 0,
            clock: false,
            out_bit: false,
            in_bit: false,
            bit: 0,
            in_bytes: [0; 4],
            response: [0; 4],
            vpp: VppState::Gnd,
        }
    }

    /// Start the serial logic out of step; each positive reset pulse
    /// realigns it by one, so the first `resets` sync attempts fail
    pub fn misalign(&mut self, resets: u32) {
        self.misaligned = resets;
    }

    /// Flash bytes, low byte of each word first
    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    /// Mutable flash bytes
    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    /// EEPROM bytes
    pub fn eeprom(&self) -> &[u8] {
        &self.eeprom
    }

    /// Mutable EEPROM bytes
    pub fn eeprom_mut(&mut self) -> &mut [u8] {
        &mut self.eeprom
    }

    /// Fuse bytes indexed by the `FUSE_*` slots
    pub fn fuses(&self) -> &[u8; 4] {
        &self.fuses
    }

    /// Mutable fuse bytes
    pub fn fuses_mut(&mut self) -> &mut [u8; 4] {
        &mut self.fuses
    }

    /// Mutable signature, for impersonating the wrong part
    pub fn signature_mut(&mut self) -> &mut [u8; 3] {
        &mut self.signature
    }

    /// Mutable calibration bytes
    pub fn calibration_mut(&mut self) -> &mut [u8] {
        &mut self.calibration
    }

    fn page_words(&self) -> u32 {
        self.desc.flash.page_bytes / 2
    }

    /// Full flash byte address from a wire word address and the opcode's
    /// byte-select bit; the extended address register supplies bits the
    /// 16-bit wire address cannot carry
    fn flash_addr(&self, op: u8, b1: u8, b2: u8) -> usize {
        let word = (u32::from(b1) << 8) | u32::from(b2);
        ((self.ext_addr << 17) + word * 2 + u32::from(op >> 3 & 1)) as usize
    }

    fn eeprom_addr(b1: u8, b2: u8) -> usize {
        (usize::from(b1 & 0x0F) << 8) | usize::from(b2)
    }

    fn start_write_cycle(&mut self, memory_is_flash: bool) {
        let memory = if memory_is_flash {
            &self.desc.flash
        } else {
            &self.desc.eeprom
        };
        self.busy.set(BUSY_READS);
        self.busy_sentinel = memory.read_back[0];
        self.busy_clear_us = memory.write_time_us;
    }

    /// A read hitting flash or EEPROM mid-write answers with the read-back
    /// value; each such read brings completion one step closer
    fn busy_read(&mut self) -> Option<u8> {
        let busy = self.busy.get();
        if busy == 0 {
            return None;
        }
        self.busy.set(busy - 1);
        Some(self.busy_sentinel)
    }

    /// Result byte for the fourth response slot, from the three bytes
    /// already received
    fn data_byte(&mut self) -> u8 {
        let [op, b1, b2, _] = self.in_bytes;
        match op {
            0x20 | 0x28 => self.busy_read().unwrap_or_else(|| {
                let addr = self.flash_addr(op, b1, b2);
                self.flash.get(addr).copied().unwrap_or(0xFF)
            }),
            0xA0 => self.busy_read().unwrap_or_else(|| {
                let addr = Self::eeprom_addr(b1, b2);
                self.eeprom.get(addr).copied().unwrap_or(0xFF)
            }),
            0x30 => self.signature[usize::from(b2) % 3],
            0x38 => {
                let len = self.calibration.len().max(1);
                self.calibration
                    .get(usize::from(b2) % len)
                    .copied()
                    .unwrap_or(0xFF)
            }
            0x50 if b1 == 0x08 => self.fuses[FUSE_EXT as usize],
            0x50 => self.fuses[FUSE_LOW as usize],
            0x58 if b1 == 0x08 => self.fuses[FUSE_HIGH as usize],
            0x58 => self.fuses[FUSE_LOCK as usize],
            _ => b2,
        }
    }

    fn chip_erase(&mut self) {
        debug!("dummy {}: chip erase", self.desc.name);
        self.flash.fill(0xFF);
        self.eeprom.fill(0xFF);
        self.fuses[FUSE_LOCK as usize] = 0xFF;
        self.page_buffer.fill(0xFF);
    }

    fn load_flash(&mut self, op: u8, b1: u8, b2: u8, value: u8) {
        if self.desc.flash.paged() {
            let word = (u32::from(b1) << 8) | u32::from(b2);
            let offset = ((word % self.page_words()) * 2 + u32::from(op >> 3 & 1)) as usize;
            if let Some(cell) = self.page_buffer.get_mut(offset) {
                *cell = value;
            }
        } else {
            // byte-programmed part, the write starts immediately
            let addr = self.flash_addr(op, b1, b2);
            if let Some(cell) = self.flash.get_mut(addr) {
                *cell &= value;
            }
            self.start_write_cycle(true);
        }
    }

    fn commit_page(&mut self, b1: u8, b2: u8) {
        let page_words = self.page_words();
        if page_words == 0 {
            return;
        }
        let word = (u32::from(b1) << 8) | u32::from(b2);
        let base = ((self.ext_addr << 17) + (word & !(page_words - 1)) * 2) as usize;
        for (offset, loaded) in self.page_buffer.iter().enumerate() {
            if let Some(cell) = self.flash.get_mut(base + offset) {
                *cell &= loaded;
            }
        }
        self.page_buffer.fill(0xFF);
        self.start_write_cycle(true);
    }

    fn write_eeprom(&mut self, b1: u8, b2: u8, value: u8) {
        let addr = Self::eeprom_addr(b1, b2);
        if let Some(cell) = self.eeprom.get_mut(addr) {
            *cell = value;
        }
        self.start_write_cycle(false);
    }

    fn frame_complete(&mut self) {
        let [op, b1, _, b3] = self.in_bytes;
        match (op, b1) {
            (0xAC, 0x53) => {
                debug!("dummy {}: programming enabled", self.desc.name);
            }
            (0xAC, b1) if b1 & 0xF0 == 0x80 => self.chip_erase(),
            (0xAC, 0xA0) => self.fuses[FUSE_LOW as usize] = b3,
            (0xAC, 0xA8) => self.fuses[FUSE_HIGH as usize] = b3,
            (0xAC, 0xA4) => self.fuses[FUSE_EXT as usize] = b3,
            // lock bits can only be programmed until the next chip erase
            (0xAC, 0xE0) => self.fuses[FUSE_LOCK as usize] &= b3,
            (0x4D, _) => self.ext_addr = u32::from(self.in_bytes[2]),
            (0x40 | 0x48, _) => self.load_flash(op, b1, self.in_bytes[2], b3),
            (0x4C, _) => self.commit_page(b1, self.in_bytes[2]),
            (0xC0, _) => self.write_eeprom(b1, self.in_bytes[2], b3),
            (0x20 | 0x28 | 0x30 | 0x38 | 0x50 | 0x58 | 0xA0, _) => {}
            _ => trace!(
                "dummy {}: unhandled instruction {:#04X} {:#04X}",
                self.desc.name,
                op,
                b1
            ),
        }
        self.in_bytes = [0; 4];
        self.bit = 0;
    }

    fn rising(&mut self) {
        let n = usize::from(self.bit);
        let byte = n / 8;
        if n % 8 == 0 {
            self.response[byte] = match byte {
                0 => 0x00,
                2 if self.misaligned > 0
                    && self.in_bytes[0] == 0xAC
                    && self.in_bytes[1] == 0x53 =>
                {
                    !self.in_bytes[1]
                }
                3 => self.data_byte(),
                _ => self.in_bytes[byte - 1],
            };
        }
        self.in_bytes[byte] = (self.in_bytes[byte] << 1) | u8::from(self.out_bit);
        self.in_bit = (self.response[byte] >> (7 - n % 8)) & 1 != 0;
        self.bit += 1;
        if self.bit == 32 {
            self.frame_complete();
        }
    }
}

impl IcspIo for DummyAvr {
    fn set_clock(&mut self, high: bool) {
        if !self.clock && high {
            self.rising();
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
        if state == VppState::Vdd && self.vpp == VppState::Gnd {
            // reset released: one step back towards bit alignment
            self.misaligned = self.misaligned.saturating_sub(1);
        }
        if state == VppState::Gnd && self.vpp != VppState::Gnd {
            trace!("dummy {}: reset asserted", self.desc.name);
            self.bit = 0;
            self.in_bytes = [0; 4];
            self.ext_addr = 0;
            self.busy.set(0);
        }
        self.vpp = state;
    }

    fn set_vdd(&mut self, _state: VddState) {}

    fn delay_us(&self, us: u32) {
        // waiting out the full write time also completes a cycle
        if self.busy.get() > 0 && self.busy_clear_us > 0 && us >= self.busy_clear_us {
            self.busy.set(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ricsp_core::buffer::ImageBuffer;
    use ricsp_core::device::instruction::Instruction;
    use ricsp_core::device::types::{AvrInstructionSet, AvrMemory};
    use ricsp_core::error::Error;
    use ricsp_core::io::shift_bits_out_in;
    use ricsp_core::memmap::RegionKind;
    use ricsp_core::progress::NoProgress;
    use ricsp_core::target::{AvrTarget, Target};

    fn inst(template: &str) -> Instruction {
        Instruction::parse(template).unwrap()
    }

    /// Paged part: 64 words of flash in four 16-word pages, 64 bytes of
    /// EEPROM, the full fuse set and one calibration byte
    fn test_desc() -> AvrDescriptor {
        AvrDescriptor {
            name: "SIMAVR".into(),
            vendor: "Test".into(),
            signature: [0x1E, 0x93, 0x07],
            vcc_min_mv: 4500,
            vcc_max_mv: 5500,
            calibration_bytes: 1,
            reset_delay_us: 20_000,
            erase_time_us: 9000,
            fuse_time_us: 4500,
            power_off_after_write_fuse: false,
            flash: AvrMemory {
                bytes: 128,
                page_bytes: 32,
                pages: 4,
                read_back: [0xFF, 0xFF],
                write_time_us: 4500,
            },
            eeprom: AvrMemory {
                bytes: 64,
                page_bytes: 0,
                pages: 1,
                read_back: [0xFF, 0xFF],
                write_time_us: 9000,
            },
            instructions: AvrInstructionSet {
                programming_enable: inst("1010110001010011xxxxxxxxxxxxxxxx"),
                chip_erase: inst("101011001000xxxxxxxxxxxxxxxxxxxx"),
                load_ext_addr: inst("0100110100000000bbbbbbbbxxxxxxxx"),
                read_flash: inst("0010H0000000000000bbbbbboooooooo"),
                load_flash_page: inst("0100H000000000000000bbbbiiiiiiii"),
                write_flash_page: inst("010011000000000000bbbbbbHxxxxxxx"),
                read_eeprom: inst("101000000000000000bbbbbboooooooo"),
                write_eeprom: inst("110000000000000000bbbbbbiiiiiiii"),
                read_fuse: inst("0101000000000000xxxxxxxxoooooooo"),
                write_fuse: inst("1010110010100000xxxxxxxxiiiiiiii"),
                read_high_fuse: inst("0101100000001000xxxxxxxxoooooooo"),
                write_high_fuse: inst("1010110010101000xxxxxxxxiiiiiiii"),
                read_ext_fuse: inst("0101000000001000xxxxxxxxoooooooo"),
                write_ext_fuse: inst("1010110010100100xxxxxxxxiiiiiiii"),
                read_lock: inst("0101100000000000xxxxxxxxoooooooo"),
                write_lock: inst("1010110011100000xxxxxxxxiiiiiiii"),
                read_signature: inst("0011000000000000000000bboooooooo"),
                read_calibration: inst("0011100000000000xxxxxxxxoooooooo"),
                ..Default::default()
            },
        }
    }

    #[test]
    fn responses_echo_with_one_byte_of_lag() {
        let desc = test_desc();
        let mut sim = DummyAvr::new(&desc);
        let response = shift_bits_out_in(&mut sim, 0xAC53_0000, 32, 0, 0);
        assert_eq!((response >> 16) & 0xFF, 0xAC);
        assert_eq!((response >> 8) & 0xFF, 0x53);
    }

    #[test]
    fn sync_retries_realign_the_interface() {
        let desc = test_desc();
        let mut sim = DummyAvr::new(&desc);
        sim.misalign(2);
        {
            let mut target = AvrTarget::new(desc.clone(), &mut sim);
            target.enter_program_mode().unwrap();
            target.exit_program_mode().unwrap();
        }
        assert_eq!(sim.misaligned, 0);
    }

    #[test]
    fn sync_gives_up_when_the_part_never_aligns() {
        let desc = test_desc();
        let mut sim = DummyAvr::new(&desc);
        sim.misalign(100);
        let mut target = AvrTarget::new(desc.clone(), &mut sim);
        match target.enter_program_mode().unwrap_err() {
            Error::SyncFailed { attempts } => assert_eq!(attempts, 15),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn probe_reads_the_signature() {
        let desc = test_desc();
        let mut sim = DummyAvr::new(&desc);
        let mut target = AvrTarget::new(desc.clone(), &mut sim);
        target.enter_program_mode().unwrap();
        let info = target.probe().unwrap();
        target.exit_program_mode().unwrap();
        assert_eq!(info.signature, Some([0x1E, 0x93, 0x07]));
    }

    #[test]
    fn probe_reports_a_foreign_signature() {
        let desc = test_desc();
        let mut sim = DummyAvr::new(&desc);
        sim.signature_mut()[1] = 0x91;
        let mut target = AvrTarget::new(desc.clone(), &mut sim);
        target.enter_program_mode().unwrap();
        match target.probe().unwrap_err() {
            Error::SignatureMismatch { expected, found } => {
                assert_eq!(expected, [0x1E, 0x93, 0x07]);
                assert_eq!(found, [0x1E, 0x91, 0x07]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn program_and_read_back_through_the_driver() {
        let desc = test_desc();
        let mut sim = DummyAvr::new(&desc);
        sim.calibration_mut()[0] = 0xA7;
        {
            let mut target = AvrTarget::new(desc.clone(), &mut sim);
            let mut image = ImageBuffer::new(target.memory_map());
            let code = *target.memory_map().region(RegionKind::Code).unwrap();
            let eeprom = *target.memory_map().region(RegionKind::Eeprom).unwrap();
            let fuses = *target.memory_map().region(RegionKind::Fuses).unwrap();
            let cal = *target.memory_map().region(RegionKind::Calibration).unwrap();
            // dirty words only in page 2
            image.set(code.start + 32, 0x1122).unwrap();
            image.set(code.start + 47, 0x3344).unwrap();
            image.set(eeprom.start + 9, 0x42).unwrap();
            image.set(fuses.start + FUSE_LOW, 0xE4).unwrap();
            image.set(fuses.start + FUSE_HIGH, 0xD9).unwrap();

            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.program(&image, &mut sink).unwrap();

            let mut found = ImageBuffer::new(target.memory_map());
            target.read(&mut found, false, &mut sink).unwrap();
            target.exit_program_mode().unwrap();
            assert_eq!(found.get(code.start + 32).unwrap(), 0x1122);
            assert_eq!(found.get(code.start + 47).unwrap(), 0x3344);
            assert_eq!(found.get(code.start + 31).unwrap(), 0xFFFF);
            assert_eq!(found.get(eeprom.start + 9).unwrap(), 0x42);
            assert_eq!(found.get(fuses.start + FUSE_LOW).unwrap(), 0xE4);
            assert_eq!(found.get(fuses.start + FUSE_HIGH).unwrap(), 0xD9);
            assert_eq!(found.get(fuses.start + FUSE_LOCK).unwrap(), 0xFF);
            assert_eq!(found.get(cal.start).unwrap(), 0xA7);
        }
        assert_eq!(&sim.flash()[64..66], &[0x22, 0x11]);
        assert_eq!(&sim.flash()[94..96], &[0x44, 0x33]);
        assert!(sim.flash()[..64].iter().all(|&b| b == 0xFF));
        assert!(sim.flash()[96..].iter().all(|&b| b == 0xFF));
        assert_eq!(sim.eeprom()[9], 0x42);
        assert_eq!(sim.fuses()[FUSE_LOW as usize], 0xE4);
        assert_eq!(sim.fuses()[FUSE_HIGH as usize], 0xD9);
    }

    #[test]
    fn byte_programmed_flash_clears_bits_only() {
        let mut desc = test_desc();
        desc.flash = AvrMemory {
            bytes: 64,
            page_bytes: 0,
            pages: 1,
            read_back: [0x7F, 0x7F],
            write_time_us: 9000,
        };
        desc.instructions.read_flash = inst("0010H00000000000000bbbbboooooooo");
        desc.instructions.write_flash = inst("0100H00000000000000bbbbbiiiiiiii");
        desc.instructions.load_flash_page = Instruction::default();
        desc.instructions.write_flash_page = Instruction::default();
        let mut sim = DummyAvr::new(&desc);
        sim.flash_mut()[0] = 0x0F;
        {
            let mut target = AvrTarget::new(desc.clone(), &mut sim);
            let mut image = ImageBuffer::new(target.memory_map());
            let code = *target.memory_map().region(RegionKind::Code).unwrap();
            image.set(code.start, 0xFFF0).unwrap();
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.program(&image, &mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert_eq!(sim.flash()[0], 0x00);
        assert_eq!(sim.flash()[1], 0xFF);
    }

    #[test]
    fn extended_addressing_reaches_high_flash() {
        let mut desc = test_desc();
        desc.flash = AvrMemory {
            bytes: 0x40000,
            page_bytes: 64,
            pages: 4096,
            read_back: [0xFF, 0xFF],
            write_time_us: 4500,
        };
        desc.instructions.read_flash = inst("0010H000aaaaaaaabbbbbbbboooooooo");
        desc.instructions.load_flash_page = inst("0100H00000000000000bbbbbiiiiiiii");
        desc.instructions.write_flash_page = inst("01001100aaaaaaaabbbbbbbbHxxxxxxx");
        let mut sim = DummyAvr::new(&desc);
        {
            let mut target = AvrTarget::new(desc.clone(), &mut sim);
            let mut image = ImageBuffer::new(target.memory_map());
            let code = *target.memory_map().region(RegionKind::Code).unwrap();
            image.set(code.start + 0x11000, 0xBEEF).unwrap();
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.program(&image, &mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert_eq!(&sim.flash()[0x22000..0x22002], &[0xEF, 0xBE]);
        assert_eq!(sim.ext_addr, 1);
    }

    #[test]
    fn chip_erase_clears_memories_and_the_lock_byte() {
        let desc = test_desc();
        let mut sim = DummyAvr::new(&desc);
        sim.flash_mut().fill(0x00);
        sim.eeprom_mut().fill(0x00);
        sim.fuses_mut()[FUSE_LOCK as usize] = 0xFC;
        sim.fuses_mut()[FUSE_LOW as usize] = 0xE4;
        {
            let mut target = AvrTarget::new(desc.clone(), &mut sim);
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.erase(&mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert!(sim.flash().iter().all(|&b| b == 0xFF));
        assert!(sim.eeprom().iter().all(|&b| b == 0xFF));
        assert_eq!(sim.fuses()[FUSE_LOCK as usize], 0xFF);
        // other fuses keep their values across an erase
        assert_eq!(sim.fuses()[FUSE_LOW as usize], 0xE4);
    }

    #[test]
    fn lock_byte_writes_only_clear_bits() {
        let desc = test_desc();
        let mut sim = DummyAvr::new(&desc);
        sim.fuses_mut()[FUSE_LOCK as usize] = 0xFC;
        {
            let mut target = AvrTarget::new(desc.clone(), &mut sim);
            let mut image = ImageBuffer::new(target.memory_map());
            let fuses = *target.memory_map().region(RegionKind::Fuses).unwrap();
            image.set(fuses.start + FUSE_LOCK, 0xFC).unwrap();
            let mut sink = NoProgress;
            target.enter_program_mode().unwrap();
            target.program(&image, &mut sink).unwrap();
            target.exit_program_mode().unwrap();
        }
        assert_eq!(sim.fuses()[FUSE_LOCK as usize], 0xFC);
    }
}
