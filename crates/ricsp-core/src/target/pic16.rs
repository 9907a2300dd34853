//! Mid-range PIC16/PIC12 driver (14-bit cores)
//!
//! The programming interface is a 6-bit command set clocked LSB first, with
//! 14-bit payloads carried in a 16-bit frame (one dummy bit each side). The
//! part keeps a program counter that only moves forward: `INC_ADDR` steps it,
//! `LOAD_CONFIG` jumps it to config space at 0x2000, and the only way back to
//! address zero is leaving and re-entering program mode. The driver mirrors
//! that counter and power-cycles whenever an operation needs to rewind.
//!
//! EEPROM data memory is reached through its own load/read commands at the
//! current counter value, so data phases run right after a rewind while the
//! counter is still inside the data address range.

use log::{debug, warn};

use crate::buffer::ImageBuffer;
use crate::device::types::{PicDescriptor, PicFamily};
use crate::error::{Error, Result};
use crate::io::{shift_bits_in, shift_bits_out, IcspIo};
use crate::memmap::{MemoryMap, Region, RegionKind};
use crate::progress::{DumpSink, Operation, ProgressMeter, ProgressSink};
use crate::target::{
    apply_word, check_image, dump_image, pic_power_entry, pic_power_off, ProbeInfo, Target,
};

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

// Config-space offsets from 0x2000
const DEVICE_ID_OFFSET: u32 = 6;
const CONFIG_WORD_OFFSET: u32 = 7;

// Clock setup/hold per bit, µs
const T_SET_US: u32 = 1;
const T_HOLD_US: u32 = 1;
// Gap between a command and its payload, µs
const T_GAP_US: u32 = 2;
// Rail settle during program-mode entry/exit, µs
const T_POWER_US: u32 = 1000;

/// Driver for the 14-bit PIC16/PIC12 families
pub struct Pic16Target<IO> {
    desc: PicDescriptor,
    map: MemoryMap,
    io: IO,
    /// Mirrored target program counter
    pc: u32,
    /// Counter is in config space (0x2000 base)
    in_config: bool,
}

impl<IO: IcspIo> Pic16Target<IO> {
    /// Build a driver from a descriptor and an IO backend
    pub fn new(desc: PicDescriptor, io: IO) -> Self {
        let map = desc.memory_map();
        Self {
            desc,
            map,
            io,
            pc: 0,
            in_config: false,
        }
    }

    fn power_entry(&mut self) {
        pic_power_entry(&mut self.io, T_POWER_US);
        self.pc = 0;
        self.in_config = false;
    }

    fn power_off(&mut self) {
        pic_power_off(&mut self.io, T_POWER_US);
    }

    /// Power-cycle back to address 0
    fn rewind(&mut self) {
        self.power_off();
        self.power_entry();
    }

    fn command(&mut self, cmd: u32) {
        shift_bits_out(&mut self.io, cmd, 6, T_SET_US, T_HOLD_US);
        self.io.delay_us(T_GAP_US);
    }

    fn write_word(&mut self, word: u16) {
        let frame = (u32::from(word) << 1) & 0x7FFE;
        shift_bits_out(&mut self.io, frame, 16, T_SET_US, T_HOLD_US);
        self.io.delay_us(T_GAP_US);
    }

    fn read_word(&mut self) -> u16 {
        let frame = shift_bits_in(&mut self.io, 16, T_SET_US, T_HOLD_US);
        ((frame >> 1) & 0x3FFF) as u16
    }

    /// Read the word at the current counter without advancing it
    fn read_cursor_word(&mut self, data_mem: bool) -> u16 {
        let cmd = if data_mem { CMD_READ_DATA } else { CMD_READ_PROG };
        self.command(cmd);
        self.read_word()
    }

    /// Advance the counter to `addr` in code/data space, rewinding first if
    /// the counter has passed it or sits in config space
    fn seek_code(&mut self, addr: u32) {
        if self.in_config || addr < self.pc {
            self.rewind();
        }
        while self.pc < addr {
            self.command(CMD_INC_ADDR);
            self.pc += 1;
        }
    }

    fn enter_config_space(&mut self) {
        self.command(CMD_LOAD_CONFIG);
        self.write_word(self.desc.blank_word());
        self.pc = 0;
        self.in_config = true;
    }

    /// Advance the counter to config-space offset `offset`; `LOAD_CONFIG`
    /// always restarts at the base, so backwards moves just re-enter
    fn seek_config(&mut self, offset: u32) {
        if !self.in_config || offset < self.pc {
            self.enter_config_space();
        }
        while self.pc < offset {
            self.command(CMD_INC_ADDR);
            self.pc += 1;
        }
    }

    fn needs_end_program(&self) -> bool {
        matches!(self.desc.family, PicFamily::Pic16f7x)
    }

    fn begin_command(&self) -> u32 {
        if self.needs_end_program() {
            CMD_BEGIN_PROG_ONLY
        } else {
            CMD_BEGIN_ERASE_PROG
        }
    }

    /// One load/begin/wait/read-back cycle at the current counter; returns
    /// the read-back word
    fn program_cycle(&mut self, value: u16, data_mem: bool) -> u16 {
        let load = if data_mem { CMD_LOAD_DATA } else { CMD_LOAD_PROG };
        self.command(load);
        self.write_word(value);
        self.command(self.begin_command());
        self.io.delay_us(self.desc.program_time_us);
        if self.needs_end_program() {
            self.command(CMD_END_PROG);
        }
        self.read_cursor_word(data_mem)
    }

    /// Program one location with retries and over-programming
    ///
    /// Tries up to `program_count` cycles; after the first success on
    /// attempt k, issues k × `program_multiplier` extra cycles. Returns the
    /// last read-back on failure.
    fn program_one_location(
        &mut self,
        value: u16,
        mask: u16,
        data_mem: bool,
    ) -> std::result::Result<(), u16> {
        let mut last = 0;
        for attempt in 1..=self.desc.program_count {
            last = self.program_cycle(value, data_mem);
            if last & mask == value & mask {
                for _ in 0..attempt * self.desc.program_multiplier {
                    self.program_cycle(value, data_mem);
                }
                return Ok(());
            }
        }
        Err(last)
    }

    fn program_location(
        &mut self,
        address: u32,
        value: u16,
        mask: u16,
        data_mem: bool,
    ) -> Result<()> {
        match self.program_one_location(value, mask, data_mem) {
            Ok(()) => Ok(()),
            Err(found) => Err(Error::ProgramFailed {
                address,
                wrote: u32::from(value & mask),
                found: u32::from(found & mask),
            }),
        }
    }

    /// Read the device ID word and compare it when the descriptor knows one
    fn probe_identity(&mut self) -> Result<ProbeInfo> {
        self.seek_config(DEVICE_ID_OFFSET);
        let raw = self.read_cursor_word(false);
        let mask = self.desc.device_id_mask;
        if let Some(expected) = self.desc.device_id {
            if raw & mask != expected & mask {
                return Err(Error::DeviceIdMismatch {
                    expected: expected & mask,
                    found: raw & mask,
                    mask,
                });
            }
            debug!("{}: device ID {:#06X} matches", self.desc.name, raw & mask);
        }
        Ok(ProbeInfo {
            device_id: Some(raw & mask),
            revision: Some(raw & !mask & 0x3FFF),
            signature: None,
        })
    }

    fn verify_device_id(&mut self) -> Result<()> {
        if self.desc.device_id.is_some() {
            self.probe_identity()?;
        }
        Ok(())
    }

    fn read_config_word(&mut self, index: u32) -> u16 {
        self.seek_config(CONFIG_WORD_OFFSET + index);
        self.read_cursor_word(false)
    }

    /// The two-command unlock dance around an internally timed erase cycle
    fn unlock_erase(&mut self) {
        self.command(CMD_BULK_ERASE_SETUP1);
        self.command(CMD_BULK_ERASE_SETUP2);
        self.command(CMD_BEGIN_ERASE_PROG);
        self.io.delay_us(self.desc.erase_time_us);
        self.command(CMD_BULK_ERASE_SETUP1);
        self.command(CMD_BULK_ERASE_SETUP2);
    }

    fn bulk_erase(&mut self) {
        match self.desc.family {
            PicFamily::Pic16f8xx | PicFamily::Pic16f6xx => {
                // Erase program + config through the unlock sequence, then
                // the data memory separately.
                self.seek_config(CONFIG_WORD_OFFSET);
                self.command(CMD_LOAD_PROG);
                self.write_word(self.desc.blank_word());
                self.unlock_erase();
                if self.desc.data_bytes > 0 {
                    self.rewind();
                    self.command(CMD_LOAD_DATA);
                    self.write_word(self.desc.blank_word());
                    self.unlock_erase();
                }
            }
            PicFamily::Pic16f87xA => {
                // One command wipes code, data, config and protection.
                self.seek_config(CONFIG_WORD_OFFSET);
                self.command(CMD_CHIP_ERASE);
                self.io.delay_us(self.desc.erase_time_us);
            }
            PicFamily::Pic16f7x => {
                self.rewind();
                self.command(CMD_LOAD_PROG);
                self.write_word(self.desc.blank_word());
                self.command(CMD_BULK_ERASE_PROG);
                self.io.delay_us(self.desc.erase_time_us);
            }
            _ => {
                // From config space the program erase covers config words.
                self.seek_config(CONFIG_WORD_OFFSET);
                self.command(CMD_BULK_ERASE_PROG);
                self.io.delay_us(self.desc.erase_time_us);
                if self.desc.data_bytes > 0 {
                    self.command(CMD_BULK_ERASE_DATA);
                    self.io.delay_us(self.desc.erase_time_us);
                }
            }
        }
    }

    /// Full erase for a part whose code-protect bits are programmed; normal
    /// reads are blocked until this completes
    fn disable_codeprotect(&mut self) {
        warn!(
            "{}: code protection active, clearing with full erase",
            self.desc.name
        );
        self.seek_config(CONFIG_WORD_OFFSET);
        match self.desc.family {
            PicFamily::Pic16f87xA => {
                self.command(CMD_CHIP_ERASE);
                self.io.delay_us(self.desc.erase_time_us);
            }
            PicFamily::Pic16f8xx | PicFamily::Pic16f6xx | PicFamily::Pic16 => {
                self.unlock_erase();
            }
            _ => {
                self.command(CMD_BULK_ERASE_PROG);
                self.io.delay_us(self.desc.erase_time_us);
                if self.desc.data_bytes > 0 {
                    self.command(CMD_BULK_ERASE_DATA);
                    self.io.delay_us(self.desc.erase_time_us);
                }
            }
        }
    }

    fn erase_inner(&mut self) -> Result<()> {
        self.verify_device_id()?;

        let config = self.read_config_word(0);
        let cp = self.desc.cp_mask;
        let cpd = self.desc.cpd_mask;
        let protected =
            (cp != 0 && config & cp != cp) || (cpd != 0 && config & cpd != cpd);

        // Factory calibration must survive the erase.
        let mut osccal = None;
        let mut bandgap = None;
        if self.desc.has_osccal {
            if protected {
                warn!(
                    "{}: protected part, factory OSCCAL cannot be saved",
                    self.desc.name
                );
            } else {
                self.seek_code(self.desc.code_words - 1);
                osccal = Some(self.read_cursor_word(false));
            }
        }
        if self.desc.bandgap_mask != 0 {
            bandgap = Some(config & self.desc.bandgap_mask);
        }

        if protected {
            self.disable_codeprotect();
        } else {
            self.bulk_erase();
        }

        if let Some(cal) = osccal {
            debug!("{}: restoring OSCCAL word {:#06X}", self.desc.name, cal);
            self.seek_code(self.desc.code_words - 1);
            if let Err(found) = self.program_one_location(cal, 0x3FFF, false) {
                return Err(Error::OscalRestoreFailed { wanted: cal, found });
            }
        }
        if let Some(bg) = bandgap {
            let value = (self.desc.blank_word() & !self.desc.bandgap_mask) | bg;
            self.seek_config(CONFIG_WORD_OFFSET);
            if let Err(found) =
                self.program_one_location(value, self.desc.bandgap_mask, false)
            {
                return Err(Error::OscalRestoreFailed {
                    wanted: value,
                    found,
                });
            }
        }
        Ok(())
    }

    fn program_inner(
        &mut self,
        image: &ImageBuffer,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        check_image(image, &self.map)?;
        self.verify_device_id()?;
        let regions: Vec<Region> = self.map.regions().to_vec();

        // Code first, then data after a rewind, config space last so a
        // protect bit cannot cut off the part mid-write.
        for region in regions.iter().filter(|r| r.kind == RegionKind::Code) {
            self.rewind();
            for offset in 0..region.len {
                let addr = region.start + offset;
                if !image.is_blank(addr)? {
                    self.seek_code(offset);
                    let word = image.get(addr)? as u16;
                    self.program_location(addr, word, region.word_mask() as u16, false)?;
                }
                meter.tick(addr);
            }
        }
        for region in regions.iter().filter(|r| r.kind == RegionKind::Eeprom) {
            self.rewind();
            for offset in 0..region.len {
                let addr = region.start + offset;
                if !image.is_blank(addr)? {
                    self.seek_code(offset);
                    let word = image.get(addr)? as u16;
                    self.program_location(addr, word, 0xFF, true)?;
                }
                meter.tick(addr);
            }
        }
        for region in regions.iter().filter(|r| r.kind == RegionKind::Id) {
            for offset in 0..region.len {
                let addr = region.start + offset;
                if !image.is_blank(addr)? {
                    self.seek_config(offset);
                    let word = image.get(addr)? as u16;
                    self.program_location(addr, word, region.word_mask() as u16, false)?;
                }
                meter.tick(addr);
            }
        }
        for region in regions.iter().filter(|r| r.kind == RegionKind::Config) {
            for offset in 0..region.len {
                let addr = region.start + offset;
                if !image.is_blank(addr)? {
                    self.seek_config(CONFIG_WORD_OFFSET + offset);
                    let mask = self.desc.config_mask(offset);
                    let word = image.get(addr)? as u16;
                    self.program_location(addr, word, mask, false)?;
                }
                meter.tick(addr);
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

        for region in regions {
            match region.kind {
                RegionKind::Code => {
                    self.rewind();
                    for offset in 0..region.len {
                        self.seek_code(offset);
                        let word = self.read_cursor_word(false);
                        let addr = region.start + offset;
                        apply_word(image, verify, addr, word.into(), region.word_mask())?;
                        meter.tick(addr);
                    }
                }
                RegionKind::Id => {
                    for offset in 0..region.len {
                        self.seek_config(offset);
                        let word = self.read_cursor_word(false);
                        let addr = region.start + offset;
                        apply_word(image, verify, addr, word.into(), region.word_mask())?;
                        meter.tick(addr);
                    }
                }
                RegionKind::Config => {
                    for offset in 0..region.len {
                        self.seek_config(CONFIG_WORD_OFFSET + offset);
                        let word = self.read_cursor_word(false);
                        let addr = region.start + offset;
                        let mask = u32::from(self.desc.config_mask(offset));
                        apply_word(image, verify, addr, word.into(), mask)?;
                        meter.tick(addr);
                    }
                }
                RegionKind::Eeprom => {
                    self.rewind();
                    for offset in 0..region.len {
                        self.seek_code(offset);
                        let word = self.read_cursor_word(true);
                        let addr = region.start + offset;
                        apply_word(image, verify, addr, word.into(), 0xFF)?;
                        meter.tick(addr);
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl<IO: IcspIo> Target for Pic16Target<IO> {
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
        debug!("{}: bulk erase", self.desc.name);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::types::VoltageRange;
    use crate::io::{VddState, VppState};
    use crate::progress::test_support::RecordingSink;

    fn test_desc() -> PicDescriptor {
        PicDescriptor {
            name: "TEST16".into(),
            vendor: "Test".into(),
            family: PicFamily::Pic16f8xx,
            code_words: 16,
            id_words: 4,
            config_words: 1,
            data_bytes: 8,
            program_time_us: 0,
            erase_time_us: 0,
            program_count: 8,
            program_multiplier: 3,
            config_masks: vec![0x3FFF],
            cp_mask: 0x0010,
            cpd_mask: 0,
            has_osccal: false,
            bandgap_mask: 0,
            device_id: None,
            device_id_mask: 0x3FE0,
            panel_count: 0,
            panel_bytes: 0,
            write_buffer_bytes: 0,
            vpp: VoltageRange {
                min_mv: 12000,
                max_mv: 14000,
            },
            vdd: VoltageRange {
                min_mv: 4500,
                max_mv: 5500,
            },
        }
    }

    #[derive(Clone, Copy)]
    enum WireState {
        Command { shift: u32, count: u8 },
        Payload { shift: u32, count: u8 },
        Drive { frame: u32, bit: u8 },
    }

    /// Decodes the command stream the way the silicon does: inputs latch on
    /// falling clock edges, read data is driven on rising edges. Serves
    /// read-backs from the last loaded payload, corrupting the first
    /// `fails` of them.
    struct WireMock {
        clock: bool,
        out: bool,
        in_bit: bool,
        state: WireState,
        latch: u16,
        fails: u32,
        begins: u32,
        loads: u32,
    }

    impl WireMock {
        fn new(fails: u32) -> Self {
            Self {
                clock: false,
                out: false,
                in_bit: false,
                state: WireState::Command { shift: 0, count: 0 },
                latch: 0,
                fails,
                begins: 0,
                loads: 0,
            }
        }

        fn dispatch(&mut self, cmd: u32) -> WireState {
            match cmd {
                CMD_LOAD_PROG | CMD_LOAD_DATA | CMD_LOAD_CONFIG => {
                    self.loads += 1;
                    WireState::Payload { shift: 0, count: 0 }
                }
                CMD_READ_PROG | CMD_READ_DATA => {
                    let value = if self.fails > 0 {
                        self.fails -= 1;
                        0x0000
                    } else {
                        self.latch
                    };
                    WireState::Drive {
                        frame: (u32::from(value) << 1) & 0x7FFE,
                        bit: 0,
                    }
                }
                CMD_BEGIN_ERASE_PROG | CMD_BEGIN_PROG_ONLY => {
                    self.begins += 1;
                    WireState::Command { shift: 0, count: 0 }
                }
                _ => WireState::Command { shift: 0, count: 0 },
            }
        }

        fn falling_edge(&mut self) {
            let state = self.state;
            self.state = match state {
                WireState::Command { mut shift, mut count } => {
                    if self.out {
                        shift |= 1 << count;
                    }
                    count += 1;
                    if count == 6 {
                        self.dispatch(shift)
                    } else {
                        WireState::Command { shift, count }
                    }
                }
                WireState::Payload { mut shift, mut count } => {
                    if self.out {
                        shift |= 1 << count;
                    }
                    count += 1;
                    if count == 16 {
                        self.latch = ((shift >> 1) & 0x3FFF) as u16;
                        WireState::Command { shift: 0, count: 0 }
                    } else {
                        WireState::Payload { shift, count }
                    }
                }
                WireState::Drive { frame, mut bit } => {
                    bit += 1;
                    if bit == 16 {
                        WireState::Command { shift: 0, count: 0 }
                    } else {
                        WireState::Drive { frame, bit }
                    }
                }
            };
        }
    }

    impl IcspIo for WireMock {
        fn set_clock(&mut self, high: bool) {
            if !self.clock && high {
                if let WireState::Drive { frame, bit } = self.state {
                    self.in_bit = (frame >> bit) & 1 != 0;
                }
            }
            if self.clock && !high {
                self.falling_edge();
            }
            self.clock = high;
        }

        fn set_data(&mut self, high: bool) {
            self.out = high;
        }

        fn data(&self) -> bool {
            self.in_bit
        }

        fn set_vpp(&mut self, _state: VppState) {}
        fn set_vdd(&mut self, _state: VddState) {}
        fn delay_us(&self, _us: u32) {}
    }

    #[test]
    fn program_cycle_uses_the_framed_wire_format() {
        let mut target = Pic16Target::new(test_desc(), WireMock::new(0));
        assert!(target.program_one_location(0x2AAA, 0x3FFF, false).is_ok());
        assert_eq!(target.io.latch, 0x2AAA);
    }

    #[test]
    fn success_on_attempt_k_adds_the_overprogramming_tail() {
        // Fail twice, succeed on the third base attempt.
        let mut target = Pic16Target::new(test_desc(), WireMock::new(2));
        assert!(target.program_one_location(0x1234, 0x3FFF, false).is_ok());
        // 3 base cycles plus 3 * multiplier overprogramming cycles.
        assert_eq!(target.io.begins, 3 + 3 * 3);
        assert_eq!(target.io.loads, 3 + 3 * 3);
    }

    #[test]
    fn exhausted_retries_report_the_last_read_back() {
        let mut target = Pic16Target::new(test_desc(), WireMock::new(u32::MAX));
        let err = target.program_one_location(0x1234, 0x3FFF, false);
        assert_eq!(err, Err(0x0000));
        assert_eq!(target.io.begins, 8);
    }

    #[test]
    fn blank_image_programs_nothing_but_completes_progress() {
        let mut target = Pic16Target::new(test_desc(), WireMock::new(0));
        let image = ImageBuffer::new(target.memory_map());
        let mut sink = RecordingSink::default();
        target.program(&image, &mut sink).unwrap();
        assert_eq!(target.io.begins, 0);
        assert!(sink.completed(Operation::Program));
    }

    /// Records rail transitions in order
    struct RailLog {
        events: Vec<&'static str>,
    }

    impl IcspIo for RailLog {
        fn set_clock(&mut self, _high: bool) {}
        fn set_data(&mut self, _high: bool) {}
        fn data(&self) -> bool {
            false
        }
        fn set_vpp(&mut self, state: VppState) {
            self.events.push(match state {
                VppState::Vih => "vpp-vih",
                VppState::Gnd => "vpp-gnd",
                VppState::Vdd => "vpp-vdd",
            });
        }
        fn set_vdd(&mut self, state: VddState) {
            self.events.push(match state {
                VddState::Off => "vdd-off",
                _ => "vdd-on",
            });
        }
        fn delay_us(&self, _us: u32) {}
    }

    #[test]
    fn entry_raises_vdd_before_vpp_and_exit_reverses() {
        let mut target = Pic16Target::new(test_desc(), RailLog { events: Vec::new() });
        target.enter_program_mode().unwrap();
        target.exit_program_mode().unwrap();
        assert_eq!(
            target.io.events,
            vec!["vpp-gnd", "vdd-on", "vpp-vih", "vpp-gnd", "vdd-off"]
        );
    }
}
