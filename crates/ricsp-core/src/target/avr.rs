//! AVR serial-programming driver
//!
//! AVR instructions are 32-bit full-duplex exchanges, MSB first, built from
//! the per-part templates in the device database. The part echoes each
//! received byte while the next one shifts in, which is also how sync is
//! detected: the second byte of programming-enable (0x53) must come back in
//! the third response byte.
//!
//! Reset is wired to the Vpp rail. `Gnd` asserts reset (the programming
//! state), `Vdd` releases it, and a release/assert pulse retries a failed
//! sync. Flash on paged parts goes through the page buffer: load every byte
//! of a dirty page, commit once, then poll the last written byte until it
//! reads back, unless its value collides with the part's busy read-back
//! values, in which case only the worst-case delay helps.

use log::{debug, warn};

use crate::buffer::ImageBuffer;
use crate::device::instruction::{Instruction, INSTRUCTION_BITS};
use crate::device::types::{AvrDescriptor, FUSE_EXT, FUSE_HIGH, FUSE_LOCK, FUSE_LOW};
use crate::error::{Error, Result};
use crate::io::{shift_bits_out_in, IcspIo, VddState, VppState};
use crate::memmap::{MemoryMap, Region, RegionKind};
use crate::progress::{DumpSink, Operation, ProgressMeter, ProgressSink};
use crate::target::{apply_word, check_image, dump_image, ProbeInfo, Target};

/// Byte echoed back while the third programming-enable byte shifts in
const SYNC_ECHO: u32 = 0x53;
const SYNC_ATTEMPTS: u32 = 15;

const T_SET_US: u32 = 2;
const T_HOLD_US: u32 = 2;
/// Positive reset pulse between sync attempts
const T_RESET_PULSE_US: u32 = 100;
/// Rail settle after powering down
const T_OFF_US: u32 = 10_000;

const FUSE_ATTEMPTS: u32 = 3;
/// Completion polling granularity, in slices of the nominal write time
const POLL_SLICES: u32 = 16;
/// Poll budget in multiples of the write time before verify takes over
const POLL_BUDGET: u32 = 4;

/// Serial-programming driver for AVR parts
pub struct AvrTarget<IO> {
    desc: AvrDescriptor,
    map: MemoryMap,
    io: IO,
    /// Extended-address byte last sent to the part
    last_ext_addr: Option<u32>,
}

impl<IO: IcspIo> AvrTarget<IO> {
    /// Build a driver for `desc` talking through `io`
    pub fn new(desc: AvrDescriptor, io: IO) -> Self {
        let map = desc.memory_map();
        AvrTarget {
            desc,
            map,
            io,
            last_ext_addr: None,
        }
    }

    fn exec(&mut self, inst: Instruction, addr: u32, data: u32) -> u32 {
        shift_bits_out_in(
            &mut self.io,
            inst.encode(addr, data),
            INSTRUCTION_BITS,
            T_SET_US,
            T_HOLD_US,
        )
    }

    /// Power up with reset asserted and bring the part into sync.
    ///
    /// A failed sync gets a positive reset pulse and another attempt, the
    /// serial interface may have come up misaligned.
    fn power_entry(&mut self) -> Result<()> {
        self.last_ext_addr = None;
        self.io.set_clock(false);
        self.io.set_data(false);
        self.io.set_vpp(VppState::Gnd);
        self.io.set_vdd(VddState::On);
        self.io.delay_us(self.desc.reset_delay_us);
        let enable = self.desc.instructions.programming_enable;
        for attempt in 1..=SYNC_ATTEMPTS {
            let response = self.exec(enable, 0, 0);
            if (response >> 8) & 0xFF == SYNC_ECHO {
                debug!("{}: in sync after {attempt} attempt(s)", self.desc.name);
                return Ok(());
            }
            self.io.set_vpp(VppState::Vdd);
            self.io.delay_us(T_RESET_PULSE_US);
            self.io.set_vpp(VppState::Gnd);
            self.io.delay_us(self.desc.reset_delay_us);
        }
        Err(Error::SyncFailed {
            attempts: SYNC_ATTEMPTS,
        })
    }

    fn power_off(&mut self) {
        self.io.set_clock(false);
        self.io.set_data(false);
        self.io.set_vpp(VppState::Gnd);
        self.io.set_vdd(VddState::Off);
        self.io.delay_us(T_OFF_US);
    }

    /// Send the extended-address byte when a 128 KiB boundary is crossed
    fn ensure_ext_addr(&mut self, byte_addr: u32) {
        let inst = self.desc.instructions.load_ext_addr;
        if !inst.is_valid() {
            return;
        }
        let ext = byte_addr >> 17;
        if self.last_ext_addr != Some(ext) {
            self.exec(inst, ext, 0);
            self.last_ext_addr = Some(ext);
        }
    }

    fn read_flash_byte(&mut self, byte_addr: u32) -> u32 {
        let inst = self.desc.instructions.read_flash;
        self.ensure_ext_addr(byte_addr);
        let response = self.exec(inst, byte_addr, 0);
        inst.decode(response)
    }

    /// Wait for a byte write to land.
    ///
    /// Polls the read instruction until the value comes back. Values that
    /// collide with the part's busy read-back get the fixed worst-case delay
    /// instead. Polling out is not an error here, the verify pass decides.
    fn poll_byte(&mut self, read: Instruction, addr: u32, value: u32, sentinel: bool, wait_us: u32) {
        if sentinel || !read.is_valid() {
            self.io.delay_us(wait_us);
            return;
        }
        let step = (wait_us / POLL_SLICES).max(1);
        for _ in 0..POLL_SLICES * POLL_BUDGET {
            if read.decode(self.exec(read, addr, 0)) == value {
                return;
            }
            self.io.delay_us(step);
        }
    }

    fn fuse_instructions(&self, slot: u32) -> (Instruction, Instruction) {
        let set = &self.desc.instructions;
        match slot {
            FUSE_LOCK => (set.read_lock, set.write_lock),
            FUSE_LOW => (set.read_fuse, set.write_fuse),
            FUSE_HIGH => (set.read_high_fuse, set.write_high_fuse),
            _ => (set.read_ext_fuse, set.write_ext_fuse),
        }
    }

    /// Write one fuse byte, read it back, retry a few times before failing
    fn write_fuse(
        &mut self,
        write: Instruction,
        read: Instruction,
        value: u32,
        address: u32,
    ) -> Result<()> {
        let mut found = value;
        for _ in 0..FUSE_ATTEMPTS {
            self.exec(write, 0, value);
            self.io.delay_us(self.desc.fuse_time_us);
            if self.desc.power_off_after_write_fuse {
                self.power_off();
                self.power_entry()?;
            }
            if !read.is_valid() {
                return Ok(());
            }
            found = read.decode(self.exec(read, 0, 0));
            if found == value {
                return Ok(());
            }
        }
        Err(Error::ProgramFailed {
            address,
            wrote: value,
            found,
        })
    }

    fn read_signature_bytes(&mut self) -> Result<[u8; 3]> {
        let inst = self.desc.instructions.read_signature;
        if !inst.is_valid() {
            return Err(Error::NotSupported("signature read"));
        }
        let mut sig = [0u8; 3];
        for (i, byte) in sig.iter_mut().enumerate() {
            *byte = inst.decode(self.exec(inst, i as u32, 0)) as u8;
        }
        Ok(sig)
    }

    fn probe_identity(&mut self) -> Result<ProbeInfo> {
        let found = self.read_signature_bytes()?;
        if found != self.desc.signature {
            return Err(Error::SignatureMismatch {
                expected: self.desc.signature,
                found,
            });
        }
        Ok(ProbeInfo {
            device_id: None,
            revision: None,
            signature: Some(found),
        })
    }

    fn verify_signature(&mut self) -> Result<()> {
        if self.desc.instructions.read_signature.is_valid() {
            self.probe_identity()?;
        }
        Ok(())
    }

    fn erase_inner(&mut self) -> Result<()> {
        self.verify_signature()?;
        let inst = self.desc.instructions.chip_erase;
        if !inst.is_valid() {
            return Err(Error::NotSupported("chip erase"));
        }
        self.exec(inst, 0, 0);
        self.io.delay_us(self.desc.erase_time_us);
        // older parts drop out of programming mode after an erase cycle
        self.power_off();
        self.power_entry()
    }

    fn program_flash(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        if self.desc.flash.paged() && self.desc.instructions.load_flash_page.is_valid() {
            self.program_flash_paged(image, region, meter)
        } else {
            self.program_flash_bytes(image, region, meter)
        }
    }

    /// Load every byte of a dirty page into the page buffer, commit once,
    /// then wait on the last byte. Blank pages are skipped whole.
    fn program_flash_paged(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        let load = self.desc.instructions.load_flash_page;
        let commit = self.desc.instructions.write_flash_page;
        if !commit.is_valid() {
            return Err(Error::NotSupported("paged flash write"));
        }
        let page_words = self.desc.flash.page_bytes / 2;
        if page_words == 0 || region.len % page_words != 0 {
            return Err(Error::config("flash", "page geometry does not cover flash"));
        }
        for page in 0..region.len / page_words {
            let base = region.start + page * page_words;
            if image.range_blank(base..base + page_words)? {
                meter.advance(base, u64::from(page_words));
                continue;
            }
            let mut last = (0u32, 0u32);
            for word in 0..page_words {
                let value = image.get(base + word)?;
                let byte_addr = (page * page_words + word) * 2;
                self.ensure_ext_addr(byte_addr);
                self.exec(load, byte_addr, value & 0xFF);
                self.exec(load, byte_addr + 1, value >> 8);
                last = (byte_addr + 1, value >> 8);
            }
            let page_base = page * page_words * 2;
            self.ensure_ext_addr(page_base);
            self.exec(commit, page_base, 0);
            let (addr, value) = last;
            let sentinel = self.desc.flash.is_read_back_value(value as u8);
            self.poll_byte(
                self.desc.instructions.read_flash,
                addr,
                value,
                sentinel,
                self.desc.flash.write_time_us,
            );
            meter.advance(base, u64::from(page_words));
        }
        Ok(())
    }

    fn program_flash_bytes(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        let write = self.desc.instructions.write_flash;
        if !write.is_valid() {
            return Err(Error::NotSupported("flash write"));
        }
        let read = self.desc.instructions.read_flash;
        for offset in 0..region.len {
            let addr = region.start + offset;
            if !image.is_blank(addr)? {
                let value = image.get(addr)?;
                for (half, byte) in [value & 0xFF, value >> 8].into_iter().enumerate() {
                    let byte_addr = offset * 2 + half as u32;
                    self.exec(write, byte_addr, byte);
                    let sentinel = self.desc.flash.is_read_back_value(byte as u8);
                    self.poll_byte(read, byte_addr, byte, sentinel, self.desc.flash.write_time_us);
                }
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
        let write = self.desc.instructions.write_eeprom;
        if !write.is_valid() {
            return Err(Error::NotSupported("EEPROM write"));
        }
        let read = self.desc.instructions.read_eeprom;
        for offset in 0..region.len {
            let addr = region.start + offset;
            if !image.is_blank(addr)? {
                let value = image.get(addr)?;
                self.exec(write, offset, value);
                let sentinel = self.desc.eeprom.is_read_back_value(value as u8);
                self.poll_byte(read, offset, value, sentinel, self.desc.eeprom.write_time_us);
            }
            meter.tick(addr);
        }
        Ok(())
    }

    fn program_fuses(
        &mut self,
        image: &ImageBuffer,
        region: &Region,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        // lock bits go last so they cannot cut off the other fuse writes
        for slot in [FUSE_LOW, FUSE_HIGH, FUSE_EXT, FUSE_LOCK] {
            let addr = region.start + slot;
            let (read, write) = self.fuse_instructions(slot);
            if !image.is_blank(addr)? {
                if write.is_valid() {
                    let value = image.get(addr)?;
                    self.write_fuse(write, read, value, addr)?;
                } else {
                    warn!("{}: part cannot write fuse byte {slot}", self.desc.name);
                }
            }
            meter.tick(addr);
        }
        Ok(())
    }

    fn program_inner(&mut self, image: &ImageBuffer, meter: &mut ProgressMeter<'_>) -> Result<()> {
        check_image(image, &self.map)?;
        self.verify_signature()?;
        let regions: Vec<Region> = self.map.regions().to_vec();

        for region in &regions {
            match region.kind {
                RegionKind::Code => self.program_flash(image, region, meter)?,
                RegionKind::Eeprom => self.program_eeprom(image, region, meter)?,
                _ => {}
            }
        }
        for region in &regions {
            if region.kind == RegionKind::Fuses {
                self.program_fuses(image, region, meter)?;
            }
        }
        for region in &regions {
            if matches!(region.kind, RegionKind::Signature | RegionKind::Calibration) {
                // factory-programmed, nothing to write
                meter.advance(region.start + region.len - 1, u64::from(region.len));
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
        self.verify_signature()?;
        let regions: Vec<Region> = self.map.regions().to_vec();

        for region in &regions {
            match region.kind {
                RegionKind::Signature | RegionKind::Calibration => {
                    if verify {
                        // Factory bytes; identity is already checked and
                        // nothing programmable lives here.
                        meter.advance(region.start + region.len - 1, u64::from(region.len));
                        continue;
                    }
                    let inst = if region.kind == RegionKind::Signature {
                        self.desc.instructions.read_signature
                    } else {
                        self.desc.instructions.read_calibration
                    };
                    self.read_bytes(image, false, region, inst, meter)?;
                }
                RegionKind::Fuses => {
                    for slot in 0..region.len {
                        let addr = region.start + slot;
                        if verify && image.is_blank(addr)? {
                            // A blank image cell left the fuse alone, and
                            // factory values never read back as 0xFF.
                            meter.tick(addr);
                            continue;
                        }
                        let (read, _) = self.fuse_instructions(slot);
                        if read.is_valid() {
                            let byte = read.decode(self.exec(read, 0, 0));
                            apply_word(image, verify, addr, byte, 0xFF)?;
                        }
                        meter.tick(addr);
                    }
                }
                RegionKind::Code => {
                    for offset in 0..region.len {
                        let addr = region.start + offset;
                        let low = self.read_flash_byte(offset * 2);
                        let high = self.read_flash_byte(offset * 2 + 1);
                        apply_word(image, verify, addr, low | (high << 8), 0xFFFF)?;
                        meter.tick(addr);
                    }
                }
                RegionKind::Eeprom => {
                    let inst = self.desc.instructions.read_eeprom;
                    self.read_bytes(image, verify, region, inst, meter)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Read a byte region with one indexed instruction.
    ///
    /// A part without the instruction leaves the buffer blank on reads and
    /// is never flagged on verifies.
    fn read_bytes(
        &mut self,
        image: &mut ImageBuffer,
        verify: bool,
        region: &Region,
        inst: Instruction,
        meter: &mut ProgressMeter<'_>,
    ) -> Result<()> {
        for offset in 0..region.len {
            let addr = region.start + offset;
            if inst.is_valid() {
                let byte = inst.decode(self.exec(inst, offset, 0));
                apply_word(image, verify, addr, byte, 0xFF)?;
            }
            meter.tick(addr);
        }
        Ok(())
    }
}

impl<IO: IcspIo> Target for AvrTarget<IO> {
    fn name(&self) -> &str {
        &self.desc.name
    }

    fn memory_map(&self) -> &MemoryMap {
        &self.map
    }

    fn enter_program_mode(&mut self) -> Result<()> {
        debug!("{}: entering program mode", self.desc.name);
        self.power_entry()
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
