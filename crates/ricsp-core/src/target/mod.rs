//! Protocol drivers for the supported device families
//!
//! Each family driver implements [`Target`] on top of an [`IcspIo`]
//! implementation. Callers go through [`Session`], which powers the part up
//! before an operation and back down afterwards, whether the operation
//! succeeded or not.

pub mod avr;
pub mod pic16;
pub mod pic18;

use core::fmt;

use crate::buffer::ImageBuffer;
use crate::device::DeviceDescriptor;
use crate::error::Result;
use crate::io::{IcspIo, VddState, VppState};
use crate::memmap::MemoryMap;
use crate::progress::{DumpSink, ProgressSink};

pub use avr::AvrTarget;
pub use pic16::Pic16Target;
pub use pic18::Pic18Target;

/// Identification data read from a live part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeInfo {
    /// Masked device ID word (PIC parts)
    pub device_id: Option<u16>,
    /// Silicon revision bits left over after masking (PIC parts)
    pub revision: Option<u16>,
    /// Three signature bytes (AVR parts)
    pub signature: Option<[u8; 3]>,
}

impl fmt::Display for ProbeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.device_id {
            write!(f, "device ID 0x{id:04X}")?;
            if let Some(rev) = self.revision {
                write!(f, ", revision 0x{rev:02X}")?;
            }
            return Ok(());
        }
        if let Some(sig) = self.signature {
            return write!(
                f,
                "signature 0x{:02X} 0x{:02X} 0x{:02X}",
                sig[0], sig[1], sig[2]
            );
        }
        write!(f, "no identification data")
    }
}

/// Operations every family driver provides
///
/// All operations except [`name`](Target::name) and
/// [`memory_map`](Target::memory_map) assume the part is in program mode;
/// use [`Session`] rather than calling them directly.
pub trait Target {
    /// Device name from the descriptor
    fn name(&self) -> &str;

    /// Memory map describing the buffer layout for this part
    fn memory_map(&self) -> &MemoryMap;

    /// Power up and put the part in program mode
    fn enter_program_mode(&mut self) -> Result<()>;

    /// Leave program mode and power the part down
    ///
    /// Must be safe to call at any point, including after a failed entry.
    fn exit_program_mode(&mut self) -> Result<()>;

    /// Read identification data and check it against the descriptor
    fn probe(&mut self) -> Result<ProbeInfo>;

    /// Erase the part
    fn erase(&mut self, progress: &mut dyn ProgressSink) -> Result<()>;

    /// Program the writable regions of `image` into the part
    fn program(&mut self, image: &ImageBuffer, progress: &mut dyn ProgressSink) -> Result<()>;

    /// Read the part into `image`, or with `verify` set, compare the part
    /// against `image` and fail on the first mismatch
    fn read(
        &mut self,
        image: &mut ImageBuffer,
        verify: bool,
        progress: &mut dyn ProgressSink,
    ) -> Result<()>;

    /// Read the part and send a human-readable listing to `sink`
    fn dump(&mut self, sink: &mut dyn DumpSink, progress: &mut dyn ProgressSink) -> Result<()>;
}

/// Store or compare one word read from the part
///
/// In verify mode this checks `found` against the image under `mask` and
/// reports the first difference; otherwise it stores the word.
pub(crate) fn apply_word(
    image: &mut ImageBuffer,
    verify: bool,
    address: u32,
    found: u32,
    mask: u32,
) -> Result<()> {
    if verify {
        let expected = image.get(address)?;
        if expected & mask != found & mask {
            return Err(crate::error::Error::VerifyMismatch {
                address,
                expected: expected & mask,
                found: found & mask,
            });
        }
    } else {
        image.set(address, found)?;
    }
    Ok(())
}

/// Image buffers must come from the driver's own map
pub(crate) fn check_image(image: &ImageBuffer, map: &MemoryMap) -> Result<()> {
    if image.map() != map {
        return Err(crate::error::Error::config(
            "image",
            "buffer does not match the device memory map",
        ));
    }
    Ok(())
}

/// Format a read image as hex lines, region by region
pub(crate) fn dump_image(image: &ImageBuffer, sink: &mut dyn DumpSink) {
    sink.clear();
    for region in image.map().regions() {
        let unit = if region.word_bits == 8 { "bytes" } else { "words" };
        sink.line(&format!("{} ({} {}):", region.kind, region.len, unit));
        let per_line = if region.word_bits == 8 { 16 } else { 8 };
        let mut offset = 0;
        while offset < region.len {
            let mut line = format!("  {offset:04X}:");
            for i in offset..(offset + per_line).min(region.len) {
                let word = image.get(region.start + i).unwrap_or(0);
                if region.word_bits == 8 {
                    line.push_str(&format!(" {word:02X}"));
                } else {
                    line.push_str(&format!(" {word:04X}"));
                }
            }
            sink.line(&line);
            offset += per_line;
        }
    }
}

/// Raise the programming rails for a PIC target.
///
/// Vdd comes up first with the clock and data lines held low, then Vpp
/// goes to Vihh. Both rails get `settle_us` to stabilise.
pub(crate) fn pic_power_entry<M: IcspIo + ?Sized>(io: &mut M, settle_us: u32) {
    io.set_clock(false);
    io.set_data(false);
    io.set_vpp(VppState::Gnd);
    io.set_vdd(VddState::On);
    io.delay_us(settle_us);
    io.set_vpp(VppState::Vih);
    io.delay_us(settle_us);
}

/// Drop the programming rails for a PIC target, Vpp before Vdd.
pub(crate) fn pic_power_off<M: IcspIo + ?Sized>(io: &mut M, settle_us: u32) {
    io.set_clock(false);
    io.set_data(false);
    io.set_vpp(VppState::Gnd);
    io.set_vdd(VddState::Off);
    io.delay_us(settle_us);
}

/// Build the driver matching `descriptor` on top of `io`
pub fn open_target(descriptor: &DeviceDescriptor, io: Box<dyn IcspIo>) -> Box<dyn Target> {
    match descriptor {
        DeviceDescriptor::Pic(pic) if pic.family.is_pic18() => {
            Box::new(Pic18Target::new(pic.clone(), io))
        }
        DeviceDescriptor::Pic(pic) => Box::new(Pic16Target::new(pic.clone(), io)),
        DeviceDescriptor::Avr(avr) => Box::new(AvrTarget::new(avr.clone(), io)),
    }
}

/// Powered session around a [`Target`]
///
/// Every operation enters program mode, runs, and leaves program mode again.
/// Power-down runs on the error paths too, so a failed operation never
/// leaves the part driven.
pub struct Session {
    target: Box<dyn Target>,
}

impl Session {
    /// Wrap a driver
    pub fn new(target: Box<dyn Target>) -> Self {
        Self { target }
    }

    /// The wrapped driver
    pub fn target(&self) -> &dyn Target {
        self.target.as_ref()
    }

    /// Probe the part and check its identity
    pub fn probe(&mut self) -> Result<ProbeInfo> {
        self.scoped(|t| t.probe())
    }

    /// Erase the part
    pub fn erase(&mut self, progress: &mut dyn ProgressSink) -> Result<()> {
        self.scoped(|t| t.erase(progress))
    }

    /// Program `image` into the part
    pub fn program(
        &mut self,
        image: &ImageBuffer,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        self.scoped(|t| t.program(image, progress))
    }

    /// Read the part into `image`
    pub fn read(&mut self, image: &mut ImageBuffer, progress: &mut dyn ProgressSink) -> Result<()> {
        self.scoped(|t| t.read(image, false, progress))
    }

    /// Compare the part against `image`, failing on the first mismatch
    pub fn verify(
        &mut self,
        image: &mut ImageBuffer,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        self.scoped(|t| t.read(image, true, progress))
    }

    /// Read the part and write a listing to `sink`
    pub fn dump(
        &mut self,
        sink: &mut dyn DumpSink,
        progress: &mut dyn ProgressSink,
    ) -> Result<()> {
        self.scoped(|t| t.dump(sink, progress))
    }

    fn scoped<R>(&mut self, op: impl FnOnce(&mut dyn Target) -> Result<R>) -> Result<R> {
        if let Err(e) = self.target.enter_program_mode() {
            let _ = self.target.exit_program_mode();
            return Err(e);
        }
        let result = op(self.target.as_mut());
        let off = self.target.exit_program_mode();
        match result {
            Ok(value) => off.map(|_| value),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::error::Error;
    use crate::memmap::RegionKind;
    use crate::progress::NoProgress;

    #[derive(Default)]
    struct PowerLog {
        entered: u32,
        exited: u32,
    }

    struct StubTarget {
        map: MemoryMap,
        power: Rc<RefCell<PowerLog>>,
        fail_enter: bool,
        fail_op: bool,
    }

    impl StubTarget {
        fn new(power: Rc<RefCell<PowerLog>>) -> Self {
            let mut map = MemoryMap::new();
            map.push(RegionKind::Code, 16, 14);
            Self {
                map,
                power,
                fail_enter: false,
                fail_op: false,
            }
        }
    }

    impl Target for StubTarget {
        fn name(&self) -> &str {
            "STUB"
        }

        fn memory_map(&self) -> &MemoryMap {
            &self.map
        }

        fn enter_program_mode(&mut self) -> Result<()> {
            if self.fail_enter {
                return Err(Error::NotSupported("enter"));
            }
            self.power.borrow_mut().entered += 1;
            Ok(())
        }

        fn exit_program_mode(&mut self) -> Result<()> {
            self.power.borrow_mut().exited += 1;
            Ok(())
        }

        fn probe(&mut self) -> Result<ProbeInfo> {
            Ok(ProbeInfo::default())
        }

        fn erase(&mut self, _progress: &mut dyn ProgressSink) -> Result<()> {
            if self.fail_op {
                return Err(Error::NotSupported("erase"));
            }
            Ok(())
        }

        fn program(
            &mut self,
            _image: &ImageBuffer,
            _progress: &mut dyn ProgressSink,
        ) -> Result<()> {
            Ok(())
        }

        fn read(
            &mut self,
            _image: &mut ImageBuffer,
            _verify: bool,
            _progress: &mut dyn ProgressSink,
        ) -> Result<()> {
            Ok(())
        }

        fn dump(
            &mut self,
            _sink: &mut dyn DumpSink,
            _progress: &mut dyn ProgressSink,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn session_powers_down_after_success() {
        let power = Rc::new(RefCell::new(PowerLog::default()));
        let mut session = Session::new(Box::new(StubTarget::new(power.clone())));
        session.erase(&mut NoProgress).unwrap();
        assert_eq!(power.borrow().entered, 1);
        assert_eq!(power.borrow().exited, 1);
    }

    #[test]
    fn session_powers_down_after_failed_operation() {
        let power = Rc::new(RefCell::new(PowerLog::default()));
        let mut stub = StubTarget::new(power.clone());
        stub.fail_op = true;
        let mut session = Session::new(Box::new(stub));
        let err = session.erase(&mut NoProgress).unwrap_err();
        assert!(matches!(err, Error::NotSupported("erase")));
        assert_eq!(power.borrow().entered, 1);
        assert_eq!(power.borrow().exited, 1);
    }

    #[test]
    fn session_powers_down_after_failed_entry() {
        let power = Rc::new(RefCell::new(PowerLog::default()));
        let mut stub = StubTarget::new(power.clone());
        stub.fail_enter = true;
        let mut session = Session::new(Box::new(stub));
        let err = session.probe().unwrap_err();
        assert!(matches!(err, Error::NotSupported("enter")));
        assert_eq!(power.borrow().entered, 0);
        assert_eq!(power.borrow().exited, 1);
    }

    #[test]
    fn probe_info_formats_both_shapes() {
        let pic = ProbeInfo {
            device_id: Some(0x0560),
            revision: Some(0x03),
            signature: None,
        };
        assert_eq!(pic.to_string(), "device ID 0x0560, revision 0x03");

        let avr = ProbeInfo {
            device_id: None,
            revision: None,
            signature: Some([0x1E, 0x95, 0x02]),
        };
        assert_eq!(avr.to_string(), "signature 0x1E 0x95 0x02");
    }
}
