//! Session-backed command implementations
//!
//! Everything here drives a powered [`Session`]; file handling and value
//! plumbing happen around it. Image files are raw binaries: one byte per
//! word for 8-bit regions, two bytes little-endian for wider ones.

use indicatif::{ProgressBar, ProgressStyle};
use ricsp_core::{
    DumpSink, Error, ImageBuffer, Operation, ProgressSink, Region, RegionKind, Session,
};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Progress reporting
// =============================================================================

fn phase(op: Operation) -> &'static str {
    match op {
        Operation::Erase => "Erasing",
        Operation::Program => "Programming",
        Operation::Read => "Reading",
        Operation::Verify => "Verifying",
        Operation::Dump => "Dumping",
    }
}

fn done_message(op: Operation) -> &'static str {
    match op {
        Operation::Erase => "Erase complete",
        Operation::Program => "Programming complete",
        Operation::Read => "Read complete",
        Operation::Verify => "Verify complete",
        Operation::Dump => "Dump complete",
    }
}

/// Create a standard progress bar style
fn bar_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} words ({per_sec}, {eta}) {msg}",
        )?
        .progress_chars("#>-"))
}

/// Create a standard spinner style
fn spinner_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?)
}

/// Progress reporter using indicatif progress bars
///
/// Single-unit operations (a bulk erase is one unit) show a spinner, anything
/// longer a position bar.
pub struct IndicatifProgress {
    bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self { bar: None }
    }

    fn abandon(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.abandon();
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for IndicatifProgress {
    fn begin(&mut self, op: Operation, total: u64) {
        let pb = if total <= 1 {
            let pb = ProgressBar::new_spinner();
            pb.set_style(spinner_style().unwrap_or_else(|_| ProgressStyle::default_spinner()));
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        } else {
            let pb = ProgressBar::new(total);
            pb.set_style(bar_style().unwrap_or_else(|_| ProgressStyle::default_bar()));
            pb
        };
        pb.set_message(format!("{}...", phase(op)));
        self.bar = Some(pb);
    }

    fn tick(&mut self, _address: u32, done: u64) {
        if let Some(pb) = &self.bar {
            pb.set_position(done);
        }
    }

    fn finish(&mut self, op: Operation) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message(done_message(op));
        }
    }
}

/// Run one session operation behind a fresh progress display
///
/// Drivers skip the finish callback when they bail out early, so the bar is
/// abandoned here on the error path.
fn with_progress<R>(f: impl FnOnce(&mut IndicatifProgress) -> ricsp_core::Result<R>) -> ricsp_core::Result<R> {
    let mut progress = IndicatifProgress::new();
    let result = f(&mut progress);
    if result.is_err() {
        progress.abandon();
    }
    result
}

/// Dump sink printing straight to stdout
struct StdoutDump;

impl DumpSink for StdoutDump {
    fn clear(&mut self) {}

    fn line(&mut self, line: &str) {
        println!("{}", line);
    }
}

// =============================================================================
// Image file handling
// =============================================================================

fn region_of(session: &Session, kind: RegionKind) -> Result<Region, Box<dyn std::error::Error>> {
    session
        .target()
        .memory_map()
        .region(kind)
        .copied()
        .ok_or_else(|| format!("{} has no {} region", session.target().name(), kind).into())
}

/// Load a raw binary file into one image region
///
/// Short files leave the tail of the region blank.
fn load_image_file(
    image: &mut ImageBuffer,
    region: &Region,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut data = Vec::new();
    File::open(path)?.read_to_end(&mut data)?;

    let words: Vec<u32> = if region.word_bits <= 8 {
        data.iter().map(|&b| u32::from(b)).collect()
    } else {
        if data.len() % 2 != 0 {
            return Err(format!(
                "{:?}: odd length ({} bytes) for a region of {}-bit words",
                path,
                data.len(),
                region.word_bits
            )
            .into());
        }
        data.chunks_exact(2)
            .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
            .collect()
    };

    if words.len() as u32 > region.len {
        return Err(format!(
            "{:?}: {} words do not fit the {} region ({} words)",
            path,
            words.len(),
            region.kind,
            region.len
        )
        .into());
    }

    image.load_region(region.kind, &words)?;
    println!("Read {} bytes from {:?}", data.len(), path);
    Ok(())
}

/// Store one image region as a raw binary file
fn write_image_file(
    image: &ImageBuffer,
    region: &Region,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut data = Vec::with_capacity(region.len as usize * 2);
    for addr in region.range() {
        let word = image.get(addr)?;
        if region.word_bits <= 8 {
            data.push(word as u8);
        } else {
            data.extend_from_slice(&(word as u16).to_le_bytes());
        }
    }
    File::create(path)?.write_all(&data)?;
    println!("Wrote {} bytes to {:?}", data.len(), path);
    Ok(())
}

/// Place explicit word values into a region at the given offsets
fn set_values(
    image: &mut ImageBuffer,
    region: &Region,
    values: &[(u32, u32)],
    what: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    for &(index, value) in values {
        if index >= region.len {
            return Err(format!(
                "{} index {} out of range (device has {})",
                what, index, region.len
            )
            .into());
        }
        if value & !region.word_mask() != 0 {
            return Err(format!(
                "{} value 0x{:X} is wider than {} bits",
                what, value, region.word_bits
            )
            .into());
        }
        image.set(region.start + index, value)?;
    }
    Ok(())
}

/// Print the small identification and configuration regions after a read
fn print_small_regions(image: &ImageBuffer) {
    for region in image.map().regions() {
        let interesting = matches!(
            region.kind,
            RegionKind::Id
                | RegionKind::Config
                | RegionKind::Signature
                | RegionKind::Fuses
                | RegionKind::Calibration
        );
        if !interesting || region.len > 16 {
            continue;
        }
        let mut line = format!("{}:", region.kind);
        for addr in region.range() {
            let word = image.get(addr).unwrap_or(0);
            if region.word_bits <= 8 {
                line.push_str(&format!(" {:02X}", word));
            } else {
                line.push_str(&format!(" {:04X}", word));
            }
        }
        println!("{}", line);
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Run the probe command
pub fn run_probe(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let info = session.probe()?;
    println!("{}: {}", session.target().name(), info);
    Ok(())
}

/// Run the erase command
pub fn run_erase(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    with_progress(|progress| session.erase(progress))?;
    println!("Erase complete");
    Ok(())
}

/// What the write command should put on the part
pub struct WriteRequest<'a> {
    /// Program memory image file
    pub input: Option<&'a Path>,
    /// EEPROM data image file
    pub eeprom: Option<&'a Path>,
    /// Explicit config word values as (index, value)
    pub config: &'a [(u32, u32)],
    /// Explicit fuse byte values as (offset, value)
    pub fuses: &'a [(u32, u32)],
    /// Bulk-erase before programming
    pub erase_first: bool,
    /// Read the part back and compare afterwards
    pub verify: bool,
}

/// Run the write command
pub fn run_write(
    session: &mut Session,
    request: &WriteRequest<'_>,
) -> Result<(), Box<dyn std::error::Error>> {
    let map = session.target().memory_map().clone();
    let mut image = ImageBuffer::new(&map);

    if let Some(path) = request.input {
        let region = region_of(session, RegionKind::Code)?;
        load_image_file(&mut image, &region, path)?;
    }
    if let Some(path) = request.eeprom {
        let region = region_of(session, RegionKind::Eeprom)?;
        load_image_file(&mut image, &region, path)?;
    }
    if !request.config.is_empty() {
        let region = region_of(session, RegionKind::Config)?;
        set_values(&mut image, &region, request.config, "config word")?;
    }
    if !request.fuses.is_empty() {
        let region = region_of(session, RegionKind::Fuses)?;
        set_values(&mut image, &region, request.fuses, "fuse")?;
    }

    if map.regions().iter().all(|r| image.region_blank(r)) {
        return Err("Nothing to write: give --input, --eeprom, --config or --fuse".into());
    }

    if request.erase_first {
        with_progress(|progress| session.erase(progress))?;
    }
    with_progress(|progress| session.program(&image, progress))?;

    if request.verify {
        with_progress(|progress| session.verify(&mut image, progress))?;
        println!("Verify passed");
    }
    Ok(())
}

/// Run the read command
pub fn run_read(
    session: &mut Session,
    output: &Path,
    eeprom: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let map = session.target().memory_map().clone();
    let mut image = ImageBuffer::new(&map);

    with_progress(|progress| session.read(&mut image, progress))?;

    let code = region_of(session, RegionKind::Code)?;
    write_image_file(&image, &code, output)?;
    if let Some(path) = eeprom {
        let region = region_of(session, RegionKind::Eeprom)?;
        write_image_file(&image, &region, path)?;
    }
    print_small_regions(&image);
    Ok(())
}

/// Run the standalone verify command
///
/// Only the regions a file was given for are compared; a programmed part
/// legitimately differs from a bare code image in its config words.
pub fn run_verify(
    session: &mut Session,
    input: Option<&Path>,
    eeprom: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let map = session.target().memory_map().clone();
    let mut expected = ImageBuffer::new(&map);
    let mut checked: Vec<Region> = Vec::new();

    if let Some(path) = input {
        let region = region_of(session, RegionKind::Code)?;
        load_image_file(&mut expected, &region, path)?;
        checked.push(region);
    }
    if let Some(path) = eeprom {
        let region = region_of(session, RegionKind::Eeprom)?;
        load_image_file(&mut expected, &region, path)?;
        checked.push(region);
    }
    if checked.is_empty() {
        return Err("Nothing to verify: give --input and/or --eeprom".into());
    }

    let mut actual = ImageBuffer::new(&map);
    with_progress(|progress| session.read(&mut actual, progress))?;

    for region in &checked {
        for addr in region.range() {
            let want = expected.get(addr)?;
            let found = actual.get(addr)?;
            if want != found {
                return Err(Error::VerifyMismatch {
                    address: addr,
                    expected: want,
                    found,
                }
                .into());
            }
        }
    }
    println!("Verify passed: {} region(s) match", checked.len());
    Ok(())
}

/// Run the dump command
pub fn run_dump(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let mut sink = StdoutDump;
    with_progress(|progress| session.dump(&mut sink, progress))?;
    Ok(())
}

/// Run the blank-check command
pub fn run_blank_check(session: &mut Session) -> Result<(), Box<dyn std::error::Error>> {
    let map = session.target().memory_map().clone();
    let mut blank = ImageBuffer::new(&map);

    match with_progress(|progress| session.verify(&mut blank, progress)) {
        Ok(()) => {
            println!("Part is blank");
            Ok(())
        }
        Err(Error::VerifyMismatch { address, found, .. }) => {
            let kind = map.find(address).map(|r| r.kind.label()).unwrap_or("data");
            Err(format!(
                "Not blank: {} word at address {:#08X} reads {:#06X}",
                kind, address, found
            )
            .into())
        }
        Err(e) => Err(e.into()),
    }
}
