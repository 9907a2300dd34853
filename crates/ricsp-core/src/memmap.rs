//! Device memory maps
//!
//! A memory map is the ordered list of word-address extents a target exposes
//! through its image buffer. Extents are packed: each region starts exactly
//! where the previous one ends, so a single flat buffer covers the whole map
//! and the protocol drivers translate extent offsets to chip addresses.

use std::fmt;

/// What a mapped region holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Program (code/flash) memory
    Code,
    /// ID locations
    Id,
    /// Configuration words
    Config,
    /// EEPROM data memory
    Eeprom,
    /// Device signature bytes (read-only)
    Signature,
    /// Fuse and lock bytes
    Fuses,
    /// Oscillator calibration bytes (read-only)
    Calibration,
}

impl RegionKind {
    /// Lower-case name used in the CLI and dumps
    pub fn label(self) -> &'static str {
        match self {
            RegionKind::Code => "code",
            RegionKind::Id => "id",
            RegionKind::Config => "config",
            RegionKind::Eeprom => "eeprom",
            RegionKind::Signature => "signature",
            RegionKind::Fuses => "fuses",
            RegionKind::Calibration => "calibration",
        }
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One extent of the map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Region contents
    pub kind: RegionKind,
    /// First word address (buffer coordinates)
    pub start: u32,
    /// Length in words
    pub len: u32,
    /// Significant bits per word (8, 14 or 16)
    pub word_bits: u8,
}

impl Region {
    /// One-past-the-end address
    pub fn end(&self) -> u32 {
        self.start + self.len
    }

    /// Whether `addr` falls inside this region
    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.start && addr < self.end()
    }

    /// Address range of the region
    pub fn range(&self) -> std::ops::Range<u32> {
        self.start..self.end()
    }

    /// Mask of significant word bits; doubles as the blank sentinel
    pub fn word_mask(&self) -> u32 {
        (1u32 << self.word_bits) - 1
    }
}

/// Ordered, packed list of regions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryMap {
    regions: Vec<Region>,
}

impl MemoryMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Append a region after the last one
    ///
    /// Zero-length regions are dropped, so optional memories (no EEPROM, no
    /// calibration bytes) simply never appear in the map.
    pub fn push(&mut self, kind: RegionKind, len: u32, word_bits: u8) {
        if len == 0 {
            return;
        }
        let start = self.total_words();
        self.regions.push(Region {
            kind,
            start,
            len,
            word_bits,
        });
    }

    /// All regions in map order
    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Total mapped words
    pub fn total_words(&self) -> u32 {
        self.regions.last().map_or(0, Region::end)
    }

    /// Look a region up by kind
    pub fn region(&self, kind: RegionKind) -> Option<&Region> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    /// Find the region containing `addr`
    pub fn find(&self, addr: u32) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// Whether `addr` is mapped at all
    pub fn contains(&self, addr: u32) -> bool {
        self.find(addr).is_some()
    }
}
