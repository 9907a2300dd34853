//! Word-addressable image buffer with blank tracking
//!
//! An [`ImageBuffer`] holds the image to program or the image read back, one
//! `u32` slot per mapped word. A word equal to its region's erased value
//! (all significant bits set) counts as blank; the drivers use this to skip
//! locations and whole pages that would not change the chip.

use crate::error::{Error, Result};
use crate::memmap::{MemoryMap, Region, RegionKind};

/// Fixed-size word buffer covering one device memory map
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    map: MemoryMap,
    words: Vec<u32>,
}

impl ImageBuffer {
    /// Allocate a blank buffer covering `map`
    pub fn new(map: &MemoryMap) -> Self {
        let mut buf = Self {
            map: map.clone(),
            words: vec![0; map.total_words() as usize],
        };
        buf.fill_blank();
        buf
    }

    /// The map this buffer was allocated from
    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    /// Total words
    pub fn len(&self) -> u32 {
        self.words.len() as u32
    }

    /// Whether the map was empty
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn region_at(&self, addr: u32) -> Result<&Region> {
        self.map
            .find(addr)
            .ok_or(Error::AddressOutOfRange { address: addr })
    }

    /// Read the word at `addr`
    pub fn get(&self, addr: u32) -> Result<u32> {
        self.region_at(addr)?;
        Ok(self.words[addr as usize])
    }

    /// Store `word` at `addr`, masked to the region's significant bits
    pub fn set(&mut self, addr: u32, word: u32) -> Result<()> {
        let mask = self.region_at(addr)?.word_mask();
        self.words[addr as usize] = word & mask;
        Ok(())
    }

    /// Whether the word at `addr` equals its region's erased value
    pub fn is_blank(&self, addr: u32) -> Result<bool> {
        let mask = self.region_at(addr)?.word_mask();
        Ok(self.words[addr as usize] == mask)
    }

    /// Whether every word of `region` is blank
    pub fn region_blank(&self, region: &Region) -> bool {
        let mask = region.word_mask();
        region.range().all(|a| self.words[a as usize] == mask)
    }

    /// Whether every word in `range` is blank (all addresses must be mapped)
    pub fn range_blank(&self, range: std::ops::Range<u32>) -> Result<bool> {
        for addr in range {
            if !self.is_blank(addr)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Reset the whole buffer to the erased state
    pub fn fill_blank(&mut self) {
        for region in self.map.regions() {
            let mask = region.word_mask();
            for addr in region.range() {
                self.words[addr as usize] = mask;
            }
        }
    }

    /// Words of one region kind, if mapped
    pub fn region_words(&self, kind: RegionKind) -> Option<&[u32]> {
        let region = self.map.region(kind)?;
        Some(&self.words[region.start as usize..region.end() as usize])
    }

    /// Copy `words` into the start of the region of `kind`
    ///
    /// Fails if the region is missing or the data does not fit.
    pub fn load_region(&mut self, kind: RegionKind, words: &[u32]) -> Result<()> {
        let region = *self.map.region(kind).ok_or_else(|| {
            Error::config(kind.label(), "device has no such memory region")
        })?;
        if words.len() as u32 > region.len {
            return Err(Error::config(
                kind.label(),
                format!(
                    "image of {} words does not fit in {} region words",
                    words.len(),
                    region.len
                ),
            ));
        }
        for (i, &w) in words.iter().enumerate() {
            self.words[region.start as usize + i] = w & region.word_mask();
        }
        Ok(())
    }
}
