//! AVR serial-programming instruction templates
//!
//! Every AVR serial instruction is four bytes on the wire. Which bits carry
//! the opcode, the address, the data and the byte selector differs per part
//! and per instruction, so the device database describes each instruction as
//! a 32-character template over the alphabet `01abHoix`:
//!
//! - `0`/`1`: fixed opcode bits
//! - `a`/`b`: address bits (high and low groups; `b` takes the low bits of
//!   the address, `a` the bits above them)
//! - `H`: high/low byte selector, taken from address bit 0 before the
//!   address is shifted right once
//! - `o`/`i`: data out of / into the device
//! - `x`: don't care
//!
//! Character 0 of the template is wire bit 31, so a template reads like the
//! datasheet: `"10101100_01010011..."` encodes 0xAC53_xxxx. A template is
//! parsed once into six bitmasks; encoding an instruction for a concrete
//! address and data value is then pure mask arithmetic, and response decoding
//! is explicit mask extraction (no unions, no host byte-order dependence).

use std::fmt;

/// Instruction length in template characters and wire bits
pub const INSTRUCTION_BITS: u8 = 32;

/// Why a template failed to parse
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Template is not exactly 32 characters
    BadLength(usize),
    /// Template contains a character outside `01abHoix`
    BadChar { position: usize, ch: char },
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateError::BadLength(n) => {
                write!(f, "template is {n} characters, expected 32")
            }
            TemplateError::BadChar { position, ch } => {
                write!(f, "invalid template character {ch:?} at position {position}")
            }
        }
    }
}

impl std::error::Error for TemplateError {}

/// One parsed instruction template
///
/// A default-constructed instruction is "not valid": the part does not
/// support the capability. That is a normal state, not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Instruction {
    valid: bool,
    /// Fixed `1` bits
    ones: u32,
    /// High address bits (`a`)
    msb_addr: u32,
    /// Low address bits (`b`)
    lsb_addr: u32,
    /// High/low byte selector (`H`)
    hldb: u32,
    /// Data-out bits (`o`)
    dout: u32,
    /// Data-in bits (`i`)
    din: u32,
}

/// Scatter the low bits of `value` into the set positions of `mask`,
/// lowest mask position first
fn deposit(value: u32, mask: u32) -> u32 {
    let mut out = 0;
    let mut v = value;
    for i in 0..32 {
        if mask & (1 << i) != 0 {
            if v & 1 != 0 {
                out |= 1 << i;
            }
            v >>= 1;
        }
    }
    out
}

/// Gather the bits of `word` at the set positions of `mask` into a compact
/// value, lowest mask position first
fn extract(word: u32, mask: u32) -> u32 {
    let mut out = 0;
    let mut pos = 0;
    for i in 0..32 {
        if mask & (1 << i) != 0 {
            if word & (1 << i) != 0 {
                out |= 1 << pos;
            }
            pos += 1;
        }
    }
    out
}

impl Instruction {
    /// Parse a 32-character template
    ///
    /// An empty string yields the not-valid instruction. Anything else must
    /// be exactly 32 characters of `01abHoix`.
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if template.is_empty() {
            return Ok(Self::default());
        }
        if template.chars().count() != 32 {
            return Err(TemplateError::BadLength(template.chars().count()));
        }
        let mut inst = Instruction {
            valid: true,
            ..Self::default()
        };
        for (i, ch) in template.chars().enumerate() {
            let mask = 1u32 << (31 - i);
            match ch {
                '0' | 'x' => {}
                '1' => inst.ones |= mask,
                'a' => inst.msb_addr |= mask,
                'b' => inst.lsb_addr |= mask,
                'H' => inst.hldb |= mask,
                'o' => inst.dout |= mask,
                'i' => inst.din |= mask,
                _ => return Err(TemplateError::BadChar { position: i, ch }),
            }
        }
        Ok(inst)
    }

    /// Whether the part supports this instruction
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Number of address bits the template can carry
    pub fn addr_bits(&self) -> u32 {
        self.msb_addr.count_ones() + self.lsb_addr.count_ones() + self.hldb.count_ones()
    }

    /// Whether the template selects high/low bytes of a word address
    pub fn has_byte_select(&self) -> bool {
        self.hldb != 0
    }

    /// Build the 32-bit wire word for `addr` and input `data`
    ///
    /// With an `H` bit present, address bit 0 drives the selector and the
    /// remaining bits address the word; without one, the address is used
    /// as-is. Address and data bits beyond the template's capacity are
    /// silently dropped, matching the wire format.
    pub fn encode(&self, addr: u32, data: u32) -> u32 {
        let mut word = self.ones;
        let mut addr = addr;
        if self.hldb != 0 {
            if addr & 1 != 0 {
                word |= self.hldb;
            }
            addr >>= 1;
        }
        let low_bits = self.lsb_addr.count_ones();
        word |= deposit(addr, self.lsb_addr);
        word |= deposit(addr >> low_bits, self.msb_addr);
        word |= deposit(data, self.din);
        word
    }

    /// Extract the data-out bits from a 32-bit response
    pub fn decode(&self, response: u32) -> u32 {
        extract(response, self.dout)
    }

    #[cfg(test)]
    pub(crate) fn masks(&self) -> [u32; 6] {
        [
            self.ones,
            self.msb_addr,
            self.lsb_addr,
            self.hldb,
            self.dout,
            self.din,
        ]
    }
}
