//! Device descriptions
//!
//! Everything the engine knows about a part before talking to it: the
//! descriptor types, the serial instruction templates for AVR parts, and
//! the RON database they are loaded from.

pub mod database;
pub mod instruction;
pub mod types;

pub use database::{DeviceDatabase, DeviceDbError, Size};
pub use instruction::{Instruction, TemplateError, INSTRUCTION_BITS};
pub use types::{
    AvrDescriptor, AvrInstructionSet, AvrMemory, ConfigIssue, DeviceDescriptor, PicDescriptor,
    PicFamily, VoltageRange, FUSE_EXT, FUSE_HIGH, FUSE_LOCK, FUSE_LOW, FUSE_WORDS,
};
