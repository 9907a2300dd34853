//! ricsp-core - core engine for serial device programming
//!
//! This crate provides the programmer-independent machinery for reading and
//! writing PIC and AVR microcontrollers over their in-circuit serial
//! programming interfaces:
//!
//! - Device descriptors and the RON database they load from
//! - The [`IcspIo`](io::IcspIo) trait a programmer backend implements, plus
//!   the bit-shifting primitives built on it
//! - Memory maps and image buffers covering code, data and configuration
//! - Protocol drivers for the supported PIC16, PIC18 and AVR families behind
//!   the common [`Target`](target::Target) trait
//! - [`Session`](target::Session) handling, which keeps the part powered only
//!   for the duration of an operation

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod buffer;
pub mod device;
pub mod error;
pub mod io;
pub mod memmap;
pub mod progress;
pub mod target;

pub use buffer::ImageBuffer;
pub use device::{DeviceDatabase, DeviceDescriptor};
pub use error::{Error, Result};
pub use io::{IcspIo, VddState, VppState};
pub use memmap::{MemoryMap, Region, RegionKind};
pub use progress::{DumpSink, NoProgress, Operation, ProgressSink};
pub use target::{open_target, ProbeInfo, Session, Target};
