//! ricsp-dummy - simulated PIC and AVR parts for testing without hardware
//!
//! Each simulator implements [`IcspIo`](ricsp_core::io::IcspIo) at the wire
//! level: it watches clock edges, decodes the serial protocol of its family
//! and applies the result to in-memory copies of the part's memories. The
//! protocol drivers in `ricsp-core` run against a simulator exactly as they
//! would against a parallel-port adapter, which makes full program/erase/read
//! cycles testable on any machine.
//!
//! - [`DummyPic16`] speaks the 6-bit command protocol of the 14-bit cores,
//!   including the unlock-sequence bulk erase and code protection
//! - [`DummyPic18`] decodes 4-bit commands and interprets the core
//!   instructions the driver shifts in to steer the table pointer and EECON
//! - [`DummyAvr`] answers the four-byte SPI frames of serial downloading,
//!   with paged flash, polled write cycles and sync-loss simulation
//!
//! Memories start blank and can be seeded or inspected through accessors:
//!
//! ```no_run
//! use ricsp_core::progress::NoProgress;
//! use ricsp_core::target::{Pic16Target, Target};
//! # fn descriptor() -> ricsp_core::device::PicDescriptor { unimplemented!() }
//!
//! let desc = descriptor();
//! let mut sim = ricsp_dummy::DummyPic16::new(&desc);
//! {
//!     let mut target = Pic16Target::new(desc.clone(), &mut sim);
//!     target.enter_program_mode()?;
//!     target.erase(&mut NoProgress)?;
//!     target.exit_program_mode()?;
//! }
//! assert!(sim.code().iter().all(|&w| w == 0x3FFF));
//! # Ok::<(), ricsp_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod avr;
pub mod pic16;
pub mod pic18;

pub use avr::DummyAvr;
pub use pic16::DummyPic16;
pub use pic18::DummyPic18;
