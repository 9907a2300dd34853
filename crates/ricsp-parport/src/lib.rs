//! ricsp-parport - PC parallel port ICSP bit-banging
//!
//! This crate drives the in-circuit serial programming signals of a PIC or
//! AVR programmer adapter hanging off a PC parallel port, implementing the
//! [`IcspIo`](ricsp_core::io::IcspIo) contract on top of raw port register
//! access.
//!
//! # Overview
//!
//! Parallel-port programmers are passive adapters: a handful of transistors
//! route the port's TTL pins to the target's clock, data, Vdd and Vpp lines.
//! Which DB-25 pin carries which signal differs per adapter, so the wiring is
//! given as programmer options and validated against the port's pin
//! capability table at open time. Signals an adapter inverts in hardware are
//! marked with a `!` prefix on the pin number.
//!
//! # Example
//!
//! ```no_run
//! use ricsp_parport::{parse_options, ParportIcsp};
//! use ricsp_core::io::{IcspIo, VddState};
//!
//! // Classic Tait-style wiring on the first ppdev port
//! let config = parse_options(&[
//!     ("dev", "/dev/parport0"),
//!     ("clock", "3"),
//!     ("datao", "2"),
//!     ("datai", "10"),
//!     ("vppon", "5"),
//!     ("vddon", "4"),
//! ])?;
//! let mut io = ParportIcsp::open(&config)?;
//!
//! io.set_vdd(VddState::On);
//! io.set_clock(true);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Usage with ricsp CLI
//!
//! ```bash
//! # Probe a PIC16F84A on a Tait-style adapter
//! ricsp probe -p parport:dev=/dev/parport0,clock=3,datao=2,datai=10,vppon=5,vddon=4 -d pic16f84a
//!
//! # Legacy raw port I/O instead of ppdev (needs /dev/port access)
//! ricsp probe -p parport:io=0x378,clock=3,datao=2,datai=10,vppon=5,vddon=4 -d pic16f84a
//!
//! # An adapter with an inverting Vpp driver and slow cabling
//! ricsp read -p 'parport:dev=/dev/parport0,clock=3,datao=2,datai=10,vppon=!5,vddon=4,delay=5' -d pic16f628 -o dump.bin
//! ```
//!
//! # System Requirements
//!
//! - Linux with the `ppdev` module loaded (`CONFIG_PPDEV`) for
//!   `/dev/parportN`, or root access to `/dev/port` for the `io=` backend
//! - Read/write access to the device node; udev rules or membership in the
//!   `lp` group usually cover ppdev
//!
//! # Known Working Adapters
//!
//! - Tait classic and derivatives
//! - Velleman K8048/P8048 (PIC)
//! - sp12-style and DAPA dongles (AVR)

pub mod device;
pub mod error;
pub mod pins;

mod port;

// Re-exports
pub use device::{parse_options, DelayOptions, EdgeOverrides, ParportConfig, ParportIcsp, PinAssignments};
pub use error::{ParportError, Result};
pub use pins::PinSpec;

/// Open a parallel-port adapter and return a boxed IcspIo
///
/// This is a convenience function for use in the CLI programmer dispatch.
///
/// # Arguments
///
/// * `options` - Slice of (key, value) pairs from programmer string parsing
///
/// # Example Options
///
/// - `dev=/dev/parport0` - ppdev device path (this or `io` is required)
/// - `clock=3,datao=2,datai=10,vppon=5,vddon=4` - required signal wiring
/// - `delay=5` - base settle delay in µs
pub fn open_parport(
    options: &[(&str, &str)],
) -> std::result::Result<Box<dyn ricsp_core::io::IcspIo>, Box<dyn std::error::Error>> {
    let config = parse_options(options)?;
    let io = ParportIcsp::open(&config)?;
    Ok(Box::new(io))
}
