//! DB-25 pin capability table and signal-to-pin assignment
//!
//! A PC parallel port presents three byte-wide registers at consecutive
//! addresses. Seventeen of the DB-25 pins are wired to register bits, the
//! remaining eight are ground:
//!
//! | Pins  | Register | Bits | Direction | Hardware-inverted |
//! |-------|----------|------|-----------|-------------------|
//! | 2-9   | data     | 0-7  | out       | none              |
//! | 15,13,12,10,11 | status | 3,4,5,6,7 | in | pin 11       |
//! | 1,14,16,17 | control | 0,1,2,3 | out | pins 1, 14, 17   |
//! | 18-25 | -        | -    | ground    | -                 |
//!
//! Programmer adapters wire the ICSP signals to whichever pins suit their
//! circuit, so the mapping comes from configuration as `signal=N` or
//! `signal=!N` options, `!` adding a software inversion for adapters that
//! drive a signal through an inverting transistor stage. Both inversions are
//! folded into one flag at assignment time; the rest of the crate only sees
//! the collapsed [`SignalPin`].

use bitflags::bitflags;

use crate::error::ParportError;

/// The three port registers, in address order
///
/// The discriminants are the register offsets from the I/O base, which the
/// `/dev/port` backend adds directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Output latch at base + 0
    Data = 0,
    /// Input lines at base + 1, read-only
    Status = 1,
    /// Output lines at base + 2, open-collector on original hardware
    Control = 2,
}

bitflags! {
    /// Directions a physical pin supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PinCaps: u8 {
        /// Pin can be driven by the host
        const OUT = 1 << 0;
        /// Pin can be read by the host
        const IN = 1 << 1;
    }
}

/// Physical properties of one DB-25 pin
#[derive(Debug, Clone, Copy)]
struct PinDesc {
    register: Register,
    bit: u8,
    inverted: bool,
    caps: PinCaps,
}

const fn data_pin(bit: u8) -> Option<PinDesc> {
    Some(PinDesc {
        register: Register::Data,
        bit,
        inverted: false,
        caps: PinCaps::OUT,
    })
}

const fn status_pin(bit: u8, inverted: bool) -> Option<PinDesc> {
    Some(PinDesc {
        register: Register::Status,
        bit,
        inverted,
        caps: PinCaps::IN,
    })
}

const fn control_pin(bit: u8, inverted: bool) -> Option<PinDesc> {
    Some(PinDesc {
        register: Register::Control,
        bit,
        inverted,
        caps: PinCaps::OUT,
    })
}

/// Capability table indexed by pin number; entry 0 and the ground pins
/// (18-25) are `None`.
const PIN_TABLE: [Option<PinDesc>; 18] = [
    None,                     // no pin 0
    control_pin(0, true),     // 1: nStrobe
    data_pin(0),              // 2
    data_pin(1),              // 3
    data_pin(2),              // 4
    data_pin(3),              // 5
    data_pin(4),              // 6
    data_pin(5),              // 7
    data_pin(6),              // 8
    data_pin(7),              // 9
    status_pin(6, false),     // 10: Ack
    status_pin(7, true),      // 11: Busy
    status_pin(5, false),     // 12: PaperOut
    status_pin(4, false),     // 13: Select
    control_pin(1, true),     // 14: nAutoLF
    status_pin(3, false),     // 15: nError
    control_pin(2, false),    // 16: nInit
    control_pin(3, true),     // 17: nSelectIn
];

/// A pin requested by configuration: number plus the optional `!` software
/// inversion, not yet checked against the capability table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinSpec {
    /// DB-25 pin number
    pub pin: u8,
    /// Adapter inverts this signal in hardware
    pub invert: bool,
}

impl PinSpec {
    /// Parse a pin option value, `N` or `!N`
    pub fn parse(spec: &str) -> std::result::Result<Self, String> {
        let (invert, digits) = match spec.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let pin = digits
            .parse()
            .map_err(|_| format!("Invalid pin spec: {spec}"))?;
        Ok(Self { pin, invert })
    }
}

impl std::fmt::Display for PinSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.invert {
            write!(f, "!{}", self.pin)
        } else {
            write!(f, "{}", self.pin)
        }
    }
}

/// A signal resolved to its register bit
///
/// `invert` is the hardware register inversion XOR-folded with the `!`
/// option, so writers and readers apply exactly one flip.
#[derive(Debug, Clone, Copy)]
pub struct SignalPin {
    /// Register the pin lives in
    pub register: Register,
    /// Bit position within the register
    pub bit: u8,
    /// Flip the bit between logical and wire level
    pub invert: bool,
}

/// Resolve `spec` for `signal`, checking that the pin exists and supports
/// the requested direction.
pub fn assign(
    signal: &'static str,
    spec: PinSpec,
    direction: PinCaps,
) -> std::result::Result<SignalPin, ParportError> {
    let desc = match PIN_TABLE.get(spec.pin as usize).copied().flatten() {
        Some(desc) => desc,
        None if (18..=25).contains(&spec.pin) => {
            return Err(ParportError::BadPin {
                signal,
                pin: spec.pin,
                reason: "pins 18-25 are ground",
            });
        }
        None => {
            return Err(ParportError::BadPin {
                signal,
                pin: spec.pin,
                reason: "no such pin on a DB-25 connector",
            });
        }
    };
    if !desc.caps.contains(direction) {
        let reason = if direction.contains(PinCaps::IN) {
            "pin is not readable"
        } else {
            "pin is not writable"
        };
        return Err(ParportError::BadPin {
            signal,
            pin: spec.pin,
            reason,
        });
    }
    Ok(SignalPin {
        register: desc.register,
        bit: desc.bit,
        invert: desc.inverted != spec.invert,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(n: u8) -> PinSpec {
        PinSpec {
            pin: n,
            invert: false,
        }
    }

    #[test]
    fn data_pins_map_to_data_bits() {
        for n in 2..=9u8 {
            let sig = assign("clock", pin(n), PinCaps::OUT).unwrap();
            assert_eq!(sig.register, Register::Data);
            assert_eq!(sig.bit, n - 2);
            assert!(!sig.invert);
        }
    }

    #[test]
    fn status_pins_are_input_only() {
        for (n, bit) in [(10u8, 6u8), (11, 7), (12, 5), (13, 4), (15, 3)] {
            let sig = assign("datai", pin(n), PinCaps::IN).unwrap();
            assert_eq!(sig.register, Register::Status);
            assert_eq!(sig.bit, bit);

            let err = assign("clock", pin(n), PinCaps::OUT).unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains("clock"), "{msg}");
            assert!(msg.contains("not writable"), "{msg}");
        }
    }

    #[test]
    fn control_pins_carry_hardware_inversion() {
        for (n, bit, inverted) in [(1u8, 0u8, true), (14, 1, true), (16, 2, false), (17, 3, true)]
        {
            let sig = assign("vppon", pin(n), PinCaps::OUT).unwrap();
            assert_eq!(sig.register, Register::Control);
            assert_eq!(sig.bit, bit);
            assert_eq!(sig.invert, inverted, "pin {n}");
        }
    }

    #[test]
    fn output_pins_reject_input_assignment() {
        let err = assign("datai", pin(2), PinCaps::IN).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("datai"), "{msg}");
        assert!(msg.contains("pin 2"), "{msg}");
        assert!(msg.contains("not readable"), "{msg}");
    }

    #[test]
    fn ground_and_out_of_range_pins_are_rejected() {
        for n in 18..=25u8 {
            let msg = assign("vddon", pin(n), PinCaps::OUT)
                .unwrap_err()
                .to_string();
            assert!(msg.contains("ground"), "{msg}");
        }
        for n in [0u8, 26, 255] {
            let msg = assign("vddon", pin(n), PinCaps::OUT)
                .unwrap_err()
                .to_string();
            assert!(msg.contains("no such pin"), "{msg}");
        }
    }

    #[test]
    fn pin_spec_parses_soft_inversion() {
        assert_eq!(
            PinSpec::parse("3").unwrap(),
            PinSpec {
                pin: 3,
                invert: false
            }
        );
        assert_eq!(
            PinSpec::parse("!10").unwrap(),
            PinSpec {
                pin: 10,
                invert: true
            }
        );
        for bad in ["", "!", "x", "!x", "-1"] {
            assert!(PinSpec::parse(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn soft_inversion_folds_with_hardware_inversion() {
        // Pin 11 is hardware-inverted; a '!' on top cancels it out.
        let spec = PinSpec {
            pin: 11,
            invert: true,
        };
        let sig = assign("datai", spec, PinCaps::IN).unwrap();
        assert!(!sig.invert);

        let plain = assign("datai", pin(11), PinCaps::IN).unwrap();
        assert!(plain.invert);
    }
}
