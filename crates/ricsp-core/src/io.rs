//! Bit-level ICSP I/O primitives
//!
//! This module defines the [`IcspIo`] trait, the minimal single-bit-wide
//! serial channel every programmer backend implements: a clock line, a data
//! output, a data input, and the Vpp/Vdd rail switches. On top of it live the
//! shift helpers that all protocol drivers share.
//!
//! Implementations own the per-signal propagation delays: the configured
//! write delay is applied after every `set_*`, the read delay before every
//! `data()`. The shift helpers only add the protocol-level setup/hold times
//! they are given.

/// Programming-voltage rail states
///
/// `Vdd` parks the MCLR/reset pin at supply level rather than the high
/// programming voltage; AVR targets use the Vpp line as their reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VppState {
    /// Drive the high programming voltage onto the target
    Vih,
    /// Hold the pin at ground (PIC off state, AVR reset asserted)
    Gnd,
    /// Release the pin to supply level (AVR reset inactive)
    Vdd,
}

/// Supply-rail states
///
/// `Min`/`Prog`/`Max` select the three verification voltages on hardware
/// with a multi-level Vdd generator; backends without one treat them as `On`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VddState {
    /// Supply off
    Off,
    /// Supply on at the nominal level
    On,
    /// Minimum verification voltage
    Min,
    /// Programming voltage
    Prog,
    /// Maximum verification voltage
    Max,
}

/// Trait for low-level ICSP bit-banging
///
/// The contract is strictly sequential: every call completes the signal
/// transition, including its configured settle delay, before returning.
/// Constructing an implementation claims the underlying hardware; a failed
/// claim is fatal to the session and reported by the backend's constructor,
/// never by these methods.
pub trait IcspIo {
    /// Set the programming clock line
    fn set_clock(&mut self, high: bool);

    /// Set the data output line
    fn set_data(&mut self, high: bool);

    /// Sample the data input line
    fn data(&self) -> bool;

    /// Switch the Vpp rail
    fn set_vpp(&mut self, state: VppState);

    /// Switch the Vdd rail
    fn set_vdd(&mut self, state: VddState);

    /// Delay for at least `us` microseconds
    ///
    /// Delays under roughly 10 ms must busy-wait; scheduler jitter at that
    /// scale corrupts the serial bit timing. Longer delays may sleep.
    fn delay_us(&self, us: u32);
}

impl<M: IcspIo + ?Sized> IcspIo for &mut M {
    fn set_clock(&mut self, high: bool) {
        (**self).set_clock(high)
    }
    fn set_data(&mut self, high: bool) {
        (**self).set_data(high)
    }
    fn data(&self) -> bool {
        (**self).data()
    }
    fn set_vpp(&mut self, state: VppState) {
        (**self).set_vpp(state)
    }
    fn set_vdd(&mut self, state: VddState) {
        (**self).set_vdd(state)
    }
    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }
}

impl<M: IcspIo + ?Sized> IcspIo for Box<M> {
    fn set_clock(&mut self, high: bool) {
        (**self).set_clock(high)
    }
    fn set_data(&mut self, high: bool) {
        (**self).set_data(high)
    }
    fn data(&self) -> bool {
        (**self).data()
    }
    fn set_vpp(&mut self, state: VppState) {
        (**self).set_vpp(state)
    }
    fn set_vdd(&mut self, state: VddState) {
        (**self).set_vdd(state)
    }
    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }
}

fn shift_out_raw<M: IcspIo + ?Sized>(
    io: &mut M,
    bits: u32,
    nbits: u8,
    tset_us: u32,
    thold_us: u32,
    hold_last: bool,
) {
    debug_assert!(nbits >= 1 && nbits <= 32);
    for i in 0..nbits {
        io.set_clock(true);
        io.set_data((bits >> i) & 1 != 0);
        io.delay_us(tset_us);
        if hold_last && i == nbits - 1 {
            // Caller owns the clock now: delay, drop it, continue.
            return;
        }
        io.set_clock(false);
        io.delay_us(thold_us);
    }
}

/// Clock out `nbits` of `bits`, LSB first (PIC style)
///
/// Per bit: raise clock, present the data bit, wait `tset_us`, drop clock,
/// wait `thold_us`. The target latches on the falling edge.
pub fn shift_bits_out<M: IcspIo + ?Sized>(
    io: &mut M,
    bits: u32,
    nbits: u8,
    tset_us: u32,
    thold_us: u32,
) {
    shift_out_raw(io, bits, nbits, tset_us, thold_us, false);
}

/// Clock out `nbits` LSB first, leaving the clock high after the final bit
///
/// Used where a protocol stretches the last clock of a command into a timed
/// pulse (the PIC18 programming pulse holds the fourth command clock high for
/// the whole programming time). The caller performs the hold delay, drops the
/// clock itself, and resumes shifting.
pub fn shift_bits_out_hold<M: IcspIo + ?Sized>(
    io: &mut M,
    bits: u32,
    nbits: u8,
    tset_us: u32,
    thold_us: u32,
) {
    shift_out_raw(io, bits, nbits, tset_us, thold_us, true);
}

/// Clock in `nbits`, LSB first (PIC style)
///
/// Per bit: raise clock, wait `tdly_us`, sample the data input, drop clock,
/// wait `tlow_us`. The target drives its output while the clock is high.
pub fn shift_bits_in<M: IcspIo + ?Sized>(
    io: &mut M,
    nbits: u8,
    tdly_us: u32,
    tlow_us: u32,
) -> u32 {
    debug_assert!(nbits >= 1 && nbits <= 32);
    let mut bits = 0u32;
    for i in 0..nbits {
        io.set_clock(true);
        io.delay_us(tdly_us);
        if io.data() {
            bits |= 1 << i;
        }
        io.set_clock(false);
        io.delay_us(tlow_us);
    }
    bits
}

/// Full-duplex shift, MSB first (AVR style)
///
/// Per bit: present the output bit, wait `tset_us`, raise clock, sample the
/// input, wait `thold_us`, drop clock. The AVR serial protocol transmits the
/// command and address while the previous response comes back byte-shifted,
/// so output and input share every clock cycle.
pub fn shift_bits_out_in<M: IcspIo + ?Sized>(
    io: &mut M,
    bits: u32,
    nbits: u8,
    tset_us: u32,
    thold_us: u32,
) -> u32 {
    debug_assert!(nbits >= 1 && nbits <= 32);
    let mut response = 0u32;
    for i in (0..nbits).rev() {
        io.set_data((bits >> i) & 1 != 0);
        io.delay_us(tset_us);
        io.set_clock(true);
        response <<= 1;
        if io.data() {
            response |= 1;
        }
        io.delay_us(thold_us);
        io.set_clock(false);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Echoes everything latched on a falling clock edge back out, in order,
    /// one bit per rising edge.
    #[derive(Default)]
    struct LoopbackIo {
        clock: bool,
        out: bool,
        queue: RefCell<VecDeque<bool>>,
        current_in: RefCell<bool>,
    }

    impl IcspIo for LoopbackIo {
        fn set_clock(&mut self, high: bool) {
            if self.clock && !high {
                self.queue.borrow_mut().push_back(self.out);
            }
            if !self.clock && high {
                if let Some(bit) = self.queue.borrow_mut().pop_front() {
                    *self.current_in.borrow_mut() = bit;
                }
            }
            self.clock = high;
        }

        fn set_data(&mut self, high: bool) {
            self.out = high;
        }

        fn data(&self) -> bool {
            *self.current_in.borrow()
        }

        fn set_vpp(&mut self, _state: VppState) {}
        fn set_vdd(&mut self, _state: VddState) {}
        fn delay_us(&self, _us: u32) {}
    }

    /// Immediate echo: input mirrors the data line within the same cycle.
    #[derive(Default)]
    struct MirrorIo {
        clock: bool,
        out: bool,
    }

    impl IcspIo for MirrorIo {
        fn set_clock(&mut self, high: bool) {
            self.clock = high;
        }
        fn set_data(&mut self, high: bool) {
            self.out = high;
        }
        fn data(&self) -> bool {
            self.out
        }
        fn set_vpp(&mut self, _state: VppState) {}
        fn set_vdd(&mut self, _state: VddState) {}
        fn delay_us(&self, _us: u32) {}
    }

    #[test]
    fn shift_out_then_in_round_trips_lsb_first() {
        let patterns = [
            (0x00000001u32, 1u8),
            (0x2Au32, 6),
            (0x1234u32, 16),
            (0x0003_FFFEu32, 18),
            (0xDEAD_BEEFu32, 32),
        ];
        for (bits, nbits) in patterns {
            let mut io = LoopbackIo::default();
            shift_bits_out(&mut io, bits, nbits, 1, 1);
            let read = shift_bits_in(&mut io, nbits, 1, 1);
            let mask = if nbits == 32 {
                u32::MAX
            } else {
                (1 << nbits) - 1
            };
            assert_eq!(read, bits & mask, "pattern {bits:#X}/{nbits}");
        }
    }

    #[test]
    fn shift_out_presents_lsb_on_first_falling_edge() {
        let mut io = LoopbackIo::default();
        shift_bits_out(&mut io, 0b01, 2, 1, 1);
        let latched: Vec<bool> = io.queue.borrow().iter().copied().collect();
        assert_eq!(latched, vec![true, false]);
    }

    #[test]
    fn shift_out_hold_leaves_clock_high() {
        let mut io = LoopbackIo::default();
        shift_bits_out_hold(&mut io, 0x0, 4, 1, 1);
        assert!(io.clock);
        // Only three falling edges happened.
        assert_eq!(io.queue.borrow().len(), 3);
        io.set_clock(false);
        assert_eq!(io.queue.borrow().len(), 4);
    }

    #[test]
    fn full_duplex_round_trips_msb_first() {
        for (bits, nbits) in [(0xAC53_0000u32, 32u8), (0x53u32, 8), (0b101u32, 3)] {
            let mut io = MirrorIo::default();
            let response = shift_bits_out_in(&mut io, bits, nbits, 1, 1);
            assert_eq!(response, bits, "pattern {bits:#X}/{nbits}");
        }
    }

    #[test]
    fn trait_object_in_box_still_shifts() {
        let mut io: Box<dyn IcspIo> = Box::<MirrorIo>::default();
        let response = shift_bits_out_in(&mut io, 0x5A, 8, 1, 1);
        assert_eq!(response, 0x5A);
    }
}
