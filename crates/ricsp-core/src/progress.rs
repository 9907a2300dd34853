//! Progress and dump reporting
//!
//! Long-running operations report through a [`ProgressSink`] owned by the
//! caller. Sinks must return quickly and must not touch programmer state;
//! they are the only reentrant surface during an operation.

use std::fmt;

/// Which long-running operation is reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Bulk erase
    Erase,
    /// Programming an image
    Program,
    /// Reading the device out
    Read,
    /// Read-back comparison against an expected image
    Verify,
    /// Formatting a hex dump
    Dump,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Erase => "erase",
            Operation::Program => "program",
            Operation::Read => "read",
            Operation::Verify => "verify",
            Operation::Dump => "dump",
        };
        f.write_str(s)
    }
}

/// Receiver for operation progress
pub trait ProgressSink {
    /// An operation with `total` work units is starting
    fn begin(&mut self, op: Operation, total: u64);

    /// `done` of the announced units are complete; `address` is the word
    /// address most recently worked on
    fn tick(&mut self, address: u32, done: u64);

    /// The operation finished (successfully or not)
    fn finish(&mut self, op: Operation);
}

/// A no-op progress reporter
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn begin(&mut self, _op: Operation, _total: u64) {}
    fn tick(&mut self, _address: u32, _done: u64) {}
    fn finish(&mut self, _op: Operation) {}
}

/// Receiver for hex-dump output, one formatted line at a time
pub trait DumpSink {
    /// Reset the display before a new dump
    fn clear(&mut self);

    /// One formatted dump line
    fn line(&mut self, line: &str);
}

/// Counts work units for one operation and forwards them to a sink
///
/// Drivers create one meter per operation; the `(count, total)` pair lives
/// here so every family reports the same way and the sink always observes
/// `count == total` on success.
pub(crate) struct ProgressMeter<'a> {
    sink: &'a mut dyn ProgressSink,
    op: Operation,
    count: u64,
    total: u64,
}

impl<'a> ProgressMeter<'a> {
    pub(crate) fn begin(sink: &'a mut dyn ProgressSink, op: Operation, total: u64) -> Self {
        sink.begin(op, total);
        Self {
            sink,
            op,
            count: 0,
            total,
        }
    }

    /// Record one completed unit at `address`
    pub(crate) fn tick(&mut self, address: u32) {
        self.count = (self.count + 1).min(self.total);
        self.sink.tick(address, self.count);
    }

    /// Record `units` completed units at `address`
    pub(crate) fn advance(&mut self, address: u32, units: u64) {
        self.count = (self.count + units).min(self.total);
        self.sink.tick(address, self.count);
    }

    pub(crate) fn finish(self) {
        self.sink.finish(self.op);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records everything a driver reports, for assertions
    #[derive(Debug, Default)]
    pub(crate) struct RecordingSink {
        pub began: Vec<(Operation, u64)>,
        pub last_done: u64,
        pub ticks: usize,
        pub finished: Vec<Operation>,
    }

    impl ProgressSink for RecordingSink {
        fn begin(&mut self, op: Operation, total: u64) {
            self.began.push((op, total));
            self.last_done = 0;
            self.ticks = 0;
        }

        fn tick(&mut self, _address: u32, done: u64) {
            assert!(done >= self.last_done, "progress went backwards");
            self.last_done = done;
            self.ticks += 1;
        }

        fn finish(&mut self, op: Operation) {
            self.finished.push(op);
        }
    }

    impl RecordingSink {
        /// Progress ended exactly at the announced total
        pub(crate) fn completed(&self, op: Operation) -> bool {
            self.finished.contains(&op)
                && self
                    .began
                    .iter()
                    .any(|&(o, total)| o == op && total == self.last_done)
        }
    }
}
