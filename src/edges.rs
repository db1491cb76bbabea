use std::ops::Index;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::pulse::{assemble, EdgeMap};
use crate::register::Register;

/// Number of DAQ input channels.
pub const NUM_CHANNELS: usize = 4;

/// Size of a TMC internal clock tick in nanoseconds.
///
/// The DAQ documentation says 0.75, measurements say 1.25.
pub const TMC_TICK: f64 = 1.25;

/// The registers for one edge type (rising or falling) of all channels on a single line.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    registers: [Register; NUM_CHANNELS],
}

impl Edge {
    #[must_use]
    pub fn new(registers: [Register; NUM_CHANNELS]) -> Self {
        Edge { registers }
    }

    /// Register for channel `ch`, or `None` if `ch` is not a valid channel.
    #[must_use]
    pub fn get(&self, ch: usize) -> Option<Register> {
        self.registers.get(ch).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = Register> + '_ {
        self.registers.iter().copied()
    }
}

impl Index<usize> for Edge {
    type Output = Register;

    fn index(&self, ch: usize) -> &Self::Output {
        &self.registers[ch]
    }
}

/// Rising and falling edge times, in nanoseconds, collected per channel since the buffer was
/// last drained.
///
/// Only valid edges are kept and the arrival order is preserved.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EdgeBuffer {
    rising: [Vec<f64>; NUM_CHANNELS],
    falling: [Vec<f64>; NUM_CHANNELS],
}

impl EdgeBuffer {
    /// Add the valid edges of a line.
    ///
    /// Each edge is stored as `counter_diff + tick_count * tick`, where `counter_diff` is the
    /// time in nanoseconds to add for lines that are not the first of an event.
    pub fn push(&mut self, rising: &Edge, falling: &Edge, counter_diff: f64, tick: f64) {
        for ch in 0..NUM_CHANNELS {
            let (re, fe) = (rising[ch], falling[ch]);
            if re.is_valid() {
                self.rising[ch].push(counter_diff + re.time(tick));
            }
            if fe.is_valid() {
                self.falling[ch].push(counter_diff + fe.time(tick));
            }
        }
    }

    /// Buffered rising edges for channel `ch`.
    #[must_use]
    pub fn rising(&self, ch: usize) -> Option<&[f64]> {
        self.rising.get(ch).map(Vec::as_slice)
    }

    /// Buffered falling edges for channel `ch`.
    #[must_use]
    pub fn falling(&self, ch: usize) -> Option<&[f64]> {
        self.falling.get(ch).map(Vec::as_slice)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rising.iter().chain(self.falling.iter()).all(Vec::is_empty)
    }

    pub fn clear(&mut self) {
        self.rising.iter_mut().for_each(Vec::clear);
        self.falling.iter_mut().for_each(Vec::clear);
    }

    /// Pair up the buffered edges of every channel into pulses and clear the buffer.
    ///
    /// See [assemble] for how edges are paired.
    pub fn drain(&mut self, max_trigger_window: f64) -> EdgeMap {
        let mut pulses = EdgeMap::default();
        for ch in 0..NUM_CHANNELS {
            trace!(
                channel = ch,
                rising = self.rising[ch].len(),
                falling = self.falling[ch].len(),
                "assembling"
            );
            pulses[ch] = assemble(&self.rising[ch], &self.falling[ch], max_trigger_window);
        }
        self.clear();
        pulses
    }
}
