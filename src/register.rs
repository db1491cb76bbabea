//! Edge-detector register decoding.
//!
//! Each channel reports its rising and falling edges as an 8 bit register written as two hex
//! digits in the DAQ line. Only the lower 5 bits carry the time of the edge, as a count of TMC
//! ticks since the start of the clock cycle.
use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Mask for the sub-tick phase count.
pub const TICK_MASK: u8 = 0b1_1111;
/// Set when the register holds a valid edge.
pub const VALID_BIT: u8 = 1 << 5;
/// Set when a trigger is pending, i.e., the line starts a new event.
pub const TRIGGER_BIT: u8 = 1 << 7;

/// A raw edge register value.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(pub u8);

/// The fields of a [Register].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    /// Phase count in ticks, 0 to 31.
    pub tick_count: u8,
    pub valid: bool,
    pub trigger: bool,
}

impl Register {
    #[must_use]
    pub fn decode(self) -> Decoded {
        Decoded {
            tick_count: self.tick_count(),
            valid: self.is_valid(),
            trigger: self.is_trigger(),
        }
    }

    /// Construct a register from its fields. `tick_count` values above 31 are masked.
    #[must_use]
    pub fn encode(tick_count: u8, valid: bool, trigger: bool) -> Self {
        let mut v = tick_count & TICK_MASK;
        if valid {
            v |= VALID_BIT;
        }
        if trigger {
            v |= TRIGGER_BIT;
        }
        Register(v)
    }

    #[must_use]
    pub fn tick_count(self) -> u8 {
        self.0 & TICK_MASK
    }

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.0 & VALID_BIT != 0
    }

    #[must_use]
    pub fn is_trigger(self) -> bool {
        self.0 & TRIGGER_BIT != 0
    }

    /// Time of the edge in nanoseconds for a tick of `tick` nanoseconds.
    #[must_use]
    pub fn time(self, tick: f64) -> f64 {
        f64::from(self.tick_count()) * tick
    }

    /// Parse a register from its hex text form as found in a DAQ line, e.g., `"a5"`.
    ///
    /// # Errors
    /// [Error::MalformedField] if `s` is not 1 or 2 hex digits. The field index reported
    /// is 0; use [Register::parse_field] to report the position within a line.
    pub fn from_hex(s: &str) -> Result<Self> {
        Self::parse_field(0, s)
    }

    pub(crate) fn parse_field(index: usize, s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > 2 {
            return Err(Error::malformed(index, s, "register must be 1 or 2 hex digits"));
        }
        // from_str_radix accepts a leading '+', which is not hex
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::malformed(index, s, "register is not hex"));
        }
        u8::from_str_radix(s, 16)
            .map(Register)
            .map_err(|_| Error::malformed(index, s, "register is not hex"))
    }
}

impl FromStr for Register {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl From<u8> for Register {
    fn from(value: u8) -> Self {
        Register(value)
    }
}

impl Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02X}", self.0)
    }
}
