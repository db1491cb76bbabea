//! DAQ line schema.
//!
//! A DAQ data line is made of at least [NUM_FIELDS] whitespace delimited fields:
//!
//! |index|content|format|
//! |---|---|---|
//! |0|trigger counter|hex, up to 8 digits|
//! |1-8|RE0 FE0 RE1 FE1 RE2 FE2 RE3 FE3 edge registers|hex, 1 or 2 digits|
//! |9|1PPS counter|hex, up to 8 digits|
//! |10|GPS time of day|`HHMMSS.mmm`|
//! |11|GPS date|`DDMMYY`|
//! |12|GPS validity|`A` valid, `V` invalid|
//! |13|number of satellites|decimal|
//! |14|DAQ status|hex|
//! |15|1PPS correction in milliseconds|signed decimal, e.g., `+0059`|
//!
//! Fields after index 15 are ignored.
//!
//! # Example
//! ```
//! use daqpulse::line::DaqLine;
//!
//! let line = DaqLine::parse("80EE0049 80 01 00 01 38 01 00 01 BC9C73A4 034417.015 211115 A 09 0 +0059").unwrap();
//! assert_eq!(line.trigger_count, 0x80EE0049);
//! assert_eq!(line.correction, 59);
//! assert!(line.rising[0].is_trigger());
//! ```
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::edges::Edge;
use crate::register::Register;
use crate::{Error, Result};

/// Minimum number of fields in a DAQ line.
pub const NUM_FIELDS: usize = 16;

pub const TRIGGER_COUNT_FIELD: usize = 0;
/// Fields holding the rising edge registers for channels 0 to 3.
pub const RISING_FIELDS: [usize; 4] = [1, 3, 5, 7];
/// Fields holding the falling edge registers for channels 0 to 3.
pub const FALLING_FIELDS: [usize; 4] = [2, 4, 6, 8];
pub const ONE_PPS_FIELD: usize = 9;
pub const TIME_FIELD: usize = 10;
pub const DATE_FIELD: usize = 11;
pub const GPS_VALID_FIELD: usize = 12;
pub const SATELLITES_FIELD: usize = 13;
pub const STATUS_FIELD: usize = 14;
pub const CORRECTION_FIELD: usize = 15;

/// DAQ status flags.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DaqStatus(pub u8);

impl DaqStatus {
    pub const ONE_PPS_PENDING: u8 = 1;
    pub const TRIGGER_PENDING: u8 = 1 << 1;
    pub const GPS_CORRUPTED: u8 = 1 << 2;
    pub const ONE_PPS_RATE_OUT_OF_RANGE: u8 = 1 << 3;

    /// 1PPS interrupt pending
    #[must_use]
    pub fn one_pps_pending(self) -> bool {
        self.0 & Self::ONE_PPS_PENDING != 0
    }

    /// Trigger interrupt pending
    #[must_use]
    pub fn trigger_pending(self) -> bool {
        self.0 & Self::TRIGGER_PENDING != 0
    }

    /// GPS data possibly corrupted
    #[must_use]
    pub fn gps_corrupted(self) -> bool {
        self.0 & Self::GPS_CORRUPTED != 0
    }

    /// Current or last 1PPS rate not within range
    #[must_use]
    pub fn one_pps_rate_out_of_range(self) -> bool {
        self.0 & Self::ONE_PPS_RATE_OUT_OF_RANGE != 0
    }
}

/// A single decoded DAQ line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DaqLine {
    /// Hardware clock counter latched at the trigger.
    pub trigger_count: u32,
    pub rising: Edge,
    pub falling: Edge,
    /// Hardware clock counter latched at the last 1PPS.
    pub one_pps: u32,
    /// GPS time of day (UTC) of the last 1PPS.
    pub time: NaiveTime,
    pub date: String,
    pub gps_valid: bool,
    pub satellites: String,
    pub status: DaqStatus,
    /// Delay of the 1PPS relative to the GPS time in milliseconds.
    pub correction: i32,
}

impl DaqLine {
    /// Parse all fields of `line`.
    ///
    /// # Errors
    /// [Error::FieldCount] if there are fewer than [NUM_FIELDS] fields, [Error::MalformedField]
    /// if any field fails to parse.
    pub fn parse(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < NUM_FIELDS {
            return Err(Error::FieldCount {
                actual: fields.len(),
                minimum: NUM_FIELDS,
            });
        }

        let registers = |idxs: [usize; 4]| -> Result<Edge> {
            let mut regs = [Register::default(); 4];
            for (reg, idx) in regs.iter_mut().zip(idxs) {
                *reg = Register::parse_field(idx, fields[idx])?;
            }
            Ok(Edge::new(regs))
        };

        Ok(DaqLine {
            trigger_count: parse_counter(TRIGGER_COUNT_FIELD, fields[TRIGGER_COUNT_FIELD])?,
            rising: registers(RISING_FIELDS)?,
            falling: registers(FALLING_FIELDS)?,
            one_pps: parse_counter(ONE_PPS_FIELD, fields[ONE_PPS_FIELD])?,
            time: parse_time_of_day(TIME_FIELD, fields[TIME_FIELD])?,
            date: fields[DATE_FIELD].to_string(),
            gps_valid: fields[GPS_VALID_FIELD] == "A",
            satellites: fields[SATELLITES_FIELD].to_string(),
            status: parse_status(STATUS_FIELD, fields[STATUS_FIELD])?,
            correction: parse_correction(CORRECTION_FIELD, fields[CORRECTION_FIELD])?,
        })
    }

    /// Seconds since the start of the UTC day, including the 1PPS correction.
    #[must_use]
    pub fn gps_seconds(&self) -> f64 {
        seconds_of_day(self.time) + f64::from(self.correction) / 1000.0
    }
}

/// Seconds since midnight for `time`, including sub-second precision.
#[must_use]
pub fn seconds_of_day(time: NaiveTime) -> f64 {
    f64::from(time.num_seconds_from_midnight()) + f64::from(time.nanosecond()) / 1e9
}

fn is_hex(s: &str, max_digits: usize) -> bool {
    !s.is_empty() && s.len() <= max_digits && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn parse_counter(index: usize, s: &str) -> Result<u32> {
    if !is_hex(s, 8) {
        return Err(Error::malformed(index, s, "counter must be 1 to 8 hex digits"));
    }
    u32::from_str_radix(s, 16).map_err(|_| Error::malformed(index, s, "counter is not hex"))
}

fn parse_status(index: usize, s: &str) -> Result<DaqStatus> {
    if !is_hex(s, 2) {
        return Err(Error::malformed(index, s, "status must be 1 or 2 hex digits"));
    }
    u8::from_str_radix(s, 16)
        .map(DaqStatus)
        .map_err(|_| Error::malformed(index, s, "status is not hex"))
}

fn parse_correction(index: usize, s: &str) -> Result<i32> {
    s.parse()
        .map_err(|_| Error::malformed(index, s, "correction is not a signed integer"))
}

/// Parse a `HHMMSS` or `HHMMSS.mmm` time of day.
fn parse_time_of_day(index: usize, s: &str) -> Result<NaiveTime> {
    let (hms, millis) = match s.split_once('.') {
        Some((hms, frac)) => (hms, Some(frac)),
        None => (s, None),
    };
    if hms.len() != 6 || !hms.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::malformed(index, s, "time must be HHMMSS.mmm"));
    }
    let millis = match millis {
        None => 0,
        Some(frac) if frac.len() == 3 && frac.bytes().all(|b| b.is_ascii_digit()) => frac
            .parse::<u32>()
            .map_err(|_| Error::malformed(index, s, "invalid milliseconds"))?,
        Some(_) => return Err(Error::malformed(index, s, "milliseconds must be 3 digits")),
    };
    // all ascii digits, so slicing and parsing cannot fail
    let num = |r: std::ops::Range<usize>| hms[r].parse::<u32>().unwrap_or_default();
    let (h, m, sec) = (num(0..2), num(2..4), num(4..6));
    if sec >= 60 {
        return Err(Error::malformed(index, s, "time out of range"));
    }
    NaiveTime::from_hms_milli_opt(h, m, sec, millis)
        .ok_or_else(|| Error::malformed(index, s, "time out of range"))
}
