//! Trigger counter and 1PPS clock correction.
//!
//! The DAQ latches a free running hardware clock counter at every trigger and at every 1PPS
//! from the GPS receiver. Both counters are 32 bits wide and wrap, so they are unwrapped into
//! 64 bit totals. The number of counts between two 1PPS gives the actual frequency of the
//! hardware clock, which is needed to turn counts into time.
use chrono::NaiveTime;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::line::{seconds_of_day, DaqLine};

/// Nominal DAQ clock frequency in Hz. Some cards run at 41 MHz, which must be configured.
pub const DEFAULT_FREQUENCY: f64 = 25.0e6;
/// Number of 1PPS between frequency calculations.
pub const FREQUENCY_POLL_INTERVAL: u32 = 5;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Unwraps a 32 bit counter that rolls over into a 64 bit total.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RolloverCounter {
    last: Option<u32>,
    total: u64,
}

impl RolloverCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A counter that has already seen `raw` and reports it as `total`.
    #[must_use]
    pub fn starting_at(raw: u32, total: u64) -> Self {
        RolloverCounter {
            last: Some(raw),
            total,
        }
    }

    /// Add the distance from the last raw value to `raw` and return the new total.
    ///
    /// A raw value smaller than the last one is a rollover, i.e., the counter modulus is
    /// added to the difference. The first value seeds the total.
    pub fn update(&mut self, raw: u32) -> u64 {
        match self.last {
            None => self.total = u64::from(raw),
            // modular difference, i.e., raw - last + 2^32 when raw < last
            Some(last) => self.total += u64::from(raw.wrapping_sub(last)),
        }
        self.last = Some(raw);
        self.total
    }

    /// Current total, `None` before the first update.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.last.map(|_| self.total)
    }

    /// Last raw value seen.
    #[must_use]
    pub fn last(&self) -> Option<u32> {
        self.last
    }
}

/// Result of feeding a line to [ClockState::update].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineClock {
    /// Unwrapped trigger counter of the line.
    pub trigger_count: u64,
    /// Time of the line in seconds since the start of the UTC day of the first line.
    pub line_time: f64,
}

/// Clock state carried from line to line.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ClockState {
    default_frequency: f64,
    poll_interval: u32,

    trigger: RolloverCounter,
    one_pps: RolloverCounter,
    /// Unwrapped trigger counter of the previous line
    last_trigger_count: Option<u64>,
    /// Time of day field of the previous line
    last_time: Option<NaiveTime>,
    /// Number of midnights passed since the first line
    day_offset: u32,
    /// 1PPS total to use until the time field catches up with a 1PPS switch
    lagging_one_pps: Option<u64>,

    /// 1PPS seen since the last frequency poll
    passed_one_pps: u32,
    /// Unwrapped 1PPS counter at the last frequency poll
    last_poll_one_pps: u64,
    frequency: f64,

    last_trigger_time: Option<f64>,
    initialized: bool,
}

impl Default for ClockState {
    fn default() -> Self {
        Self::new(DEFAULT_FREQUENCY, FREQUENCY_POLL_INTERVAL)
    }
}

impl ClockState {
    /// Create a new state. A `poll_interval` of 0 is treated as 1.
    #[must_use]
    pub fn new(default_frequency: f64, poll_interval: u32) -> Self {
        ClockState {
            default_frequency,
            poll_interval: poll_interval.max(1),
            trigger: RolloverCounter::new(),
            one_pps: RolloverCounter::new(),
            last_trigger_count: None,
            last_time: None,
            day_offset: 0,
            lagging_one_pps: None,
            passed_one_pps: 0,
            last_poll_one_pps: 0,
            frequency: default_frequency,
            last_trigger_time: None,
            initialized: false,
        }
    }

    /// Current estimate of the DAQ clock frequency in Hz.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    /// True once the first trigger has been seen.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Time of the most recent trigger line.
    #[must_use]
    pub fn last_trigger_time(&self) -> Option<f64> {
        self.last_trigger_time
    }

    #[must_use]
    pub fn trigger_total(&self) -> Option<u64> {
        self.trigger.total()
    }

    #[must_use]
    pub fn one_pps_total(&self) -> Option<u64> {
        self.one_pps.total()
    }

    #[must_use]
    pub fn day_offset(&self) -> u32 {
        self.day_offset
    }

    /// Unwrap the counters of `line`, recalibrate the frequency when a poll is due, and compute
    /// the time of the line.
    ///
    /// The time field may lag a 1PPS switch for any number of lines. Until it changes, the
    /// line time is computed from the 1PPS total that belongs to the time field.
    pub fn update(&mut self, line: &DaqLine) -> LineClock {
        let previous_one_pps = self.one_pps.total();
        let (trigger_count, one_pps) = match previous_one_pps {
            Some(_) => (
                self.trigger.update(line.trigger_count),
                self.one_pps.update(line.one_pps),
            ),
            None => self.seed(line),
        };

        self.track_midnight(line.time);

        let time_changed = self.last_time != Some(line.time);
        if time_changed {
            self.lagging_one_pps = None;
        }
        if let Some(previous) = previous_one_pps.filter(|p| *p != one_pps) {
            self.passed_one_pps += 1;
            self.poll_frequency(one_pps);
            if !time_changed {
                trace!(time = %line.time, "delayed 1PPS switch");
                self.lagging_one_pps.get_or_insert(previous);
            }
        }
        let one_pps_for_time = self.lagging_one_pps.unwrap_or(one_pps);

        let line_time = self.event_time(line.gps_seconds(), trigger_count, one_pps_for_time);
        self.last_time = Some(line.time);

        LineClock {
            trigger_count,
            line_time,
        }
    }

    /// Start both counters from the first line and return their totals.
    ///
    /// The trigger is latched shortly after the 1PPS, but may also appear a few counts before
    /// it. The distance between them is read as signed, so only a distance in the positive half
    /// of the counter range is a trigger that has already wrapped.
    fn seed(&mut self, line: &DaqLine) -> (u64, u64) {
        let since_pps = i64::from(line.trigger_count.wrapping_sub(line.one_pps) as i32);
        let mut one_pps = u64::from(line.one_pps);
        if since_pps < 0 && one_pps < since_pps.unsigned_abs() {
            // keep the trigger total from going below zero
            one_pps += 1 << 32;
        }
        let trigger_count = one_pps.saturating_add_signed(since_pps);

        self.one_pps = RolloverCounter::starting_at(line.one_pps, one_pps);
        self.trigger = RolloverCounter::starting_at(line.trigger_count, trigger_count);
        self.last_poll_one_pps = one_pps;
        debug!(trigger_count, one_pps, "seeded counters");
        (trigger_count, one_pps)
    }

    /// Absolute event time in seconds since the start of the UTC day of the first line.
    ///
    /// `gps_seconds` is the corrected GPS time of day of the 1PPS that latched `one_pps`, see
    /// [DaqLine::gps_seconds], and `trigger_count` the unwrapped counter at the event. The counts
    /// since the 1PPS are converted using the current frequency estimate.
    #[must_use]
    pub fn event_time(&self, gps_seconds: f64, trigger_count: u64, one_pps: u64) -> f64 {
        let gps_time = gps_seconds + f64::from(self.day_offset) * SECONDS_PER_DAY;
        let counts = trigger_count as f64 - one_pps as f64;
        gps_time + counts / self.frequency
    }

    /// Nanoseconds elapsed between the previous line and a line with `trigger_count`.
    #[must_use]
    pub fn counter_diff_ns(&self, trigger_count: u64) -> f64 {
        match self.last_trigger_count {
            Some(last) => trigger_count.saturating_sub(last) as f64 / self.frequency * 1e9,
            None => 0.0,
        }
    }

    /// Remember `trigger_count` as the counter of the previous line.
    pub fn end_line(&mut self, trigger_count: u64) {
        self.last_trigger_count = Some(trigger_count);
    }

    /// Record a new trigger at `line_time` and return the time of the previous one.
    pub fn start_event(&mut self, line_time: f64) -> Option<f64> {
        if !self.initialized {
            debug!(line_time, "first trigger");
            self.initialized = true;
        }
        self.last_trigger_time.replace(line_time)
    }

    fn track_midnight(&mut self, time: NaiveTime) {
        if let Some(last) = self.last_time {
            // Going back more than half a day can only be a new day
            if seconds_of_day(time) + SECONDS_PER_DAY / 2.0 < seconds_of_day(last) {
                self.day_offset += 1;
                debug!(day_offset = self.day_offset, %time, %last, "day rollover");
            }
        }
    }

    fn poll_frequency(&mut self, one_pps: u64) {
        if self.passed_one_pps < self.poll_interval {
            return;
        }
        let counts = one_pps.saturating_sub(self.last_poll_one_pps);
        let frequency = counts as f64 / f64::from(self.passed_one_pps);
        self.passed_one_pps = 0;
        self.last_poll_one_pps = one_pps;

        // the DAQ frequency is assumed to be somewhat stable
        if 0.5 * frequency < self.default_frequency && self.default_frequency < 1.5 * frequency {
            trace!(frequency, "calculated frequency");
            self.frequency = frequency;
        } else {
            warn!(
                frequency,
                default = self.default_frequency,
                "calculated frequency out of range, using default"
            );
            self.frequency = self.default_frequency;
        }
    }
}
