use serde::{Deserialize, Serialize};

use crate::edges::NUM_CHANNELS;
use crate::extractor::Extraction;
use crate::pulse::MAX_TRIGGER_WINDOW;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSummary {
    pub pulses: usize,
    /// Pulses without an observed falling edge.
    pub open: usize,
}

/// Tracks stats on extraction.
///
/// # Example
/// ```
/// use daqpulse::{ExtractorConfig, PulseExtractor, Summary};
///
/// let dat = "00000100 A5 27 00 00 00 00 00 00 00000000 120000.000 181026 A 08 0 +0000\n\
///            00000200 80 00 00 00 00 00 00 00 00000000 120000.000 181026 A 08 0 +0000\n";
///
/// let mut extractor = PulseExtractor::new(ExtractorConfig::default());
/// let mut summary = Summary::default();
/// extractor
///     .extract_reader(dat.as_bytes())
///     .filter_map(Result::ok)
///     .for_each(|x| summary.add(&x));
///
/// assert_eq!(summary.lines, 2);
/// assert_eq!(summary.events, 1);
/// assert_eq!(summary.channels[0].pulses, 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub lines: usize,
    /// Completed events that belong to a trigger.
    pub events: usize,
    pub pulses: usize,
    pub channels: [ChannelSummary; NUM_CHANNELS],
    pub first_line_time: Option<f64>,
    pub last_line_time: Option<f64>,

    max_trigger_window: f64,
}

impl Default for Summary {
    fn default() -> Self {
        Self::new(MAX_TRIGGER_WINDOW)
    }
}

impl Summary {
    /// `max_trigger_window` must match the extractor configuration for open pulses to be
    /// counted.
    #[must_use]
    pub fn new(max_trigger_window: f64) -> Self {
        Summary {
            lines: 0,
            events: 0,
            pulses: 0,
            channels: [ChannelSummary::default(); NUM_CHANNELS],
            first_line_time: None,
            last_line_time: None,
            max_trigger_window,
        }
    }

    pub fn add(&mut self, extraction: &Extraction) {
        self.lines += 1;
        if self.first_line_time.is_none() {
            self.first_line_time = Some(extraction.line_time);
        }
        self.last_line_time = Some(extraction.line_time);

        if !extraction.boundary {
            return;
        }
        if !extraction.is_pending() {
            self.events += 1;
        }
        for (ch, pulses) in extraction.pulses.iter() {
            let summary = &mut self.channels[ch];
            summary.pulses += pulses.len();
            summary.open += pulses
                .iter()
                .filter(|p| p.is_open(self.max_trigger_window))
                .count();
            self.pulses += pulses.len();
        }
    }

    /// Seconds between the first and the last line.
    #[must_use]
    pub fn duration(&self) -> f64 {
        match (self.first_line_time, self.last_line_time) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}
