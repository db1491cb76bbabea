use std::io::{BufRead, Lines};
use std::path::PathBuf;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

use crate::clock::{ClockState, LineClock, DEFAULT_FREQUENCY, FREQUENCY_POLL_INTERVAL};
use crate::edges::{EdgeBuffer, TMC_TICK};
use crate::line::{DaqLine, DaqStatus};
use crate::pulse::{EdgeMap, MAX_TRIGGER_WINDOW};
use crate::sink::{FileSink, PulseLog, PulseSink, SinkFormat};
use crate::{Error, Result};

/// How a line that starts a new event is recognized.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventBoundary {
    /// The trigger bit of the channel 0 rising edge register is set.
    #[default]
    TriggerFlag,
    /// The trigger bit of any rising edge register is set.
    AnyTriggerFlag,
}

impl EventBoundary {
    #[must_use]
    pub fn is_boundary(self, line: &DaqLine) -> bool {
        match self {
            EventBoundary::TriggerFlag => line.rising[0].is_trigger(),
            EventBoundary::AnyTriggerFlag => line.rising.iter().any(|r| r.is_trigger()),
        }
    }
}

/// [PulseExtractor] configuration.
///
/// All values have defaults, so a configuration can be built with only the values that
/// differ, either with the builder or from JSON.
///
/// # Example
/// ```
/// use daqpulse::{EventBoundary, ExtractorConfig};
///
/// let config = ExtractorConfig::builder()
///     .default_frequency(41.0e6)
///     .boundary(EventBoundary::AnyTriggerFlag)
///     .build();
/// assert_eq!(config.tick, 1.25);
///
/// let config: ExtractorConfig = serde_json::from_str(r#"{"max_trigger_window": 60.0}"#).unwrap();
/// assert_eq!(config.default_frequency, 25.0e6);
/// ```
#[derive(Serialize, Deserialize, TypedBuilder, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ExtractorConfig {
    #[builder(default)]
    pub boundary: EventBoundary,
    /// Clock frequency in Hz used until, and whenever, a calculated frequency is not sane.
    #[builder(default = DEFAULT_FREQUENCY)]
    pub default_frequency: f64,
    /// Number of 1PPS between frequency calculations.
    #[builder(default = FREQUENCY_POLL_INTERVAL)]
    pub frequency_poll_interval: u32,
    /// TMC tick in nanoseconds.
    #[builder(default = TMC_TICK)]
    pub tick: f64,
    /// Falling edge time in nanoseconds for pulses without a falling edge.
    #[builder(default = MAX_TRIGGER_WINDOW)]
    pub max_trigger_window: f64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Result of extracting a single line.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Time of the trigger the pulses belong to, in seconds since the start of the UTC day
    /// of the first line. `None` until a trigger has been seen.
    pub trigger_time: Option<f64>,
    /// Time of the extracted line.
    pub line_time: f64,
    /// True if the line started a new event, in which case `pulses` holds the pulses of the
    /// previous event.
    pub boundary: bool,
    pub pulses: EdgeMap,
    pub status: DaqStatus,
}

impl Extraction {
    /// True if no trigger had been seen when the pulses were collected.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.trigger_time.is_none()
    }
}

/// Extracts pulses from DAQ lines.
///
/// Lines must be provided in the order they were produced by the DAQ, one stream per
/// extractor. Pulses are collected until the next trigger line, at which point they are
/// paired, cleaned and returned as the pulses of the previous trigger.
///
/// # Example
/// ```
/// use daqpulse::{ExtractorConfig, PulseExtractor, MAX_TRIGGER_WINDOW};
///
/// let mut extractor = PulseExtractor::new(ExtractorConfig::default());
/// let lines = [
///     "00000100 80 00 00 00 00 00 00 00 00000000 120000.000 181026 A 08 0 +0000",
///     "00000100 25 05 00 00 00 00 00 00 00000000 120000.000 181026 A 08 0 +0000",
///     "00000200 80 00 00 00 00 00 00 00 00000000 120000.000 181026 A 08 0 +0000",
/// ];
/// let extractions = lines
///     .iter()
///     .map(|l| extractor.extract(l))
///     .collect::<Result<Vec<_>, _>>()
///     .unwrap();
///
/// let pulses = &extractions[2].pulses;
/// assert_eq!(pulses[0][0].rising, 6.25);
/// assert_eq!(pulses[0][0].falling, MAX_TRIGGER_WINDOW);
/// ```
pub struct PulseExtractor {
    config: ExtractorConfig,
    clock: ClockState,
    buffer: EdgeBuffer,
    log: Option<PulseLog>,
}

impl PulseExtractor {
    /// Create an extractor that does not write pulses.
    #[must_use]
    pub fn new(config: ExtractorConfig) -> Self {
        let clock = ClockState::new(config.default_frequency, config.frequency_poll_interval);
        PulseExtractor {
            config,
            clock,
            buffer: EdgeBuffer::default(),
            log: None,
        }
    }

    /// Create an extractor that writes pulses to `sink` while logging is enabled.
    #[must_use]
    pub fn with_sink(config: ExtractorConfig, sink: Box<dyn PulseSink>) -> Self {
        let mut extractor = Self::new(config);
        extractor.log = Some(PulseLog::new(sink));
        extractor
    }

    /// Create an extractor that appends pulses to the file at `path` while logging is
    /// enabled.
    #[must_use]
    pub fn with_pulse_file<P: Into<PathBuf>>(
        config: ExtractorConfig,
        path: P,
        format: SinkFormat,
    ) -> Self {
        Self::with_sink(config, Box::new(FileSink::new(path, format)))
    }

    #[must_use]
    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> &ClockState {
        &self.clock
    }

    /// Edges collected for the current event.
    #[must_use]
    pub fn buffer(&self) -> &EdgeBuffer {
        &self.buffer
    }

    /// Current estimate of the DAQ clock frequency in Hz.
    #[must_use]
    pub fn frequency(&self) -> f64 {
        self.clock.frequency()
    }

    /// True once the first trigger has been seen.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.clock.is_initialized()
    }

    #[must_use]
    pub fn is_logging(&self) -> bool {
        self.log.as_ref().is_some_and(PulseLog::is_enabled)
    }

    /// Enable or disable writing pulses. Without a sink logging stays disabled.
    ///
    /// # Errors
    /// [crate::Error::Sink] if the sink could not be opened or closed.
    pub fn set_logging(&mut self, enabled: bool) -> Result<()> {
        match self.log.as_mut() {
            Some(log) => log.set_enabled(enabled),
            None => {
                if enabled {
                    warn!("no pulse sink configured, not writing pulses");
                }
                Ok(())
            }
        }
    }

    /// Total time pulses have been written.
    #[must_use]
    pub fn measurement_duration(&self) -> TimeDelta {
        self.log
            .as_ref()
            .map_or(TimeDelta::zero(), PulseLog::measurement_duration)
    }

    /// Stop writing pulses and return the measurement duration. Calling this more than once
    /// is fine.
    ///
    /// # Errors
    /// [crate::Error::Sink] if the sink could not be closed.
    pub fn finish(&mut self) -> Result<TimeDelta> {
        match self.log.as_mut() {
            Some(log) => log.finish(),
            None => Ok(TimeDelta::zero()),
        }
    }

    /// Extract a single DAQ line.
    ///
    /// # Errors
    /// [Error::FieldCount] or [Error::MalformedField] if the line does not parse, in which
    /// case the extractor state is unchanged. If writing the pulses fails the line has still
    /// been fully processed and [Error::Unwritten] carries the extraction, see
    /// [Error::into_extraction].
    pub fn extract(&mut self, line: &str) -> Result<Extraction> {
        let line = DaqLine::parse(line)?;
        let LineClock {
            trigger_count,
            line_time,
        } = self.clock.update(&line);

        let extraction = if self.config.boundary.is_boundary(&line) {
            let pulses = self.buffer.drain(self.config.max_trigger_window);
            let trigger_time = self.clock.start_event(line_time);
            debug!(?trigger_time, line_time, pulses = pulses.len(), "event complete");

            // The trigger line starts the next event
            self.buffer
                .push(&line.rising, &line.falling, 0.0, self.config.tick);

            Extraction {
                trigger_time,
                line_time,
                boundary: true,
                pulses,
                status: line.status,
            }
        } else {
            let counter_diff = self.clock.counter_diff_ns(trigger_count);
            trace!(counter_diff, "continuation line");
            self.buffer
                .push(&line.rising, &line.falling, counter_diff, self.config.tick);

            Extraction {
                trigger_time: self.clock.last_trigger_time(),
                line_time,
                boundary: false,
                pulses: EdgeMap::default(),
                status: line.status,
            }
        };
        self.clock.end_line(trigger_count);

        if extraction.boundary {
            if let Some(log) = self.log.as_mut() {
                if let Err(err) = log.write(extraction.trigger_time, &extraction.pulses) {
                    warn!(error = %err, "failed to write pulses");
                    return Err(Error::Unwritten {
                        extraction: Box::new(extraction),
                        source: Box::new(err),
                    });
                }
            }
        }

        Ok(extraction)
    }

    /// Return an [Iterator] extracting each non-blank line read from `reader`.
    pub fn extract_reader<R: BufRead>(&mut self, reader: R) -> Extractions<'_, R> {
        Extractions {
            extractor: self,
            lines: reader.lines(),
        }
    }
}

/// Iterator over the extractions of lines read from a reader. See
/// [PulseExtractor::extract_reader].
pub struct Extractions<'a, R> {
    extractor: &'a mut PulseExtractor,
    lines: Lines<R>,
}

impl<R: BufRead> Iterator for Extractions<'_, R> {
    type Item = Result<Extraction>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(err) => return Some(Err(err.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(self.extractor.extract(&line));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::pulse::Pulse;
    use crate::sink::tests::{MemorySink, MemoryState};
    use crate::sink::PulseRecord;

    const ZERO: [&str; 8] = ["00"; 8];

    fn daq_line(trigger_count: u32, registers: [&str; 8], one_pps: u32, time: &str) -> String {
        format!(
            "{trigger_count:08X} {} {one_pps:08X} {time} 181026 A 08 0 +0000",
            registers.join(" ")
        )
    }

    fn trigger_line(trigger_count: u32) -> String {
        let mut regs = ZERO;
        regs[0] = "80";
        daq_line(trigger_count, regs, 0, "120000.000")
    }

    fn memory_extractor() -> (PulseExtractor, Arc<Mutex<MemoryState>>) {
        let sink = MemorySink::default();
        let state = sink.0.clone();
        let extractor = PulseExtractor::with_sink(ExtractorConfig::default(), Box::new(sink));
        (extractor, state)
    }

    #[test]
    fn valid_rising_invalid_falling() {
        let mut ex = PulseExtractor::new(ExtractorConfig::default());

        let first = ex.extract(&trigger_line(0x100)).unwrap();
        assert!(first.boundary);
        assert!(first.is_pending());
        assert!(first.pulses.is_empty());
        assert!(ex.is_initialized());

        let mut regs = ZERO;
        regs[0] = "25";
        regs[1] = "05";
        let cont = ex
            .extract(&daq_line(0x100, regs, 0, "120000.000"))
            .unwrap();
        assert!(!cont.boundary);
        assert!(cont.pulses.is_empty());
        assert_eq!(cont.trigger_time, Some(first.line_time));

        let next = ex.extract(&trigger_line(0x200)).unwrap();
        assert!(next.boundary);
        assert_eq!(next.trigger_time, Some(first.line_time));
        assert_eq!(
            next.pulses[0],
            vec![Pulse {
                rising: 6.25,
                falling: MAX_TRIGGER_WINDOW
            }]
        );
        assert_eq!(next.pulses.len(), 1);
    }

    #[test]
    fn trigger_line_edges_start_next_event() {
        let mut ex = PulseExtractor::new(ExtractorConfig::default());
        let mut regs = ZERO;
        // tick 4, valid, trigger; falling tick 12, valid
        regs[0] = "A4";
        regs[1] = "2C";

        ex.extract(&daq_line(0x100, regs, 0, "120000.000")).unwrap();
        let next = ex.extract(&trigger_line(0x200)).unwrap();

        assert_eq!(
            next.pulses[0],
            vec![Pulse {
                rising: 5.0,
                falling: 15.0
            }]
        );
    }

    #[test]
    fn continuation_lines_add_counter_diff() {
        let mut ex = PulseExtractor::new(ExtractorConfig::default());
        ex.extract(&trigger_line(0x100)).unwrap();

        let mut regs = ZERO;
        regs[2] = "23";
        regs[3] = "2A";
        // 250 counts at 25MHz = 10us
        ex.extract(&daq_line(0x100 + 250, regs, 0, "120000.000"))
            .unwrap();
        let next = ex.extract(&trigger_line(0x400)).unwrap();

        let pulses = &next.pulses[1];
        assert_eq!(pulses.len(), 1);
        assert!((pulses[0].rising - 10_003.75).abs() < 1e-6);
        assert!((pulses[0].falling - 10_012.5).abs() < 1e-6);
    }

    #[test]
    fn edges_before_first_trigger_are_pending() {
        let mut ex = PulseExtractor::new(ExtractorConfig::default());
        let mut regs = ZERO;
        regs[4] = "21";
        regs[5] = "22";

        let cont = ex.extract(&daq_line(0x10, regs, 0, "120000.000")).unwrap();
        assert!(cont.is_pending());
        assert!(!ex.is_initialized());

        let first = ex.extract(&trigger_line(0x10)).unwrap();
        assert!(first.is_pending());
        assert_eq!(
            first.pulses[2],
            vec![Pulse {
                rising: 1.25,
                falling: 2.5
            }]
        );
    }

    #[test]
    fn malformed_line_leaves_state_unchanged() {
        let mut ex = PulseExtractor::new(ExtractorConfig::default());
        ex.extract(&trigger_line(0x100)).unwrap();
        let mut regs = ZERO;
        regs[0] = "25";
        ex.extract(&daq_line(0x150, regs, 0, "120000.000"))
            .unwrap();

        let clock = ex.clock().clone();
        let buffer = ex.buffer().clone();

        regs[1] = "zz";
        let err = ex
            .extract(&daq_line(0x200, regs, 0, "120000.000"))
            .unwrap_err();
        assert!(err.is_malformed(), "{err:?}");
        let err = ex.extract("00000300 80 00").unwrap_err();
        assert!(matches!(err, Error::FieldCount { actual: 3, .. }));

        assert_eq!(ex.clock(), &clock);
        assert_eq!(ex.buffer(), &buffer);
    }

    #[test]
    fn any_trigger_flag_boundary() {
        let mut regs = ZERO;
        regs[4] = "80";
        let line = daq_line(0x100, regs, 0, "120000.000");

        let mut ex = PulseExtractor::new(ExtractorConfig::default());
        assert!(!ex.extract(&line).unwrap().boundary);

        let config = ExtractorConfig::builder()
            .boundary(EventBoundary::AnyTriggerFlag)
            .build();
        let mut ex = PulseExtractor::new(config);
        assert!(ex.extract(&line).unwrap().boundary);
    }

    #[test]
    fn writes_pulses_when_logging() {
        let (mut ex, state) = memory_extractor();
        let mut regs = ZERO;
        regs[0] = "A1";
        regs[1] = "23";

        ex.extract(&daq_line(0x100, regs, 0, "120000.000")).unwrap();
        ex.extract(&daq_line(0x200, regs, 0, "120000.000")).unwrap();
        assert!(state.lock().unwrap().records.is_empty());

        ex.set_logging(true).unwrap();
        assert!(ex.is_logging());
        let third = ex.extract(&daq_line(0x300, regs, 0, "120000.000")).unwrap();
        ex.set_logging(false).unwrap();
        ex.extract(&daq_line(0x400, regs, 0, "120000.000")).unwrap();

        let state = state.lock().unwrap();
        assert_eq!(
            state.records,
            vec![PulseRecord {
                trigger_time: third.trigger_time,
                channel: 0,
                rising: 1.25,
                falling: 3.75,
            }]
        );
        assert_eq!(state.opens, 1);
        assert_eq!(state.closes, 1);
    }

    #[test]
    fn finish_closes_sink_once() {
        let (mut ex, state) = memory_extractor();
        ex.set_logging(true).unwrap();

        ex.finish().unwrap();
        ex.finish().unwrap();

        assert!(!ex.is_logging());
        assert_eq!(state.lock().unwrap().closes, 1);
    }

    #[test]
    fn logging_without_sink() {
        let mut ex = PulseExtractor::new(ExtractorConfig::default());
        ex.set_logging(true).unwrap();
        assert!(!ex.is_logging());
        assert_eq!(ex.finish().unwrap(), TimeDelta::zero());
    }

    struct FailingSink;

    impl PulseSink for FailingSink {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn append(&mut self, _record: &PulseRecord) -> Result<()> {
            Err(Error::Sink(std::io::Error::other("disk full")))
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sink_failure_keeps_state() {
        let mut ex = PulseExtractor::with_sink(ExtractorConfig::default(), Box::new(FailingSink));
        ex.set_logging(true).unwrap();
        let mut regs = ZERO;
        regs[0] = "A1";

        ex.extract(&daq_line(0x100, regs, 0, "120000.000")).unwrap();
        let err = ex
            .extract(&daq_line(0x200, regs, 0, "120000.000"))
            .unwrap_err();
        assert!(err.is_sink());
        let extraction = err.into_extraction().unwrap();
        assert!(extraction.boundary);
        assert!(extraction.trigger_time.is_some());
        assert_eq!(extraction.pulses[0].len(), 1);

        // the failed line still started a new event
        assert_eq!(ex.buffer().rising(0).unwrap(), &[1.25]);
        assert_eq!(ex.clock().trigger_total(), Some(0x200));
        assert!(ex.clock().last_trigger_time().is_some());
    }

    #[test]
    fn extract_reader_skips_blank_lines() {
        let input = format!(
            "{}\n\n{}\nnot a daq line\n   \n{}\n",
            trigger_line(0x100),
            trigger_line(0x200),
            trigger_line(0x300)
        );
        let mut ex = PulseExtractor::new(ExtractorConfig::default());

        let zults: Vec<Result<Extraction>> = ex.extract_reader(input.as_bytes()).collect();

        assert_eq!(zults.len(), 4);
        assert!(zults[2].as_ref().unwrap_err().is_malformed());
        assert!(zults[3].as_ref().unwrap().boundary);
    }

    #[test]
    fn config_from_json() {
        let config: ExtractorConfig =
            serde_json::from_str(r#"{"boundary": "any_trigger_flag", "tick": 0.75}"#).unwrap();

        assert_eq!(config.boundary, EventBoundary::AnyTriggerFlag);
        assert_eq!(config.tick, 0.75);
        assert_eq!(config.max_trigger_window, MAX_TRIGGER_WINDOW);
        assert_eq!(config.frequency_poll_interval, FREQUENCY_POLL_INTERVAL);
    }
}
