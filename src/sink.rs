//! Persisting extracted pulses.
//!
//! A [PulseLog] switches writing on and off at runtime and keeps track of how long pulses
//! were written. Where the pulses go is up to the [PulseSink]; [FileSink] appends them to a
//! file.
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::pulse::EdgeMap;
use crate::{Error, Result};

/// A single pulse as written to a sink.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PulseRecord {
    /// Time of the trigger the pulse belongs to, `None` for pulses seen before the first
    /// trigger.
    pub trigger_time: Option<f64>,
    pub channel: usize,
    pub rising: f64,
    pub falling: f64,
}

impl PulseRecord {
    /// Records for all pulses in `pulses`, ordered by channel.
    pub fn from_edge_map(
        trigger_time: Option<f64>,
        pulses: &EdgeMap,
    ) -> impl Iterator<Item = PulseRecord> + '_ {
        pulses.iter().flat_map(move |(channel, pulses)| {
            pulses.iter().map(move |p| PulseRecord {
                trigger_time,
                channel,
                rising: p.rising,
                falling: p.falling,
            })
        })
    }
}

/// Text form: `<trigger_time> <channel> <rising> <falling>`, where a missing trigger time is
/// written as `-`.
impl Display for PulseRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.trigger_time {
            Some(t) => write!(f, "{t}")?,
            None => write!(f, "-")?,
        }
        write!(f, " {} {} {}", self.channel, self.rising, self.falling)
    }
}

impl FromStr for PulseRecord {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 4 {
            // first surplus or missing field
            return Err(Error::malformed(
                fields.len().min(4),
                s,
                "pulse record must have exactly 4 fields",
            ));
        }
        let number = |idx: usize| -> Result<f64> {
            fields[idx]
                .parse()
                .map_err(|_| Error::malformed(idx, fields[idx], "not a number"))
        };
        Ok(PulseRecord {
            trigger_time: if fields[0] == "-" { None } else { Some(number(0)?) },
            channel: fields[1]
                .parse()
                .map_err(|_| Error::malformed(1, fields[1], "invalid channel"))?,
            rising: number(2)?,
            falling: number(3)?,
        })
    }
}

/// Record layout used by a [FileSink].
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkFormat {
    /// One [PulseRecord] per line in its text form.
    #[default]
    Text,
    /// One JSON encoded [PulseRecord] per line.
    Json,
}

/// Destination for extracted pulses.
pub trait PulseSink: Send {
    /// Prepare the sink for appending. Called each time writing is enabled.
    ///
    /// # Errors
    /// If the destination is unavailable.
    fn open(&mut self) -> Result<()>;

    /// Append a single record.
    ///
    /// # Errors
    /// If the record could not be written.
    fn append(&mut self, record: &PulseRecord) -> Result<()>;

    /// Flush and release the destination. Called each time writing is disabled.
    ///
    /// # Errors
    /// If pending records could not be written.
    fn close(&mut self) -> Result<()>;
}

/// Appends pulse records to a file, creating it if necessary.
pub struct FileSink {
    path: PathBuf,
    format: SinkFormat,
    writer: Option<BufWriter<File>>,
}

impl FileSink {
    pub fn new<P: Into<PathBuf>>(path: P, format: SinkFormat) -> Self {
        FileSink {
            path: path.into(),
            format,
            writer: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PulseSink for FileSink {
    fn open(&mut self) -> Result<()> {
        if self.writer.is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(Error::Sink)?;
        debug!(path = %self.path.display(), "opened pulse file");
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn append(&mut self, record: &PulseRecord) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::Sink(std::io::Error::new(
                ErrorKind::NotConnected,
                "pulse file is not open",
            )));
        };
        match self.format {
            SinkFormat::Text => writeln!(writer, "{record}").map_err(Error::Sink),
            SinkFormat::Json => {
                serde_json::to_writer(&mut *writer, record)?;
                writeln!(writer).map_err(Error::Sink)
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        // the file is closed when the writer is dropped
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(Error::Sink)?;
            debug!(path = %self.path.display(), "closed pulse file");
        }
        Ok(())
    }
}

/// Switches writing pulses to a [PulseSink] on and off and accumulates the measurement
/// duration, i.e., the total time writing was enabled.
pub struct PulseLog {
    sink: Box<dyn PulseSink>,
    enabled: bool,
    started: Option<DateTime<Utc>>,
    duration: TimeDelta,
}

impl PulseLog {
    #[must_use]
    pub fn new(sink: Box<dyn PulseSink>) -> Self {
        PulseLog {
            sink,
            enabled: false,
            started: None,
            duration: TimeDelta::zero(),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Total time writing has been enabled, not counting the currently running period.
    #[must_use]
    pub fn measurement_duration(&self) -> TimeDelta {
        self.duration
    }

    /// Enable or disable writing. Setting the current state again does nothing.
    ///
    /// # Errors
    /// If the sink fails to open or close. A sink that fails to close is still considered
    /// disabled.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        if self.enabled == enabled {
            return Ok(());
        }
        if enabled {
            self.sink.open()?;
            self.started = Some(Utc::now());
            self.enabled = true;
            debug!("started writing pulses");
            Ok(())
        } else {
            self.stop()
        }
    }

    /// Write `pulses` if writing is enabled.
    ///
    /// # Errors
    /// If the sink fails to append a record.
    pub fn write(&mut self, trigger_time: Option<f64>, pulses: &EdgeMap) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        for record in PulseRecord::from_edge_map(trigger_time, pulses) {
            self.sink.append(&record)?;
        }
        Ok(())
    }

    /// Stop writing, if enabled, and return the total measurement duration.
    ///
    /// # Errors
    /// If the sink fails to close.
    pub fn finish(&mut self) -> Result<TimeDelta> {
        if self.enabled {
            self.stop()?;
            let hours = self.duration.num_milliseconds() as f64 / 3_600_000.0;
            info!(hours, "pulse extraction measurement was active");
        }
        Ok(self.duration)
    }

    fn stop(&mut self) -> Result<()> {
        self.enabled = false;
        if let Some(started) = self.started.take() {
            self.duration = self.duration + (Utc::now() - started);
        }
        debug!("stopped writing pulses");
        self.sink.close()
    }
}
