use crate::extractor::Extraction;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The line has fewer fields than the DAQ line schema requires.
    #[error("expected at least {minimum} fields, got {actual}")]
    FieldCount { actual: usize, minimum: usize },

    /// A field could not be parsed according to the DAQ line schema.
    #[error("malformed field {index} ({value:?}): {reason}")]
    MalformedField {
        /// Zero-based position of the field in the line
        index: usize,
        value: String,
        reason: &'static str,
    },

    /// Reading the line source failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The pulse sink could not be opened, written or closed.
    #[error("pulse sink: {0}")]
    Sink(std::io::Error),

    #[error("encoding pulse record: {0}")]
    Encode(#[from] serde_json::Error),

    /// The pulses of a completed extraction could not be written. The extractor state already
    /// includes the line, so the extraction is returned with the sink failure.
    #[error("pulses not written: {source}")]
    Unwritten {
        extraction: Box<Extraction>,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn malformed(index: usize, value: &str, reason: &'static str) -> Self {
        Error::MalformedField {
            index,
            value: value.to_string(),
            reason,
        }
    }

    /// True for errors caused by the content of an input line. The line was rejected and the
    /// extractor state is unchanged, so the stream may simply continue with the next line.
    #[must_use]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::FieldCount { .. } | Error::MalformedField { .. })
    }

    /// True for failures of the pulse sink.
    #[must_use]
    pub fn is_sink(&self) -> bool {
        matches!(
            self,
            Error::Sink(_) | Error::Encode(_) | Error::Unwritten { .. }
        )
    }

    /// The extraction whose pulses could not be written, if any.
    #[must_use]
    pub fn into_extraction(self) -> Option<Extraction> {
        match self {
            Error::Unwritten { extraction, .. } => Some(*extraction),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
