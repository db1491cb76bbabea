#![doc = include_str!("../README.md")]

mod error;

pub mod clock;
pub mod edges;
pub mod extractor;
pub mod line;
pub mod pulse;
pub mod register;
pub mod sink;
pub mod summary;

pub use clock::{ClockState, RolloverCounter, DEFAULT_FREQUENCY};
pub use edges::{Edge, EdgeBuffer, NUM_CHANNELS, TMC_TICK};
pub use error::{Error, Result};
pub use extractor::{EventBoundary, Extraction, Extractions, ExtractorConfig, PulseExtractor};
pub use line::{DaqLine, DaqStatus};
pub use pulse::{EdgeMap, Pulse, MAX_TRIGGER_WINDOW};
pub use register::Register;
pub use sink::{FileSink, PulseLog, PulseRecord, PulseSink, SinkFormat};
pub use summary::{ChannelSummary, Summary};
