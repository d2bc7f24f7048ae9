//! Log ingestion: the tailer (C2) and reduction pipeline (C3) that turn
//! raw syslog-style lines into normalized, trust-filtered events.

pub mod error;
pub mod pipeline;
pub mod tailer;

pub use error::IngestError;
pub use pipeline::{PipelineCounters, ReductionPipeline};
pub use tailer::LogTailer;
