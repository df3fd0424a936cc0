//! # lib_stream
//!
//! Client library for long-lived firehose streams. Records are framed out of
//! a chunked HTTP body, queued, normalized per publisher and written to a sink,
//! while a bounded reconnect policy keeps the connection alive.
//!
//! ```text
//! Transport -> StreamClient -> FrameBuffer -> PendingQueue -> Normalizer -> Sink
//!                   ^
//!                   +-- FirehoseStream (RetryBudget / ReconnectSupervisor)
//! ```

pub mod configs;
pub mod connections;
pub mod core;
pub mod framing;
pub mod ingestors;
pub mod normalize;

pub use crate::configs::{StreamConfig, StreamSession};
pub use crate::connections::{MemorySink, Sink, SinkError, StdoutSink};
pub use crate::core::{IngestionPipeline, PipelineError, PipelineOptions, PipelineReport};
pub use crate::framing::{FrameBuffer, Framing, RawRecord};
pub use crate::ingestors::{FirehoseStream, ReqwestTransport, StreamClient};
pub use crate::normalize::{CanonicalRecord, Normalizer};
