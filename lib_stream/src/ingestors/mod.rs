//! # Firehose Ingestors Module
//!
//! The network side of the crate: opening streaming HTTP connections, framing
//! their bodies into records and keeping the stream alive across disconnects.
//!
//! ## Contained Modules:
//! - **`http_stream`**: `Transport` trait, the reqwest-backed transport and the
//!   single-session `StreamClient`.
//! - **`firehose`**: `FirehoseStream`, a `StreamClient` driven by a retry budget.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Single-session HTTP streaming client.
pub mod http_stream;
/// Supervised, reconnecting stream.
pub mod firehose;

pub use firehose::{ConsumeSummary, FirehoseError, FirehoseStream, RecordHandler};
pub use http_stream::{
    ConnectionContext, ReqwestTransport, SessionEnd, StreamClient, StreamObserver, StreamRequest, Transport,
    TransportError,
};
