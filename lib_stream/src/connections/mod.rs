//! # Connections Module
//!
//! Destinations for normalized records: the `Sink` contract, in-process
//! sinks and, with the `postgres` feature, the PostgreSQL sink.

/// Sink contract, JSON lines and in-memory sinks.
pub mod sink;

/// PostgreSQL sink over a deadpool connection pool.
#[cfg(feature = "postgres")]
pub mod db_postgres;

pub use sink::{JsonLinesSink, MemorySink, Sink, SinkError, StdoutSink};

#[cfg(feature = "postgres")]
pub use db_postgres::{DbError, PostgresSink};
