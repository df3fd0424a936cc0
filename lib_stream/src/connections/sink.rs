//! # Record Sinks
//!
//! The `Sink` contract the consuming task writes canonical records to,
//! plus the two sinks that need no external service: JSON lines on any
//! writer (stdout in production) and an in-memory store.

use std::collections::HashSet;
use std::future::Future;
use std::io::Write;
use std::sync::Mutex;

use thiserror::Error;

use crate::normalize::CanonicalRecord;

/// Why a sink refused a record.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A record with the same `(publisher, native_id)` is already stored.
    #[error("duplicate record {publisher}/{native_id}")]
    Duplicate {
        /// Publisher of the rejected record.
        publisher: String,
        /// Native id of the rejected record.
        native_id: String,
    },
    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),
    /// Writing the output failed.
    #[error("write error: {0}")]
    Io(#[from] std::io::Error),
    /// The record could not be serialized.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SinkError {
    /// Duplicate error for `record`.
    pub fn duplicate(record: &CanonicalRecord) -> Self {
        SinkError::Duplicate {
            publisher: record.publisher.clone(),
            native_id: record.native_id.clone(),
        }
    }
}

/// Persists canonical records.
pub trait Sink: Send + Sync {
    /// Stores one record.
    fn save(&self, record: CanonicalRecord) -> impl Future<Output = Result<(), SinkError>> + Send;
}

/// Keeps records in memory, rejecting duplicate `(publisher, native_id)` pairs.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<CanonicalRecord>>,
    keys: Mutex<HashSet<(String, String)>>,
}

impl MemorySink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies of the stored records, in save order.
    pub fn records(&self) -> Vec<CanonicalRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// True when nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, record: CanonicalRecord) -> Result<(), SinkError> {
        let mut keys = self.keys.lock().map_err(|e| SinkError::Storage(e.to_string()))?;
        if !keys.insert((record.publisher.clone(), record.native_id.clone())) {
            return Err(SinkError::duplicate(&record));
        }
        self.records
            .lock()
            .map_err(|e| SinkError::Storage(e.to_string()))?
            .push(record);
        Ok(())
    }
}

impl Sink for MemorySink {
    fn save(&self, record: CanonicalRecord) -> impl Future<Output = Result<(), SinkError>> + Send {
        std::future::ready(self.insert(record))
    }
}

/// Writes each record as one JSON line.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
}

/// The JSON lines sink on standard output.
pub type StdoutSink = JsonLinesSink<std::io::Stdout>;

impl JsonLinesSink<std::io::Stdout> {
    /// A sink writing to standard output.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    /// A sink writing to `out`.
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_line(&self, record: &CanonicalRecord) -> Result<(), SinkError> {
        let mut out = self.out.lock().map_err(|e| SinkError::Storage(e.to_string()))?;
        serde_json::to_writer(&mut *out, record)?;
        out.write_all(b"\n")?;
        out.flush()?;
        Ok(())
    }
}

impl<W: Write + Send> Sink for JsonLinesSink<W> {
    fn save(&self, record: CanonicalRecord) -> impl Future<Output = Result<(), SinkError>> + Send {
        std::future::ready(self.write_line(&record))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn canonical(native_id: &str) -> CanonicalRecord {
        CanonicalRecord {
            native_id: native_id.to_string(),
            publisher: "twitter".to_string(),
            raw_content: "{}".to_string(),
            body: "hi".to_string(),
            rule_values: "firehose".to_string(),
            rule_tags: "firehose".to_string(),
            posted_at: Utc.with_ymd_and_hms(2012, 5, 7, 15, 30, 0).unwrap(),
            latitude: 0.0,
            longitude: 0.0,
            place: String::new(),
            bio_place: String::new(),
            stream_id: 1,
        }
    }

    #[tokio::test]
    async fn test_memory_sink_rejects_duplicates() {
        let sink = MemorySink::new();
        sink.save(canonical("1")).await.unwrap();
        sink.save(canonical("2")).await.unwrap();

        let err = sink.save(canonical("1")).await.unwrap_err();
        assert!(matches!(err, SinkError::Duplicate { ref native_id, .. } if native_id == "1"));
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_json_lines_sink_writes_one_line_per_record() {
        let sink = JsonLinesSink::new(Vec::new());
        sink.save(canonical("1")).await.unwrap();
        sink.save(canonical("2")).await.unwrap();

        let written = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["native_id"], "1");
        assert_eq!(first["posted_at"], "2012-05-07T15:30:00Z");
    }
}
