//! # Pending Queue
//!
//! The FIFO handed from the receiving task to the consuming task, built on a
//! `tokio::sync::mpsc` channel: bounded when a capacity is configured (the
//! producer waits for space), unbounded otherwise. Only the consuming task
//! receives, so the receiver sits behind an uncontended async mutex.
//!
//! Depth above `warn_depth` is a backpressure *signal*: it is logged once per
//! crossing and counted. Real backpressure only exists when a capacity is set.

use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU64, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::framing::RawRecord;

/// Queue depth that triggers the backpressure log line.
pub const DEFAULT_WARN_DEPTH: usize = 1000;

/// Returned by [`PendingQueue::push`] once the queue has been closed.
#[derive(Debug, Error)]
#[error("pending queue is closed")]
pub struct QueueClosed(pub RawRecord);

enum RecordSender {
    Bounded(mpsc::Sender<RawRecord>),
    Unbounded(mpsc::UnboundedSender<RawRecord>),
}

enum RecordReceiver {
    Bounded(mpsc::Receiver<RawRecord>),
    Unbounded(mpsc::UnboundedReceiver<RawRecord>),
}

impl RecordReceiver {
    async fn recv(&mut self) -> Option<RawRecord> {
        match self {
            RecordReceiver::Bounded(rx) => rx.recv().await,
            RecordReceiver::Unbounded(rx) => rx.recv().await,
        }
    }

    fn try_recv(&mut self) -> Option<RawRecord> {
        match self {
            RecordReceiver::Bounded(rx) => rx.try_recv().ok(),
            RecordReceiver::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    fn close(&mut self) {
        match self {
            RecordReceiver::Bounded(rx) => rx.close(),
            RecordReceiver::Unbounded(rx) => rx.close(),
        }
    }
}

/// Channel-backed FIFO of raw records.
pub struct PendingQueue {
    sender: RecordSender,
    receiver: Mutex<RecordReceiver>,
    capacity: Option<usize>,
    warn_depth: usize,
    // Updated after each channel operation, so it may lag by one while a
    // push and a pop race.
    depth: AtomicIsize,
    above_warn_depth: AtomicBool,
    warn_crossings: AtomicU64,
}

impl PendingQueue {
    /// Creates an unbounded queue that warns above `warn_depth`.
    pub fn unbounded(warn_depth: usize) -> Self {
        Self::new(None, warn_depth)
    }

    /// Creates a queue. `capacity: None` means unbounded.
    pub fn new(capacity: Option<usize>, warn_depth: usize) -> Self {
        let capacity = capacity.map(|c| c.max(1));
        let (sender, receiver) = match capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity);
                (RecordSender::Bounded(tx), RecordReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (RecordSender::Unbounded(tx), RecordReceiver::Unbounded(rx))
            }
        };
        Self {
            sender,
            receiver: Mutex::new(receiver),
            capacity,
            warn_depth,
            depth: AtomicIsize::new(0),
            above_warn_depth: AtomicBool::new(false),
            warn_crossings: AtomicU64::new(0),
        }
    }

    /// Appends a record at the tail, waiting for space when the queue is bounded and full.
    pub async fn push(&self, record: RawRecord) -> Result<(), QueueClosed> {
        let sent = match &self.sender {
            RecordSender::Bounded(tx) => match tx.try_send(record) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Closed(record)) => Err(record),
                Err(mpsc::error::TrySendError::Full(record)) => {
                    log::debug!("Pending queue full ({} records), receiving task waiting", self.len());
                    tx.send(record).await.map_err(|e| e.0)
                }
            },
            RecordSender::Unbounded(tx) => tx.send(record).map_err(|e| e.0),
        };
        sent.map_err(QueueClosed)?;

        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        self.observe_depth(depth);
        Ok(())
    }

    /// Pops the head record if there is one.
    pub async fn try_pop(&self) -> Option<RawRecord> {
        let record = self.receiver.lock().await.try_recv();
        self.popped(record)
    }

    /// Pops the head record, waiting at most `max_wait` for one to arrive.
    pub async fn pop_wait(&self, max_wait: Duration) -> Option<RawRecord> {
        let mut receiver = self.receiver.lock().await;
        let record = tokio::time::timeout(max_wait, receiver.recv()).await.ok().flatten();
        self.popped(record)
    }

    /// Rejects further pushes and releases a producer waiting for space.
    /// Records already queued can still be popped.
    pub async fn close(&self) {
        self.receiver.lock().await.close();
    }

    /// True once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        match &self.sender {
            RecordSender::Bounded(tx) => tx.is_closed(),
            RecordSender::Unbounded(tx) => tx.is_closed(),
        }
    }

    /// Current depth.
    pub fn len(&self) -> usize {
        self.depth.load(Ordering::SeqCst).max(0) as usize
    }

    /// True when no record is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured bound, if any.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// How many times the depth crossed the warning threshold.
    pub fn warn_crossings(&self) -> u64 {
        self.warn_crossings.load(Ordering::Relaxed)
    }

    fn popped(&self, record: Option<RawRecord>) -> Option<RawRecord> {
        if record.is_some() {
            let depth = self.depth.fetch_sub(1, Ordering::SeqCst) - 1;
            if depth <= (self.warn_depth / 2) as isize {
                self.above_warn_depth.store(false, Ordering::Relaxed);
            }
        }
        record
    }

    fn observe_depth(&self, depth: isize) {
        if depth > self.warn_depth as isize && !self.above_warn_depth.swap(true, Ordering::Relaxed) {
            self.warn_crossings.fetch_add(1, Ordering::Relaxed);
            log::warn!("Queueing {} activities, consumer is falling behind", depth);
        }
    }
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::unbounded(DEFAULT_WARN_DEPTH)
    }
}
