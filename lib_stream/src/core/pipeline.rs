//! # Ingestion Pipeline
//!
//! Two tasks joined by the [`PendingQueue`]:
//!
//! - the **receiving task** runs [`FirehoseStream::consume`] and appends every
//!   record to the queue tail;
//! - the **consuming task** pops records in FIFO order, normalizes them and
//!   hands them to the [`Sink`].
//!
//! A record that fails to decode, normalize or save is logged, counted and
//! skipped; it never stops the consumer. The pipeline ends when the shutdown
//! token fires or the stream gives up, in both cases after the consumer has
//! drained what was already queued (unless draining is disabled).

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::configs::PipelineConfig;
use crate::connections::sink::Sink;
use crate::framing::RawRecord;
use crate::ingestors::firehose::{FirehoseError, FirehoseStream};
use crate::ingestors::http_stream::Transport;
use crate::normalize::Normalizer;

use super::pending_queue::PendingQueue;

/// Default longest wait of the consumer on an empty queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Consumer behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Longest wait on an empty queue before checking for shutdown again.
    pub poll_interval: Duration,
    /// Process queued records before exiting on shutdown.
    pub drain_on_shutdown: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_on_shutdown: true,
        }
    }
}

impl From<&PipelineConfig> for PipelineOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            drain_on_shutdown: config.drain_on_shutdown,
        }
    }
}

impl PipelineConfig {
    /// The pending queue this section describes.
    pub fn pending_queue(&self) -> PendingQueue {
        PendingQueue::new(self.queue_capacity, self.queue_warn_depth)
    }
}

/// Record counts of a finished pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineReport {
    /// Records taken off the queue by the consumer.
    pub received: u64,
    /// Records the sink accepted.
    pub persisted: u64,
    /// Records that could not be decoded or normalized.
    pub malformed: u64,
    /// Records the sink refused.
    pub rejected: u64,
    /// Records still queued when the consumer stopped without draining.
    pub abandoned: u64,
}

/// Why the pipeline stopped abnormally.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The stream exhausted its reconnect budget.
    #[error(transparent)]
    Stream(#[from] FirehoseError),
    /// A pipeline task panicked or was aborted.
    #[error("pipeline task failed: {0}")]
    Task(String),
}

/// Receiving task, consuming task and the queue between them.
pub struct IngestionPipeline<T, S> {
    stream: FirehoseStream<T>,
    normalizer: Normalizer,
    sink: Arc<S>,
    queue: Arc<PendingQueue>,
    options: PipelineOptions,
}

impl<T, S> IngestionPipeline<T, S>
where
    T: Transport + 'static,
    S: Sink + 'static,
{
    /// Assembles a pipeline. Shutdown is driven by the stream's token.
    pub fn new(
        stream: FirehoseStream<T>,
        normalizer: Normalizer,
        sink: Arc<S>,
        queue: Arc<PendingQueue>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            stream,
            normalizer,
            sink,
            queue,
            options,
        }
    }

    /// Token that stops the pipeline.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.stream.shutdown_token()
    }

    /// The queue between the two tasks.
    pub fn queue(&self) -> Arc<PendingQueue> {
        Arc::clone(&self.queue)
    }

    /// Runs both tasks until shutdown or a fatal stream failure.
    pub async fn run(self) -> Result<PipelineReport, PipelineError> {
        let Self {
            mut stream,
            normalizer,
            sink,
            queue,
            options,
        } = self;
        let shutdown = stream.shutdown_token();
        let producer_done = CancellationToken::new();

        let consumer = tokio::spawn(consume_records(
            normalizer,
            sink,
            Arc::clone(&queue),
            options,
            shutdown.clone(),
            producer_done.clone(),
        ));

        let mut handler = Arc::clone(&queue);
        let receiver = tokio::spawn(async move { stream.consume(&mut handler).await });

        let outcome = match receiver.await {
            Ok(Ok(summary)) => {
                log::info!(
                    "Receiving task stopped after {} sessions and {} records",
                    summary.sessions,
                    summary.records
                );
                Ok(())
            }
            Ok(Err(e)) => Err(PipelineError::from(e)),
            Err(e) => Err(PipelineError::Task(format!("receiving task: {}", e))),
        };
        if let Err(e) = &outcome {
            log::error!("FATAL: {}. Shutting down the pipeline", e);
            shutdown.cancel();
        }
        producer_done.cancel();

        let report = consumer
            .await
            .map_err(|e| PipelineError::Task(format!("consuming task: {}", e)))?;
        log::info!(
            "Pipeline finished: {} received, {} persisted, {} malformed, {} rejected, {} abandoned",
            report.received,
            report.persisted,
            report.malformed,
            report.rejected,
            report.abandoned
        );
        outcome.map(|_| report)
    }
}

/// The consuming task.
///
/// Exits once the producer is done and the queue is empty, or immediately on
/// shutdown when draining is disabled.
async fn consume_records<S: Sink>(
    normalizer: Normalizer,
    sink: Arc<S>,
    queue: Arc<PendingQueue>,
    options: PipelineOptions,
    shutdown: CancellationToken,
    producer_done: CancellationToken,
) -> PipelineReport {
    let mut report = PipelineReport::default();

    loop {
        if !options.drain_on_shutdown && shutdown.is_cancelled() {
            break;
        }
        let record = match queue.try_pop().await {
            Some(record) => record,
            None => {
                if producer_done.is_cancelled() {
                    break;
                }
                tokio::select! {
                    popped = queue.pop_wait(options.poll_interval) => match popped {
                        Some(record) => record,
                        None => continue,
                    },
                    _ = producer_done.cancelled() => continue,
                    _ = shutdown.cancelled(), if !options.drain_on_shutdown => continue,
                }
            }
        };
        report.received += 1;
        process_record(&normalizer, sink.as_ref(), record, &mut report).await;
    }

    queue.close().await;
    while queue.try_pop().await.is_some() {
        report.abandoned += 1;
    }
    if report.abandoned > 0 {
        log::warn!("Shutdown abandoned {} queued records", report.abandoned);
    }
    report
}

async fn process_record<S: Sink>(normalizer: &Normalizer, sink: &S, record: RawRecord, report: &mut PipelineReport) {
    let canonical = match normalizer.normalize(&record) {
        Ok(canonical) => canonical,
        Err(e) => {
            report.malformed += 1;
            log::warn!("Dropping record #{}: {}", record.sequence(), e);
            return;
        }
    };

    let native_id = canonical.native_id.clone();
    match sink.save(canonical).await {
        Ok(()) => {
            report.persisted += 1;
            log::debug!("Saved {} record {}", normalizer.publisher(), native_id);
        }
        Err(e) => {
            report.rejected += 1;
            log::warn!("Sink rejected {} record {}: {}", normalizer.publisher(), native_id, e);
        }
    }
}
