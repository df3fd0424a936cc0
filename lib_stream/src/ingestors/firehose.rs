//! # Supervised Firehose Stream
//!
//! Wraps a [`StreamClient`] in the reconnect policy. A clean close and a
//! transport error are each fed to a [`ReconnectSupervisor`] out of the
//! stream's [`RetryBudget`]; while budget remains the session is simply
//! re-run. A session that delivered at least one record counts as a
//! successful reconnection and refills the budget.
//!
//! The consume loop is iterative: however many reconnects happen, the
//! call stack does not grow.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::pending_queue::PendingQueue;
use crate::core::reconnect::{FailureKind, ReconnectError, RetryBudget};
use crate::framing::RawRecord;

use super::http_stream::{ConnectionContext, SessionEnd, StreamClient, StreamObserver, Transport, TransportError};

/// Description handed to the close supervisor.
pub const CLOSED_DESCRIPTION: &str = "Connection Closed";

/// Terminal failure of a supervised stream.
#[derive(Debug, Error)]
pub enum FirehoseError {
    /// A supervisor ran out of retries.
    #[error("stream gave up: {0}")]
    Fatal(#[from] ReconnectError),
}

/// Destination for the records of a supervised stream.
pub trait RecordHandler: Send {
    /// Called for each record in stream order.
    fn handle(&mut self, record: RawRecord) -> impl Future<Output = ()> + Send;
}

/// Records go straight to the tail of the shared pending queue.
impl RecordHandler for Arc<PendingQueue> {
    fn handle(&mut self, record: RawRecord) -> impl Future<Output = ()> + Send {
        async move {
            if let Err(rejected) = self.push(record).await {
                log::warn!("Dropping record #{}: {}", rejected.0.sequence(), rejected);
            }
        }
    }
}

/// Totals returned by [`FirehoseStream::consume`] when it stops without a fatal error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    /// Sessions opened, including failed connection attempts.
    pub sessions: u64,
    /// Records handed to the handler.
    pub records: u64,
}

/// Observer for one session: forwards records and remembers how the session failed.
struct SupervisedSession<'a, H> {
    handler: &'a mut H,
    delivered: u64,
    failure: Option<(FailureKind, String)>,
}

impl<H: RecordHandler> StreamObserver for SupervisedSession<'_, H> {
    fn on_record(&mut self, record: RawRecord) -> impl Future<Output = ()> + Send {
        self.delivered += 1;
        self.handler.handle(record)
    }

    fn on_connection_close(&mut self, _context: &ConnectionContext) {
        self.failure = Some((FailureKind::Closed, CLOSED_DESCRIPTION.to_string()));
    }

    fn on_error(&mut self, _context: &ConnectionContext, error: &TransportError) {
        self.failure = Some((FailureKind::Error, format!("Connection Error. Reason was: {}", error)));
    }
}

/// A stream client that reconnects within its retry budget.
pub struct FirehoseStream<T> {
    client: StreamClient<T>,
    budget: RetryBudget,
}

impl<T: Transport> FirehoseStream<T> {
    /// Binds `client` to `budget`.
    pub fn new(client: StreamClient<T>, budget: RetryBudget) -> Self {
        Self { client, budget }
    }

    /// Token that stops the stream.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.client.shutdown_token()
    }

    /// Runs sessions back to back until shutdown or until a supervisor gives up.
    ///
    /// Returns `Ok` only when the client's shutdown token ended the stream.
    pub async fn consume<H: RecordHandler>(&mut self, handler: &mut H) -> Result<ConsumeSummary, FirehoseError> {
        let shutdown = self.client.shutdown_token();
        let mut summary = ConsumeSummary::default();

        loop {
            let mut session = SupervisedSession {
                handler: &mut *handler,
                delivered: 0,
                failure: None,
            };
            let end = self.client.connect(&mut session).await;
            let (delivered, failure) = (session.delivered, session.failure);
            summary.sessions += 1;
            summary.records += delivered;

            if end == SessionEnd::Cancelled {
                log::info!("Stream {} stopped after {} records", self.client.url(), summary.records);
                return Ok(summary);
            }
            if delivered > 0 {
                self.budget.reset();
            }

            let (kind, description) = failure.unwrap_or((FailureKind::Closed, CLOSED_DESCRIPTION.to_string()));
            let supervisor = self.budget.supervisor_for(kind);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    log::info!("Shutdown during reconnect delay for {}", self.client.url());
                    return Ok(summary);
                }
                retry = supervisor.attempt_to_reconnect(description) => retry?,
            }
        }
    }
}
