//! # Core Engine Module
//!
//! The moving parts between the network and the sink. The components in this
//! module are asynchronous and safe to share between the two pipeline tasks.
//!
//! ## Core Components:
//!
//! - **`reconnect`**: the bounded retry counter (`ReconnectSupervisor`) and the
//!   `RetryBudget` that allots supervisors to failure classes.
//!
//! - **`pending_queue`**: the mutex-guarded FIFO between the receiving and the
//!   consuming task, with an optional bound and a depth warning.
//!
//! - **`pipeline`**: the `IngestionPipeline` that runs both tasks, isolates
//!   failing records and coordinates shutdown.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Bounded reconnect supervision.
pub mod reconnect;
/// FIFO shared by the receiving and consuming tasks.
pub mod pending_queue;
/// Receiving task, consuming task and shutdown.
pub mod pipeline;

pub use pending_queue::{PendingQueue, QueueClosed};
pub use pipeline::{IngestionPipeline, PipelineError, PipelineOptions, PipelineReport};
pub use reconnect::{BudgetPolicy, FailureKind, ReconnectError, ReconnectState, ReconnectSupervisor, RetryBudget};
