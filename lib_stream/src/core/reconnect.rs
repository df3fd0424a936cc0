//! # Reconnect Supervisor
//!
//! Turns transient connection failures into a bounded retry loop. A supervisor
//! is bound to one recoverable operation (in practice the consume loop of a
//! [`FirehoseStream`](crate::ingestors::firehose::FirehoseStream)). Each
//! failure calls [`ReconnectSupervisor::attempt_to_reconnect`]; while budget
//! remains it waits a fixed delay on the calling task and tells the caller to
//! re-invoke the operation. Once the budget is spent it reports a fatal error
//! carrying the last failure description.
//!
//! ```text
//! ACTIVE --failure--> RETRYING --re-invoked--> ACTIVE
//!                        |
//!                        +--attempts exhausted--> FAILED (terminal)
//! ```

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Attempts allowed before a supervisor gives up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Fixed wait before each reconnect attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Raised when a supervisor has no retries left.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconnectError {
    /// Every allowed attempt has been used.
    #[error("{last_error} (gave up after {attempts} reconnect attempts)")]
    Exhausted {
        /// Retries made before giving up.
        attempts: u32,
        /// Description of the failure that exhausted the budget.
        last_error: String,
    },
}

/// Observable position in the supervisor state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// No failure since the last reset.
    Active,
    /// At least one failure recorded, budget left.
    Retrying,
    /// Budget exhausted. Terminal.
    Failed,
}

/// Failure classes a stream reports to its supervisors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport-level error (connect failure, bad status, broken stream).
    Error,
    /// The server closed the stream cleanly.
    Closed,
}

/// Bounded retry counter with a fixed delay.
#[derive(Debug)]
pub struct ReconnectSupervisor {
    label: String,
    attempt_count: u32,
    max_attempts: u32,
    delay: Duration,
    last_error: Option<String>,
    state: ReconnectState,
}

impl ReconnectSupervisor {
    /// Creates a supervisor with the default budget (5 attempts, 2 s apart).
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_policy(label, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }

    /// Creates a supervisor with an explicit budget.
    pub fn with_policy(label: impl Into<String>, max_attempts: u32, delay: Duration) -> Self {
        Self {
            label: label.into(),
            attempt_count: 0,
            max_attempts,
            delay,
            last_error: None,
            state: ReconnectState::Active,
        }
    }

    /// Records a failure and decides whether the bound operation may run again.
    ///
    /// Returns `Ok(())` after the retry delay when the caller should re-invoke
    /// the operation, or `Err` once `max_attempts` retries have already been made.
    pub async fn attempt_to_reconnect(&mut self, error_description: impl Into<String>) -> Result<(), ReconnectError> {
        let description = error_description.into();
        self.last_error = Some(description.clone());

        if self.state == ReconnectState::Failed || self.attempt_count >= self.max_attempts {
            self.state = ReconnectState::Failed;
            log::error!(
                "[{}] reconnect budget exhausted after {} attempts: {}",
                self.label,
                self.attempt_count,
                description
            );
            return Err(ReconnectError::Exhausted {
                attempts: self.attempt_count,
                last_error: description,
            });
        }

        self.attempt_count += 1;
        self.state = ReconnectState::Retrying;
        log::warn!(
            "[{}] {}. Reconnect attempt {}/{} in {}ms",
            self.label,
            description,
            self.attempt_count,
            self.max_attempts,
            self.delay.as_millis()
        );
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    /// Marks a successful reconnection: the next failure run gets the full budget again.
    pub fn reset(&mut self) {
        if self.attempt_count > 0 {
            log::info!("[{}] stream recovered after {} reconnect attempts", self.label, self.attempt_count);
        }
        self.attempt_count = 0;
        if self.state != ReconnectState::Failed {
            self.state = ReconnectState::Active;
        }
    }

    /// Retries made since the last reset.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt bound.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Most recent failure description, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Current state machine position.
    pub fn state(&self) -> ReconnectState {
        self.state
    }
}

/// How retry budgets are allotted to the two failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPolicy {
    /// Independent budgets for transport errors and clean closes.
    #[default]
    Split,
    /// One budget shared by both failure classes.
    Unified,
}

/// The supervisors owned by one stream.
#[derive(Debug)]
pub enum RetryBudget {
    /// One supervisor per failure class.
    Split {
        /// Budget for transport errors.
        on_error: ReconnectSupervisor,
        /// Budget for clean closes.
        on_close: ReconnectSupervisor,
    },
    /// A single supervisor for every failure.
    Unified(ReconnectSupervisor),
}

impl RetryBudget {
    /// Builds the supervisors for `policy`, each with `max_attempts` and `delay`.
    pub fn new(policy: BudgetPolicy, max_attempts: u32, delay: Duration) -> Self {
        match policy {
            BudgetPolicy::Split => RetryBudget::Split {
                on_error: ReconnectSupervisor::with_policy("error", max_attempts, delay),
                on_close: ReconnectSupervisor::with_policy("close", max_attempts, delay),
            },
            BudgetPolicy::Unified => {
                RetryBudget::Unified(ReconnectSupervisor::with_policy("reconnect", max_attempts, delay))
            }
        }
    }

    /// The supervisor responsible for `kind`.
    pub fn supervisor_for(&mut self, kind: FailureKind) -> &mut ReconnectSupervisor {
        match (self, kind) {
            (RetryBudget::Split { on_error, .. }, FailureKind::Error) => on_error,
            (RetryBudget::Split { on_close, .. }, FailureKind::Closed) => on_close,
            (RetryBudget::Unified(supervisor), _) => supervisor,
        }
    }

    /// Resets every supervisor after a successful reconnection.
    pub fn reset(&mut self) {
        match self {
            RetryBudget::Split { on_error, on_close } => {
                on_error.reset();
                on_close.reset();
            }
            RetryBudget::Unified(supervisor) => supervisor.reset(),
        }
    }
}

impl Default for RetryBudget {
    fn default() -> Self {
        RetryBudget::new(BudgetPolicy::Split, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}
