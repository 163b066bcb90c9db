//! Bounded retry around the I/O executor.
//!
//! Each attempt is classified with `domain::classify`. Success ends the tick,
//! a gone device aborts the remaining attempts, anything else is retried
//! after the configured backoff.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::domain::{FailureClass, IoOutcome, OperationKind, Verdict, classify};

use super::executor::{IoExecutor, VolumeTarget};

/// Result of one retried operation
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub kind: OperationKind,
    /// Outcome of the last attempt made
    pub outcome: IoOutcome,
    pub attempts: u32,
    pub succeeded: bool,
    pub aborted: bool,
}

/// Result of a manual ping: every step in order
#[derive(Debug, Clone, PartialEq)]
pub struct PingReport {
    pub steps: Vec<AttemptReport>,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn set_config(&mut self, config: RetryConfig) {
        self.config = config;
    }

    /// Delay slept before attempt `attempt` (0-based); the last entry repeats
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ms = self
            .config
            .backoff_ms
            .get(attempt as usize)
            .or(self.config.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }

    /// Run one operation with the attempt budget
    pub async fn run(&self, executor: &dyn IoExecutor, target: &VolumeTarget, kind: OperationKind) -> AttemptReport {
        self.run_until(executor, target, kind, None).await
    }

    /// Like `run`, but a failure of class `stop_on` ends the attempts at once
    async fn run_until(
        &self,
        executor: &dyn IoExecutor,
        target: &VolumeTarget,
        kind: OperationKind,
        stop_on: Option<FailureClass>,
    ) -> AttemptReport {
        let budget = self.config.attempts.max(1);
        let mut last = None;

        for attempt in 0..budget {
            let delay = self.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let outcome = executor.perform(target, kind).await;
            let attempts = attempt + 1;
            match classify(&outcome) {
                Verdict::Success => {
                    return AttemptReport {
                        kind,
                        outcome,
                        attempts,
                        succeeded: true,
                        aborted: false,
                    };
                }
                Verdict::Abort => {
                    tracing::warn!(volume = %target.id, attempts, details = %outcome.details, "Device gone, aborting attempts");
                    return AttemptReport {
                        kind,
                        outcome,
                        attempts,
                        succeeded: false,
                        aborted: true,
                    };
                }
                Verdict::Retry if stop_on.is_some() && outcome.failure_class == stop_on => {
                    return AttemptReport {
                        kind,
                        outcome,
                        attempts,
                        succeeded: false,
                        aborted: false,
                    };
                }
                Verdict::Retry => {
                    tracing::debug!(
                        volume = %target.id,
                        attempt = attempts,
                        failure = ?outcome.failure_class,
                        "Attempt failed, retrying"
                    );
                    last = Some(outcome);
                }
            }
        }

        AttemptReport {
            kind,
            outcome: last.unwrap_or_else(|| IoOutcome::failed(crate::domain::ResultCode::Error, FailureClass::Other, "no attempts")),
            attempts: budget,
            succeeded: false,
            aborted: false,
        }
    }

    /// Manual ping: read, and if the sentinel is missing write it then read again
    pub async fn ping(&self, executor: &dyn IoExecutor, target: &VolumeTarget) -> PingReport {
        let mut steps = Vec::with_capacity(3);
        let read = self
            .run_until(executor, target, OperationKind::Read, Some(FailureClass::MissingSentinel))
            .await;
        let missing = read.outcome.failure_class == Some(FailureClass::MissingSentinel);
        steps.push(read);

        if missing {
            let write = self.run(executor, target, OperationKind::Write).await;
            let wrote = write.succeeded;
            steps.push(write);
            if wrote {
                steps.push(self.run(executor, target, OperationKind::Read).await);
            }
        }

        let succeeded = steps.last().is_some_and(|s| s.succeeded);
        PingReport { steps, succeeded }
    }
}
