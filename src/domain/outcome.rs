//! I/O outcome types.
//!
//! Every executor attempt returns an `IoOutcome` value. The retry controller
//! classifies it with `classify`, a pure function of the outcome.

use serde::{Deserialize, Serialize};

/// Result code surfaced to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok,
    /// Succeeded but exceeded the soft timing budget
    Partial,
    SkippedLocked,
    Error,
}

impl ResultCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ResultCode::Ok | ResultCode::Partial)
    }
}

/// Failure class used for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    /// Volume is physically absent
    DeviceGone,
    Locked,
    IoFatal,
    /// Sentinel file does not exist yet
    MissingSentinel,
    Other,
}

/// Outcome of one executor attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoOutcome {
    pub result_code: ResultCode,
    pub duration_ms: f64,
    pub failure_class: Option<FailureClass>,
    pub details: String,
    /// Measured throughput, when the executor can tell
    pub throughput_mbps: Option<f64>,
}

impl IoOutcome {
    pub fn ok(duration_ms: f64) -> Self {
        Self {
            result_code: ResultCode::Ok,
            duration_ms,
            failure_class: None,
            details: String::new(),
            throughput_mbps: None,
        }
    }

    pub fn failed(result_code: ResultCode, failure_class: FailureClass, details: &str) -> Self {
        Self {
            result_code,
            duration_ms: 0.0,
            failure_class: Some(failure_class),
            details: details.to_string(),
            throughput_mbps: None,
        }
    }

    pub fn with_throughput(mut self, mbps: f64) -> Self {
        self.throughput_mbps = Some(mbps);
        self
    }
}

/// What the retry controller does after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Terminal, the tick succeeded
    Success,
    /// Terminal, remaining attempts are pointless
    Abort,
    /// Try again if budget remains
    Retry,
}

/// Classify an attempt outcome
pub fn classify(outcome: &IoOutcome) -> Verdict {
    if outcome.failure_class == Some(FailureClass::DeviceGone) {
        return Verdict::Abort;
    }
    if outcome.result_code.is_success() {
        return Verdict::Success;
    }
    Verdict::Retry
}
