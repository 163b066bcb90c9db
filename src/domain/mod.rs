//! Domain types for Revenant
//!
//! This module contains all core domain types:
//! - VolumeTimingState: per-volume identity, config, schedule, status and health
//! - ScheduledOperation: a planned sentinel read or write
//! - IoOutcome: result of one executor attempt, plus its classification

pub mod operation;
pub mod outcome;
pub mod volume;

pub use operation::{OperationKind, Placement, ScheduledOperation, TieBreak};
pub use outcome::{FailureClass, IoOutcome, ResultCode, Verdict, classify};
pub use volume::{
    PauseReason, RESULT_WINDOW, StatusReason, VolumeKind, VolumeStatus, VolumeTimingState,
};
