//! Scheduled operation types
//!
//! A `ScheduledOperation` is produced by the planner, held in the loop's
//! pending queue, and consumed exactly once.

use serde::{Deserialize, Serialize};

/// Kind of sentinel I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Read,
    Write,
}

/// How the planner arrived at a placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    InWindow,
    Expanded,
    Overflow,
    Manual,
}

/// Tie-break telemetry attached to every planned operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieBreak {
    /// Local date the seed was derived for ("YYYY-MM-DD")
    pub epoch: String,
    pub rank: u64,
    pub seed_hex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledOperation {
    pub volume: String,
    /// Planned monotonic time in seconds
    pub at: f64,
    pub kind: OperationKind,
    /// Offset from the canonical time
    pub offset_ms: f64,
    pub placement: Placement,
    /// Number of volumes in the same-tick set (1 for single placement)
    pub pack_size: usize,
    pub tie: TieBreak,
}

impl ScheduledOperation {
    /// One-shot operation outside the regular schedule
    pub fn manual(volume: &str, at: f64, kind: OperationKind) -> Self {
        Self {
            volume: volume.to_string(),
            at,
            kind,
            offset_ms: 0.0,
            placement: Placement::Manual,
            pack_size: 1,
            tie: TieBreak {
                epoch: String::new(),
                rank: 0,
                seed_hex: String::new(),
            },
        }
    }
}
