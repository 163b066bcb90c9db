//! Immutable status snapshots.
//!
//! A `StatusSnapshot` is rebuilt from the full volume map after every committing
//! store mutation and handed out behind an `Arc`. Readers never lock.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::domain::{
    FailureClass, PauseReason, ResultCode, StatusReason, VolumeKind, VolumeStatus, VolumeTimingState,
};

/// Number of recent outcomes included in each projection
pub const RECENT_OUTCOMES: usize = 3;

/// Compact view of one outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub result_code: ResultCode,
    pub duration_ms: f64,
    pub failure_class: Option<FailureClass>,
}

/// Read-only projection of one volume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeProjection {
    pub id: String,
    pub kind: VolumeKind,
    pub enabled: bool,
    pub status: VolumeStatus,
    pub pause_reason: Option<PauseReason>,
    pub status_reason: Option<StatusReason>,
    pub interval_secs: u64,
    pub effective_interval_secs: f64,
    pub next_due_at: Option<f64>,
    pub last_ok_at: Option<f64>,
    pub consecutive_tick_failures: u32,
    pub last_tick_attempts: u32,
    pub tick_counter: u64,
    pub quarantine_release_at: Option<f64>,
    pub quarantine_escalation: u32,
    pub hdd_guard_violation: bool,
    pub late_slack_used: bool,
    /// Newest last
    pub recent: Vec<OutcomeSummary>,
}

impl From<&VolumeTimingState> for VolumeProjection {
    fn from(v: &VolumeTimingState) -> Self {
        let skip = v.last_results.len().saturating_sub(RECENT_OUTCOMES);
        Self {
            id: v.id.clone(),
            kind: v.kind,
            enabled: v.enabled,
            status: v.status,
            pause_reason: v.pause_reason,
            status_reason: v.status_reason,
            interval_secs: v.interval_secs,
            effective_interval_secs: v.effective_interval_secs,
            next_due_at: v.next_due_at,
            last_ok_at: v.last_ok_at,
            consecutive_tick_failures: v.consecutive_tick_failures,
            last_tick_attempts: v.last_tick_attempts,
            tick_counter: v.tick_counter,
            quarantine_release_at: v.quarantine_release_at,
            quarantine_escalation: v.quarantine_escalation,
            hdd_guard_violation: v.hdd_guard_violation,
            late_slack_used: v.late_slack_used,
            recent: v
                .last_results
                .iter()
                .skip(skip)
                .map(|r| OutcomeSummary {
                    result_code: r.result_code,
                    duration_ms: r.duration_ms,
                    failure_class: r.failure_class,
                })
                .collect(),
        }
    }
}

/// Versioned, immutable copy of every volume projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Monotonic seconds at build time
    pub generated_at: f64,
    pub version: u64,
    pub global_pause: bool,
    pub volumes: BTreeMap<String, VolumeProjection>,
}

impl StatusSnapshot {
    pub fn empty() -> Self {
        Self {
            generated_at: 0.0,
            version: 0,
            global_pause: false,
            volumes: BTreeMap::new(),
        }
    }

    pub fn build<'a>(
        generated_at: f64,
        version: u64,
        global_pause: bool,
        volumes: impl IntoIterator<Item = &'a VolumeTimingState>,
    ) -> Self {
        Self {
            generated_at,
            version,
            global_pause,
            volumes: volumes.into_iter().map(|v| (v.id.clone(), VolumeProjection::from(v))).collect(),
        }
    }

    /// Hex SHA-256 over the `id:enabled:status:next_due` rows.
    ///
    /// Used for change detection only; telemetry fields do not contribute.
    pub fn state_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (id, v) in &self.volumes {
            let due = v.next_due_at.map(|t| format!("{:.3}", t)).unwrap_or_default();
            hasher.update(format!("{}:{}:{}:{}\n", id, v.enabled, v.status.label(), due).as_bytes());
        }
        hasher.update(if self.global_pause { b"G1" } else { b"G0" });
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, id: &str) -> Option<&VolumeProjection> {
        self.volumes.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IoOutcome;

    fn volume(id: &str) -> VolumeTimingState {
        let mut v = VolumeTimingState::new(id, VolumeKind::Hdd, 180);
        v.enabled = true;
        v.status = VolumeStatus::Active;
        v
    }

    #[test]
    fn test_projection_keeps_last_three_outcomes() {
        let mut v = volume("E:");
        for i in 0..5 {
            v.push_result(IoOutcome::ok(i as f64));
        }
        let p = VolumeProjection::from(&v);
        let durations: Vec<f64> = p.recent.iter().map(|r| r.duration_ms).collect();
        assert_eq!(durations, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_state_hash_tracks_schedule() {
        let mut a = volume("E:");
        let before = StatusSnapshot::build(1.0, 1, false, [&a]).state_hash();
        a.next_due_at = Some(181.0);
        let after = StatusSnapshot::build(1.0, 2, false, [&a]).state_hash();
        assert_ne!(before, after);
    }

    #[test]
    fn test_state_hash_ignores_telemetry_and_version() {
        let mut a = volume("E:");
        let before = StatusSnapshot::build(1.0, 1, false, [&a]).state_hash();
        a.tick_counter = 9;
        a.push_result(IoOutcome::ok(1.0));
        let after = StatusSnapshot::build(5.0, 7, false, [&a]).state_hash();
        assert_eq!(before, after);
    }

    #[test]
    fn test_state_hash_tracks_global_pause() {
        let a = volume("E:");
        let off = StatusSnapshot::build(1.0, 1, false, [&a]).state_hash();
        let on = StatusSnapshot::build(1.0, 1, true, [&a]).state_hash();
        assert_ne!(off, on);
    }
}
