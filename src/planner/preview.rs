//! Upcoming-operations preview.
//!
//! A forward simulation over cloned state that assumes every operation
//! succeeds at its planned time. Display only; nothing is committed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::JitterPlanner;
use crate::config::SchedulerConfig;
use crate::domain::{OperationKind, ScheduledOperation, VolumeTimingState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewEntry {
    pub volume: String,
    pub at: f64,
    pub kind: OperationKind,
    /// False for operations already in the real queue
    pub is_preview: bool,
}

/// How far ahead the preview looks
pub fn preview_horizon_secs(config: &SchedulerConfig) -> f64 {
    5.0 * config.hdd_max_gap_secs + 1.0
}

impl JitterPlanner {
    pub fn preview(
        &self,
        volumes: &[VolumeTimingState],
        pending: &[ScheduledOperation],
        now: f64,
        count: usize,
    ) -> Vec<PreviewEntry> {
        let horizon = now + preview_horizon_secs(self.config());
        let mut sim: BTreeMap<String, VolumeTimingState> = volumes
            .iter()
            .filter(|v| v.is_schedulable())
            .map(|v| (v.id.clone(), v.clone()))
            .collect();
        let mut queue: Vec<(ScheduledOperation, bool)> = pending.iter().map(|op| (op.clone(), false)).collect();
        let mut entries = Vec::with_capacity(count);
        let mut clock = now;

        while entries.len() < count {
            let needing: Vec<VolumeTimingState> = sim
                .values()
                .filter(|v| !queue.iter().any(|(op, _)| op.volume == v.id))
                .cloned()
                .collect();
            if !needing.is_empty() {
                let existing: Vec<ScheduledOperation> = queue.iter().map(|(op, _)| op.clone()).collect();
                for planned in self.plan(&needing, &existing, clock) {
                    queue.push((planned.op, true));
                }
            }

            let next = queue
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.0.at.total_cmp(&b.1.0.at))
                .map(|(i, _)| i);
            let Some(idx) = next else { break };
            let (op, is_preview) = queue.remove(idx);
            if op.at > horizon {
                break;
            }

            clock = clock.max(op.at);
            if let Some(v) = sim.get_mut(&op.volume) {
                v.last_ok_at = Some(op.at);
                v.last_operation_at = Some(op.at);
            }
            entries.push(PreviewEntry {
                volume: op.volume,
                at: op.at,
                kind: op.kind,
                is_preview,
            });
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PauseReason, VolumeKind, VolumeStatus};
    use chrono::NaiveDate;

    fn planner() -> JitterPlanner {
        JitterPlanner::new(
            SchedulerConfig::default(),
            "0f8fad5b-d9cb-469f-a165-70867728950e",
            NaiveDate::from_ymd_opt(2025, 10, 10).unwrap(),
        )
    }

    fn volume(id: &str, kind: VolumeKind, interval: u64) -> VolumeTimingState {
        let mut v = VolumeTimingState::new(id, kind, interval);
        v.enabled = true;
        v.status = VolumeStatus::Active;
        v
    }

    #[test]
    fn test_horizon() {
        assert_eq!(preview_horizon_secs(&SchedulerConfig::default()), 1501.0);
    }

    #[test]
    fn test_preview_repeats_volume() {
        let p = planner();
        let v = volume("E:", VolumeKind::Ssd, 60);
        let entries = p.preview(&[v], &[], 0.0, 3);
        let times: Vec<f64> = entries.iter().map(|e| e.at).collect();
        assert_eq!(times, vec![60.0, 120.0, 180.0]);
        assert!(entries.iter().all(|e| e.is_preview));
    }

    #[test]
    fn test_preview_includes_pending_first() {
        let p = planner();
        let v = volume("E:", VolumeKind::Ssd, 60);
        let pending = ScheduledOperation::manual("E:", 30.0, OperationKind::Read);
        let entries = p.preview(&[v], &[pending], 0.0, 2);
        assert_eq!(entries[0].at, 30.0);
        assert!(!entries[0].is_preview);
        assert_eq!(entries[1].at, 90.0);
        assert!(entries[1].is_preview);
    }

    #[test]
    fn test_preview_skips_paused_volumes() {
        let p = planner();
        let mut v = volume("E:", VolumeKind::Ssd, 60);
        v.status = VolumeStatus::Paused;
        v.pause_reason = Some(PauseReason::User);
        assert!(p.preview(&[v], &[], 0.0, 5).is_empty());
    }

    #[test]
    fn test_preview_stops_at_horizon() {
        let p = planner();
        let v = volume("E:", VolumeKind::Ssd, 3600);
        assert!(p.preview(&[v], &[], 0.0, 5).is_empty());
    }

    #[test]
    fn test_preview_does_not_mutate_input() {
        let p = planner();
        let v = volume("E:", VolumeKind::Ssd, 60);
        let before = v.clone();
        let _ = p.preview(std::slice::from_ref(&v), &[], 0.0, 4);
        assert_eq!(v, before);
    }
}
