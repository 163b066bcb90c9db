//! Jitter planner.
//!
//! Turns volume state into `ScheduledOperation`s. Planning is a pure
//! computation over copies of the store's state; nothing here mutates the
//! store. The scheduler loop commits what the planner returns.
//!
//! Volumes are grouped by the grid cell of their nominal time. A group of one
//! goes through the single-volume search, larger groups are packed.

pub mod interval;
pub mod jitter;
mod preview;
pub mod tiebreak;

pub use interval::{IntervalResolution, operation_kind, resolve_interval};
pub use jitter::{ANY_SPACING_SECS, Placed, PlacementParams, WRITE_SPACING_SECS, align};
pub use preview::{PreviewEntry, preview_horizon_secs};
pub use tiebreak::{DailySeed, TieBreaker};

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::config::SchedulerConfig;
use crate::domain::{OperationKind, ScheduledOperation, StatusReason, VolumeTimingState};
use jitter::{Bounds, PackMember, Slot, align_not_before};

/// Lead time before the first operation of a volume
pub const FIRST_LEAD_SECS: f64 = 0.5;

/// Lead time for volumes that already have a success on record
pub const REPEAT_LEAD_SECS: f64 = 0.05;

/// One planning decision, ready to commit
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedVolume {
    pub op: ScheduledOperation,
    pub effective_interval_secs: f64,
    pub status_reason: Option<StatusReason>,
    pub late_slack_used: bool,
}

#[derive(Debug, Clone)]
pub struct JitterPlanner {
    config: SchedulerConfig,
    tie: TieBreaker,
}

impl JitterPlanner {
    pub fn new(config: SchedulerConfig, install_id: &str, date: NaiveDate) -> Self {
        Self {
            config,
            tie: TieBreaker::new(install_id, date),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SchedulerConfig) {
        self.config = config;
    }

    /// Re-derive the tie-break seed when the local date changed
    pub fn roll_date(&mut self, date: NaiveDate) -> bool {
        self.tie.roll(date)
    }

    pub fn tie_breaker(&self) -> &TieBreaker {
        &self.tie
    }

    pub fn params(&self) -> PlacementParams {
        PlacementParams {
            jitter_secs: self.config.jitter_secs,
            grid_secs: self.grid_secs(),
            hdd_max_gap_secs: self.config.hdd_max_gap_secs,
            deadline_margin_secs: self.config.deadline_margin_secs,
        }
    }

    pub fn grid_secs(&self) -> f64 {
        self.config.grid_ms as f64 / 1000.0
    }

    pub fn effective_interval(&self, v: &VolumeTimingState) -> IntervalResolution {
        resolve_interval(v.interval_secs, v.kind, &self.config)
    }

    pub fn operation_kind(&self, v: &VolumeTimingState) -> OperationKind {
        operation_kind(v.kind, self.config.treat_unknown_as_ssd)
    }

    /// `last attempt + effective`, else `now + effective` for a fresh volume.
    ///
    /// Failed attempts move the anchor too, so a failing volume is retried
    /// one interval later rather than on the next tick.
    pub fn canonical_time(&self, v: &VolumeTimingState, now: f64) -> f64 {
        let effective = self.effective_interval(v).effective_secs;
        match v.last_operation_at.or(v.last_ok_at) {
            Some(anchor) => anchor + effective,
            None => now + effective,
        }
    }

    pub fn lead_secs(v: &VolumeTimingState) -> f64 {
        if v.last_ok_at.is_some() { REPEAT_LEAD_SECS } else { FIRST_LEAD_SECS }
    }

    pub fn rank(&self, v: &VolumeTimingState) -> u64 {
        self.tie.rank(&v.identity())
    }

    fn bounds(&self, v: &VolumeTimingState, now: f64) -> Bounds {
        let earliest = now + Self::lead_secs(v);
        Bounds {
            nominal: align_not_before(self.canonical_time(v, now), earliest, self.grid_secs()),
            earliest,
            kind: self.operation_kind(v),
            spinning: v.kind.is_spinning(),
            last_operation_at: v.last_operation_at,
        }
    }

    /// Grid cell index of a volume's nominal time
    fn cell(&self, nominal: f64) -> i64 {
        (nominal / self.grid_secs()).round() as i64
    }

    /// True if placing a spinning disk at `at` exceeds the HDD gap
    pub fn violates_guard(&self, v: &VolumeTimingState, at: f64) -> bool {
        match v.last_operation_at {
            Some(last) if v.kind.is_spinning() => at - last > self.config.hdd_max_gap_secs + 1e-6,
            _ => false,
        }
    }

    /// Plan every volume in `volumes` against the `existing` queue.
    ///
    /// Callers pass only volumes that need a new operation. Results come back
    /// in placement order, cell by cell.
    pub fn plan(&self, volumes: &[VolumeTimingState], existing: &[ScheduledOperation], now: f64) -> Vec<PlannedVolume> {
        let params = self.params();
        let mut placed: Vec<Placed> = existing
            .iter()
            .map(|op| Placed {
                at: op.at,
                kind: op.kind,
            })
            .collect();

        let mut cells: BTreeMap<i64, Vec<(usize, Bounds)>> = BTreeMap::new();
        for (i, v) in volumes.iter().enumerate() {
            let b = self.bounds(v, now);
            cells.entry(self.cell(b.nominal)).or_default().push((i, b));
        }

        let mut out = Vec::with_capacity(volumes.len());
        for (cell, mut members) in cells {
            let pack_size = members.len();
            if pack_size == 1 {
                let (i, b) = members[0];
                let slot = jitter::place_single(&b, &placed, &params);
                placed.push(Placed { at: slot.at, kind: b.kind });
                out.push(self.finish(&volumes[i], &b, slot, 1));
                continue;
            }

            members.sort_by_key(|(i, _)| self.rank(&volumes[*i]));
            let anchor = cell as f64 * self.grid_secs();
            let pack_members: Vec<PackMember> = members
                .iter()
                .map(|(i, b)| PackMember {
                    bounds: *b,
                    speed_mbps: volumes[*i].measured_speed_mbps,
                    rank: self.rank(&volumes[*i]),
                })
                .collect();
            tracing::debug!(anchor, pack_size, "Packing same-tick volumes");
            for (m, slot) in jitter::pack(anchor, &pack_members, &mut placed, &params) {
                let (i, b) = members[m];
                out.push(self.finish(&volumes[i], &b, slot, pack_size));
            }
        }
        out
    }

    fn finish(&self, v: &VolumeTimingState, b: &Bounds, slot: Slot, pack_size: usize) -> PlannedVolume {
        let resolution = self.effective_interval(v);
        PlannedVolume {
            op: ScheduledOperation {
                volume: v.id.clone(),
                at: slot.at,
                kind: b.kind,
                offset_ms: ((slot.at - b.nominal) * 1000.0).round(),
                placement: slot.placement,
                pack_size,
                tie: self.tie.telemetry(&v.identity()),
            },
            effective_interval_secs: resolution.effective_secs,
            status_reason: resolution.reason,
            late_slack_used: slot.late_slack,
        }
    }
}
