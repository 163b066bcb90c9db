//! Effective interval and operation kind resolution

use crate::config::SchedulerConfig;
use crate::domain::{OperationKind, StatusReason, VolumeKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalResolution {
    pub effective_secs: f64,
    pub reason: Option<StatusReason>,
}

/// Clamp the user interval to the global bounds, then cap spinning disks
/// below the HDD gap minus the deadline margin.
pub fn resolve_interval(user_secs: u64, kind: VolumeKind, config: &SchedulerConfig) -> IntervalResolution {
    let user = user_secs as f64;
    let min = config.interval_min_secs as f64;
    let max = config.interval_max_secs as f64;

    let clamped = user.clamp(min, max);
    let mut reason = (clamped != user).then_some(StatusReason::Clamped);
    let mut effective = clamped;

    if kind.is_spinning() {
        let cap = config.hdd_max_gap_secs - config.deadline_margin_secs;
        if clamped > cap {
            effective = cap.max(min);
            reason = Some(if effective < user {
                StatusReason::HddCapped
            } else {
                StatusReason::Clamped
            });
        }
    }

    IntervalResolution {
        effective_secs: effective,
        reason,
    }
}

/// HDD and RAM-disk volumes get writes; Unknown depends on configuration
pub fn operation_kind(kind: VolumeKind, treat_unknown_as_ssd: bool) -> OperationKind {
    match kind {
        VolumeKind::Hdd | VolumeKind::RamDisk => OperationKind::Write,
        VolumeKind::Unknown if !treat_unknown_as_ssd => OperationKind::Write,
        _ => OperationKind::Read,
    }
}
