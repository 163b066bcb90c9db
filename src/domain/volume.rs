//! Volume record and related types
//!
//! `VolumeTimingState` is the complete per-volume state. It is owned by the
//! `TimingStore`; everything else works on clones.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;

use super::outcome::IoOutcome;

/// Number of outcomes kept in the rolling result window
pub const RESULT_WINDOW: usize = 10;

/// Detected or declared storage type of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VolumeKind {
    #[serde(rename = "HDD")]
    Hdd,
    #[serde(rename = "SSD")]
    Ssd,
    Removable,
    Network,
    #[serde(rename = "RAM-disk")]
    RamDisk,
    #[default]
    Unknown,
}

impl VolumeKind {
    /// Spinning disks are subject to the HDD guard
    pub fn is_spinning(&self) -> bool {
        matches!(self, VolumeKind::Hdd)
    }

    pub fn label(&self) -> &'static str {
        match self {
            VolumeKind::Hdd => "HDD",
            VolumeKind::Ssd => "SSD",
            VolumeKind::Removable => "Removable",
            VolumeKind::Network => "Network",
            VolumeKind::RamDisk => "RAM-disk",
            VolumeKind::Unknown => "Unknown",
        }
    }
}

impl std::str::FromStr for VolumeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hdd" => Ok(VolumeKind::Hdd),
            "ssd" => Ok(VolumeKind::Ssd),
            "removable" => Ok(VolumeKind::Removable),
            "network" => Ok(VolumeKind::Network),
            "ram-disk" | "ramdisk" | "ram" => Ok(VolumeKind::RamDisk),
            "unknown" => Ok(VolumeKind::Unknown),
            other => Err(format!("unknown volume kind: {}", other)),
        }
    }
}

/// Visible status of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VolumeStatus {
    Active,
    Paused,
    #[default]
    Offline,
    Error,
    Quarantine,
    Clamped,
    #[serde(rename = "HDD-capped")]
    HddCapped,
}

impl VolumeStatus {
    /// Returns true if the volume takes part in planning and execution
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            VolumeStatus::Active | VolumeStatus::Clamped | VolumeStatus::HddCapped
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            VolumeStatus::Active => "Active",
            VolumeStatus::Paused => "Paused",
            VolumeStatus::Offline => "Offline",
            VolumeStatus::Error => "Error",
            VolumeStatus::Quarantine => "Quarantine",
            VolumeStatus::Clamped => "Clamped",
            VolumeStatus::HddCapped => "HDD-capped",
        }
    }

    /// Running status implied by an interval status reason
    pub fn running_for(reason: Option<StatusReason>) -> Self {
        match reason {
            Some(StatusReason::Clamped) => VolumeStatus::Clamped,
            Some(StatusReason::HddCapped) => VolumeStatus::HddCapped,
            None => VolumeStatus::Active,
        }
    }
}

/// Why a volume is paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseReason {
    User,
    Battery,
    Idle,
    Global,
}

impl PauseReason {
    /// User and global pauses are explicit actions; policy never touches them
    pub fn is_explicit(&self) -> bool {
        matches!(self, PauseReason::User | PauseReason::Global)
    }
}

/// Why the effective interval differs from the configured one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusReason {
    /// Raised to the global minimum or lowered to the global maximum
    Clamped,
    /// Lowered below the user value by the HDD guard
    HddCapped,
}

/// Complete per-volume state owned by the timing store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeTimingState {
    //=== Identity ===
    /// Drive letter or mount label ("E:")
    pub id: String,

    /// Volume GUID, preferred for tie-break identity when present
    pub volume_guid: Option<String>,

    //=== Configuration ===
    pub enabled: bool,

    /// User-configured interval in seconds
    pub interval_secs: u64,

    pub kind: VolumeKind,

    /// Sentinel directory override
    pub sentinel_dir: Option<PathBuf>,

    //=== Scheduling ===
    pub next_due_at: Option<f64>,
    pub last_ok_at: Option<f64>,
    pub last_operation_at: Option<f64>,
    pub effective_interval_secs: f64,
    pub status_reason: Option<StatusReason>,

    //=== Status ===
    pub status: VolumeStatus,
    pub pause_reason: Option<PauseReason>,

    //=== Health ===
    pub consecutive_tick_failures: u32,
    pub last_tick_attempts: u32,
    pub tick_counter: u64,
    pub last_results: VecDeque<IoOutcome>,
    pub quarantine_release_at: Option<f64>,
    pub quarantine_escalation: u32,
    pub measured_speed_mbps: Option<f64>,

    //=== Telemetry ===
    pub hdd_guard_violation: bool,
    pub late_slack_used: bool,

    /// Wall clock seconds when the volume was last seen present
    pub last_seen_unix: Option<f64>,
}

impl VolumeTimingState {
    /// Create a disabled, offline volume with the given interval
    pub fn new(id: &str, kind: VolumeKind, interval_secs: u64) -> Self {
        Self {
            id: id.to_string(),
            volume_guid: None,
            enabled: false,
            interval_secs,
            kind,
            sentinel_dir: None,
            next_due_at: None,
            last_ok_at: None,
            last_operation_at: None,
            effective_interval_secs: interval_secs as f64,
            status_reason: None,
            status: VolumeStatus::Offline,
            pause_reason: None,
            consecutive_tick_failures: 0,
            last_tick_attempts: 0,
            tick_counter: 0,
            last_results: VecDeque::with_capacity(RESULT_WINDOW),
            quarantine_release_at: None,
            quarantine_escalation: 0,
            measured_speed_mbps: None,
            hdd_guard_violation: false,
            late_slack_used: false,
            last_seen_unix: None,
        }
    }

    /// Stable identity used for tie-break ranking
    pub fn identity(&self) -> String {
        match &self.volume_guid {
            Some(guid) if !guid.is_empty() => guid.to_uppercase(),
            _ => self.id.to_uppercase(),
        }
    }

    /// Eligible for planning: enabled, running and not quarantined
    pub fn is_schedulable(&self) -> bool {
        self.enabled && self.status.is_running()
    }

    pub fn is_quarantined(&self) -> bool {
        self.status == VolumeStatus::Quarantine
    }

    /// Paused by an explicit user or global action
    pub fn is_explicitly_paused(&self) -> bool {
        self.status == VolumeStatus::Paused && self.pause_reason.is_some_and(|r| r.is_explicit())
    }

    /// Push an outcome into the rolling window
    pub fn push_result(&mut self, outcome: IoOutcome) {
        if self.last_results.len() == RESULT_WINDOW {
            self.last_results.pop_front();
        }
        self.last_results.push_back(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::ResultCode;

    #[test]
    fn test_new_volume_is_offline_and_disabled() {
        let v = VolumeTimingState::new("E:", VolumeKind::Hdd, 180);
        assert!(!v.enabled);
        assert_eq!(v.status, VolumeStatus::Offline);
        assert!(v.next_due_at.is_none());
        assert_eq!(v.effective_interval_secs, 180.0);
    }

    #[test]
    fn test_identity_prefers_guid() {
        let mut v = VolumeTimingState::new("e:", VolumeKind::Ssd, 60);
        assert_eq!(v.identity(), "E:");
        v.volume_guid = Some("\\\\?\\volume{abcd}".to_string());
        assert_eq!(v.identity(), "\\\\?\\VOLUME{ABCD}");
    }

    #[test]
    fn test_status_is_running() {
        assert!(VolumeStatus::Active.is_running());
        assert!(VolumeStatus::Clamped.is_running());
        assert!(VolumeStatus::HddCapped.is_running());
        assert!(!VolumeStatus::Paused.is_running());
        assert!(!VolumeStatus::Quarantine.is_running());
        assert!(!VolumeStatus::Offline.is_running());
    }

    #[test]
    fn test_running_for_reason() {
        assert_eq!(VolumeStatus::running_for(None), VolumeStatus::Active);
        assert_eq!(
            VolumeStatus::running_for(Some(StatusReason::HddCapped)),
            VolumeStatus::HddCapped
        );
    }

    #[test]
    fn test_explicit_pause() {
        let mut v = VolumeTimingState::new("E:", VolumeKind::Ssd, 60);
        v.status = VolumeStatus::Paused;
        v.pause_reason = Some(PauseReason::Battery);
        assert!(!v.is_explicitly_paused());
        v.pause_reason = Some(PauseReason::User);
        assert!(v.is_explicitly_paused());
    }

    #[test]
    fn test_result_window_is_bounded() {
        let mut v = VolumeTimingState::new("E:", VolumeKind::Ssd, 60);
        for i in 0..15 {
            v.push_result(IoOutcome::ok(i as f64));
        }
        assert_eq!(v.last_results.len(), RESULT_WINDOW);
        assert_eq!(v.last_results.front().map(|r| r.duration_ms), Some(5.0));
        assert!(v.last_results.iter().all(|r| r.result_code == ResultCode::Ok));
    }

    #[test]
    fn test_volume_kind_parse_and_serde() {
        assert_eq!("hdd".parse::<VolumeKind>().unwrap(), VolumeKind::Hdd);
        assert_eq!("RAM-disk".parse::<VolumeKind>().unwrap(), VolumeKind::RamDisk);
        assert!("floppy".parse::<VolumeKind>().is_err());
        assert_eq!(serde_json::to_string(&VolumeKind::RamDisk).unwrap(), "\"RAM-disk\"");
        assert_eq!(serde_json::to_string(&VolumeStatus::HddCapped).unwrap(), "\"HDD-capped\"");
        assert_eq!(serde_json::to_string(&StatusReason::HddCapped).unwrap(), "\"HDD_CAPPED\"");
    }
}
