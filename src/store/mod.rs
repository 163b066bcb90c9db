//! Timing store for Revenant.
//!
//! The `TimingStore` is the single source of truth for per-volume state. Every
//! accessor takes the one lock, and every mutation bumps the version counter
//! and republishes a brand-new `StatusSnapshot`.

mod snapshot;

pub use snapshot::{OutcomeSummary, RECENT_OUTCOMES, StatusSnapshot, VolumeProjection};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::Clock;
use crate::config::Config;
use crate::domain::{
    IoOutcome, PauseReason, StatusReason, VolumeKind, VolumeStatus, VolumeTimingState,
};
use crate::error::{Result, RevenantError};

/// Whether a recorded outcome counts toward tick health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultScope {
    /// Final outcome of a scheduled tick
    Tick {
        succeeded: bool,
        attempts: u32,
        guard_violation: bool,
    },
    /// One-shot operator ping; never touches failures or the schedule
    Manual,
}

struct StoreInner {
    volumes: BTreeMap<String, VolumeTimingState>,
    global_pause: bool,
    version: u64,
    snapshot: Arc<StatusSnapshot>,
}

impl StoreInner {
    fn volume_mut(&mut self, id: &str) -> Result<&mut VolumeTimingState> {
        self.volumes
            .get_mut(id)
            .ok_or_else(|| RevenantError::VolumeNotFound(id.to_string()))
    }
}

pub struct TimingStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<StoreInner>,
}

impl TimingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inner: Mutex::new(StoreInner {
                volumes: BTreeMap::new(),
                global_pause: false,
                version: 0,
                snapshot: Arc::new(StatusSnapshot::empty()),
            }),
        }
    }

    /// Build a store holding every volume declared in the configuration
    pub fn from_config(clock: Arc<dyn Clock>, config: &Config) -> Self {
        let store = Self::new(clock);
        let wall = store.clock.wall();
        let result = store.commit(|inner| {
            for (id, vc) in &config.volumes {
                let mut v = VolumeTimingState::new(id, vc.kind, vc.interval_secs);
                v.enabled = vc.enabled;
                v.sentinel_dir = vc.sentinel_dir.clone();
                v.volume_guid = vc.volume_guid.clone();
                v.last_seen_unix = Some(vc.last_seen_unix.unwrap_or(wall));
                if v.enabled {
                    v.status = VolumeStatus::Active;
                }
                inner.volumes.insert(id.clone(), v);
            }
            Ok(())
        });
        if let Err(e) = result {
            tracing::error!(error = %e, "Failed to seed timing store from config");
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run a mutation under the lock and republish on success
    fn commit<R>(&self, f: impl FnOnce(&mut StoreInner) -> Result<R>) -> Result<R> {
        let mut inner = self.lock();
        let out = f(&mut inner)?;
        inner.version += 1;
        let snap = StatusSnapshot::build(
            self.clock.monotonic(),
            inner.version,
            inner.global_pause,
            inner.volumes.values(),
        );
        inner.snapshot = Arc::new(snap);
        Ok(out)
    }

    //=== Readers ===

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.lock().snapshot)
    }

    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn get(&self, id: &str) -> Option<VolumeTimingState> {
        self.lock().volumes.get(id).cloned()
    }

    /// Defensive copy of every volume, ordered by id
    pub fn get_all(&self) -> Vec<VolumeTimingState> {
        self.lock().volumes.values().cloned().collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().volumes.keys().cloned().collect()
    }

    pub fn global_pause(&self) -> bool {
        self.lock().global_pause
    }

    //=== Discovery ===

    /// Track a newly seen volume as disabled and offline.
    ///
    /// Returns false when the volume is already tracked.
    pub fn register(&self, id: &str, kind: VolumeKind, interval_secs: u64, last_seen_unix: f64) -> bool {
        self.commit(|inner| {
            if inner.volumes.contains_key(id) {
                return Ok(false);
            }
            let mut v = VolumeTimingState::new(id, kind, interval_secs);
            v.last_seen_unix = Some(last_seen_unix);
            inner.volumes.insert(id.to_string(), v);
            Ok(true)
        })
        .unwrap_or(false)
    }

    pub fn mark_seen(&self, id: &str, wall: f64) -> Result<()> {
        self.commit(|inner| {
            inner.volume_mut(id)?.last_seen_unix = Some(wall);
            Ok(())
        })
    }

    pub fn remove(&self, id: &str) -> Result<VolumeTimingState> {
        self.commit(|inner| {
            inner
                .volumes
                .remove(id)
                .ok_or_else(|| RevenantError::VolumeNotFound(id.to_string()))
        })
    }

    //=== Configuration and status ===

    /// Apply per-volume configuration.
    ///
    /// Disabling forces Offline and drops the schedule. Enabling starts the
    /// volume as running. An interval change resets the schedule anchor.
    pub fn set_config(
        &self,
        id: &str,
        enabled: bool,
        interval_secs: u64,
        kind: VolumeKind,
        sentinel_dir: Option<PathBuf>,
    ) -> Result<()> {
        if interval_secs == 0 {
            return Err(RevenantError::InvalidState(format!("{}: interval must be positive", id)));
        }
        self.commit(|inner| {
            let v = inner.volume_mut(id)?;
            let was_enabled = v.enabled;
            if v.interval_secs != interval_secs {
                v.next_due_at = None;
                v.last_ok_at = None;
                v.last_operation_at = None;
            }
            v.enabled = enabled;
            v.interval_secs = interval_secs;
            v.kind = kind;
            v.sentinel_dir = sentinel_dir;

            if !enabled {
                v.status = VolumeStatus::Offline;
                v.pause_reason = None;
                v.next_due_at = None;
                v.quarantine_release_at = None;
            } else if !was_enabled {
                v.status = VolumeStatus::running_for(v.status_reason);
                v.pause_reason = None;
                v.next_due_at = None;
            }
            Ok(())
        })
    }

    /// Set visible status and pause reason.
    ///
    /// Quarantine is only entered through `quarantine`.
    pub fn set_status(&self, id: &str, status: VolumeStatus, pause_reason: Option<PauseReason>) -> Result<()> {
        self.commit(|inner| {
            let v = inner.volume_mut(id)?;
            if status == VolumeStatus::Quarantine {
                return Err(RevenantError::InvalidState(format!("{}: use quarantine()", id)));
            }
            if !v.enabled && status != VolumeStatus::Offline {
                return Err(RevenantError::InvalidState(format!("{} is disabled", id)));
            }
            v.status = status;
            v.pause_reason = if status == VolumeStatus::Paused { pause_reason } else { None };
            v.quarantine_release_at = None;
            if !status.is_running() {
                v.next_due_at = None;
            }
            Ok(())
        })
    }

    pub fn set_global_pause(&self, paused: bool) {
        let _ = self.commit(|inner| {
            inner.global_pause = paused;
            Ok(())
        });
    }

    //=== Scheduling ===

    /// Commit a planned due time together with the interval resolution
    pub fn commit_plan(
        &self,
        id: &str,
        next_due_at: f64,
        effective_interval_secs: f64,
        status_reason: Option<StatusReason>,
        late_slack_used: bool,
    ) -> Result<()> {
        self.commit(|inner| {
            let v = inner.volume_mut(id)?;
            if !v.is_schedulable() {
                return Err(RevenantError::InvalidState(format!(
                    "{} is {} and cannot be scheduled",
                    id,
                    v.status.label()
                )));
            }
            v.next_due_at = Some(next_due_at);
            v.effective_interval_secs = effective_interval_secs;
            v.status_reason = status_reason;
            v.status = VolumeStatus::running_for(status_reason);
            v.late_slack_used = late_slack_used;
            Ok(())
        })
    }

    pub fn clear_next_due(&self, id: &str) -> Result<()> {
        self.commit(|inner| {
            inner.volume_mut(id)?.next_due_at = None;
            Ok(())
        })
    }

    //=== Health ===

    /// Record an outcome and return the consecutive tick failure count.
    ///
    /// A volume disabled while its operation ran keeps the outcome in its
    /// history but does not count toward failures or quarantine.
    pub fn record_result(&self, id: &str, now: f64, outcome: IoOutcome, scope: ResultScope) -> Result<u32> {
        self.commit(|inner| {
            let v = inner.volume_mut(id)?;
            let outcome_ok = outcome.result_code.is_success();
            if let Some(mbps) = outcome.throughput_mbps {
                v.measured_speed_mbps = Some(mbps);
            }
            v.push_result(outcome);
            v.last_operation_at = Some(now);

            match scope {
                ResultScope::Tick {
                    succeeded,
                    attempts,
                    guard_violation,
                } => {
                    v.tick_counter += 1;
                    v.last_tick_attempts = attempts;
                    v.hdd_guard_violation = guard_violation;
                    if !v.enabled {
                        v.consecutive_tick_failures = 0;
                    } else if succeeded {
                        v.consecutive_tick_failures = 0;
                        v.quarantine_escalation = 0;
                        v.last_ok_at = Some(now);
                    } else {
                        v.consecutive_tick_failures += 1;
                    }
                }
                ResultScope::Manual => {
                    if outcome_ok {
                        v.last_ok_at = Some(now);
                    }
                }
            }
            Ok(v.consecutive_tick_failures)
        })
    }

    /// Enter quarantine until `release_at`
    pub fn quarantine(&self, id: &str, release_at: f64, escalation: u32) -> Result<()> {
        self.commit(|inner| {
            let v = inner.volume_mut(id)?;
            if !v.enabled {
                return Err(RevenantError::InvalidState(format!("{} is disabled", id)));
            }
            v.status = VolumeStatus::Quarantine;
            v.pause_reason = None;
            v.quarantine_release_at = Some(release_at);
            v.quarantine_escalation = escalation;
            v.next_due_at = None;
            Ok(())
        })
    }

    /// Leave quarantine after the release time; escalation is kept
    pub fn release_quarantine(&self, id: &str) -> Result<()> {
        self.commit(|inner| {
            let v = inner.volume_mut(id)?;
            if !v.is_quarantined() {
                return Err(RevenantError::InvalidState(format!("{} is not quarantined", id)));
            }
            v.status = VolumeStatus::running_for(v.status_reason);
            v.quarantine_release_at = None;
            v.consecutive_tick_failures = 0;
            v.next_due_at = None;
            Ok(())
        })
    }

    /// Operator reset: leave quarantine and forget the escalation history
    pub fn clear_quarantine(&self, id: &str) -> Result<()> {
        self.commit(|inner| {
            let v = inner.volume_mut(id)?;
            if v.is_quarantined() {
                v.status = VolumeStatus::running_for(v.status_reason);
                v.quarantine_release_at = None;
                v.next_due_at = None;
            }
            v.consecutive_tick_failures = 0;
            v.quarantine_escalation = 0;
            Ok(())
        })
    }
}
