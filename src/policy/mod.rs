//! Pause policy arbitration.
//!
//! The `PolicyEngine` turns system conditions (battery, idle time) and the
//! operator's global pause flag into an ordered list of pause reasons, then
//! derives per-volume transitions. User and global pauses are explicit
//! actions and are never changed by re-evaluation.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::config::PolicyConfig;
use crate::domain::{PauseReason, VolumeStatus, VolumeTimingState};
use crate::store::TimingStore;

/// Source of system conditions
pub trait SystemProbe: Send + Sync {
    fn is_on_battery(&self) -> bool;
    fn idle_minutes(&self) -> f64;
}

/// Probe with values set by hand; used by the CLI and tests
#[derive(Debug, Default)]
pub struct FixedProbe {
    inner: Mutex<(bool, f64)>,
}

impl FixedProbe {
    pub fn new(on_battery: bool, idle_minutes: f64) -> Self {
        Self {
            inner: Mutex::new((on_battery, idle_minutes)),
        }
    }

    pub fn set_on_battery(&self, on_battery: bool) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).0 = on_battery;
    }

    pub fn set_idle_minutes(&self, minutes: f64) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).1 = minutes;
    }
}

impl SystemProbe for FixedProbe {
    fn is_on_battery(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).0
    }

    fn idle_minutes(&self) -> f64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).1
    }
}

/// Result of one policy evaluation. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyState {
    pub global_pause: bool,
    pub battery_pause: bool,
    pub idle_pause: bool,
    /// Active reasons, highest precedence first
    pub reasons: Vec<PauseReason>,
}

impl PolicyState {
    pub fn active_reason(&self) -> Option<PauseReason> {
        self.reasons.first().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Pause { volume: String, reason: PauseReason },
    Resume { volume: String },
}

pub struct PolicyEngine {
    config: PolicyConfig,
    probe: Arc<dyn SystemProbe>,
    last_refresh: Option<f64>,
    state: PolicyState,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig, probe: Arc<dyn SystemProbe>) -> Self {
        Self {
            config,
            probe,
            last_refresh: None,
            state: PolicyState::default(),
        }
    }

    pub fn set_config(&mut self, config: PolicyConfig) {
        self.config = config;
        self.last_refresh = None;
    }

    pub fn state(&self) -> &PolicyState {
        &self.state
    }

    /// Compute reasons in precedence order: global, battery, idle
    pub fn evaluate(&self, global_pause: bool) -> PolicyState {
        let battery_pause = self.config.pause_on_battery && self.probe.is_on_battery();
        let idle_pause =
            self.config.idle_pause_min > 0 && self.probe.idle_minutes() >= self.config.idle_pause_min as f64;

        let reasons = [
            (global_pause, PauseReason::Global),
            (battery_pause, PauseReason::Battery),
            (idle_pause, PauseReason::Idle),
        ]
        .into_iter()
        .filter_map(|(active, reason)| active.then_some(reason))
        .collect();

        PolicyState {
            global_pause,
            battery_pause,
            idle_pause,
            reasons,
        }
    }

    /// Re-evaluate if `refresh_ms` has passed since the last refresh.
    ///
    /// Returns true when a new state was computed.
    pub fn refresh(&mut self, now: f64, global_pause: bool) -> bool {
        let due = self
            .last_refresh
            .is_none_or(|last| (now - last) * 1000.0 >= self.config.refresh_ms as f64);
        if !due {
            return false;
        }
        self.last_refresh = Some(now);
        let next = self.evaluate(global_pause);
        if next != self.state {
            tracing::info!(reasons = ?next.reasons, "Pause policy changed");
        }
        self.state = next;
        true
    }

    /// Per-volume transitions implied by `state`
    pub fn transitions(state: &PolicyState, volumes: &[VolumeTimingState]) -> Vec<Transition> {
        let active = state.active_reason();
        volumes
            .iter()
            .filter(|v| v.enabled && !v.is_quarantined() && !v.is_explicitly_paused())
            .filter_map(|v| {
                let policy_paused = v.status == VolumeStatus::Paused;
                match active {
                    Some(reason) if v.status.is_running() => Some(Transition::Pause {
                        volume: v.id.clone(),
                        reason,
                    }),
                    Some(reason) if policy_paused && v.pause_reason != Some(reason) => Some(Transition::Pause {
                        volume: v.id.clone(),
                        reason,
                    }),
                    None if policy_paused => Some(Transition::Resume { volume: v.id.clone() }),
                    _ => None,
                }
            })
            .collect()
    }
}

/// Commit transitions to the store. Pausing and resuming both clear `next_due_at`.
pub fn apply_transitions(store: &TimingStore, transitions: &[Transition]) -> usize {
    let mut applied = 0;
    for t in transitions {
        let result = match t {
            Transition::Pause { volume, reason } => {
                tracing::info!(volume = %volume, reason = ?reason, "Pausing volume");
                store.set_status(volume, VolumeStatus::Paused, Some(*reason))
            }
            Transition::Resume { volume } => {
                tracing::info!(volume = %volume, "Resuming volume");
                resume(store, volume)
            }
        };
        match result {
            Ok(()) => applied += 1,
            Err(e) => tracing::warn!(error = %e, "Failed to apply policy transition"),
        }
    }
    applied
}

/// Back to the running status implied by the interval resolution
pub fn resume(store: &TimingStore, volume: &str) -> crate::error::Result<()> {
    let reason = store
        .get(volume)
        .ok_or_else(|| crate::error::RevenantError::VolumeNotFound(volume.to_string()))?
        .status_reason;
    store.set_status(volume, VolumeStatus::running_for(reason), None)?;
    store.clear_next_due(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::domain::VolumeKind;
    use chrono::NaiveDate;

    fn engine(pause_on_battery: bool, idle_pause_min: u32, probe: Arc<FixedProbe>) -> PolicyEngine {
        PolicyEngine::new(
            PolicyConfig {
                pause_on_battery,
                idle_pause_min,
                refresh_ms: 5000,
            },
            probe,
        )
    }

    fn volume(id: &str, status: VolumeStatus, reason: Option<PauseReason>) -> VolumeTimingState {
        let mut v = VolumeTimingState::new(id, VolumeKind::Ssd, 60);
        v.enabled = true;
        v.status = status;
        v.pause_reason = reason;
        v
    }

    #[test]
    fn test_reason_precedence() {
        let probe = Arc::new(FixedProbe::new(true, 30.0));
        let e = engine(true, 10, probe);
        let state = e.evaluate(true);
        assert_eq!(
            state.reasons,
            vec![PauseReason::Global, PauseReason::Battery, PauseReason::Idle]
        );
        assert_eq!(state.active_reason(), Some(PauseReason::Global));
        assert_eq!(e.evaluate(false).active_reason(), Some(PauseReason::Battery));
    }

    #[test]
    fn test_battery_ignored_when_disabled() {
        let probe = Arc::new(FixedProbe::new(true, 0.0));
        let e = engine(false, 0, probe);
        assert!(e.evaluate(false).reasons.is_empty());
    }

    #[test]
    fn test_idle_threshold() {
        let probe = Arc::new(FixedProbe::new(false, 9.0));
        let e = engine(false, 10, probe.clone());
        assert!(!e.evaluate(false).idle_pause);
        probe.set_idle_minutes(10.0);
        assert!(e.evaluate(false).idle_pause);
    }

    #[test]
    fn test_refresh_is_rate_limited() {
        let probe = Arc::new(FixedProbe::new(false, 0.0));
        let mut e = engine(true, 0, probe.clone());
        assert!(e.refresh(0.0, false));
        probe.set_on_battery(true);
        assert!(!e.refresh(4.0, false));
        assert!(e.state().reasons.is_empty());
        assert!(e.refresh(5.0, false));
        assert_eq!(e.state().active_reason(), Some(PauseReason::Battery));
    }

    #[test]
    fn test_user_and_global_pauses_are_never_touched() {
        let state = PolicyState {
            battery_pause: true,
            reasons: vec![PauseReason::Battery],
            ..PolicyState::default()
        };
        let vols = [
            volume("E:", VolumeStatus::Paused, Some(PauseReason::User)),
            volume("F:", VolumeStatus::Paused, Some(PauseReason::Global)),
        ];
        assert!(PolicyEngine::transitions(&state, &vols).is_empty());
        assert!(PolicyEngine::transitions(&PolicyState::default(), &vols).is_empty());
    }

    #[test]
    fn test_running_volumes_pause_and_resume() {
        let state = PolicyState {
            idle_pause: true,
            reasons: vec![PauseReason::Idle],
            ..PolicyState::default()
        };
        let vols = [volume("E:", VolumeStatus::Active, None)];
        assert_eq!(
            PolicyEngine::transitions(&state, &vols),
            vec![Transition::Pause {
                volume: "E:".to_string(),
                reason: PauseReason::Idle
            }]
        );

        let paused = [volume("E:", VolumeStatus::Paused, Some(PauseReason::Idle))];
        assert!(PolicyEngine::transitions(&state, &paused).is_empty());
        assert_eq!(
            PolicyEngine::transitions(&PolicyState::default(), &paused),
            vec![Transition::Resume {
                volume: "E:".to_string()
            }]
        );
    }

    #[test]
    fn test_policy_pause_follows_reason() {
        let state = PolicyState {
            battery_pause: true,
            reasons: vec![PauseReason::Battery],
            ..PolicyState::default()
        };
        let vols = [volume("E:", VolumeStatus::Paused, Some(PauseReason::Idle))];
        assert_eq!(
            PolicyEngine::transitions(&state, &vols),
            vec![Transition::Pause {
                volume: "E:".to_string(),
                reason: PauseReason::Battery
            }]
        );
    }

    #[test]
    fn test_quarantined_and_disabled_are_skipped() {
        let state = PolicyState {
            battery_pause: true,
            reasons: vec![PauseReason::Battery],
            ..PolicyState::default()
        };
        let mut q = volume("E:", VolumeStatus::Quarantine, None);
        q.quarantine_release_at = Some(100.0);
        let mut off = volume("F:", VolumeStatus::Offline, None);
        off.enabled = false;
        assert!(PolicyEngine::transitions(&state, &[q, off]).is_empty());
    }

    #[test]
    fn test_apply_transitions_clears_next_due() {
        let clock = Arc::new(FakeClock::new(0.0, NaiveDate::from_ymd_opt(2025, 10, 10).unwrap()));
        let store = TimingStore::new(clock);
        store.register("E:", VolumeKind::Ssd, 60, 0.0);
        store.set_config("E:", true, 60, VolumeKind::Ssd, None).unwrap();
        store.commit_plan("E:", 60.0, 60.0, None, false).unwrap();

        let pause = [Transition::Pause {
            volume: "E:".to_string(),
            reason: PauseReason::Battery,
        }];
        assert_eq!(apply_transitions(&store, &pause), 1);
        let v = store.get("E:").unwrap();
        assert_eq!(v.status, VolumeStatus::Paused);
        assert!(v.next_due_at.is_none());

        let resume = [Transition::Resume {
            volume: "E:".to_string(),
        }];
        assert_eq!(apply_transitions(&store, &resume), 1);
        let v = store.get("E:").unwrap();
        assert_eq!(v.status, VolumeStatus::Active);
        assert!(v.pause_reason.is_none());
    }
}
