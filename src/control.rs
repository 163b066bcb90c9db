//! Operator control surface
//!
//! Every action goes through the `TimingStore`. Queued operations of a volume
//! that stops running are dropped by the tick engine on its next pass.

use std::path::PathBuf;
use std::sync::Arc;

use crate::clock::Clock;
use crate::domain::{PauseReason, VolumeKind, VolumeStatus, VolumeTimingState};
use crate::error::{Result, RevenantError};
use crate::policy;
use crate::retry::{IoExecutor, PingReport, RetryController, VolumeTarget};
use crate::store::{ResultScope, TimingStore};

pub struct Control {
    store: Arc<TimingStore>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn IoExecutor>,
    retry: RetryController,
}

impl Control {
    pub fn new(
        store: Arc<TimingStore>,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn IoExecutor>,
        retry: RetryController,
    ) -> Self {
        Self {
            store,
            clock,
            executor,
            retry,
        }
    }

    fn volume(&self, id: &str) -> Result<VolumeTimingState> {
        self.store
            .get(id)
            .ok_or_else(|| RevenantError::VolumeNotFound(id.to_string()))
    }

    //=== Pause / resume ===

    /// Pause a single volume on behalf of the user
    pub fn pause(&self, id: &str) -> Result<()> {
        let v = self.volume(id)?;
        if v.is_quarantined() {
            return Err(RevenantError::InvalidState(format!("cannot pause quarantined volume {}", id)));
        }
        self.store.set_status(id, VolumeStatus::Paused, Some(PauseReason::User))?;
        tracing::info!(volume = %id, "Volume paused");
        Ok(())
    }

    /// Resume a paused volume; it replans from now
    pub fn resume(&self, id: &str) -> Result<()> {
        let v = self.volume(id)?;
        if v.status != VolumeStatus::Paused {
            return Err(RevenantError::InvalidState(format!(
                "volume {} is not paused ({})",
                id,
                v.status.label()
            )));
        }
        policy::resume(&self.store, id)?;
        tracing::info!(volume = %id, "Volume resumed");
        Ok(())
    }

    fn can_pause(v: &VolumeTimingState) -> bool {
        v.enabled && !matches!(v.status, VolumeStatus::Paused | VolumeStatus::Quarantine)
    }

    /// Pause the given volumes that are enabled and not already paused or quarantined
    pub fn pause_selected(&self, ids: &[String]) -> usize {
        ids.iter()
            .filter(|id| self.store.get(id).is_some_and(|v| Self::can_pause(&v)))
            .filter(|id| match self.pause(id) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(volume = %id, error = %e, "Pause failed");
                    false
                }
            })
            .count()
    }

    /// Resume the given volumes that are paused, whatever the reason
    pub fn resume_selected(&self, ids: &[String]) -> usize {
        ids.iter()
            .filter(|id| self.store.get(id).is_some_and(|v| v.status == VolumeStatus::Paused))
            .filter(|id| match self.resume(id) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(volume = %id, error = %e, "Resume failed");
                    false
                }
            })
            .count()
    }

    pub fn pause_all(&self) -> usize {
        self.pause_selected(&self.store.ids())
    }

    pub fn resume_all(&self) -> usize {
        self.resume_selected(&self.store.ids())
    }

    /// Set the operator's global pause flag.
    ///
    /// Setting it pauses every enabled volume that is neither quarantined nor
    /// user-paused. Clearing it resumes only the globally paused ones.
    pub fn set_global_pause(&self, paused: bool) -> usize {
        let was = self.store.global_pause();
        self.store.set_global_pause(paused);
        if was == paused {
            return 0;
        }

        let volumes = self.store.get_all();
        let mut changed = 0;
        for v in &volumes {
            let result = if paused {
                let eligible = v.enabled && !v.is_quarantined() && v.pause_reason != Some(PauseReason::User);
                if !eligible {
                    continue;
                }
                self.store.set_status(&v.id, VolumeStatus::Paused, Some(PauseReason::Global))
            } else {
                if !(v.status == VolumeStatus::Paused && v.pause_reason == Some(PauseReason::Global)) {
                    continue;
                }
                policy::resume(&self.store, &v.id)
            };
            match result {
                Ok(()) => changed += 1,
                Err(e) => tracing::warn!(volume = %v.id, error = %e, "Global pause transition failed"),
            }
        }
        tracing::info!(paused, volumes = changed, "Global pause set");
        changed
    }

    //=== Configuration ===

    pub fn set_volume_config(
        &self,
        id: &str,
        enabled: bool,
        interval_secs: u64,
        kind: VolumeKind,
        sentinel_dir: Option<PathBuf>,
    ) -> Result<()> {
        self.store.set_config(id, enabled, interval_secs, kind, sentinel_dir)?;
        tracing::info!(volume = %id, enabled, interval_secs, kind = %kind.label(), "Volume configuration updated");
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let v = self.volume(id)?;
        self.set_volume_config(id, enabled, v.interval_secs, v.kind, v.sentinel_dir)
    }

    pub fn set_interval(&self, id: &str, interval_secs: u64) -> Result<()> {
        let v = self.volume(id)?;
        self.set_volume_config(id, v.enabled, interval_secs, v.kind, v.sentinel_dir)
    }

    /// Leave quarantine now and forget the escalation history
    pub fn clear_quarantine(&self, id: &str) -> Result<()> {
        self.store.clear_quarantine(id)?;
        tracing::info!(volume = %id, "Quarantine cleared");
        Ok(())
    }

    //=== Manual operations ===

    /// Run a one-shot ping outside the schedule.
    ///
    /// Every step is recorded in the rolling window; the due time and the
    /// tick-failure counter are left alone. Disabled volumes are refused.
    pub async fn ping_now(&self, id: &str) -> Result<PingReport> {
        let v = self.volume(id)?;
        if !v.enabled {
            return Err(RevenantError::InvalidState(format!("{} is disabled", id)));
        }
        let target = VolumeTarget::from(&v);
        let report = self.retry.ping(self.executor.as_ref(), &target).await;
        for step in &report.steps {
            self.store
                .record_result(id, self.clock.monotonic(), step.outcome.clone(), ResultScope::Manual)?;
        }
        tracing::info!(volume = %id, succeeded = report.succeeded, steps = report.steps.len(), "Manual ping");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::config::RetryConfig;
    use crate::domain::FailureClass;
    use crate::retry::{SimulatedExecutor, fault_outcome};
    use chrono::NaiveDate;

    struct Fixture {
        store: Arc<TimingStore>,
        exec: Arc<SimulatedExecutor>,
        control: Control,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FakeClock::new(10.0, NaiveDate::from_ymd_opt(2025, 10, 10).unwrap()));
        let store = Arc::new(TimingStore::new(clock.clone()));
        for id in ["E:", "F:", "G:"] {
            store.register(id, VolumeKind::Ssd, 60, 0.0);
            store.set_config(id, true, 60, VolumeKind::Ssd, None).unwrap();
        }
        let exec = Arc::new(SimulatedExecutor::default());
        let retry = RetryController::new(RetryConfig {
            attempts: 3,
            backoff_ms: vec![0],
        });
        let control = Control::new(store.clone(), clock, exec.clone(), retry);
        Fixture { store, exec, control }
    }

    #[test]
    fn test_pause_and_resume() {
        let f = fixture();
        f.store.commit_plan("E:", 70.0, 60.0, None, false).unwrap();
        f.control.pause("E:").unwrap();
        let v = f.store.get("E:").unwrap();
        assert_eq!(v.status, VolumeStatus::Paused);
        assert_eq!(v.pause_reason, Some(PauseReason::User));
        assert!(v.next_due_at.is_none());

        f.control.resume("E:").unwrap();
        let v = f.store.get("E:").unwrap();
        assert_eq!(v.status, VolumeStatus::Active);
        assert!(v.pause_reason.is_none());
        assert!(f.control.resume("E:").is_err());
    }

    #[test]
    fn test_quarantined_volume_cannot_be_paused() {
        let f = fixture();
        f.store.quarantine("E:", 100.0, 1).unwrap();
        assert!(f.control.pause("E:").is_err());
        assert_eq!(f.control.pause_all(), 2);
    }

    #[test]
    fn test_pause_all_resume_all() {
        let f = fixture();
        assert_eq!(f.control.pause_all(), 3);
        assert_eq!(f.control.pause_all(), 0);
        assert_eq!(f.control.resume_all(), 3);
    }

    #[test]
    fn test_selected() {
        let f = fixture();
        let ids = vec!["E:".to_string(), "Z:".to_string()];
        assert_eq!(f.control.pause_selected(&ids), 1);
        assert_eq!(f.control.resume_selected(&ids), 1);
    }

    #[test]
    fn test_global_pause_spares_user_pauses() {
        let f = fixture();
        f.control.pause("E:").unwrap();
        assert_eq!(f.control.set_global_pause(true), 2);
        assert_eq!(f.store.get("F:").unwrap().pause_reason, Some(PauseReason::Global));
        assert_eq!(f.store.get("E:").unwrap().pause_reason, Some(PauseReason::User));

        assert_eq!(f.control.set_global_pause(false), 2);
        assert_eq!(f.store.get("F:").unwrap().status, VolumeStatus::Active);
        assert_eq!(f.store.get("E:").unwrap().pause_reason, Some(PauseReason::User));
        assert!(!f.store.global_pause());
    }

    #[test]
    fn test_set_interval_resets_anchor() {
        let f = fixture();
        f.store.commit_plan("E:", 70.0, 60.0, None, false).unwrap();
        f.control.set_interval("E:", 120).unwrap();
        let v = f.store.get("E:").unwrap();
        assert_eq!(v.interval_secs, 120);
        assert!(v.next_due_at.is_none());
    }

    #[test]
    fn test_disable_goes_offline() {
        let f = fixture();
        f.control.set_enabled("E:", false).unwrap();
        assert_eq!(f.store.get("E:").unwrap().status, VolumeStatus::Offline);
    }

    #[test]
    fn test_clear_quarantine() {
        let f = fixture();
        f.store.quarantine("E:", 100.0, 4).unwrap();
        f.control.clear_quarantine("E:").unwrap();
        let v = f.store.get("E:").unwrap();
        assert_eq!(v.status, VolumeStatus::Active);
        assert_eq!(v.quarantine_escalation, 0);
    }

    #[tokio::test]
    async fn test_ping_now_leaves_schedule_alone() {
        let f = fixture();
        f.store.commit_plan("E:", 70.0, 60.0, None, false).unwrap();
        let missing = fault_outcome(FailureClass::MissingSentinel);
        f.exec.script("E:", [missing.clone(), missing.clone(), missing]);

        let report = f.control.ping_now("E:").await.unwrap();
        assert!(report.succeeded);
        assert_eq!(report.steps.len(), 3);

        let v = f.store.get("E:").unwrap();
        assert_eq!(v.next_due_at, Some(70.0));
        assert_eq!(v.consecutive_tick_failures, 0);
        assert_eq!(v.tick_counter, 0);
        assert_eq!(v.last_results.len(), 3);
        assert_eq!(v.last_ok_at, Some(10.0));
    }

    #[tokio::test]
    async fn test_ping_disabled_volume_is_refused() {
        let f = fixture();
        f.control.set_enabled("E:", false).unwrap();
        assert!(f.control.ping_now("E:").await.is_err());
        assert_eq!(f.exec.calls_for("E:"), 0);
        assert!(f.store.get("E:").unwrap().last_results.is_empty());
    }

    #[tokio::test]
    async fn test_ping_unknown_volume() {
        let f = fixture();
        assert!(f.control.ping_now("Z:").await.is_err());
    }
}
