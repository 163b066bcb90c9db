//! Tick-level quarantine.
//!
//! Only consecutive failed ticks count. Duration is `base * 2^min(escalation, cap)`
//! and the escalation counter saturates at the cap.

use crate::config::QuarantineConfig;
use crate::error::Result;
use crate::store::TimingStore;

#[derive(Debug, Clone)]
pub struct QuarantineManager {
    config: QuarantineConfig,
}

impl QuarantineManager {
    pub fn new(config: QuarantineConfig) -> Self {
        Self { config }
    }

    pub fn set_config(&mut self, config: QuarantineConfig) {
        self.config = config;
    }

    pub fn cap(&self) -> u32 {
        self.config.cap_exponent
    }

    pub fn duration_secs(&self, escalation: u32) -> f64 {
        let exp = escalation.min(self.config.cap_exponent);
        self.config.base_secs * 2f64.powi(exp as i32)
    }

    pub fn should_quarantine(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.config.after_failures
    }

    /// Quarantine `id` if its failure count reached the threshold.
    ///
    /// Returns the release time when quarantine was entered.
    pub fn check(&self, store: &TimingStore, id: &str, consecutive_failures: u32, now: f64) -> Result<Option<f64>> {
        if !self.should_quarantine(consecutive_failures) {
            return Ok(None);
        }
        let escalation = store.get(id).map(|v| v.quarantine_escalation).unwrap_or(0);
        let duration = self.duration_secs(escalation);
        let release_at = now + duration;
        let next = (escalation + 1).min(self.config.cap_exponent);
        store.quarantine(id, release_at, next)?;
        tracing::warn!(
            volume = %id,
            failures = consecutive_failures,
            duration_secs = duration,
            escalation = next,
            "Volume quarantined"
        );
        Ok(Some(release_at))
    }

    /// Release every quarantine whose time has come
    pub fn release_due(&self, store: &TimingStore, now: f64) -> Vec<String> {
        let due: Vec<String> = store
            .get_all()
            .into_iter()
            .filter(|v| v.is_quarantined() && v.quarantine_release_at.is_some_and(|t| now >= t))
            .map(|v| v.id)
            .collect();
        due.into_iter()
            .filter(|id| match store.release_quarantine(id) {
                Ok(()) => {
                    tracing::info!(volume = %id, "Quarantine released");
                    true
                }
                Err(e) => {
                    tracing::warn!(volume = %id, error = %e, "Failed to release quarantine");
                    false
                }
            })
            .collect()
    }

    /// Escalation at the cap marks a terminally quarantined volume
    pub fn is_terminal(&self, escalation: u32) -> bool {
        escalation >= self.config.cap_exponent
    }
}
