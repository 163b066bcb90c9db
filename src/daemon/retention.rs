//! Stale volume retention
//!
//! A volume is removed only when both signals agree:
//! - it has not been seen for `stale_removal_days`
//! - its quarantine escalation has reached the cap
//!
//! Forced volumes are registered with a last-seen time two days short of the
//! threshold so they age out quickly if they never appear.

use crate::config::RetentionConfig;
use crate::domain::VolumeKind;
use crate::store::TimingStore;

const SECS_PER_DAY: f64 = 86_400.0;

/// Register forced volumes that the store does not know yet.
///
/// Returns the ids that were added.
pub fn register_forced(
    store: &TimingStore,
    config: &RetentionConfig,
    forced: &[String],
    default_interval_secs: u64,
    wall: f64,
) -> Vec<String> {
    let age_days = config.stale_removal_days.saturating_sub(2) as f64;
    let last_seen = wall - age_days * SECS_PER_DAY;
    forced
        .iter()
        .filter(|id| store.register(id, VolumeKind::Unknown, default_interval_secs, last_seen))
        .inspect(|id| tracing::info!(volume = %id, "Registered forced volume"))
        .cloned()
        .collect()
}

/// True when a volume last seen at `last_seen` with `escalation` should go
pub fn is_stale(config: &RetentionConfig, cap_exponent: u32, last_seen: Option<f64>, escalation: u32, wall: f64) -> bool {
    if config.stale_removal_days == 0 {
        return false;
    }
    let threshold = config.stale_removal_days as f64 * SECS_PER_DAY;
    let unseen_long_enough = last_seen.is_some_and(|seen| wall - seen > threshold);
    unseen_long_enough && escalation >= cap_exponent
}

/// Remove every stale volume; returns the removed ids
pub fn sweep(store: &TimingStore, config: &RetentionConfig, cap_exponent: u32, wall: f64) -> Vec<String> {
    let stale: Vec<String> = store
        .get_all()
        .into_iter()
        .filter(|v| is_stale(config, cap_exponent, v.last_seen_unix, v.quarantine_escalation, wall))
        .map(|v| v.id)
        .collect();

    let mut removed = Vec::with_capacity(stale.len());
    for id in stale {
        match store.remove(&id) {
            Ok(_) => {
                tracing::info!(volume = %id, "Removed stale volume");
                removed.push(id);
            }
            Err(e) => tracing::warn!(volume = %id, error = %e, "Failed to remove stale volume"),
        }
    }
    removed
}
