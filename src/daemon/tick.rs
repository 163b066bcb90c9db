//! Tick engine - one pass of the scheduler
//!
//! Each tick, in order:
//! - releases expired quarantines and applies pause policy
//! - drops queued operations whose volume stopped running or was replanned
//! - plans volumes that have nothing queued and commits their due times
//! - executes due operations through the retry controller
//! - publishes a snapshot, logs the countdown, runs the retention sweep

use std::sync::Arc;

use tokio::sync::watch;

use crate::clock::Clock;
use crate::config::{Config, RetentionConfig};
use crate::domain::{ScheduledOperation, VolumeTimingState};
use crate::planner::JitterPlanner;
use crate::policy::{PolicyEngine, SystemProbe, apply_transitions};
use crate::retry::{IoExecutor, QuarantineManager, RetryController, VolumeTarget};
use crate::store::{ResultScope, StatusSnapshot, TimingStore};

use super::publish::SnapshotPublisher;
use super::retention;

/// Due-time tolerance when matching queued operations to the store
const DUE_EPS: f64 = 1e-6;

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub released: Vec<String>,
    pub policy_transitions: usize,
    pub dropped: usize,
    pub planned: usize,
    pub executed: usize,
    pub failed: usize,
    pub quarantined: Vec<String>,
    pub removed: Vec<String>,
    pub published: bool,
}

/// Tick state tracks totals across the life of the engine
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickState {
    /// Number of ticks since start
    pub tick_count: u64,
    pub total_planned: u64,
    pub total_executed: u64,
    pub total_failed: u64,
    pub total_quarantined: u64,
}

impl TickState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&mut self) {
        self.tick_count += 1;
    }

    pub fn record(&mut self, report: &TickReport) {
        self.total_planned += report.planned as u64;
        self.total_executed += report.executed as u64;
        self.total_failed += report.failed as u64;
        self.total_quarantined += report.quarantined.len() as u64;
    }
}

/// Owns the per-tick collaborators and the operation queue
pub struct TickEngine {
    store: Arc<TimingStore>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn IoExecutor>,
    planner: JitterPlanner,
    policy: PolicyEngine,
    retry: RetryController,
    quarantine: QuarantineManager,
    retention: RetentionConfig,
    countdown_log_secs: u64,
    publisher: SnapshotPublisher,
    queue: Vec<ScheduledOperation>,
    state: TickState,
    last_countdown: Option<f64>,
    last_sweep: Option<f64>,
}

impl TickEngine {
    /// Build an engine from configuration.
    ///
    /// Returns the engine and the receiving end of the snapshot channel.
    pub fn new(
        config: &Config,
        store: Arc<TimingStore>,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn IoExecutor>,
        probe: Arc<dyn SystemProbe>,
    ) -> (Self, watch::Receiver<Arc<StatusSnapshot>>) {
        let planner = JitterPlanner::new(config.scheduler.clone(), &config.install_id, clock.local_date());
        let (publisher, rx) = SnapshotPublisher::new(config.scheduler.status_emit_ms);
        let engine = Self {
            store,
            clock,
            executor,
            planner,
            policy: PolicyEngine::new(config.policy.clone(), probe),
            retry: RetryController::new(config.retry.clone()),
            quarantine: QuarantineManager::new(config.quarantine.clone()),
            retention: config.retention.clone(),
            countdown_log_secs: config.scheduler.countdown_log_secs,
            publisher,
            queue: Vec::new(),
            state: TickState::new(),
            last_countdown: None,
            last_sweep: None,
        };
        (engine, rx)
    }

    pub fn store(&self) -> &Arc<TimingStore> {
        &self.store
    }

    pub fn planner(&self) -> &JitterPlanner {
        &self.planner
    }

    pub fn state(&self) -> &TickState {
        &self.state
    }

    /// Operations waiting to run, ordered by due time
    pub fn queue(&self) -> Vec<ScheduledOperation> {
        let mut ops = self.queue.clone();
        ops.sort_by(|a, b| a.at.total_cmp(&b.at));
        ops
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.publisher.subscribe()
    }

    /// Swap in a new configuration; the queue is kept and replanned lazily
    pub fn apply_config(&mut self, config: &Config) {
        self.planner.set_config(config.scheduler.clone());
        self.policy.set_config(config.policy.clone());
        self.retry.set_config(config.retry.clone());
        self.quarantine.set_config(config.quarantine.clone());
        self.retention = config.retention.clone();
        self.countdown_log_secs = config.scheduler.countdown_log_secs;
        self.publisher.set_emit_ms(config.scheduler.status_emit_ms);
        tracing::info!("Tick engine configuration updated");
    }

    /// Run one tick at the clock's current time
    pub async fn tick(&mut self) -> TickReport {
        let now = self.clock.monotonic();
        self.state.tick();

        let mut report = TickReport {
            released: self.quarantine.release_due(&self.store, now),
            ..TickReport::default()
        };

        if self.policy.refresh(now, self.store.global_pause()) {
            let transitions = PolicyEngine::transitions(self.policy.state(), &self.store.get_all());
            report.policy_transitions = apply_transitions(&self.store, &transitions);
        }
        report.dropped = self.drop_stale_ops();

        if self.planner.roll_date(self.clock.local_date()) {
            tracing::info!(epoch = %self.planner.tie_breaker().seed().epoch(), "Tie-break seed rolled");
        }
        report.planned = self.plan(now);

        self.execute_due(now, &mut report).await;

        report.published = self.publisher.maybe_publish(self.store.snapshot(), now);
        self.log_countdown(now);
        report.removed = self.maybe_sweep(now);

        self.state.record(&report);
        report
    }

    /// Remove queued operations that no longer match the store
    fn drop_stale_ops(&mut self) -> usize {
        let before = self.queue.len();
        let store = &self.store;
        self.queue.retain(|op| {
            store.get(&op.volume).is_some_and(|v| {
                v.is_schedulable() && v.next_due_at.is_some_and(|due| (due - op.at).abs() < DUE_EPS)
            })
        });
        let dropped = before - self.queue.len();
        if dropped > 0 {
            tracing::debug!(dropped, "Dropped stale queued operations");
        }
        dropped
    }

    fn plan(&mut self, now: f64) -> usize {
        let needing: Vec<VolumeTimingState> = self
            .store
            .get_all()
            .into_iter()
            .filter(|v| v.is_schedulable() && !self.queue.iter().any(|op| op.volume == v.id))
            .collect();
        if needing.is_empty() {
            return 0;
        }

        let mut planned = 0;
        for pv in self.planner.plan(&needing, &self.queue, now) {
            let op = pv.op;
            match self.store.commit_plan(
                &op.volume,
                op.at,
                pv.effective_interval_secs,
                pv.status_reason,
                pv.late_slack_used,
            ) {
                Ok(()) => {
                    tracing::debug!(
                        volume = %op.volume,
                        at = op.at,
                        kind = ?op.kind,
                        placement = ?op.placement,
                        offset_ms = op.offset_ms,
                        pack_size = op.pack_size,
                        "Operation planned"
                    );
                    self.queue.push(op);
                    planned += 1;
                }
                Err(e) => tracing::warn!(volume = %op.volume, error = %e, "Failed to commit plan"),
            }
        }
        planned
    }

    /// Operations whose planned time has passed
    fn take_due(&mut self, now: f64) -> Vec<ScheduledOperation> {
        let (mut due, rest): (Vec<_>, Vec<_>) = self.queue.drain(..).partition(|op| op.at <= now);
        self.queue = rest;
        due.sort_by(|a, b| a.at.total_cmp(&b.at));
        due
    }

    async fn execute_due(&mut self, now: f64, report: &mut TickReport) {
        for op in self.take_due(now) {
            if let Err(e) = self.store.clear_next_due(&op.volume) {
                tracing::warn!(volume = %op.volume, error = %e, "Queued operation for unknown volume");
                continue;
            }
            let Some(volume) = self.store.get(&op.volume) else {
                continue;
            };

            let target = VolumeTarget::from(&volume);
            let attempt = self.retry.run(self.executor.as_ref(), &target, op.kind).await;
            let guard_violation = self.planner.violates_guard(&volume, now);
            if guard_violation {
                tracing::warn!(volume = %op.volume, "HDD gap exceeded");
            }

            report.executed += 1;
            let scope = ResultScope::Tick {
                succeeded: attempt.succeeded,
                attempts: attempt.attempts,
                guard_violation,
            };
            let failures = match self.store.record_result(&op.volume, now, attempt.outcome, scope) {
                Ok(failures) => failures,
                Err(e) => {
                    tracing::warn!(volume = %op.volume, error = %e, "Failed to record tick result");
                    continue;
                }
            };

            if attempt.succeeded {
                tracing::debug!(volume = %op.volume, kind = ?op.kind, attempts = attempt.attempts, "Tick succeeded");
                if let Err(e) = self.store.mark_seen(&op.volume, self.clock.wall()) {
                    tracing::warn!(volume = %op.volume, error = %e, "Failed to mark volume seen");
                }
                continue;
            }
            report.failed += 1;
            tracing::info!(volume = %op.volume, failures, "Tick failed");
            match self.quarantine.check(&self.store, &op.volume, failures, now) {
                Ok(Some(_)) => report.quarantined.push(op.volume),
                Ok(None) => {}
                Err(e) => tracing::warn!(volume = %op.volume, error = %e, "Failed to quarantine"),
            }
        }
    }

    fn log_countdown(&mut self, now: f64) {
        if self.countdown_log_secs == 0 {
            return;
        }
        let due = self
            .last_countdown
            .is_none_or(|last| now - last >= self.countdown_log_secs as f64);
        if !due {
            return;
        }
        self.last_countdown = Some(now);
        let line = countdown_line(&self.store.get_all(), now);
        if !line.is_empty() {
            log::info!("Next due: {}", line);
        }
    }

    fn maybe_sweep(&mut self, now: f64) -> Vec<String> {
        let due = self
            .last_sweep
            .is_none_or(|last| now - last >= self.retention.sweep_secs as f64);
        if !due {
            return Vec::new();
        }
        self.last_sweep = Some(now);
        retention::sweep(&self.store, &self.retention, self.quarantine.cap(), self.clock.wall())
    }
}

/// `E:+12s, F:+30s` for every volume with a due time, soonest first
pub fn countdown_line(volumes: &[VolumeTimingState], now: f64) -> String {
    let mut due: Vec<(&str, f64)> = volumes
        .iter()
        .filter_map(|v| v.next_due_at.map(|at| (v.id.as_str(), at)))
        .collect();
    due.sort_by(|a, b| a.1.total_cmp(&b.1));
    due.iter()
        .map(|(id, at)| format!("{}:+{}s", id, (at - now).max(0.0).round() as i64))
        .collect::<Vec<_>>()
        .join(", ")
}
