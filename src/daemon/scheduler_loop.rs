//! Scheduler loop lifecycle
//!
//! `Stopped -> Running -> Stopping -> Stopped`. The tick engine runs on its own
//! tokio task; `stop` signals it and waits at most `join_timeout`. Cancellation
//! is observed at the top of every tick and while sleeping between ticks.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Result, RevenantError};

use super::tick::TickEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Stopped,
    Running,
    Stopping,
}

pub struct SchedulerLoop {
    state: LoopState,
    tick: Duration,
    join_timeout: Duration,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<TickEngine>>,
}

impl SchedulerLoop {
    pub fn new(tick: Duration, join_timeout: Duration) -> Self {
        Self {
            state: LoopState::Stopped,
            tick,
            join_timeout,
            shutdown: None,
            handle: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == LoopState::Running
    }

    /// Spawn the tick task. Fails unless the loop is stopped.
    pub fn start(&mut self, engine: TickEngine) -> Result<()> {
        if self.state != LoopState::Stopped {
            return Err(RevenantError::InvalidState(format!(
                "scheduler loop is {:?}, cannot start",
                self.state
            )));
        }
        let (tx, rx) = watch::channel(false);
        self.handle = Some(tokio::spawn(run(engine, self.tick, rx)));
        self.shutdown = Some(tx);
        self.state = LoopState::Running;
        tracing::info!(tick_ms = self.tick.as_millis() as u64, "Scheduler loop started");
        Ok(())
    }

    /// Signal the task and join it within the timeout.
    ///
    /// Returns the engine when the task finished in time, `None` when it was
    /// abandoned or the loop was not running.
    pub async fn stop(&mut self) -> Option<TickEngine> {
        if self.state != LoopState::Running {
            return None;
        }
        self.state = LoopState::Stopping;
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(true);
        }

        let engine = match self.handle.take() {
            Some(handle) => match tokio::time::timeout(self.join_timeout, handle).await {
                Ok(Ok(engine)) => Some(engine),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Scheduler task failed");
                    None
                }
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = self.join_timeout.as_millis() as u64,
                        "Scheduler task did not stop in time, abandoning it"
                    );
                    None
                }
            },
            None => None,
        };

        self.state = LoopState::Stopped;
        tracing::info!("Scheduler loop stopped");
        engine
    }
}

async fn run(mut engine: TickEngine, tick: Duration, mut shutdown: watch::Receiver<bool>) -> TickEngine {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
        if *shutdown.borrow() {
            break;
        }
        let report = engine.tick().await;
        if report.executed > 0 || !report.quarantined.is_empty() {
            tracing::debug!(
                executed = report.executed,
                failed = report.failed,
                quarantined = report.quarantined.len(),
                "Tick complete"
            );
        }
    }
    engine
}
