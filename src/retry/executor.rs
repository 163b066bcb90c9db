//! I/O executor interface.
//!
//! The scheduler never touches sentinel files itself. It hands a target and an
//! operation kind to an `IoExecutor` and reacts to the returned `IoOutcome`.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::domain::{FailureClass, IoOutcome, OperationKind, ResultCode, VolumeTimingState};

/// What the executor needs to know about a volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeTarget {
    pub id: String,
    pub sentinel_dir: Option<PathBuf>,
}

impl From<&VolumeTimingState> for VolumeTarget {
    fn from(v: &VolumeTimingState) -> Self {
        Self {
            id: v.id.clone(),
            sentinel_dir: v.sentinel_dir.clone(),
        }
    }
}

/// Performs one sentinel read or write.
///
/// Must be safe to call repeatedly and return promptly.
#[async_trait]
pub trait IoExecutor: Send + Sync {
    async fn perform(&self, target: &VolumeTarget, kind: OperationKind) -> IoOutcome;
}

/// Size of a simulated sentinel write
const SENTINEL_BYTES: f64 = 4096.0;

#[derive(Debug, Default)]
struct SimState {
    faults: HashMap<String, FailureClass>,
    scripts: HashMap<String, VecDeque<IoOutcome>>,
    calls: Vec<(String, OperationKind)>,
}

/// In-memory executor.
///
/// Scripted outcomes are consumed first, then a configured fault, then a
/// plain success.
#[derive(Debug)]
pub struct SimulatedExecutor {
    latency_ms: f64,
    state: Mutex<SimState>,
}

impl SimulatedExecutor {
    pub fn new(latency_ms: f64) -> Self {
        Self {
            latency_ms,
            state: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every call for `volume` fail with `class` (None clears)
    pub fn set_fault(&self, volume: &str, class: Option<FailureClass>) {
        let mut state = self.lock();
        match class {
            Some(class) => {
                state.faults.insert(volume.to_string(), class);
            }
            None => {
                state.faults.remove(volume);
            }
        }
    }

    /// Queue outcomes returned in order for `volume`
    pub fn script(&self, volume: &str, outcomes: impl IntoIterator<Item = IoOutcome>) {
        self.lock()
            .scripts
            .entry(volume.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<(String, OperationKind)> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, volume: &str) -> usize {
        self.lock().calls.iter().filter(|(id, _)| id == volume).count()
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(2.0)
    }
}

/// Failure outcome as a real executor would report it
pub fn fault_outcome(class: FailureClass) -> IoOutcome {
    let (code, details) = match class {
        FailureClass::DeviceGone => (ResultCode::Error, "volume not present"),
        FailureClass::Locked => (ResultCode::SkippedLocked, "sentinel locked"),
        FailureClass::IoFatal => (ResultCode::Error, "I/O error"),
        FailureClass::MissingSentinel => (ResultCode::Error, "sentinel missing"),
        FailureClass::Other => (ResultCode::Error, "unclassified failure"),
    };
    IoOutcome::failed(code, class, details)
}

#[async_trait]
impl IoExecutor for SimulatedExecutor {
    async fn perform(&self, target: &VolumeTarget, kind: OperationKind) -> IoOutcome {
        let mut state = self.lock();
        state.calls.push((target.id.clone(), kind));
        if let Some(outcome) = state.scripts.get_mut(&target.id).and_then(VecDeque::pop_front) {
            return outcome;
        }
        if let Some(class) = state.faults.get(&target.id) {
            return fault_outcome(*class);
        }
        let outcome = IoOutcome::ok(self.latency_ms);
        match kind {
            OperationKind::Write => {
                let secs = self.latency_ms.max(0.001) / 1000.0;
                outcome.with_throughput(SENTINEL_BYTES / (1024.0 * 1024.0) / secs)
            }
            OperationKind::Read => outcome,
        }
    }
}
