//! Throttled snapshot publication
//!
//! Snapshots go out on a `watch` channel when `status_emit_ms` has elapsed
//! since the last send, or immediately when the state hash changes.

use std::sync::Arc;

use tokio::sync::watch;

use crate::store::StatusSnapshot;

pub struct SnapshotPublisher {
    tx: watch::Sender<Arc<StatusSnapshot>>,
    emit_ms: u64,
    last_emit: Option<f64>,
    last_hash: String,
    sent: u64,
}

impl SnapshotPublisher {
    pub fn new(emit_ms: u64) -> (Self, watch::Receiver<Arc<StatusSnapshot>>) {
        let (tx, rx) = watch::channel(Arc::new(StatusSnapshot::empty()));
        let publisher = Self {
            tx,
            emit_ms,
            last_emit: None,
            last_hash: String::new(),
            sent: 0,
        };
        (publisher, rx)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.tx.subscribe()
    }

    pub fn set_emit_ms(&mut self, emit_ms: u64) {
        self.emit_ms = emit_ms;
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Send `snapshot` if the throttle allows it or the state changed
    pub fn maybe_publish(&mut self, snapshot: Arc<StatusSnapshot>, now: f64) -> bool {
        let hash = snapshot.state_hash();
        let elapsed = self
            .last_emit
            .is_none_or(|last| (now - last) * 1000.0 >= self.emit_ms as f64);
        if !elapsed && hash == self.last_hash {
            return false;
        }
        self.tx.send_replace(snapshot);
        self.last_emit = Some(now);
        self.last_hash = hash;
        self.sent += 1;
        true
    }
}
