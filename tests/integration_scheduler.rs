//! Scheduler integration tests
//!
//! Drives the tick engine with a fake clock and the simulated executor.

use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;
use revenant::clock::{Clock, FakeClock};
use revenant::config::Config;
use revenant::control::Control;
use revenant::daemon::TickEngine;
use revenant::domain::{
    FailureClass, OperationKind, PauseReason, ScheduledOperation, VolumeKind, VolumeStatus, VolumeTimingState,
};
use revenant::planner::{ANY_SPACING_SECS, JitterPlanner, WRITE_SPACING_SECS};
use revenant::policy::FixedProbe;
use revenant::retry::{RetryController, SimulatedExecutor};
use revenant::store::TimingStore;

const INSTALL: &str = "0f8fad5b-d9cb-469f-a165-70867728950e";
const TICK: f64 = 0.5;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 10, 10).unwrap()
}

fn config() -> Config {
    let mut config = Config::default();
    config.install_id = INSTALL.to_string();
    config.retry.backoff_ms = vec![0];
    config
}

struct Rig {
    clock: Arc<FakeClock>,
    store: Arc<TimingStore>,
    exec: Arc<SimulatedExecutor>,
    probe: Arc<FixedProbe>,
    engine: TickEngine,
}

impl Rig {
    fn new(config: &Config, volumes: &[(&str, VolumeKind, u64)]) -> Self {
        let clock = Arc::new(FakeClock::new(0.0, date()));
        let store = Arc::new(TimingStore::new(clock.clone()));
        for (id, kind, interval) in volumes {
            store.register(id, *kind, *interval, clock.wall());
            store.set_config(id, true, *interval, *kind, None).unwrap();
        }
        let exec = Arc::new(SimulatedExecutor::default());
        let probe = Arc::new(FixedProbe::default());
        let (engine, _rx) = TickEngine::new(config, store.clone(), clock.clone(), exec.clone(), probe.clone());
        Self {
            clock,
            store,
            exec,
            probe,
            engine,
        }
    }

    fn control(&self) -> Control {
        Control::new(
            self.store.clone(),
            self.clock.clone(),
            self.exec.clone(),
            RetryController::new(config().retry),
        )
    }

    fn now(&self) -> f64 {
        self.clock.monotonic()
    }

    async fn step(&mut self) -> revenant::daemon::TickReport {
        self.clock.advance(TICK);
        self.engine.tick().await
    }
}

fn assert_spaced(ops: &[ScheduledOperation]) {
    for (i, a) in ops.iter().enumerate() {
        for b in &ops[i + 1..] {
            let need = if a.kind == OperationKind::Write && b.kind == OperationKind::Write {
                WRITE_SPACING_SECS
            } else {
                ANY_SPACING_SECS
            };
            assert!(
                (a.at - b.at).abs() + 1e-6 >= need,
                "{} at {} and {} at {} are too close",
                a.volume,
                a.at,
                b.volume,
                b.at
            );
        }
    }
}

#[tokio::test]
async fn test_quarantine_escalates_30_then_60() {
    let mut rig = Rig::new(&config(), &[("E:", VolumeKind::Ssd, 10)]);
    rig.exec.set_fault("E:", Some(FailureClass::IoFatal));
    rig.engine.tick().await;

    let mut durations = Vec::new();
    for _ in 0..400 {
        let report = rig.step().await;
        if report.quarantined.contains(&"E:".to_string()) {
            let release = rig.store.get("E:").unwrap().quarantine_release_at.unwrap();
            durations.push(release - rig.now());
        }
        if durations.len() == 2 {
            break;
        }
    }
    assert_eq!(durations, vec![30.0, 60.0]);
    assert_eq!(rig.store.get("E:").unwrap().quarantine_escalation, 2);
}

#[tokio::test]
async fn test_recovery_resets_escalation() {
    let mut rig = Rig::new(&config(), &[("E:", VolumeKind::Ssd, 10)]);
    rig.exec.set_fault("E:", Some(FailureClass::IoFatal));
    rig.engine.tick().await;

    while rig.store.get("E:").unwrap().status != VolumeStatus::Quarantine {
        rig.step().await;
    }
    rig.exec.set_fault("E:", None);

    let mut released = false;
    for _ in 0..200 {
        let report = rig.step().await;
        released |= !report.released.is_empty();
        if released && rig.store.get("E:").unwrap().last_ok_at.is_some() {
            break;
        }
    }
    let v = rig.store.get("E:").unwrap();
    assert!(released);
    assert_eq!(v.status, VolumeStatus::Active);
    assert_eq!(v.consecutive_tick_failures, 0);
    assert_eq!(v.quarantine_escalation, 0);

    // The next quarantine starts again from the base duration
    rig.exec.set_fault("E:", Some(FailureClass::IoFatal));
    let mut duration = None;
    for _ in 0..400 {
        let report = rig.step().await;
        if report.quarantined.contains(&"E:".to_string()) {
            let release = rig.store.get("E:").unwrap().quarantine_release_at.unwrap();
            duration = Some(release - rig.now());
            break;
        }
    }
    assert_eq!(duration, Some(30.0));
    assert_eq!(rig.store.get("E:").unwrap().quarantine_escalation, 1);
}

#[tokio::test]
async fn test_device_gone_spends_one_attempt_per_tick() {
    let mut rig = Rig::new(&config(), &[("E:", VolumeKind::Ssd, 10)]);
    rig.exec.set_fault("E:", Some(FailureClass::DeviceGone));
    rig.engine.tick().await;
    while rig.store.get("E:").unwrap().tick_counter == 0 {
        rig.step().await;
    }
    let v = rig.store.get("E:").unwrap();
    assert_eq!(v.last_tick_attempts, 1);
    assert_eq!(v.consecutive_tick_failures, 1);
    assert_eq!(rig.exec.calls_for("E:"), 1);
}

#[tokio::test]
async fn test_hdd_gap_is_never_exceeded() {
    let mut rig = Rig::new(&config(), &[("E:", VolumeKind::Hdd, 600)]);
    rig.engine.tick().await;
    assert_eq!(rig.store.get("E:").unwrap().status, VolumeStatus::HddCapped);

    let mut executed_at = Vec::new();
    for _ in 0..1300 {
        let report = rig.step().await;
        if report.executed > 0 {
            executed_at.push(rig.now());
        }
    }
    assert!(executed_at.len() >= 2);
    for pair in executed_at.windows(2) {
        assert!(pair[1] - pair[0] <= 300.0, "gap {}", pair[1] - pair[0]);
    }
    let v = rig.store.get("E:").unwrap();
    assert!(!v.hdd_guard_violation);
    assert!((v.effective_interval_secs - 299.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_same_tick_volumes_are_spaced() {
    let volumes = [
        ("E:", VolumeKind::Hdd, 60),
        ("F:", VolumeKind::Hdd, 60),
        ("G:", VolumeKind::Ssd, 60),
        ("H:", VolumeKind::Ssd, 60),
        ("I:", VolumeKind::Unknown, 60),
    ];
    let mut rig = Rig::new(&config(), &volumes);
    rig.engine.tick().await;
    let queue = rig.engine.queue();
    assert_eq!(queue.len(), 5);
    assert!(queue.iter().all(|op| op.pack_size == 5));
    assert_spaced(&queue);

    for _ in 0..130 {
        rig.step().await;
    }
    let calls = rig.exec.calls();
    assert_eq!(calls.len(), 5);
    assert_eq!(calls.iter().filter(|(_, k)| *k == OperationKind::Write).count(), 2);
}

#[tokio::test]
async fn test_battery_pause_spares_user_pause() {
    let mut cfg = config();
    cfg.policy.pause_on_battery = true;
    let mut rig = Rig::new(&cfg, &[("E:", VolumeKind::Ssd, 60), ("F:", VolumeKind::Ssd, 60)]);
    rig.control().pause("E:").unwrap();
    rig.probe.set_on_battery(true);

    rig.engine.tick().await;
    let f = rig.store.get("F:").unwrap();
    assert_eq!(f.status, VolumeStatus::Paused);
    assert_eq!(f.pause_reason, Some(PauseReason::Battery));
    assert_eq!(rig.store.get("E:").unwrap().pause_reason, Some(PauseReason::User));
    assert!(rig.engine.queue().is_empty());

    rig.probe.set_on_battery(false);
    for _ in 0..10 {
        rig.step().await;
    }
    let f = rig.store.get("F:").unwrap();
    assert_eq!(f.status, VolumeStatus::Active);
    assert!(f.next_due_at.is_some());
    assert_eq!(rig.store.get("E:").unwrap().status, VolumeStatus::Paused);
}

#[tokio::test]
async fn test_global_pause_round_trip() {
    let mut rig = Rig::new(&config(), &[("E:", VolumeKind::Ssd, 60), ("F:", VolumeKind::Hdd, 60)]);
    rig.engine.tick().await;
    assert_eq!(rig.engine.queue().len(), 2);

    let control = rig.control();
    assert_eq!(control.set_global_pause(true), 2);
    let report = rig.step().await;
    assert_eq!(report.dropped, 2);
    assert!(rig.engine.queue().is_empty());

    assert_eq!(control.set_global_pause(false), 2);
    let report = rig.step().await;
    assert_eq!(report.planned, 2);
    assert!(rig.store.get_all().iter().all(|v| v.status.is_running()));
}

#[tokio::test]
async fn test_snapshot_channel_receives_updates() {
    let cfg = config();
    let clock = Arc::new(FakeClock::new(0.0, date()));
    let store = Arc::new(TimingStore::new(clock.clone()));
    store.register("E:", VolumeKind::Ssd, 60, clock.wall());
    store.set_config("E:", true, 60, VolumeKind::Ssd, None).unwrap();
    let (mut engine, mut rx) = TickEngine::new(
        &cfg,
        store,
        clock,
        Arc::new(SimulatedExecutor::default()),
        Arc::new(FixedProbe::default()),
    );

    engine.tick().await;
    assert!(rx.has_changed().unwrap());
    let snap = rx.borrow_and_update().clone();
    assert!(snap.version > 0);
    assert!(snap.get("E:").unwrap().next_due_at.is_some());
}

#[tokio::test]
async fn test_plans_are_reproducible_across_restarts() {
    let volumes = [
        ("E:", VolumeKind::Hdd, 60),
        ("F:", VolumeKind::Hdd, 60),
        ("G:", VolumeKind::Ssd, 60),
    ];
    let mut a = Rig::new(&config(), &volumes);
    let mut b = Rig::new(&config(), &volumes);
    a.engine.tick().await;
    b.engine.tick().await;
    assert_eq!(a.engine.queue(), b.engine.queue());
}

fn kind_strategy() -> impl Strategy<Value = VolumeKind> {
    prop_oneof![
        Just(VolumeKind::Hdd),
        Just(VolumeKind::Ssd),
        Just(VolumeKind::Unknown),
        Just(VolumeKind::Network),
    ]
}

fn volumes_strategy() -> impl Strategy<Value = Vec<VolumeTimingState>> {
    prop::collection::vec((kind_strategy(), 5u64..900, prop::option::of(0.0f64..600.0)), 1..10).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (kind, interval, last_ok))| {
                let mut v = VolumeTimingState::new(&format!("V{}:", i), kind, interval);
                v.enabled = true;
                v.status = VolumeStatus::Active;
                v.last_ok_at = last_ok;
                v.last_operation_at = last_ok;
                v
            })
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_planned_operations_are_spaced(volumes in volumes_strategy(), now in 0.0f64..600.0) {
        let planner = JitterPlanner::new(config().scheduler, INSTALL, date());
        let ops: Vec<ScheduledOperation> = planner.plan(&volumes, &[], now).into_iter().map(|p| p.op).collect();
        prop_assert_eq!(ops.len(), volumes.len());
        for (i, a) in ops.iter().enumerate() {
            prop_assert!(a.at >= now);
            for b in &ops[i + 1..] {
                let need = if a.kind == OperationKind::Write && b.kind == OperationKind::Write {
                    WRITE_SPACING_SECS
                } else {
                    ANY_SPACING_SECS
                };
                prop_assert!((a.at - b.at).abs() + 1e-6 >= need);
            }
        }
    }

    #[test]
    fn prop_planning_is_deterministic(volumes in volumes_strategy(), now in 0.0f64..600.0) {
        let a = JitterPlanner::new(config().scheduler, INSTALL, date()).plan(&volumes, &[], now);
        let b = JitterPlanner::new(config().scheduler, INSTALL, date()).plan(&volumes, &[], now);
        prop_assert_eq!(a, b);
    }
}
