//! Daemon core - tick engine, loop lifecycle, and retention
//!
//! The daemon is the long-running part of revenant that:
//! - Plans and executes sentinel operations every tick
//! - Publishes status snapshots to observers
//! - Removes volumes that are both long unseen and terminally quarantined

mod publish;
pub mod retention;
pub mod scheduler_loop;
pub mod tick;

pub use publish::SnapshotPublisher;
pub use scheduler_loop::{LoopState, SchedulerLoop};
pub use tick::{TickEngine, TickReport, TickState, countdown_line};
