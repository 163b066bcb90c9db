//! Revenant - keeps storage volumes awake
//!
//! Revenant periodically touches a sentinel file on every configured volume so
//! that disks do not spin down or go to sleep. The scheduling engine decides
//! when each touch happens: per-volume intervals, a jitter window, minimum
//! spacing between operations, a hard maximum gap for spinning disks, and a
//! date-seeded tie-break that is reproducible across restarts.

pub mod clock;
pub mod config;
pub mod control;
pub mod daemon;
pub mod domain;
pub mod error;
pub mod planner;
pub mod policy;
pub mod retry;
pub mod store;

pub use error::{Result, RevenantError};
