//! Retry and quarantine.
//!
//! - `RetryController` runs one operation through an `IoExecutor` with a
//!   bounded, backoff-delayed attempt budget
//! - `QuarantineManager` turns consecutive failed ticks into exponential
//!   quarantine

pub mod controller;
pub mod executor;
pub mod quarantine;

pub use controller::{AttemptReport, PingReport, RetryController};
pub use executor::{IoExecutor, SimulatedExecutor, VolumeTarget, fault_outcome};
pub use quarantine::QuarantineManager;
