//! One module per actor (§2, §4). Each exposes a single `run` entry point
//! taking a reference to the mapped `SharedRecord` and a shutdown flag;
//! `supervisor.rs` forks a child per actor and calls straight into `run`.

pub mod accel;
pub mod battery;
pub mod flight;
pub mod gps;
pub mod telemetry;
pub mod watchdog;
