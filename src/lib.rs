//! Shared-memory quadrotor control-stack simulation.
//!
//! Six forked actors (battery, accelerometer, GPS, flight controller,
//! telemetry, watchdog) and a supervisor communicate through one
//! `MAP_SHARED` record guarded by process-shared POSIX semaphores. See
//! `supervisor::main_loop` for the entry point both binaries drive.

pub mod actors;
pub mod config;
pub mod error;
pub mod shm;
pub mod signals;
pub mod state;
pub mod supervisor;
pub mod sync;
