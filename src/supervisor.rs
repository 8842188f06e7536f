//! Owns the shared region's lifecycle and the six actors' lifecycle (§4.7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info, warn};

use crate::error::DroneError;
use crate::shm::SharedMapping;
use crate::signals::{self, ForkResult, SupervisorSignal, SupervisorSignals};
use crate::state::{ActorId, NetworkConfig, SharedRecord, ACTOR_IDS};
use crate::{actors, config::SupervisorConfig};

/// Forks one child per actor, running `ActorId::run` in the child and
/// recording its pid in the identity table in the parent.
fn spawn_actor(
    mapping: &SharedMapping<SharedRecord>,
    actor: ActorId,
) -> Result<u32, DroneError> {
    match unsafe { signals::fork()? } {
        ForkResult::Parent(child_pid) => {
            let record = unsafe { mapping.as_ref() };
            record.identity.set(actor, child_pid);
            info!(target: "supervisor", "spawned {} as pid {child_pid}", actor.name());
            Ok(child_pid)
        }
        ForkResult::Child => {
            // The logger was already initialized by `main` before the first
            // fork; the child inherits that state rather than calling
            // `env_logger::init()` again, which would panic on a second
            // global-logger install.
            let record = unsafe { mapping.as_ref() };
            let shutdown = signals::install_shutdown_flag().unwrap_or_else(|e| {
                error!(target: "supervisor", "child {} failed to install shutdown flag: {e}", actor.name());
                std::process::exit(1);
            });
            run_actor(actor, record, shutdown);
            std::process::exit(0);
        }
    }
}

fn run_actor(actor: ActorId, record: &SharedRecord, shutdown: Arc<AtomicBool>) {
    match actor {
        ActorId::Battery => actors::battery::run(record, shutdown),
        ActorId::Accelerometer => actors::accel::run(record, shutdown),
        ActorId::Gps => actors::gps::run(record, shutdown),
        ActorId::FlightController => actors::flight::run(record, shutdown),
        ActorId::Telemetry => actors::telemetry::run(record, shutdown),
        ActorId::Watchdog => actors::watchdog::run(record, shutdown),
    }
}

fn spawn_all(mapping: &SharedMapping<SharedRecord>) -> Result<(), DroneError> {
    for actor in ACTOR_IDS {
        spawn_actor(mapping, actor)?;
    }
    Ok(())
}

/// Reaps every exited child this tick and respawns it under the same role,
/// by matching the reaped pid against the identity table (§4.7).
fn handle_child_exit(mapping: &SharedMapping<SharedRecord>) {
    let record = unsafe { mapping.as_ref() };
    for pid in signals::reap_exited_children() {
        if let Some(actor) = ACTOR_IDS.iter().find(|&&a| record.identity.get(a) == pid) {
            warn!(target: "supervisor", "{} (pid {pid}) exited, respawning", actor.name());
            if let Err(e) = spawn_actor(mapping, *actor) {
                error!(target: "supervisor", "failed to respawn {}: {e}", actor.name());
            }
        }
    }
}

/// Terminates every actor by pid, reinitializes the embedded semaphores in
/// place, and relies on the ordinary child-exit handler to respawn all six
/// once their processes are confirmed gone (§4.7, §9).
fn handle_stall(mapping: &SharedMapping<SharedRecord>) {
    warn!(target: "supervisor", "stall reported, terminating actors for recovery");
    let record = unsafe { mapping.as_ref() };
    let mut pids: Vec<(ActorId, u32)> = ACTOR_IDS
        .iter()
        .map(|&a| (a, record.identity.get(a)))
        .filter(|&(_, pid)| pid != 0)
        .collect();

    for &(_, pid) in &pids {
        signals::terminate_pid(pid);
    }

    wait_for_exit(&mut pids);

    // SAFETY: every actor we knew about has been confirmed gone above; no
    // process can be blocked on any of these primitives right now.
    unsafe {
        let record_mut = &mut *mapping.as_ptr();
        record_mut.reinit_primitives_only();
    }
    info!(target: "supervisor", "primitives reinitialized, actors will respawn via SIGCHLD");
}

fn wait_for_exit(pids: &mut Vec<(ActorId, u32)>) {
    while !pids.is_empty() {
        for pid in signals::reap_exited_children() {
            pids.retain(|&(_, p)| p != pid);
        }
        if !pids.is_empty() {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
    }
}

fn clean_shutdown(mapping: SharedMapping<SharedRecord>) -> Result<(), DroneError> {
    info!(target: "supervisor", "terminate signal received, shutting down");
    signals::terminate_process_group();
    drop(mapping);
    SharedMapping::<SharedRecord>::unlink().map_err(DroneError::SharedMemory)?;
    Ok(())
}

pub fn main_loop(cfg: SupervisorConfig) -> Result<(), DroneError> {
    let mapping: SharedMapping<SharedRecord> =
        SharedMapping::create().map_err(DroneError::SharedMemory)?;

    {
        let record_mut = unsafe { &mut *mapping.as_ptr() };
        write_record_in_place(record_mut, cfg.network);
        unsafe { record_mut.init() };
    }

    let mut signals = SupervisorSignals::install()?;
    spawn_all(&mapping)?;

    loop {
        match signals.next() {
            SupervisorSignal::Terminate => {
                return clean_shutdown(mapping);
            }
            SupervisorSignal::ChildExit => {
                handle_child_exit(&mapping);
            }
            SupervisorSignal::Stall => {
                handle_stall(&mapping);
            }
        }
    }
}

/// Placement-writes a freshly constructed record into the mapped region.
/// The region starts as anonymous zeroed pages from `ftruncate`; this
/// overwrite is the only time the crate constructs a `SharedRecord` by
/// value rather than operating on it through the mapping.
fn write_record_in_place(dst: &mut SharedRecord, network: NetworkConfig) {
    let built = SharedRecord::new_uninit(network);
    unsafe {
        std::ptr::write(dst as *mut SharedRecord, built);
    }
}
