//! Signal plumbing for the supervisor and the actors it forks (§4.7, §6).
//!
//! Actors only ever need a cheap "should I stop" flag checked once per
//! iteration; the supervisor needs to block on a small signal set and
//! distinguish which one fired. Both are built on `signal-hook` rather than
//! hand-rolled `sigaction` calls, matching how the pack's sync-manager
//! reference reaches for a crate-level abstraction instead of raw libc for
//! its own background-thread shutdown flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::{SIGCHLD, SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

use crate::error::DroneError;

/// Registers `SIGTERM` to flip an `AtomicBool` rather than run a signal
/// handler directly; every actor's main loop polls this once per iteration
/// (§5, §6: "checked once per iteration, not pre-empting a blocked
/// syscall").
pub fn install_shutdown_flag() -> Result<Arc<AtomicBool>, DroneError> {
    let flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&flag)).map_err(DroneError::Signal)?;
    Ok(flag)
}

/// The three signal categories the supervisor's main loop distinguishes
/// (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorSignal {
    Terminate,
    ChildExit,
    Stall,
}

/// A blocking iterator over the supervisor's signal set. Wraps
/// `signal_hook::iterator::Signals` so callers just loop on `next()`
/// without re-deriving which raw signal number maps to which category.
pub struct SupervisorSignals {
    inner: Signals,
}

impl SupervisorSignals {
    pub fn install() -> Result<Self, DroneError> {
        let inner = Signals::new([SIGTERM, SIGINT, SIGCHLD, SIGUSR1])
            .map_err(DroneError::Signal)?;
        Ok(SupervisorSignals { inner })
    }

    /// Blocks until the next signal in the set arrives.
    pub fn next(&mut self) -> SupervisorSignal {
        loop {
            let sig = self.inner.forever().next().expect("signal iterator never ends");
            match sig {
                SIGTERM | SIGINT => return SupervisorSignal::Terminate,
                SIGCHLD => return SupervisorSignal::ChildExit,
                SIGUSR1 => return SupervisorSignal::Stall,
                _ => continue,
            }
        }
    }
}

/// Sends `SIGTERM` to the whole process group (battery hard-shutdown and
/// supervisor clean-shutdown both use this, §4.2 / §4.7).
pub fn terminate_process_group() {
    unsafe {
        libc::kill(0, libc::SIGTERM);
    }
}

/// Sends `SIGTERM` directly to one pid (supervisor terminating a single
/// actor by its identity-table entry ahead of stall recovery, §4.7).
pub fn terminate_pid(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

/// Sends the stall-notification signal (`SIGUSR1`) to a specific pid — the
/// watchdog addressing its own parent, captured via `getppid()` at startup
/// (§3, §4.7), rather than looking itself up in the identity table.
pub fn notify_stall(supervisor_pid: u32) {
    unsafe {
        libc::kill(supervisor_pid as libc::pid_t, libc::SIGUSR1);
    }
}

/// The watchdog's view of its own parent pid, captured once at startup so
/// it keeps working even if the supervisor later reaps an unrelated child
/// with the same short-lived pid space churn.
pub fn parent_pid() -> u32 {
    unsafe { libc::getppid() as u32 }
}

/// Reaps every currently-exited child without blocking, returning their
/// pids. Used by the supervisor's `SIGCHLD` handler (§4.7) to drain all
/// pending exits in one pass, since multiple children can exit before the
/// supervisor gets scheduled again.
pub fn reap_exited_children() -> Vec<u32> {
    let mut reaped = Vec::new();
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status as *mut libc::c_int, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        reaped.push(pid as u32);
    }
    reaped
}

/// Thin wrapper for `fork()`, kept here rather than in `supervisor.rs` so
/// every raw-syscall boundary in the crate lives in one of `shm.rs` /
/// `signals.rs`.
///
/// # Safety
/// Same safety contract as `libc::fork`: the child must avoid any
/// non-async-signal-safe operation before it either execs or reaches code
/// written with that restriction in mind. Every actor's `run` entry point
/// is written to satisfy this.
pub unsafe fn fork() -> Result<ForkResult, DroneError> {
    let pid = libc::fork();
    if pid < 0 {
        return Err(DroneError::Fork(std::io::Error::last_os_error()));
    }
    if pid == 0 {
        Ok(ForkResult::Child)
    } else {
        Ok(ForkResult::Parent(pid as u32))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ForkResult {
    Parent(u32),
    Child,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_starts_false() {
        let flag = install_shutdown_flag().expect("register");
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn reap_exited_children_returns_empty_when_nothing_exited() {
        assert!(reap_exited_children().is_empty());
    }
}
