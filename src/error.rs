//! Crate-level error types.
//!
//! `DroneError` covers the startup-fatal path (§7 of the spec): anything that
//! should abort the process with exit code 1 before any actor is spawned.
//! Per-iteration recoverable conditions (a timed-out GPS byte, a `recvfrom`
//! that would block) are *not* routed through this type — they're handled
//! locally inside the actor loop that hit them.

#[derive(Debug, thiserror::Error)]
pub enum DroneError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("bad port value {0:?}: {1}")]
    BadPort(String, std::num::ParseIntError),

    #[error("bad ip address {0:?}: too long for the shared-record field")]
    IpTooLong(String),

    #[error("shared memory setup failed: {0}")]
    SharedMemory(#[from] ShmError),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("socket setup failed: {0}")]
    SocketSetup(#[source] std::io::Error),

    #[error("fork failed: {0}")]
    Fork(#[source] std::io::Error),
}

/// Errors from the `shm_open`/`ftruncate`/`mmap` path, kept distinct from
/// `DroneError` so the `shm` module has no dependency on the rest of the crate.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    #[error("shm_open({0:?}) failed: {1}")]
    Open(String, #[source] std::io::Error),
    #[error("ftruncate failed: {0}")]
    Truncate(#[source] std::io::Error),
    #[error("mmap failed: {0}")]
    Map(#[source] std::io::Error),
    #[error("shm_unlink({0:?}) failed: {1}")]
    Unlink(String, #[source] std::io::Error),
}

/// A `sem_wait`/`sem_trywait`/`sem_post` call failed for a reason other than
/// `EINTR` (retried transparently inside `sem.rs`) or `EAGAIN` (a would-block,
/// not an error). Per §7's error taxonomy this is fatal for the calling
/// actor: never panic on it, propagate it up to the actor's `run()` loop,
/// which logs via `log::error!` and returns, letting the supervisor respawn
/// the actor.
#[derive(Debug, thiserror::Error)]
#[error("semaphore call failed: {0}")]
pub struct SemError(#[source] pub std::io::Error);

/// Result of a timed wait on a semaphore-backed primitive (ring byte, etc):
/// either an ordinary timeout (recoverable, per §7) or an underlying
/// semaphore failure (fatal, see `SemError`). Never panics the caller.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("timed out")]
    TimedOut,
    #[error(transparent)]
    Sem(#[from] SemError),
}
