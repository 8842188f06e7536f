//! Process-shared synchronization primitives (§4.1).
//!
//! Everything here is built on top of a raw POSIX semaphore and is safe to
//! embed directly inside the memory-mapped shared record, so it survives
//! `fork()` without any message-passing: child processes inherit the
//! mapping and see the same semaphore state the supervisor initialized
//! before spawning them.

pub mod mutex;
pub mod ring;
pub mod rwlock;
pub mod sem;

pub use mutex::{BinaryMutex, MutexGuard};
pub use ring::GpsRing;
pub use rwlock::{ActionReadGuard, ActionRwLock, ActionWriteGuard};
pub use sem::RawSemaphore;
