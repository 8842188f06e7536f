//! A process-shared POSIX semaphore embedded directly in the mapped record.
//!
//! Every lock in this crate — the action rwlock, the single-writer mutexes,
//! the GPS ring's counting semaphores — bottoms out in one of these. They are
//! initialized with `pshared = 1` so that `sem_wait`/`sem_post` calls made
//! from different forked processes observe the same count; an in-process
//! `std::sync::Mutex` would not do that, since its futex word isn't visible
//! across the process boundary the way a semaphore living in `MAP_SHARED`
//! memory is.

use std::mem::MaybeUninit;
use std::time::Duration;

use crate::error::{SemError, WaitError};

/// Wraps a `libc::sem_t`. Must live inside memory that is itself
/// `MAP_SHARED` — constructing one on the stack and sharing it across a
/// `fork()` boundary works too (the child inherits the mapping), but sharing
/// it across unrelated processes requires it to sit in the named
/// shared-memory object.
#[repr(transparent)]
pub struct RawSemaphore(libc::sem_t);

impl RawSemaphore {
    /// Initializes the semaphore in place to `value`, process-shared.
    ///
    /// # Safety
    /// `self` must not be moved after this call, and must not already be
    /// initialized (or must have been `destroy`'d first) — re-`init`ing a
    /// live semaphore that a waiter is blocked on is undefined behavior,
    /// which is exactly why stall recovery terminates every actor before
    /// calling this again (§4.7).
    pub unsafe fn init(&mut self, value: u32) -> std::io::Result<()> {
        let rc = libc::sem_init(&mut self.0 as *mut libc::sem_t, 1, value);
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    }

    /// Placement-constructs a zeroed, uninitialized semaphore slot.
    pub fn uninit() -> libc::sem_t {
        unsafe { MaybeUninit::<libc::sem_t>::zeroed().assume_init() }
    }

    /// A zeroed, uninitialized semaphore. Callers must run `init` before any
    /// `wait`/`post` — embedding this in a larger `repr(C)` struct is the
    /// normal way to give a semaphore a home inside shared memory.
    pub fn new_uninit() -> Self {
        RawSemaphore(Self::uninit())
    }

    /// Blocking decrement. Retries transparently on `EINTR`; any other
    /// failure is returned rather than panicking, per §7's error taxonomy —
    /// it's fatal for the calling actor but not for the process.
    pub fn wait(&self) -> Result<(), SemError> {
        loop {
            let rc = unsafe { libc::sem_wait(&self.0 as *const _ as *mut libc::sem_t) };
            if rc == 0 {
                return Ok(());
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(SemError(err));
        }
    }

    /// Non-blocking decrement. `Ok(true)` on success, `Ok(false)` if it would
    /// block. Any other failure is returned rather than panicking.
    pub fn try_wait(&self) -> Result<bool, SemError> {
        let rc = unsafe { libc::sem_trywait(&self.0 as *const _ as *mut libc::sem_t) };
        if rc == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EAGAIN) {
            return Ok(false);
        }
        if err.kind() == std::io::ErrorKind::Interrupted {
            return self.try_wait();
        }
        Err(SemError(err))
    }

    /// Decrement with a deadline measured against `CLOCK_MONOTONIC`.
    ///
    /// `sem_timedwait` itself requires `CLOCK_REALTIME`; we instead poll with
    /// a bounded `sem_trywait`/short-sleep loop against `Instant`, which
    /// keeps the monotonic-clock-only rule from §4.2 intact and sidesteps
    /// wall-clock jumps affecting producer/consumer timeouts.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), WaitError> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if self.try_wait()? {
                return Ok(());
            }
            if std::time::Instant::now() >= deadline {
                return Err(WaitError::TimedOut);
            }
            std::thread::sleep(Duration::from_micros(500));
        }
    }

    /// Increment. Returned rather than panicking on failure, per §7.
    pub fn post(&self) -> Result<(), SemError> {
        let rc = unsafe { libc::sem_post(&self.0 as *const _ as *mut libc::sem_t) };
        if rc != 0 {
            return Err(SemError(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Tears down the semaphore. Only safe when no other process is
    /// currently blocked in `wait`/`wait_timeout` on it.
    ///
    /// # Safety
    /// Caller must guarantee no concurrent waiter, per the same contract as
    /// `init`.
    pub unsafe fn destroy(&mut self) {
        let _ = libc::sem_destroy(&mut self.0 as *mut libc::sem_t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn fresh() -> Box<RawSemaphore> {
        let mut sem = Box::new(RawSemaphore(RawSemaphore::uninit()));
        unsafe { sem.init(1).unwrap() };
        sem
    }

    #[test]
    fn wait_then_post_round_trips() {
        let sem = fresh();
        sem.wait().unwrap();
        sem.post().unwrap();
        sem.wait().unwrap();
    }

    #[test]
    fn try_wait_fails_when_exhausted() {
        let sem = fresh();
        sem.wait().unwrap();
        assert_eq!(sem.try_wait().unwrap(), false);
        sem.post().unwrap();
        assert_eq!(sem.try_wait().unwrap(), true);
    }

    #[test]
    fn wait_timeout_expires_when_never_posted() {
        let sem = fresh();
        sem.wait().unwrap(); // drain the single permit
        let start = std::time::Instant::now();
        let result = sem.wait_timeout(Duration::from_millis(50));
        assert!(matches!(result, Err(WaitError::TimedOut)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wait_timeout_succeeds_when_posted_concurrently() {
        let sem: Arc<Box<RawSemaphore>> = Arc::new(fresh());
        sem.wait().unwrap(); // drain so the next wait would otherwise block
        let sem2 = Arc::clone(&sem);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            sem2.post().unwrap();
        });
        let result = sem.wait_timeout(Duration::from_millis(500));
        handle.join().unwrap();
        assert!(result.is_ok());
    }
}
