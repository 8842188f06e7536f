//! The action-cell reader/writer lock (§4.1, §9 "reader-preferring rwlock").
//!
//! Built from exactly the two binary semaphores the reference uses: `read`
//! guards the counter, `write` is held by whichever reader arrived first (or
//! by the sole writer). This is the textbook readers-preferring
//! construction — a waiting writer does not block new readers from
//! entering, so writer starvation is possible under sustained read load.
//! That's accepted per §5: battery and flight-controller writes are rare
//! relative to the read rate.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use super::sem::RawSemaphore;
use crate::error::SemError;
use crate::state::Mode;

/// Lives inside the shared record. `repr(C)` so its layout is stable across
/// the process boundary.
#[repr(C)]
pub struct ActionRwLock {
    read: RawSemaphore,
    write: RawSemaphore,
    read_counter: UnsafeCell<u8>,
    mode: UnsafeCell<Mode>,
}

// SAFETY: all access to `read_counter` and `mode` is mediated by the two
// semaphores; the type is shared deliberately across process boundaries.
unsafe impl Sync for ActionRwLock {}
unsafe impl Send for ActionRwLock {}

impl ActionRwLock {
    /// Builds an all-zero instance; the embedded semaphores are genuinely
    /// uninitialized until `reset` runs. Mirrors `BinaryMutex::new_uninit`
    /// and `GpsRing::new_uninit` so `SharedRecord::new_uninit` can build the
    /// whole record field by field before a single `init` pass brings every
    /// primitive up.
    pub fn new_uninit() -> Self {
        ActionRwLock {
            read: RawSemaphore::new_uninit(),
            write: RawSemaphore::new_uninit(),
            read_counter: UnsafeCell::new(0),
            mode: UnsafeCell::new(Mode::Idle),
        }
    }

    /// Initializes both semaphores to "available" and resets the counter.
    /// Used both for first construction and for stall-recovery reinit.
    ///
    /// # Safety
    /// No reader or writer may be active anywhere in the system when this
    /// runs — see §4.7.
    pub unsafe fn reset(&mut self, initial_mode: Mode) {
        self.read.init(1).expect("rwlock read sem init");
        self.write.init(1).expect("rwlock write sem init");
        *self.read_counter.get() = 0;
        *self.mode.get() = initial_mode;
    }

    /// Reinitializes only the semaphores, preserving whatever mode value is
    /// currently stored — the stall-recovery path (§4.7, §9) must not touch
    /// data fields, only primitives.
    ///
    /// # Safety
    /// Same precondition as `reset`.
    pub unsafe fn reinit_primitives_only(&mut self) {
        self.read.init(1).expect("rwlock read sem init");
        self.write.init(1).expect("rwlock write sem init");
        *self.read_counter.get() = 0;
    }

    /// Acquires the read side. Fails only if the underlying semaphore calls
    /// fail for a reason other than interruption — fatal for the calling
    /// actor (§7).
    pub fn read(&self) -> Result<ActionReadGuard<'_>, SemError> {
        self.read.wait()?;
        // SAFETY: `read` semaphore (count 1) makes this a critical section.
        let counter = unsafe { &mut *self.read_counter.get() };
        *counter += 1;
        if *counter == 1 {
            if let Err(e) = self.write.wait() {
                *counter -= 1;
                self.read.post().ok();
                return Err(e);
            }
        }
        self.read.post()?;
        Ok(ActionReadGuard { lock: self })
    }

    pub fn write(&self) -> Result<ActionWriteGuard<'_>, SemError> {
        self.write.wait()?;
        Ok(ActionWriteGuard { lock: self })
    }

    fn read_unlock(&self) {
        if let Err(e) = self.read.wait() {
            log::error!(target: "sync", "rwlock read_unlock wait failed: {e}");
            return;
        }
        let counter = unsafe { &mut *self.read_counter.get() };
        *counter -= 1;
        if *counter == 0 {
            if let Err(e) = self.write.post() {
                log::error!(target: "sync", "rwlock write post failed on read release: {e}");
            }
        }
        if let Err(e) = self.read.post() {
            log::error!(target: "sync", "rwlock read post failed on read release: {e}");
        }
    }
}

pub struct ActionReadGuard<'a> {
    lock: &'a ActionRwLock,
}

impl Deref for ActionReadGuard<'_> {
    type Target = Mode;
    fn deref(&self) -> &Mode {
        // SAFETY: no writer can be active while any reader holds `write`.
        unsafe { &*self.lock.mode.get() }
    }
}

impl Drop for ActionReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.read_unlock();
    }
}

pub struct ActionWriteGuard<'a> {
    lock: &'a ActionRwLock,
}

impl Deref for ActionWriteGuard<'_> {
    type Target = Mode;
    fn deref(&self) -> &Mode {
        unsafe { &*self.lock.mode.get() }
    }
}

impl DerefMut for ActionWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut Mode {
        unsafe { &mut *self.lock.mode.get() }
    }
}

impl Drop for ActionWriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.write.post() {
            log::error!(target: "sync", "rwlock write post failed on guard drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn fresh_lock() -> Box<ActionRwLock> {
        let mut lock = Box::new(ActionRwLock {
            read: RawSemaphore::new_uninit(),
            write: RawSemaphore::new_uninit(),
            read_counter: UnsafeCell::new(0),
            mode: UnsafeCell::new(Mode::Idle),
        });
        unsafe { lock.reset(Mode::Idle) };
        lock
    }

    #[test]
    fn initial_mode_is_idle() {
        let lock = fresh_lock();
        assert_eq!(*lock.read().unwrap(), Mode::Idle);
    }

    #[test]
    fn write_then_read_observes_new_value() {
        let lock = fresh_lock();
        {
            let mut w = lock.write().unwrap();
            *w = Mode::Fly;
        }
        assert_eq!(*lock.read().unwrap(), Mode::Fly);
    }

    #[test]
    fn multiple_readers_concurrently() {
        let lock = fresh_lock();
        let r1 = lock.read().unwrap();
        let r2 = lock.read().unwrap();
        assert_eq!(*r1, Mode::Idle);
        assert_eq!(*r2, Mode::Idle);
    }

    #[test]
    fn reinit_primitives_only_preserves_mode() {
        let mut lock = fresh_lock();
        {
            let mut w = lock.write().unwrap();
            *w = Mode::Charge;
        }
        unsafe { lock.reinit_primitives_only() };
        assert_eq!(*lock.read().unwrap(), Mode::Charge);
    }

    #[test]
    fn writer_waits_for_reader_release() {
        let lock = Arc::new(fresh_lock());
        let guard = lock.read().unwrap();
        let lock2 = Arc::clone(&lock);
        let wrote = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let wrote2 = Arc::clone(&wrote);
        let handle = thread::spawn(move || {
            let mut w = lock2.write().unwrap();
            *w = Mode::Land;
            wrote2.store(true, std::sync::atomic::Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!wrote.load(std::sync::atomic::Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(wrote.load(std::sync::atomic::Ordering::SeqCst));
    }
}
