//! A single-semaphore binary mutex, used for the accelerometer cell, the PWM
//! cell, and the interior state of the GPS ring (§4.1).
//!
//! Unlike the action rwlock this has no reader/writer distinction — every
//! accessor takes the one permit. Telemetry's reads of the accel and PWM
//! cells use `try_lock` specifically so frame assembly never blocks waiting
//! on a writer (§4.6); every other caller uses the blocking `lock`.

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

use super::sem::RawSemaphore;
use crate::error::SemError;

#[repr(C)]
pub struct BinaryMutex<T> {
    sem: RawSemaphore,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for BinaryMutex<T> {}
unsafe impl<T: Send> Send for BinaryMutex<T> {}

impl<T> BinaryMutex<T> {
    /// Builds an in-process instance; only useful for tests. Production
    /// instances live embedded in the shared record and are brought up via
    /// `reset`.
    pub fn new_uninit(value: T) -> Self {
        BinaryMutex {
            sem: RawSemaphore::new_uninit(),
            data: UnsafeCell::new(value),
        }
    }

    /// # Safety
    /// No lock holder may be active anywhere in the system when this runs.
    pub unsafe fn reset(&mut self, value: T) {
        self.sem.init(1).expect("mutex sem init");
        *self.data.get() = value;
    }

    /// # Safety
    /// Same precondition as `reset`, but leaves the payload untouched —
    /// used by stall recovery (§4.7), which must not clobber cached sensor
    /// readings.
    pub unsafe fn reinit_primitive_only(&mut self) {
        self.sem.init(1).expect("mutex sem init");
    }

    /// Blocking lock. Fails only if the underlying semaphore call fails for
    /// a reason other than interruption — fatal for the calling actor (§7).
    pub fn lock(&self) -> Result<MutexGuard<'_, T>, SemError> {
        self.sem.wait()?;
        Ok(MutexGuard { lock: self })
    }

    /// Non-blocking variant. `Ok(None)` if another actor currently holds it.
    pub fn try_lock(&self) -> Result<Option<MutexGuard<'_, T>>, SemError> {
        if self.sem.try_wait()? {
            Ok(Some(MutexGuard { lock: self }))
        } else {
            Ok(None)
        }
    }
}

pub struct MutexGuard<'a, T> {
    lock: &'a BinaryMutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.sem.post() {
            log::error!(target: "sync", "mutex post failed on guard drop: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(value: [f32; 3]) -> Box<BinaryMutex<[f32; 3]>> {
        let mut m = Box::new(BinaryMutex::new_uninit(value));
        unsafe { m.reset(value) };
        m
    }

    #[test]
    fn lock_reads_initial_value() {
        let m = fresh([1.0, 2.0, 3.0]);
        assert_eq!(*m.lock().unwrap(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let m = fresh([0.0; 3]);
        let guard = m.lock().unwrap();
        assert!(m.try_lock().unwrap().is_none());
        drop(guard);
        assert!(m.try_lock().unwrap().is_some());
    }

    #[test]
    fn reinit_primitive_only_preserves_payload() {
        let mut m = fresh([5.0, 6.0, 7.0]);
        {
            let mut g = m.lock().unwrap();
            *g = [9.0, 9.0, 9.0];
        }
        unsafe { m.reinit_primitive_only() };
        assert_eq!(*m.lock().unwrap(), [9.0, 9.0, 9.0]);
    }
}
