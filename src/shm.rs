//! `shm_open`/`ftruncate`/`mmap` plumbing for the `drone_shm` object (§6).
//!
//! The supervisor creates the object exclusively on first run, sizes it to
//! exactly `size_of::<SharedRecord>()`, and maps it `MAP_SHARED` before
//! forking any actor; every actor process then maps the same name
//! open-existing rather than re-opening by inheriting the mapping directly
//! (children inherit mappings across `fork()`, so in practice only the
//! supervisor ever calls `create`).

use std::ffi::CString;
use std::os::unix::io::RawFd;

use crate::error::ShmError;

pub const SHM_NAME: &str = "/drone_shm";

/// An owned `MAP_SHARED` mapping of `T`. Dropping this only unmaps; it does
/// not unlink the shared-memory object — unlinking is the supervisor's
/// explicit responsibility on clean shutdown (§6).
pub struct SharedMapping<T> {
    ptr: *mut T,
    fd: RawFd,
}

unsafe impl<T: Send> Send for SharedMapping<T> {}
unsafe impl<T: Sync> Sync for SharedMapping<T> {}

impl<T> SharedMapping<T> {
    /// Creates the named shared-memory object fresh (`O_CREAT | O_EXCL`),
    /// sizes it via `ftruncate`, and maps it. Called exactly once, by the
    /// supervisor, before any actor is forked.
    pub fn create() -> Result<Self, ShmError> {
        let name = CString::new(SHM_NAME).expect("shm name has no interior NUL");
        let fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            // Stale object from a prior crashed run; unlink and retry once.
            unsafe { libc::shm_unlink(name.as_ptr()) };
            let retry_fd =
                unsafe { libc::shm_open(name.as_ptr(), libc::O_CREAT | libc::O_EXCL | libc::O_RDWR, 0o600) };
            if retry_fd < 0 {
                return Err(ShmError::Open(SHM_NAME.to_string(), std::io::Error::last_os_error()));
            }
            return Self::finish_create(retry_fd);
        }
        Self::finish_create(fd)
    }

    fn finish_create(fd: RawFd) -> Result<Self, ShmError> {
        let size = std::mem::size_of::<T>();
        let rc = unsafe { libc::ftruncate(fd, size as libc::off_t) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ShmError::Truncate(err));
        }
        Self::map(fd, size)
    }

    /// Opens an already-created object and maps it. Not used by any actor
    /// today (actors inherit the supervisor's mapping across `fork()`), but
    /// kept for the `open-existing on subsequent instances` clause of §6
    /// and exercised directly by tests.
    pub fn open_existing() -> Result<Self, ShmError> {
        let name = CString::new(SHM_NAME).expect("shm name has no interior NUL");
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(ShmError::Open(SHM_NAME.to_string(), std::io::Error::last_os_error()));
        }
        Self::map(fd, std::mem::size_of::<T>())
    }

    fn map(fd: RawFd, size: usize) -> Result<Self, ShmError> {
        let addr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ShmError::Map(err));
        }
        Ok(SharedMapping { ptr: addr as *mut T, fd })
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr
    }

    /// # Safety
    /// Caller must ensure `T` has been fully initialized (e.g. via
    /// `SharedRecord::init`) before dereferencing the result for anything
    /// other than placement-construction.
    pub unsafe fn as_ref(&self) -> &T {
        &*self.ptr
    }

    /// Removes the name from the filesystem namespace; existing mappings
    /// (this one and every forked child's inherited copy) remain valid
    /// until each unmaps.
    pub fn unlink() -> Result<(), ShmError> {
        let name = CString::new(SHM_NAME).expect("shm name has no interior NUL");
        let rc = unsafe { libc::shm_unlink(name.as_ptr()) };
        if rc != 0 {
            return Err(ShmError::Unlink(SHM_NAME.to_string(), std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

impl<T> Drop for SharedMapping<T> {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, std::mem::size_of::<T>());
            libc::close(self.fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Uses a throwaway type so tests don't collide with the real
    // `SharedRecord`'s process-shared semaphores, which aren't safe to
    // double-initialize from a single test process.
    #[test]
    fn create_then_open_existing_see_the_same_memory() {
        let created: SharedMapping<AtomicU32> = SharedMapping::create().expect("create");
        unsafe { (*created.as_ptr()).store(42, Ordering::SeqCst) };

        let opened: SharedMapping<AtomicU32> = SharedMapping::open_existing().expect("open");
        assert_eq!(unsafe { (*opened.as_ptr()).load(Ordering::SeqCst) }, 42);

        drop(opened);
        drop(created);
        SharedMapping::<AtomicU32>::unlink().expect("unlink");
    }
}
