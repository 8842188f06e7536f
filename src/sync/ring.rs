//! The GPS ring buffer (§4.4): a single-producer/single-consumer bounded
//! byte buffer shared between the GPS actor and telemetry, fed one byte at
//! a time and delimited by `'\n'`.
//!
//! Classic two-counting-semaphore bounded buffer: `empty` counts free
//! slots, `full` counts filled ones, and an interior `BinaryMutex` protects
//! the head/tail indices so a second producer or consumer (there isn't one
//! today, but nothing in the type enforces single-writer) can't race on
//! them. Producer and consumer each get their own timeout, matching the
//! differing stall budgets in §4.4: writers give up after roughly a
//! second per byte, the reader waits up to five.

use std::time::Duration;

use super::mutex::BinaryMutex;
use super::sem::RawSemaphore;
use crate::error::WaitError;

pub const RING_CAPACITY: usize = 1280;

struct Cursor {
    buf: [u8; RING_CAPACITY],
    head: usize,
    tail: usize,
}

#[repr(C)]
pub struct GpsRing {
    empty: RawSemaphore,
    full: RawSemaphore,
    cursor: BinaryMutex<Cursor>,
}

unsafe impl Sync for GpsRing {}
unsafe impl Send for GpsRing {}

impl GpsRing {
    pub fn new_uninit() -> Self {
        GpsRing {
            empty: RawSemaphore::new_uninit(),
            full: RawSemaphore::new_uninit(),
            cursor: BinaryMutex::new_uninit(Cursor {
                buf: [0u8; RING_CAPACITY],
                head: 0,
                tail: 0,
            }),
        }
    }

    /// # Safety
    /// No producer or consumer may be active anywhere in the system.
    pub unsafe fn reset(&mut self) {
        self.empty.init(RING_CAPACITY as u32).expect("ring empty sem init");
        self.full.init(0).expect("ring full sem init");
        self.cursor.reset(Cursor {
            buf: [0u8; RING_CAPACITY],
            head: 0,
            tail: 0,
        });
    }

    /// Same precondition as `reset`, preserves buffered bytes — the stall
    /// recovery path only needs the semaphores back in a sane state.
    pub unsafe fn reinit_primitives_only(&mut self) {
        self.empty.init(RING_CAPACITY as u32).expect("ring empty sem init");
        self.full.init(0).expect("ring full sem init");
        self.cursor.reinit_primitive_only();
    }

    /// Blocks (up to `timeout`) for a free slot, then writes one byte.
    pub fn put_byte(&self, byte: u8, timeout: Duration) -> Result<(), WaitError> {
        self.empty.wait_timeout(timeout)?;
        {
            let mut c = self.cursor.lock().map_err(WaitError::Sem)?;
            let tail = c.tail;
            c.buf[tail] = byte;
            c.tail = (tail + 1) % RING_CAPACITY;
        }
        self.full.post().map_err(WaitError::Sem)?;
        Ok(())
    }

    /// Blocks (up to `timeout`) for a filled slot, then reads one byte.
    pub fn get_byte(&self, timeout: Duration) -> Result<u8, WaitError> {
        self.full.wait_timeout(timeout)?;
        let byte;
        {
            let mut c = self.cursor.lock().map_err(WaitError::Sem)?;
            let head = c.head;
            byte = c.buf[head];
            c.head = (head + 1) % RING_CAPACITY;
        }
        self.empty.post().map_err(WaitError::Sem)?;
        Ok(byte)
    }

    /// Writes an entire NMEA line (including the trailing `'\n'`) byte by
    /// byte, applying `per_byte_timeout` to each write. Bails out on the
    /// first timed-out byte, matching the per-byte producer budget in §4.4.
    pub fn put_line(&self, line: &[u8], per_byte_timeout: Duration) -> Result<(), WaitError> {
        for &b in line {
            self.put_byte(b, per_byte_timeout)?;
        }
        Ok(())
    }

    /// Reads bytes until (and including) a `'\n'`, applying
    /// `per_byte_timeout` to each read. Returns the accumulated line on
    /// success.
    pub fn get_line(&self, per_byte_timeout: Duration) -> Result<Vec<u8>, WaitError> {
        let mut line = Vec::new();
        loop {
            let byte = self.get_byte(per_byte_timeout)?;
            line.push(byte);
            if byte == b'\n' {
                return Ok(line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn fresh() -> Box<GpsRing> {
        let mut ring = Box::new(GpsRing::new_uninit());
        unsafe { ring.reset() };
        ring
    }

    #[test]
    fn put_then_get_round_trips_a_line() {
        let ring = fresh();
        ring.put_line(b"$GPGGA,fake*00\n", Duration::from_millis(100)).unwrap();
        let line = ring.get_line(Duration::from_millis(100)).unwrap();
        assert_eq!(line, b"$GPGGA,fake*00\n");
    }

    #[test]
    fn get_times_out_on_empty_ring() {
        let ring = fresh();
        let result = ring.get_byte(Duration::from_millis(30));
        assert!(matches!(result, Err(WaitError::TimedOut)));
    }

    #[test]
    fn producer_and_consumer_on_separate_threads() {
        let ring = Arc::new(fresh());
        let writer = Arc::clone(&ring);
        let handle = thread::spawn(move || {
            writer.put_line(b"line one\n", Duration::from_secs(1)).unwrap();
            writer.put_line(b"line two\n", Duration::from_secs(1)).unwrap();
        });
        let first = ring.get_line(Duration::from_secs(2)).unwrap();
        let second = ring.get_line(Duration::from_secs(2)).unwrap();
        handle.join().unwrap();
        assert_eq!(first, b"line one\n");
        assert_eq!(second, b"line two\n");
    }

    #[test]
    fn put_blocks_when_buffer_is_full() {
        let ring = fresh();
        for _ in 0..RING_CAPACITY {
            ring.put_byte(b'x', Duration::from_millis(10)).unwrap();
        }
        let result = ring.put_byte(b'y', Duration::from_millis(30));
        assert!(matches!(result, Err(WaitError::TimedOut)));
    }
}
