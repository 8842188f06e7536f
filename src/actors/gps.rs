//! Sole producer into the GPS ring (§4.4). Cycles through four canned NMEA
//! sentences; their field values are simulation stimulus only, not
//! semantically load-bearing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};

use crate::error::WaitError;
use crate::state::{ActorId, SharedRecord};

const PER_BYTE_TIMEOUT: Duration = Duration::from_millis(1000);
const SAMPLE_DELAY: Duration = Duration::from_secs(1);

const SAMPLES: [&str; 4] = [
    "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n",
    "$GPGSA,A,3,04,05,,09,12,,,24,,,,,2.5,1.3,2.1*39\n",
    "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\n",
    "$GPVTG,054.7,T,034.4,M,005.5,N,010.2,K*48\n",
];

pub fn run(record: &SharedRecord, shutdown: Arc<AtomicBool>) {
    let mut sample_idx = 0usize;

    while !shutdown.load(Ordering::Relaxed) {
        let sample = SAMPLES[sample_idx].as_bytes();
        match record.gps_ring.put_line(sample, PER_BYTE_TIMEOUT) {
            Ok(()) => {
                debug!(target: "gps", "emitted sample {sample_idx}");
                sample_idx = (sample_idx + 1) % SAMPLES.len();
            }
            Err(WaitError::TimedOut) => {
                warn!(target: "gps", "ring put timed out mid-sample, abandoning attempt");
            }
            Err(WaitError::Sem(e)) => {
                error!(target: "gps", "ring semaphore failed, exiting: {e}");
                return;
            }
        }

        record.heartbeats.tick(ActorId::Gps);
        std::thread::sleep(SAMPLE_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_samples_are_newline_terminated() {
        for s in SAMPLES {
            assert!(s.ends_with('\n'));
        }
    }

    #[test]
    fn all_samples_fit_in_one_ring_capacity() {
        for s in SAMPLES {
            assert!(s.len() < crate::sync::ring::RING_CAPACITY);
        }
    }
}
