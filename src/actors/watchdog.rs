//! Samples the five publishing actors' heartbeat counters; on stall,
//! signals the supervisor directly and exits (§4.7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;

use crate::signals;
use crate::state::{ActorId, SharedRecord};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const STALL_THRESHOLD: Duration = Duration::from_millis(2000);

const WATCHED: [ActorId; 5] = [
    ActorId::Battery,
    ActorId::Accelerometer,
    ActorId::Gps,
    ActorId::FlightController,
    ActorId::Telemetry,
];

struct Watched {
    actor: ActorId,
    last_value: u32,
    last_change: Instant,
}

pub fn run(record: &SharedRecord, shutdown: Arc<AtomicBool>) {
    let supervisor_pid = signals::parent_pid();
    let now = Instant::now();
    let mut watched: Vec<Watched> = WATCHED
        .iter()
        .map(|&actor| Watched {
            actor,
            last_value: record.heartbeats.read(actor),
            last_change: now,
        })
        .collect();

    while !shutdown.load(Ordering::Relaxed) {
        for w in watched.iter_mut() {
            let current = record.heartbeats.read(w.actor);
            if current != w.last_value {
                w.last_value = current;
                w.last_change = Instant::now();
            } else if w.last_change.elapsed() >= STALL_THRESHOLD {
                warn!(
                    target: "watchdog",
                    "{} heartbeat stalled for {:?}, notifying supervisor",
                    w.actor.name(),
                    w.last_change.elapsed()
                );
                signals::notify_stall(supervisor_pid);
                return;
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AddrBuf, NetworkConfig};

    fn fresh_record() -> Box<SharedRecord> {
        let network = NetworkConfig {
            operator_host: AddrBuf::new("127.0.0.1").unwrap(),
            telemetry_port: 5000,
            drone_host: AddrBuf::new("127.0.0.1").unwrap(),
            flight_ctrl_port: 6000,
        };
        let mut record = Box::new(SharedRecord::new_uninit(network));
        unsafe { record.init() };
        record
    }

    #[test]
    fn watched_set_covers_five_publishing_actors() {
        assert_eq!(WATCHED.len(), 5);
        assert!(!WATCHED.contains(&ActorId::Watchdog));
    }

    #[test]
    fn heartbeat_advance_resets_last_change() {
        let record = fresh_record();
        record.heartbeats.tick(ActorId::Battery);
        let first = record.heartbeats.read(ActorId::Battery);
        record.heartbeats.tick(ActorId::Battery);
        let second = record.heartbeats.read(ActorId::Battery);
        assert_ne!(first, second);
    }
}
