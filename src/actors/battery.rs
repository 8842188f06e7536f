//! Sole writer of the battery cell (§4.2).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::signals;
use crate::state::{ActorId, Mode, SharedRecord};

const DISCHARGE_PERIOD: Duration = Duration::from_millis(2000);
const CHARGE_PERIOD: Duration = Duration::from_millis(500);
const TICK: Duration = Duration::from_micros(100);
const LOW_BATTERY_THRESHOLD: u8 = 15;

pub fn run(record: &SharedRecord, shutdown: Arc<AtomicBool>) {
    let mut last_discharge = Instant::now();
    let mut last_charge = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        let mode = match record.action.read() {
            Ok(guard) => *guard,
            Err(e) => {
                error!(target: "battery", "action rwlock read failed, exiting: {e}");
                return;
            }
        };

        if mode == Mode::Charge {
            if last_charge.elapsed() >= CHARGE_PERIOD {
                last_charge = Instant::now();
                let prev = record.battery.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |v| Some(v.saturating_add(1).min(100)),
                );
                if let Ok(prev) = prev {
                    debug!(target: "battery", "charged {} -> {}", prev, (prev + 1).min(100));
                }
            }
        } else if last_discharge.elapsed() >= DISCHARGE_PERIOD {
            last_discharge = Instant::now();
            let current = record.battery_pct();
            if current == 0 {
                warn!(target: "battery", "battery at 0%, initiating hard shutdown");
                signals::terminate_process_group();
                record.heartbeats.tick(ActorId::Battery);
                std::thread::sleep(TICK);
                continue;
            }
            let next = current.saturating_sub(1);
            record.battery.store(next, Ordering::Release);
            if next < LOW_BATTERY_THRESHOLD && mode != Mode::Abort {
                let mut w = match record.action.write() {
                    Ok(guard) => guard,
                    Err(e) => {
                        error!(target: "battery", "action rwlock write failed, exiting: {e}");
                        return;
                    }
                };
                if *w != Mode::Abort {
                    info!(target: "battery", "battery low ({}%), forcing Abort", next);
                    *w = Mode::Abort;
                }
            }
        }

        record.heartbeats.tick(ActorId::Battery);
        std::thread::sleep(TICK);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::NetworkConfig;

    fn fresh_record() -> Box<SharedRecord> {
        let network = NetworkConfig {
            operator_host: crate::state::AddrBuf::new("127.0.0.1").unwrap(),
            telemetry_port: 5000,
            drone_host: crate::state::AddrBuf::new("127.0.0.1").unwrap(),
            flight_ctrl_port: 6000,
        };
        let mut record = Box::new(SharedRecord::new_uninit(network));
        unsafe { record.init() };
        record
    }

    #[test]
    fn decrement_forces_abort_below_threshold() {
        let record = fresh_record();
        record.battery.store(15, Ordering::Release);
        {
            let mut w = record.action.write().unwrap();
            *w = Mode::Idle;
        }
        // Simulate what a single discharge tick does once the threshold is hit.
        let next = record.battery_pct().saturating_sub(1);
        record.battery.store(next, Ordering::Release);
        if next < LOW_BATTERY_THRESHOLD {
            let mut w = record.action.write().unwrap();
            *w = Mode::Abort;
        }
        assert_eq!(record.battery_pct(), 14);
        assert_eq!(*record.action.read().unwrap(), Mode::Abort);
    }

    #[test]
    fn charge_saturates_at_100() {
        let record = fresh_record();
        record.battery.store(100, Ordering::Release);
        let _ = record.battery.fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            Some(v.saturating_add(1).min(100))
        });
        assert_eq!(record.battery_pct(), 100);
    }
}
