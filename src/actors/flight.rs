//! Owner of the mode state machine and sole writer of the PWM cell (§4.5).

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{error, info, trace, warn};

use crate::error::SemError;
use crate::state::{ActorId, Accel, Mode, SharedRecord};

const TICK: Duration = Duration::from_millis(50);
const BIND_BACKOFF: Duration = Duration::from_secs(2);
const FLY_TARGET_AVG: f32 = 0.7;
const FLY_STEP: f32 = 0.005;
const LAND_STEP: f32 = 0.01;
const STALL_THRESHOLD: u32 = 10;
const LOW_BATTERY_THRESHOLD: u8 = 15;

struct Socket {
    inner: Option<UdpSocket>,
    last_bind_attempt: Instant,
}

impl Socket {
    fn new() -> Self {
        Socket { inner: None, last_bind_attempt: Instant::now() - BIND_BACKOFF }
    }

    fn ensure_bound(&mut self, drone_ip: &str, port: u16) {
        if self.inner.is_some() {
            return;
        }
        if self.last_bind_attempt.elapsed() < BIND_BACKOFF {
            return;
        }
        self.last_bind_attempt = Instant::now();
        match UdpSocket::bind((drone_ip, port)) {
            Ok(sock) => {
                if let Err(e) = sock.set_nonblocking(true) {
                    error!(target: "flight_ctrl", "failed to set socket nonblocking: {e}");
                    return;
                }
                info!(target: "flight_ctrl", "bound flight-control socket on {drone_ip}:{port}");
                self.inner = Some(sock);
            }
            Err(e) => {
                warn!(target: "flight_ctrl", "bind failed, retrying in {BIND_BACKOFF:?}: {e}");
            }
        }
    }

    /// Returns `Some(Mode)` only for a well-formed 4-byte datagram carrying
    /// a recognized bitmask; anything else (would-block, wrong size,
    /// unknown bits) yields `Reserved`, the "no command" sentinel.
    fn poll_operator_cmd(&mut self) -> Mode {
        let Some(sock) = self.inner.as_ref() else {
            return Mode::Reserved;
        };
        let mut buf = [0u8; 4];
        match sock.recv(&mut buf) {
            Ok(n) if n == 4 => Mode::from_wire(&buf[..n]).unwrap_or(Mode::Reserved),
            Ok(_) => Mode::Reserved,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Mode::Reserved,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Mode::Reserved,
            Err(e) => {
                error!(target: "flight_ctrl", "recv error, forcing Abort and rebinding: {e}");
                self.inner = None;
                Mode::Abort
            }
        }
    }
}

/// Applies the `Land` branch's motor-decrement logic for one iteration and
/// reports whether the motors all reached exactly zero (§4.5).
fn decrement_motors_to_zero(record: &SharedRecord) -> Result<bool, SemError> {
    let mut pwm = record.pwm.lock()?;
    for m in pwm.motors.iter_mut() {
        *m = (*m - LAND_STEP).max(0.0);
    }
    Ok(pwm.motors.iter().all(|&m| m == 0.0))
}

pub fn run(record: &SharedRecord, shutdown: Arc<AtomicBool>) {
    if let Err(e) = run_inner(record, shutdown) {
        error!(target: "flight_ctrl", "fatal synchronization error, exiting: {e}");
    }
}

fn run_inner(record: &SharedRecord, shutdown: Arc<AtomicBool>) -> Result<(), SemError> {
    let mut socket = Socket::new();
    let mut last_accel: Option<Accel> = None;
    let mut stall_count: u32 = 0;

    let drone_ip = record.network.drone_host.as_str().to_string();
    let port = record.network.flight_ctrl_port;

    while !shutdown.load(Ordering::Relaxed) {
        socket.ensure_bound(&drone_ip, port);
        let operator_cmd = socket.poll_operator_cmd();
        let observed_mode = *record.action.read()?;

        match observed_mode {
            Mode::Fly => {
                let avg_pwm = record.pwm.lock()?.avg();
                if avg_pwm < FLY_TARGET_AVG {
                    let mut pwm = record.pwm.lock()?;
                    for m in pwm.motors.iter_mut() {
                        *m = (*m + FLY_STEP).min(1.0);
                    }
                }
                let accel = *record.accel.lock()?;
                if avg_pwm >= 0.5 {
                    let correction = accel.x + accel.y;
                    let mut pwm = record.pwm.lock()?;
                    for m in pwm.motors.iter_mut() {
                        *m = (*m - correction).clamp(0.0, 1.0);
                    }
                }

                match last_accel {
                    Some(prev) if prev == accel => {
                        stall_count += 1;
                        if stall_count >= STALL_THRESHOLD {
                            warn!(target: "flight_ctrl", "accelerometer stalled for {stall_count} ticks, forcing Abort");
                            *record.action.write()? = Mode::Abort;
                            stall_count = 0;
                        }
                    }
                    _ => stall_count = 0,
                }
                last_accel = Some(accel);

                if operator_cmd.is_one_of(
                    Mode::SampleGps.bits() | Mode::Land.bits() | Mode::Abort.bits(),
                ) {
                    *record.action.write()? = operator_cmd;
                }
            }

            Mode::SampleGps => {
                if operator_cmd.is_one_of(Mode::Fly.bits() | Mode::Abort.bits()) {
                    *record.action.write()? = operator_cmd;
                }
            }

            Mode::Idle => {
                if operator_cmd.is_one_of(
                    Mode::Fly.bits() | Mode::Charge.bits() | Mode::Abort.bits(),
                ) {
                    *record.action.write()? = operator_cmd;
                }
            }

            Mode::Charge => {
                if operator_cmd.is_one_of(Mode::Idle.bits() | Mode::Abort.bits()) {
                    if record.battery_pct() >= LOW_BATTERY_THRESHOLD {
                        *record.action.write()? = operator_cmd;
                    } else {
                        trace!(target: "flight_ctrl", "suppressing {operator_cmd:?} while charge is low");
                    }
                }
            }

            Mode::Abort => {
                if record.battery_pct() < LOW_BATTERY_THRESHOLD {
                    *record.action.write()? = Mode::Charge;
                } else {
                    // Deliberate reproduction of the reference's fallthrough
                    // quirk: the action cell is written back to Abort itself
                    // (a no-op), so the drone stays in Abort through the
                    // whole landing sequence and the Land decrement logic
                    // below keeps running every iteration until the motors
                    // hit exactly zero.
                    *record.action.write()? = Mode::Abort;
                    let all_zero = decrement_motors_to_zero(record)?;
                    if all_zero {
                        *record.action.write()? = Mode::Charge;
                    }
                }
            }

            Mode::Land => {
                if operator_cmd.is_one_of(Mode::Fly.bits() | Mode::Abort.bits()) {
                    *record.action.write()? = operator_cmd;
                } else {
                    let all_zero = decrement_motors_to_zero(record)?;
                    if all_zero {
                        *record.action.write()? = Mode::Idle;
                    }
                }
            }

            Mode::Reserved => {
                error!(target: "flight_ctrl", "action cell read Reserved as an active mode, forcing Abort");
                *record.action.write()? = Mode::Abort;
            }
        }

        record.heartbeats.tick(ActorId::FlightController);
        std::thread::sleep(TICK);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AddrBuf, NetworkConfig, Pwm};

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
    fn decrement_motors_to_zero_floors_at_zero() {
        let record = fresh_record();
        *record.pwm.lock().unwrap() = Pwm { motors: [0.005, 0.0, 0.02, 1.0] };
        let all_zero = decrement_motors_to_zero(&record).unwrap();
        assert!(!all_zero);
        let pwm = *record.pwm.lock().unwrap();
        assert_eq!(pwm.motors[0], 0.0);
        assert_eq!(pwm.motors[1], 0.0);
        assert!(pwm.motors[2] > 0.0);
        assert!(pwm.motors[3] > 0.0);
    }

    #[test]
    fn decrement_motors_to_zero_reports_true_when_all_reach_zero() {
        let record = fresh_record();
        *record.pwm.lock().unwrap() = Pwm { motors: [0.01, 0.01, 0.01, 0.01] };
        assert!(decrement_motors_to_zero(&record).unwrap());
    }

    #[test]
    fn abort_write_back_is_a_self_assignment_no_op() {
        // Regression: the mode cell must stay Abort across iterations while
        // battery is adequate, not revert to whatever mode preceded it.
        let record = fresh_record();
        record.battery.store(100, Ordering::Release);
        *record.action.write().unwrap() = Mode::Abort;
        *record.pwm.lock().unwrap() = Pwm { motors: [0.5, 0.5, 0.5, 0.5] };

        if record.battery_pct() >= LOW_BATTERY_THRESHOLD {
            *record.action.write().unwrap() = Mode::Abort;
            let all_zero = decrement_motors_to_zero(&record).unwrap();
            if all_zero {
                *record.action.write().unwrap() = Mode::Charge;
            }
        }

        assert_eq!(*record.action.read().unwrap(), Mode::Abort);
    }

    #[test]
    fn fly_mode_rejects_unrecognized_command_membership() {
        let idle_mask = Mode::Fly.bits() | Mode::Charge.bits() | Mode::Abort.bits();
        assert!(!Mode::Land.is_one_of(idle_mask));
    }
}
