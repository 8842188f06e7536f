//! Aggregates all readable state into a periodic text frame over TCP
//! (§4.6). The GPS ring's sole consumer, but only while mode is
//! `SampleGps`.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};

use crate::error::{SemError, WaitError};
use crate::state::{ActorId, Mode, SharedRecord};
use crate::sync::ring::RING_CAPACITY;

const TICK: Duration = Duration::from_millis(10);
const GPS_BYTE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_FRAME_GPS_BYTES: usize = RING_CAPACITY;

pub fn run(record: &SharedRecord, shutdown: Arc<AtomicBool>) {
    let operator_host = record.network.operator_host.as_str().to_string();
    let port = record.network.telemetry_port;
    let mut conn: Option<TcpStream> = None;

    while !shutdown.load(Ordering::Relaxed) {
        if conn.is_none() {
            match TcpStream::connect((operator_host.as_str(), port)) {
                Ok(stream) => {
                    debug!(target: "telemetry", "connected to operator at {operator_host}:{port}");
                    conn = Some(stream);
                }
                Err(e) => {
                    debug!(target: "telemetry", "connect failed, retrying: {e}");
                    record.heartbeats.tick(ActorId::Telemetry);
                    std::thread::sleep(TICK);
                    continue;
                }
            }
        }

        let frame = match assemble_frame(record) {
            Ok(frame) => frame,
            Err(e) => {
                error!(target: "telemetry", "assembling frame failed, exiting: {e}");
                return;
            }
        };

        if let Some(stream) = conn.as_mut() {
            if let Err(e) = send_no_sigpipe(stream, &frame) {
                warn!(target: "telemetry", "send failed, tearing down connection: {e}");
                conn = None;
            }
        }

        record.heartbeats.tick(ActorId::Telemetry);
        std::thread::sleep(TICK);
    }
}

fn assemble_frame(record: &SharedRecord) -> Result<String, SemError> {
    let mut frame = String::new();

    frame.push_str(&format!("BAT = {}%\n", record.battery_pct()));

    if let Some(accel) = record.accel.try_lock()? {
        frame.push_str(&format!(
            "ACCEL = (x: {:.3}, y: {:.3}, z: {:.3})\n",
            accel.x, accel.y, accel.z
        ));
    }

    if let Some(pwm) = record.pwm.try_lock()? {
        let pct: Vec<String> = pwm.motors.iter().map(|m| format!("{}%", (m * 100.0).round() as i32)).collect();
        frame.push_str(&format!("MOTORS PWM = [{}]\n", pct.join(", ")));
    }

    let mode = *record.action.read()?;
    frame.push_str(&format!("ACTION = {}\n", mode.bits()));

    if mode == Mode::SampleGps {
        frame.push_str("GPS {\n");
        match consume_gps_line(record)? {
            Some(line) => {
                frame.push_str(&String::from_utf8_lossy(&line));
            }
            None => {
                frame.push_str("NO FIX.\n");
                *record.action.write()? = Mode::Abort;
            }
        }
        frame.push_str("}\n");
    }

    Ok(frame)
}

/// Consumes bytes up to and including the next `'\n'`, or until the frame
/// buffer is exhausted. `Ok(None)` means a 5 s per-byte timeout fired — "no
/// fix" (§4.6). A semaphore failure other than timeout propagates as an
/// error instead, fatal for the calling actor (§7).
fn consume_gps_line(record: &SharedRecord) -> Result<Option<Vec<u8>>, SemError> {
    let mut line = Vec::new();
    while line.len() < MAX_FRAME_GPS_BYTES {
        match record.gps_ring.get_byte(GPS_BYTE_TIMEOUT) {
            Ok(byte) => {
                line.push(byte);
                if byte == b'\n' {
                    return Ok(Some(line));
                }
            }
            Err(WaitError::TimedOut) => return Ok(None),
            Err(WaitError::Sem(e)) => return Err(e),
        }
    }
    Ok(Some(line))
}

fn send_no_sigpipe(stream: &mut TcpStream, frame: &str) -> std::io::Result<()> {
    // `std::net::TcpStream` doesn't expose `MSG_NOSIGNAL` directly; SIGPIPE
    // is masked process-wide at startup (see `main.rs`) so a broken-pipe
    // write surfaces as a normal `Err` instead of terminating the process.
    let bytes = frame.as_bytes();
    if bytes.is_empty() {
        return Ok(());
    }
    let n = stream.write(bytes)?;
    if n == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::WriteZero, "peer shutdown"));
    }
    stream.flush()
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
    fn frame_contains_battery_and_action_lines() {
        let record = fresh_record();
        let frame = assemble_frame(&record).unwrap();
        assert!(frame.contains("BAT = 100%"));
        assert!(frame.contains(&format!("ACTION = {}", Mode::Idle.bits())));
    }

    #[test]
    fn frame_omits_accel_line_when_mutex_held() {
        let record = fresh_record();
        let guard = record.accel.lock().unwrap();
        let frame = assemble_frame(&record).unwrap();
        assert!(!frame.contains("ACCEL"));
        drop(guard);
    }

    #[test]
    fn sample_gps_with_no_fix_forces_abort() {
        let record = fresh_record();
        *record.action.write().unwrap() = Mode::SampleGps;
        let frame = assemble_frame(&record).unwrap();
        assert!(frame.contains("NO FIX."));
        assert_eq!(*record.action.read().unwrap(), Mode::Abort);
    }

    #[test]
    fn sample_gps_consumes_a_buffered_line() {
        let record = fresh_record();
        *record.action.write().unwrap() = Mode::SampleGps;
        record.gps_ring.put_line(b"$GPGGA,test\n", Duration::from_millis(100)).unwrap();
        let frame = assemble_frame(&record).unwrap();
        assert!(frame.contains("$GPGGA,test"));
        assert_eq!(*record.action.read().unwrap(), Mode::SampleGps);
    }
}
