//! Thin operator console (§6, §10): sends UDP mode commands typed on
//! stdin, and prints each telemetry frame received over a single-client
//! TCP connection between `[TELEMETRY] {` and `}` markers.

use std::io::{BufRead, Read};
use std::net::{TcpListener, UdpSocket};
use std::sync::mpsc;
use std::thread;

use drone_sim::config::OperatorConsoleConfig;
use drone_sim::error::DroneError;
use drone_sim::state::Mode;

fn main() -> std::process::ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!(target: "operator_console", "{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), DroneError> {
    let cfg = OperatorConsoleConfig::from_args(std::env::args())?;

    let telemetry_addr = (cfg.operator_ip.as_str(), cfg.telemetry_port);
    let listener = TcpListener::bind(telemetry_addr).map_err(DroneError::SocketSetup)?;
    log::info!(target: "operator_console", "listening for telemetry on {}:{}", cfg.operator_ip, cfg.telemetry_port);

    let (tx, rx) = mpsc::channel::<()>();
    thread::spawn(move || {
        run_telemetry_listener(listener);
        let _ = tx.send(());
    });

    run_command_sender(&cfg.drone_ip, cfg.flight_ctrl_port);
    let _ = rx.recv();
    Ok(())
}

fn run_telemetry_listener(listener: TcpListener) {
    loop {
        match listener.accept() {
            Ok((mut stream, addr)) => {
                log::info!(target: "operator_console", "telemetry connection from {addr}");
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => {
                            print!("[TELEMETRY] {{\n{}}}\n", String::from_utf8_lossy(&buf[..n]));
                        }
                        Err(e) => {
                            log::warn!(target: "operator_console", "telemetry read error: {e}");
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                log::warn!(target: "operator_console", "accept failed: {e}");
            }
        }
    }
}

fn run_command_sender(drone_ip: &str, flight_ctrl_port: u16) {
    let socket = match UdpSocket::bind(("0.0.0.0", 0)) {
        Ok(s) => s,
        Err(e) => {
            log::error!(target: "operator_console", "failed to bind command socket: {e}");
            return;
        }
    };

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match Mode::from_command_word(&line) {
            Some(mode) => {
                let wire = mode.to_wire();
                if let Err(e) = socket.send_to(&wire, (drone_ip, flight_ctrl_port)) {
                    log::warn!(target: "operator_console", "send failed: {e}");
                } else {
                    log::info!(target: "operator_console", "sent {mode:?}");
                }
            }
            None => {
                log::warn!(target: "operator_console", "unrecognized command: {line:?}");
            }
        }
    }
}
