//! Supervisor binary entry point (§6).

use drone_sim::config::SupervisorConfig;
use drone_sim::error::DroneError;
use drone_sim::supervisor;

fn main() -> std::process::ExitCode {
    env_logger::init();

    // SIGPIPE defaults to terminating the process; every actor that writes
    // to a socket needs the ordinary broken-pipe `Err` instead (§4.6).
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }

    match run() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            log::error!(target: "supervisor", "{e}");
            std::process::ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), DroneError> {
    let cfg = SupervisorConfig::from_args(std::env::args())?;
    supervisor::main_loop(cfg)
}
