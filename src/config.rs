//! Positional CLI parsing for both binaries (§6, §10). No flags, no config
//! file, no environment overrides — the one place the ambient-stack
//! expansion stays deliberately minimal, per the distilled spec's explicit
//! exclusion of argument parsing as a feature surface.

use crate::error::DroneError;
use crate::state::{AddrBuf, NetworkConfig};

/// `<bin> <operator_ip> <telemetry_port> <drone_ip> <flight_ctrl_port>`
pub struct SupervisorConfig {
    pub network: NetworkConfig,
}

impl SupervisorConfig {
    pub fn from_args<I: Iterator<Item = String>>(mut args: I) -> Result<Self, DroneError> {
        let _argv0 = args.next();
        let operator_ip = next_arg(&mut args)?;
        let telemetry_port = parse_port(&next_arg(&mut args)?)?;
        let drone_ip = next_arg(&mut args)?;
        let flight_ctrl_port = parse_port(&next_arg(&mut args)?)?;

        let network = NetworkConfig {
            operator_host: to_addr_buf(&operator_ip)?,
            telemetry_port,
            drone_host: to_addr_buf(&drone_ip)?,
            flight_ctrl_port,
        };
        Ok(SupervisorConfig { network })
    }
}

/// `<bin> <operator_ip> <telemetry_unit_port> <drone_ip> <flight_ctrl_port>`
pub struct OperatorConsoleConfig {
    pub operator_ip: String,
    pub telemetry_port: u16,
    pub drone_ip: String,
    pub flight_ctrl_port: u16,
}

impl OperatorConsoleConfig {
    pub fn from_args<I: Iterator<Item = String>>(mut args: I) -> Result<Self, DroneError> {
        let _argv0 = args.next();
        let operator_ip = next_arg(&mut args)?;
        let telemetry_port = parse_port(&next_arg(&mut args)?)?;
        let drone_ip = next_arg(&mut args)?;
        let flight_ctrl_port = parse_port(&next_arg(&mut args)?)?;
        Ok(OperatorConsoleConfig {
            operator_ip,
            telemetry_port,
            drone_ip,
            flight_ctrl_port,
        })
    }
}

fn next_arg<I: Iterator<Item = String>>(args: &mut I) -> Result<String, DroneError> {
    args.next().ok_or_else(|| {
        DroneError::Usage("expected <operator_ip> <telemetry_port> <drone_ip> <flight_ctrl_port>".to_string())
    })
}

fn parse_port(raw: &str) -> Result<u16, DroneError> {
    raw.parse::<u16>().map_err(|e| DroneError::BadPort(raw.to_string(), e))
}

fn to_addr_buf(s: &str) -> Result<AddrBuf, DroneError> {
    AddrBuf::new(s).ok_or_else(|| DroneError::IpTooLong(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> impl Iterator<Item = String> {
        v.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn supervisor_config_parses_well_formed_args() {
        let cfg = SupervisorConfig::from_args(args(&["bin", "127.0.0.1", "5000", "127.0.0.1", "6000"]))
            .expect("parse");
        assert_eq!(cfg.network.operator_host.as_str(), "127.0.0.1");
        assert_eq!(cfg.network.telemetry_port, 5000);
        assert_eq!(cfg.network.drone_host.as_str(), "127.0.0.1");
        assert_eq!(cfg.network.flight_ctrl_port, 6000);
    }

    #[test]
    fn supervisor_config_rejects_missing_args() {
        let err = SupervisorConfig::from_args(args(&["bin", "127.0.0.1"]));
        assert!(matches!(err, Err(DroneError::Usage(_))));
    }

    #[test]
    fn supervisor_config_rejects_bad_port() {
        let err = SupervisorConfig::from_args(args(&["bin", "127.0.0.1", "notaport", "127.0.0.1", "6000"]));
        assert!(matches!(err, Err(DroneError::BadPort(_, _))));
    }

    #[test]
    fn operator_console_config_parses_well_formed_args() {
        let cfg =
            OperatorConsoleConfig::from_args(args(&["bin", "127.0.0.1", "5000", "127.0.0.1", "6000"]))
                .expect("parse");
        assert_eq!(cfg.telemetry_port, 5000);
        assert_eq!(cfg.flight_ctrl_port, 6000);
    }
}
