// Defaults, topics, and runtime configuration (CLI flags and optional JSON file)
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::vesc::{MotorId, PidGains};

// Keep-alive period for duty cycle / RPM commands
pub const REPEAT_PERIOD_MS: u64 = 500;

// Telemetry older than this is not reported
pub const STALE_THRESHOLD_MS: u64 = 1000;

// Status publication loop
pub const CONTROL_PERIOD_MS: u64 = 50;

// CAN interface names used by the bridge topics
pub const DEFAULT_CAN_INTERFACE: &str = "can0";

// SLCAN adapter defaults
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";
pub const DEFAULT_SERIAL_BAUDRATE: u32 = 115_200;
pub const DEFAULT_CAN_BITRATE: u32 = 500_000;

// Zenoh topics
pub const TOPIC_MOTOR_SET: &str = "motor/set"; // set requests (queryable)
pub const TOPIC_MOTOR_GET: &str = "motor/get"; // get requests (queryable)
pub const TOPIC_MOTOR_STATE: &str = "motor/state"; // per-motor status

/// Bridge topic carrying frames to put on the bus
pub fn can_transmit_topic(interface: &str) -> String {
    format!("CAN/{}/transmit", interface)
}

/// Bridge topic carrying frames read from the bus
pub fn can_receive_topic(interface: &str) -> String {
    format!("CAN/{}/receive", interface)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid PID gains '{input}': {reason}")]
    InvalidGains { input: String, reason: &'static str },

    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// CAN frames as JSON on zenoh bridge topics
    Zenoh,
    /// Lawicel SLCAN adapter on a serial port
    Slcan,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Zenoh => f.write_str("zenoh"),
            TransportKind::Slcan => f.write_str("slcan"),
        }
    }
}

/// Position controller gains for one motor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorGains {
    pub can_id: MotorId,
    #[serde(flatten)]
    pub gains: PidGains,
}

/// Parses `ID=KP[,KI[,KD[,GRAV]]]`
impl FromStr for MotorGains {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidGains {
            input: s.to_string(),
            reason,
        };

        let (id, values) = s.split_once('=').ok_or_else(|| invalid("expected ID=KP,KI,KD"))?;
        let can_id = id
            .trim()
            .parse::<MotorId>()
            .map_err(|_| invalid("CAN id must be 0-255"))?;

        let values = values
            .split(',')
            .map(|v| v.trim().parse::<f32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid("gains must be numbers"))?;
        if values.is_empty() || values.len() > 4 {
            return Err(invalid("expected between one and four gains"));
        }

        let gain = |i: usize| values.get(i).copied().unwrap_or(0.0);
        Ok(Self {
            can_id,
            gains: PidGains {
                kp: gain(0),
                ki: gain(1),
                kd: gain(2),
                gravity_compensation: gain(3),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportKind,
    pub can_transmit: String,
    pub can_receive: String,
    pub serial_port: String,
    pub serial_baudrate: u32,
    pub can_bitrate: u32,
    pub repeat_period_ms: u64,
    pub stale_threshold_ms: u64,
    pub control_period_ms: u64,
    pub position_control: Vec<MotorGains>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            transport: TransportKind::Zenoh,
            can_transmit: DEFAULT_CAN_INTERFACE.to_string(),
            can_receive: DEFAULT_CAN_INTERFACE.to_string(),
            serial_port: DEFAULT_SERIAL_PORT.to_string(),
            serial_baudrate: DEFAULT_SERIAL_BAUDRATE,
            can_bitrate: DEFAULT_CAN_BITRATE,
            repeat_period_ms: REPEAT_PERIOD_MS,
            stale_threshold_ms: STALE_THRESHOLD_MS,
            control_period_ms: CONTROL_PERIOD_MS,
            position_control: Vec::new(),
        }
    }
}

impl Config {
    /// Load from a JSON file; missing fields fall back to defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repeat_period_ms == 0 {
            return Err(ConfigError::ZeroPeriod("repeat_period_ms"));
        }
        if self.control_period_ms == 0 {
            return Err(ConfigError::ZeroPeriod("control_period_ms"));
        }
        if self.stale_threshold_ms == 0 {
            return Err(ConfigError::ZeroPeriod("stale_threshold_ms"));
        }
        Ok(())
    }

    pub fn repeat_period(&self) -> Duration {
        Duration::from_millis(self.repeat_period_ms)
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    pub fn control_period(&self) -> Duration {
        Duration::from_millis(self.control_period_ms)
    }

    /// Gains per motor; a later entry for the same id wins
    pub fn position_gains(&self) -> BTreeMap<MotorId, PidGains> {
        self.position_control
            .iter()
            .map(|entry| (entry.can_id, entry.gains))
            .collect()
    }
}

/// VESC CAN motor runtime
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub transport: Option<TransportKind>,

    /// CAN interface name for the transmit bridge topic
    #[arg(long)]
    pub can_tx: Option<String>,

    /// CAN interface name for the receive bridge topic
    #[arg(long)]
    pub can_rx: Option<String>,

    /// Serial port of the SLCAN adapter
    #[arg(long)]
    pub serial_port: Option<String>,

    /// CAN bus bitrate configured on the SLCAN adapter
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Position controller gains, e.g. `--pid 8=0.01,0,0`
    #[arg(long = "pid", value_name = "ID=KP,KI,KD[,GRAV]")]
    pub pid: Vec<MotorGains>,

    #[arg(long)]
    pub repeat_ms: Option<u64>,

    #[arg(long)]
    pub stale_ms: Option<u64>,

    #[arg(long)]
    pub control_ms: Option<u64>,
}

impl Args {
    pub fn into_config(self) -> Result<Config, ConfigError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(can_tx) = self.can_tx {
            config.can_transmit = can_tx;
        }
        if let Some(can_rx) = self.can_rx {
            config.can_receive = can_rx;
        }
        if let Some(serial_port) = self.serial_port {
            config.serial_port = serial_port;
        }
        if let Some(bitrate) = self.bitrate {
            config.can_bitrate = bitrate;
        }
        if let Some(ms) = self.repeat_ms {
            config.repeat_period_ms = ms;
        }
        if let Some(ms) = self.stale_ms {
            config.stale_threshold_ms = ms;
        }
        if let Some(ms) = self.control_ms {
            config.control_period_ms = ms;
        }
        config.position_control.extend(self.pid);

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gains() {
        let parsed: MotorGains = "8=0.01".parse().unwrap();
        assert_eq!(parsed.can_id, 8);
        assert_eq!(parsed.gains, PidGains::new(0.01, 0.0, 0.0));

        let parsed: MotorGains = "12 = 0.5, 0.01, 0.2, 0.3".parse().unwrap();
        assert_eq!(parsed.can_id, 12);
        assert_eq!(parsed.gains.kd, 0.2);
        assert_eq!(parsed.gains.gravity_compensation, 0.3);
    }

    #[test]
    fn test_parse_gains_rejects_garbage() {
        for input in ["8", "300=1", "8=", "8=a,b", "8=1,2,3,4,5"] {
            assert!(input.parse::<MotorGains>().is_err(), "{} should fail", input);
        }
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = Config::from_json(
            r#"{
                "transport": "slcan",
                "repeat_period_ms": 250,
                "position_control": [{ "can_id": 8, "kp": 0.01 }]
            }"#,
        )
        .unwrap();

        assert_eq!(config.transport, TransportKind::Slcan);
        assert_eq!(config.repeat_period(), Duration::from_millis(250));
        assert_eq!(config.stale_threshold(), Duration::from_secs(1));
        assert_eq!(config.can_transmit, "can0");
        assert_eq!(config.position_gains()[&8], PidGains::new(0.01, 0.0, 0.0));
    }

    #[test]
    fn test_cli_overrides_and_later_gains_win() {
        let args = Args::parse_from([
            "vesc-zenoh-runtime",
            "--can-tx",
            "can1",
            "--pid",
            "8=0.01",
            "--pid",
            "8=0.02,0.001",
            "--repeat-ms",
            "100",
        ]);
        let config = args.into_config().unwrap();

        assert_eq!(config.can_transmit, "can1");
        assert_eq!(config.can_receive, "can0");
        assert_eq!(config.repeat_period_ms, 100);
        assert_eq!(config.position_gains()[&8], PidGains::new(0.02, 0.001, 0.0));
    }

    #[test]
    fn test_zero_period_rejected() {
        let args = Args::parse_from(["vesc-zenoh-runtime", "--repeat-ms", "0"]);
        assert!(matches!(
            args.into_config(),
            Err(ConfigError::ZeroPeriod("repeat_period_ms"))
        ));
    }

    #[test]
    fn test_bridge_topics() {
        assert_eq!(can_transmit_topic("can0"), "CAN/can0/transmit");
        assert_eq!(can_receive_topic("vcan1"), "CAN/vcan1/receive");
    }
}
