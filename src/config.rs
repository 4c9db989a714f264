use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::data::profile::Profile;
use crate::error::ConfigError;
use crate::miners::api::rpc::{DEFAULT_PORT, RpcApi};
use crate::miners::backends::avalon::AvalonMiner;
use crate::monitor::{AutoStartSettings, PollSettings};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "avalon.toml")]
    pub config: PathBuf,

    /// Log level, used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Override the poll interval from the configuration file, in seconds
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Query every device once, print the results and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_secs: u64,
    pub probe_timeout_ms: u64,
    pub command_timeout_secs: u64,
    pub autostart: AutoStartConfig,
    #[serde(rename = "device")]
    pub devices: Vec<DeviceConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            probe_timeout_ms: 400,
            command_timeout_secs: 5,
            autostart: AutoStartConfig::default(),
            devices: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoStartConfig {
    pub max_checks: u32,
    pub check_interval_secs: u64,
    /// 30s hashrate in MH/s above which the device counts as hashing
    pub min_hashrate_mhs: f64,
}

impl Default for AutoStartConfig {
    fn default() -> Self {
        let settings = AutoStartSettings::default();
        Self {
            max_checks: settings.max_checks,
            check_interval_secs: settings.check_interval.as_secs(),
            min_hashrate_mhs: settings.min_hashrate_mhs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: String,
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub profile: Profile,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl MonitorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        content.parse()
    }

    /// Reject duplicate device ids and profiles that could never be pushed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for device in &self.devices {
            if !seen.insert(device.id.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.id.clone()));
            }
            device
                .profile
                .validate()
                .map_err(|source| ConfigError::Validation {
                    device_id: device.id.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Apply command line overrides.
    pub fn merge_args(&mut self, args: &Args) {
        if let Some(secs) = args.poll_interval {
            self.poll_interval_secs = secs;
        }
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
            autostart: AutoStartSettings {
                max_checks: self.autostart.max_checks.max(1),
                check_interval: Duration::from_secs(self.autostart.check_interval_secs),
                min_hashrate_mhs: self.autostart.min_hashrate_mhs,
            },
        }
    }

    /// Build the API client for one configured device.
    pub fn build_miner(&self, device: &DeviceConfig) -> AvalonMiner {
        let api = RpcApi::new(device.host, device.port)
            .with_timeout(Duration::from_secs(self.command_timeout_secs))
            .with_probe_timeout(Duration::from_millis(self.probe_timeout_ms));
        AvalonMiner::new(api)
    }
}

impl std::str::FromStr for MonitorConfig {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: MonitorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    const SAMPLE: &str = r#"
poll_interval_secs = 60

[autostart]
max_checks = 5

[[device]]
id = "garage"
host = "192.168.1.50"

[[device]]
id = "office"
host = "192.168.1.51"
port = 4029

[device.profile]
frequencies = [300, 312, 325, 337]
voltage = 20
auto_start = false
"#;

    #[test]
    fn parses_devices_with_defaults() {
        let config: MonitorConfig = SAMPLE.parse().unwrap();

        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.probe_timeout_ms, 400);
        assert_eq!(config.autostart.max_checks, 5);
        assert_eq!(config.autostart.check_interval_secs, 10);
        assert_eq!(config.devices.len(), 2);

        let garage = &config.devices[0];
        assert_eq!(garage.port, 4028);
        assert_eq!(garage.profile, Profile::default());

        let office = &config.devices[1];
        assert_eq!(office.port, 4029);
        assert_eq!(office.profile.frequencies, [300, 312, 325, 337]);
        assert_eq!(office.profile.voltage, 20);
        assert!(!office.profile.auto_start);
    }

    #[test]
    fn empty_file_is_an_empty_fleet() {
        let config: MonitorConfig = "".parse().unwrap();
        assert_eq!(config, MonitorConfig::default());
        assert_eq!(config.poll_settings(), PollSettings::default());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let toml = r#"
[[device]]
id = "a"
host = "10.0.0.1"

[[device]]
id = "a"
host = "10.0.0.2"
"#;
        assert!(matches!(
            toml.parse::<MonitorConfig>(),
            Err(ConfigError::DuplicateDevice(id)) if id == "a"
        ));
    }

    #[test]
    fn invalid_profile_names_the_device() {
        let toml = r#"
[[device]]
id = "hot"
host = "10.0.0.1"
profile = { voltage = 99 }
"#;
        match toml.parse::<MonitorConfig>() {
            Err(ConfigError::Validation { device_id, source }) => {
                assert_eq!(device_id, "hot");
                assert!(matches!(source, ValidationError::VoltageOutOfRange { level: 99, .. }));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn bad_address_is_a_parse_error() {
        let toml = r#"
[[device]]
id = "a"
host = "not-an-ip"
"#;
        assert!(matches!(
            toml.parse::<MonitorConfig>(),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn args_override_poll_interval() {
        let args = Args::parse_from(["avalon-rs", "--poll-interval", "15"]);
        let mut config = MonitorConfig::default();
        config.merge_args(&args);

        assert_eq!(config.poll_settings().poll_interval, Duration::from_secs(15));
        assert_eq!(args.config, PathBuf::from("avalon.toml"));
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let err = MonitorConfig::load(Path::new("/nonexistent/avalon.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/avalon.toml"));
    }
}
