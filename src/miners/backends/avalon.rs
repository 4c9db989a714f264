use crate::data::board::BoardData;
use crate::data::device::{DeviceInfo, parse_mac};
use crate::data::fan::FanData;
use crate::data::hashrate::{HashRate, HashRateUnit};
use crate::data::miner::MinerData;
use crate::data::pool::{PoolData, PoolStatus, PoolUrl};
use crate::data::profile::Profile;
use crate::error::{ApiError, MonitorError};
use crate::miners::api::{ApiClient, ExclusiveApi};
use crate::miners::api::rpc::{Command, Response, RpcApi};
use crate::miners::backends::traits::GetMinerData;
use crate::miners::data::{
    DataCollector, DataExtractor, DataField, DataLocation, get_by_pointer, get_module_field,
};
use crate::tracing::prelude::*;
use async_trait::async_trait;
use measurements::{AngularVelocity, Current, Power, Temperature, Voltage};
use serde_json::Value;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Position of each reading in the `PS[...]` list of the hash-power query.
const PS_BOARD_VOLTAGE: usize = 2;
const PS_CURRENT: usize = 3;
const PS_POWER: usize = 4;

/// Avalon miner reached through the cgminer API.
pub struct AvalonMiner {
    ip: IpAddr,
    port: u16,
    api: ExclusiveApi,
}

impl AvalonMiner {
    pub fn new(api: RpcApi) -> Self {
        AvalonMiner {
            ip: api.ip(),
            port: api.port(),
            api: ExclusiveApi::new(Arc::new(api)),
        }
    }

    /// Build a miner on top of any API transport.
    ///
    /// Commands from every holder of the miner go out one at a time.
    pub fn with_api(ip: IpAddr, port: u16, api: Arc<dyn ApiClient>) -> Self {
        AvalonMiner {
            ip,
            port,
            api: ExclusiveApi::new(api),
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Cheap reachability check, see [`ApiClient::probe`].
    pub async fn probe(&self) -> bool {
        self.api.probe().await
    }

    /// The 30 second hashrate in MH/s, `None` if the firmware does not report it.
    pub async fn hashrate_30s(&self) -> Result<Option<f64>, ApiError> {
        let response = self.api.send_command(Command::Summary).await?;
        Ok(response
            .data
            .first()
            .and_then(|summary| summary.get("MHS 30s"))
            .and_then(Value::as_f64))
    }

    pub async fn enable_fan(&self) -> Result<Response, ApiError> {
        self.api.send_command(Command::enable_fan()).await
    }

    pub async fn disable_fan(&self) -> Result<Response, ApiError> {
        self.api.send_command(Command::disable_fan()).await
    }

    /// Set the voltage level; the caller validates the level.
    pub async fn set_voltage(&self, level: u8) -> Result<Response, ApiError> {
        self.api.send_command(Command::SetVoltage(level)).await
    }

    /// Set the four zone frequencies of `board` (0 for all boards); the
    /// caller validates the zones.
    pub async fn set_frequency(&self, zones: [u32; 4], board: u8) -> Result<Response, ApiError> {
        self.api
            .send_command(Command::SetFrequency { zones, board })
            .await
    }

    pub async fn set_work_mode(&self, mode: u8) -> Result<Response, ApiError> {
        self.api.send_command(Command::SetWorkMode(mode)).await
    }

    pub async fn reboot(&self) -> Result<Response, ApiError> {
        self.api.send_command(Command::Reboot).await
    }

    pub async fn soft_off(&self) -> Result<Response, ApiError> {
        self.api.send_command(Command::SoftOff).await
    }

    pub async fn hash_power_off(&self) -> Result<Response, ApiError> {
        self.api.send_command(Command::HashPowerOff).await
    }

    /// Push voltage then frequency of `profile`, after validating it.
    pub async fn apply_profile(&self, profile: &Profile) -> Result<(), MonitorError> {
        profile.validate()?;
        self.set_voltage(profile.voltage).await?;
        self.set_frequency(profile.frequencies, profile.board).await?;
        Ok(())
    }

    /// Enable the fans, then push voltage and frequency of `profile`.
    ///
    /// Each step assumes the previous one took effect, so the first failure
    /// stops the sequence. Nothing is rolled back.
    pub async fn start_hashing(&self, profile: &Profile) -> Result<(), MonitorError> {
        profile.validate()?;
        self.enable_fan().await?;
        self.apply_profile(profile).await
    }
}

#[async_trait]
impl GetMinerData for AvalonMiner {
    async fn get_data(&self) -> Result<MinerData, ApiError> {
        let mut collector = DataCollector::new(self, &self.api);
        let data = collector.collect_all().await?;

        let string = |field: DataField| data.get(&field).and_then(|v| value_to_string(v));
        let float = |field: DataField| data.get(&field).and_then(|v| v.as_f64());
        let uint = |field: DataField| data.get(&field).and_then(|v| v.as_u64());

        let device_info = DeviceInfo {
            product: string(DataField::Product),
            model: string(DataField::Model),
            hardware_type: string(DataField::HardwareType),
            software_type: string(DataField::SoftwareType),
            firmware_version: string(DataField::FirmwareVersion),
            api_version: string(DataField::ApiVersion),
            dna: string(DataField::Dna),
        };

        let mac = string(DataField::Mac).and_then(|s| parse_mac(&s));

        let hashrate_av = float(DataField::HashrateAv).map(HashRate::megahash);
        let hashrate_30s = float(DataField::Hashrate30s).map(HashRate::megahash);
        let hashrate_1m = float(DataField::Hashrate1m).map(HashRate::megahash);

        let hashboards = data
            .get(&DataField::Hashboards)
            .map(|module| parse_hashboards(module, data.get(&DataField::BoardHashrates).copied()))
            .unwrap_or_default();

        let fans = data
            .get(&DataField::Fans)
            .map(|module| parse_fans(module))
            .unwrap_or_default();

        let fan_duty = data.get(&DataField::FanDuty).and_then(|v| parse_percent(v));

        let power_state: Vec<f64> = data
            .get(&DataField::PowerState)
            .and_then(|v| v.as_array())
            .map(|ps| ps.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        let wattage = power_state.get(PS_POWER).copied().map(Power::from_watts);
        let hashboard_voltage = power_state
            .get(PS_BOARD_VOLTAGE)
            .map(|raw| Voltage::from_volts(raw / 100.0));
        let hashboard_current = power_state.get(PS_CURRENT).copied().map(Current::from_amperes);

        // Calculate efficiency if both hashrate and wattage are available
        let efficiency = match (hashrate_av.as_ref(), wattage) {
            (Some(hr), Some(w)) if hr.value > 0.0 => {
                Some(w / hr.as_unit(HashRateUnit::TeraHash))
            }
            _ => None,
        };

        let soft_off = data.get(&DataField::SoftOff).and_then(|v| match v {
            Value::Bool(b) => Some(*b),
            other => other.as_i64().map(|i| i != 0),
        });

        let pools = data
            .get(&DataField::Pools)
            .and_then(|v| v.as_array())
            .map(|sections| sections.iter().filter_map(parse_pool).collect())
            .unwrap_or_default();

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let snapshot = MinerData {
            schema_version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp,
            ip: self.ip,
            port: self.port,
            online: true,
            mac,
            device_info,
            hashboards,
            hashrate_av,
            hashrate_30s,
            hashrate_1m,
            intake_temperature: float(DataField::IntakeTemperature).map(Temperature::from_celsius),
            average_temperature: float(DataField::AverageTemperature)
                .map(Temperature::from_celsius),
            max_temperature: float(DataField::MaxTemperature).map(Temperature::from_celsius),
            fans,
            fan_duty,
            wattage,
            hashboard_voltage,
            hashboard_current,
            efficiency,
            energy_consumed: None,
            accepted_shares: uint(DataField::AcceptedShares),
            rejected_shares: uint(DataField::RejectedShares),
            hardware_errors: uint(DataField::HardwareErrors),
            best_share: uint(DataField::BestShare),
            pool_rejected_percent: float(DataField::PoolRejectedPercent),
            soft_off,
            work_mode: uint(DataField::WorkMode).and_then(|m| u8::try_from(m).ok()),
            uptime: uint(DataField::Uptime).map(Duration::from_secs),
            pools,
        };

        debug!(
            ip = %self.ip,
            boards = snapshot.hashboards.len(),
            pools = snapshot.pools.len(),
            "Built snapshot"
        );
        Ok(snapshot)
    }

    fn get_locations(&self, data_field: DataField) -> &'static [DataLocation] {
        const fn pointer(command: Command, pointer: &'static str) -> DataLocation {
            (
                command,
                DataExtractor {
                    func: get_by_pointer,
                    key: Some(pointer),
                },
            )
        }

        const fn module(key: Option<&'static str>) -> DataLocation {
            (
                Command::Estats,
                DataExtractor {
                    func: get_module_field,
                    key,
                },
            )
        }

        match data_field {
            DataField::Hashboards | DataField::Fans => const { &[module(None)] },
            DataField::IntakeTemperature => const { &[module(Some("Temp"))] },
            DataField::AverageTemperature => const { &[module(Some("TAvg"))] },
            DataField::MaxTemperature => const { &[module(Some("TMax"))] },
            DataField::FanDuty => const { &[module(Some("FanR"))] },
            DataField::SoftOff => const { &[module(Some("SoftOFF"))] },
            DataField::WorkMode => const { &[module(Some("WORKMODE"))] },
            DataField::BoardHashrates => const { &[pointer(Command::Summary, "/DATA/0")] },
            DataField::HashrateAv => const { &[pointer(Command::Summary, "/DATA/0/MHS av")] },
            DataField::Hashrate30s => const { &[pointer(Command::Summary, "/DATA/0/MHS 30s")] },
            DataField::Hashrate1m => const { &[pointer(Command::Summary, "/DATA/0/MHS 1m")] },
            DataField::AcceptedShares => {
                const { &[pointer(Command::Summary, "/DATA/0/Accepted")] }
            }
            DataField::RejectedShares => {
                const { &[pointer(Command::Summary, "/DATA/0/Rejected")] }
            }
            DataField::HardwareErrors => {
                const { &[pointer(Command::Summary, "/DATA/0/Hardware Errors")] }
            }
            DataField::BestShare => const { &[pointer(Command::Summary, "/DATA/0/Best Share")] },
            DataField::PoolRejectedPercent => {
                const { &[pointer(Command::Summary, "/DATA/0/Pool Rejected%")] }
            }
            // cgminer uptime first, the module's own counter as a fallback
            DataField::Uptime => const {
                &[
                    pointer(Command::Summary, "/DATA/0/Elapsed"),
                    pointer(Command::Estats, "/DATA/0/Elapsed"),
                ]
            },
            DataField::Pools => const { &[pointer(Command::Pools, "/DATA")] },
            DataField::Product => const { &[pointer(Command::Version, "/DATA/0/PROD")] },
            DataField::Model => const { &[pointer(Command::Version, "/DATA/0/MODEL")] },
            DataField::HardwareType => const { &[pointer(Command::Version, "/DATA/0/HWTYPE")] },
            DataField::SoftwareType => const { &[pointer(Command::Version, "/DATA/0/SWTYPE")] },
            DataField::FirmwareVersion => {
                const { &[pointer(Command::Version, "/DATA/0/VERSION")] }
            }
            DataField::ApiVersion => const { &[pointer(Command::Version, "/DATA/0/API")] },
            DataField::Dna => const { &[pointer(Command::Version, "/DATA/0/DNA")] },
            DataField::Mac => const { &[pointer(Command::Version, "/DATA/0/MAC")] },
            DataField::PowerState => const { &[pointer(Command::HashPower, "/STATUS/Msg/PS")] },
        }
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `52%` or `52`
fn parse_percent(value: &Value) -> Option<u8> {
    match value {
        Value::String(s) => s.trim().trim_end_matches('%').parse().ok(),
        other => other.as_u64().and_then(|n| u8::try_from(n).ok()),
    }
}

/// One board per `SF<n>` entry of the module record, ordered by board number.
fn parse_hashboards(module: &Value, summary: Option<&Value>) -> Vec<BoardData> {
    let Some(module) = module.as_object() else {
        return vec![];
    };

    let mut boards: Vec<BoardData> = module
        .iter()
        .filter_map(|(key, value)| {
            let position: u8 = key.strip_prefix("SF")?.parse().ok()?;
            let zones = match value {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|z| z.as_u64().and_then(|z| u32::try_from(z).ok()))
                    .collect(),
                other => other
                    .as_u64()
                    .and_then(|z| u32::try_from(z).ok())
                    .into_iter()
                    .collect(),
            };
            let hashrate = summary
                .and_then(|s| s.get(format!("Board {position} MH/s")))
                .and_then(Value::as_f64)
                .map(HashRate::megahash);
            Some(BoardData {
                position,
                zones,
                hashrate,
            })
        })
        .collect();

    boards.sort_by_key(|board| board.position);
    boards
}

/// `Fan1`, `Fan2`, ... until the first missing number.
fn parse_fans(module: &Value) -> Vec<FanData> {
    (1..=u8::MAX)
        .map_while(|position| {
            let rpm = module.get(format!("Fan{position}"))?.as_f64()?;
            Some(FanData {
                position,
                rpm: AngularVelocity::from_rpm(rpm),
            })
        })
        .collect()
}

fn parse_pool(section: &Value) -> Option<PoolData> {
    let position = section.get("POOL")?.as_u64()?;
    let str_field = |key: &str| section.get(key).and_then(value_to_string);
    let uint_field = |key: &str| section.get(key).and_then(Value::as_u64);
    let float_field = |key: &str| section.get(key).and_then(Value::as_f64);

    Some(PoolData {
        position: u16::try_from(position).ok()?,
        url: str_field("URL").and_then(|url| PoolUrl::parse(&url)),
        user: str_field("User"),
        status: str_field("Status")
            .map(|s| PoolStatus::from(s.as_str()))
            .unwrap_or(PoolStatus::Unknown),
        accepted_shares: uint_field("Accepted"),
        rejected_shares: uint_field("Rejected"),
        rejected_percent: float_field("Pool Rejected%"),
        stratum_difficulty: float_field("Stratum Difficulty"),
        current_block_height: uint_field("Current Block Height"),
    })
}
