use std::{net::IpAddr, time::Duration};

use macaddr::MacAddr6;
use measurements::{Current, Energy, Power, Temperature, Voltage};

use super::{
    board::BoardData, device::DeviceInfo, fan::FanData, hashrate::HashRate, pool::PoolData,
};

/// One complete set of readings from a device, gathered in a single poll.
///
/// A `MinerData` is only ever built from a poll in which every query
/// succeeded. Readings the firmware did not report are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct MinerData {
    /// The schema version of this MinerData object, for use in external APIs
    pub schema_version: String,
    /// The time this data was gathered and constructed, in seconds since the epoch
    pub timestamp: u64,
    /// The IP address of the miner this data is for
    pub ip: IpAddr,
    /// The cgminer API port
    pub port: u16,
    /// Whether the device answered every query of this poll
    pub online: bool,
    /// The MAC address of the miner this data is for
    pub mac: Option<MacAddr6>,
    /// Controller identity
    pub device_info: DeviceInfo,
    /// Per-hashboard data, ordered by board position
    pub hashboards: Vec<BoardData>,
    /// Hashrate averaged since the miner started
    pub hashrate_av: Option<HashRate>,
    /// Hashrate over the last 30 seconds
    pub hashrate_30s: Option<HashRate>,
    /// Hashrate over the last minute
    pub hashrate_1m: Option<HashRate>,
    /// The temperature at the intake, `Temp` in `estats`
    pub intake_temperature: Option<Temperature>,
    /// The average temperature across all chips
    pub average_temperature: Option<Temperature>,
    /// The hottest chip temperature
    pub max_temperature: Option<Temperature>,
    pub fans: Vec<FanData>,
    /// Fan duty cycle in percent
    pub fan_duty: Option<u8>,
    /// Power drawn by the hash boards
    pub wattage: Option<Power>,
    /// Voltage at the hash boards
    pub hashboard_voltage: Option<Voltage>,
    /// Current drawn by the hash boards
    pub hashboard_current: Option<Current>,
    /// Efficiency in W/TH/s (J/TH)
    pub efficiency: Option<f64>,
    /// Energy consumed since monitoring of this device started
    pub energy_consumed: Option<Energy>,
    pub accepted_shares: Option<u64>,
    pub rejected_shares: Option<u64>,
    pub hardware_errors: Option<u64>,
    pub best_share: Option<u64>,
    /// Percentage of shares the pools rejected
    pub pool_rejected_percent: Option<f64>,
    /// Whether hashing has been switched off in software (`SoftOFF`)
    pub soft_off: Option<bool>,
    /// Work mode: 0 normal, 1 high performance, 2 low power
    pub work_mode: Option<u8>,
    /// The cgminer uptime
    pub uptime: Option<Duration>,
    /// The current pools configured on the miner
    pub pools: Vec<PoolData>,
}

impl MinerData {
    /// A snapshot with identity only and no readings.
    pub fn new(ip: IpAddr, port: u16, timestamp: u64) -> Self {
        MinerData {
            schema_version: env!("CARGO_PKG_VERSION").to_owned(),
            timestamp,
            ip,
            port,
            online: true,
            mac: None,
            device_info: DeviceInfo::default(),
            hashboards: vec![],
            hashrate_av: None,
            hashrate_30s: None,
            hashrate_1m: None,
            intake_temperature: None,
            average_temperature: None,
            max_temperature: None,
            fans: vec![],
            fan_duty: None,
            wattage: None,
            hashboard_voltage: None,
            hashboard_current: None,
            efficiency: None,
            energy_consumed: None,
            accepted_shares: None,
            rejected_shares: None,
            hardware_errors: None,
            best_share: None,
            pool_rejected_percent: None,
            soft_off: None,
            work_mode: None,
            uptime: None,
            pools: vec![],
        }
    }

    /// Whether the hashing process is currently running.
    pub fn is_mining(&self) -> bool {
        self.soft_off != Some(true) && self.hashrate_30s.as_ref().is_some_and(|hr| hr.value > 0.0)
    }
}
