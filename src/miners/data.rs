use crate::error::ApiError;
use crate::miners::api::ApiClient;
use crate::miners::api::rpc::Command;
use crate::miners::backends::traits::GetMinerData;
use serde_json::Value;
use std::collections::HashMap;
use strum::{EnumIter, IntoEnumIterator};

/// Represents the individual pieces of data that can be queried from a miner device.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Copy, EnumIter)]
pub enum DataField {
    /// Per-board frequency zones, from the `estats` module record.
    Hashboards,
    /// Temperature at the intake.
    IntakeTemperature,
    /// Average chip temperature.
    AverageTemperature,
    /// Hottest chip temperature.
    MaxTemperature,
    /// Fan speeds (`Fan1`, `Fan2`, ...).
    Fans,
    /// Fan duty cycle in percent.
    FanDuty,
    /// Whether hashing is switched off in software.
    SoftOff,
    /// Normal, high performance or low power.
    WorkMode,
    /// Per-board hashrates, from the summary record.
    BoardHashrates,
    /// Hashrate averaged since start.
    HashrateAv,
    /// Hashrate over the last 30 seconds.
    Hashrate30s,
    /// Hashrate over the last minute.
    Hashrate1m,
    AcceptedShares,
    RejectedShares,
    HardwareErrors,
    BestShare,
    PoolRejectedPercent,
    /// Uptime in seconds.
    Uptime,
    /// Pool configuration (addresses, statuses, etc.).
    Pools,
    Product,
    Model,
    HardwareType,
    SoftwareType,
    /// Firmware version of the miner.
    FirmwareVersion,
    /// Version of the miner's API.
    ApiVersion,
    Dna,
    /// MAC address of the miner.
    Mac,
    /// Power supply readings `PS[err ctrlV boardV current power voltSetting]`.
    PowerState,
}

/// A function pointer type that takes a JSON `Value` and an optional key,
/// returning the extracted value if found.
type ExtractorFn = for<'a> fn(&'a Value, Option<&'static str>) -> Option<&'a Value>;

/// Describes how to extract a specific value from a command's response.
///
/// Created by a backend and used to locate a field within a decoded response,
/// shaped as `{"STATUS": {..}, "DATA": [{..}, ..]}`.
#[derive(Clone, Copy)]
pub struct DataExtractor {
    /// Function used to extract data from a response.
    pub func: ExtractorFn,
    /// Optional key or pointer within the response to extract.
    pub key: Option<&'static str>,
}

/// Alias for a tuple describing the API command and the extractor used to parse its result.
pub type DataLocation = (Command, DataExtractor);

/// Extracts a value from a JSON object using a JSON pointer path.
///
/// Returns `None` if the pointer is `None` or the path doesn't exist.
pub fn get_by_pointer<'a>(data: &'a Value, pointer: Option<&str>) -> Option<&'a Value> {
    data.pointer(pointer?)
}

/// Extracts a field of the first miner module record (`MM ID<n>`) found in any
/// data section, or the whole module record when `key` is `None`.
///
/// `estats` may answer with several `STATS` sections, and the module record is
/// not always in the first one.
pub fn get_module_field<'a>(data: &'a Value, key: Option<&str>) -> Option<&'a Value> {
    let module = data
        .get("DATA")?
        .as_array()?
        .iter()
        .filter_map(Value::as_object)
        .find_map(|section| {
            section
                .iter()
                .find(|(name, value)| name.starts_with("MM ID") && value.is_object())
                .map(|(_, value)| value)
        })?;

    match key {
        Some(key) => module.get(key),
        None => Some(module),
    }
}

/// A utility for collecting structured miner data from an API backend.
pub struct DataCollector<'a> {
    /// Backend-specific data mapping logic.
    miner: &'a dyn GetMinerData,
    /// API client used to send commands to the miner.
    api_client: &'a dyn ApiClient,
    /// Cache of command responses keyed by command.
    cache: HashMap<Command, Value>,
}

impl<'a> DataCollector<'a> {
    /// Constructs a new `DataCollector` with the given backend and API client.
    pub fn new(miner: &'a dyn GetMinerData, api_client: &'a dyn ApiClient) -> Self {
        Self {
            miner,
            api_client,
            cache: HashMap::new(),
        }
    }

    /// Collects **all** available fields from the miner and returns a map of results.
    pub async fn collect_all(&mut self) -> Result<HashMap<DataField, &Value>, ApiError> {
        self.collect(DataField::iter().collect::<Vec<_>>().as_slice())
            .await
    }

    /// Collects only the specified fields from the miner and returns a map of results.
    ///
    /// Sends the minimum required set of API commands, one after the other.
    /// The first failing command fails the whole collection, so callers
    /// never see data merged from an incomplete set of responses.
    pub async fn collect(
        &mut self,
        fields: &[DataField],
    ) -> Result<HashMap<DataField, &Value>, ApiError> {
        for command in self.get_required_commands(fields) {
            if self.cache.contains_key(&command) {
                continue;
            }
            let response = self.api_client.send_command(command).await?;
            self.cache.insert(command, response.into_value());
        }

        // Extract the data for each field using the cached responses.
        let mut results = HashMap::new();
        for &field in fields {
            if let Some(value) = self.extract_field(field) {
                results.insert(field, value);
            }
        }

        Ok(results)
    }

    /// Determines the unique set of API commands needed for the requested fields,
    /// in the order the fields first need them.
    fn get_required_commands(&self, fields: &[DataField]) -> Vec<Command> {
        let mut commands = Vec::new();
        for (command, _) in fields
            .iter()
            .flat_map(|&field| self.miner.get_locations(field))
        {
            if !commands.contains(command) {
                commands.push(*command);
            }
        }
        commands
    }

    /// Attempts to extract the value for a specific field from the cached command responses.
    ///
    /// Uses the extractor function and key associated with the field for parsing.
    fn extract_field(&self, field: DataField) -> Option<&Value> {
        for (command, extractor) in self.miner.get_locations(field) {
            if let Some(response_data) = self.cache.get(command) {
                if let Some(value) = (extractor.func)(response_data, extractor.key) {
                    return Some(value); // Return the first successful extraction.
                }
            }
        }
        None
    }
}
