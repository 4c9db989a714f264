use crate::data::miner::MinerData;
use crate::error::ApiError;
use crate::miners::data::{DataField, DataLocation};
use async_trait::async_trait;

/// Trait that every miner backend must implement to provide miner data.
#[async_trait]
pub trait GetMinerData: Send + Sync {
    /// Queries the miner and merges every response into one `MinerData`.
    ///
    /// Fails as a whole if any single query fails; a partially filled
    /// `MinerData` is never returned.
    async fn get_data(&self) -> Result<MinerData, ApiError>;

    /// Returns the locations of the specified data field on the miner.
    ///
    /// This associates API commands with `DataExtractor` structs,
    /// describing how to extract the data for a given `DataField`.
    fn get_locations(&self, data_field: DataField) -> &'static [DataLocation];
}
