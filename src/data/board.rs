use super::hashrate::HashRate;
use measurements::Frequency;

#[derive(Debug, Clone, PartialEq)]
pub struct BoardData {
    /// The board position in the miner, indexed from 0
    pub position: u8,
    /// The frequency set point of each clock zone in MHz, in zone order 1..4
    pub zones: Vec<u32>,
    /// The current hashrate of the board
    pub hashrate: Option<HashRate>,
}

impl BoardData {
    /// The average frequency across the board's zones.
    pub fn frequency(&self) -> Option<Frequency> {
        if self.zones.is_empty() {
            return None;
        }
        let sum: u32 = self.zones.iter().sum();
        Some(Frequency::from_megahertz(
            f64::from(sum) / self.zones.len() as f64,
        ))
    }
}
