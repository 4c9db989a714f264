use measurements::{Energy, Power};
use tokio::time::Instant;

use crate::data::miner::MinerData;

/// Integrates reported power draw between consecutive snapshots.
///
/// Offline periods are not integrated: [`EnergyMeter::pause`] forgets the last
/// reading so the next snapshot restarts the clock.
#[derive(Debug, Default)]
pub struct EnergyMeter {
    total_kwh: f64,
    last_reading: Option<Instant>,
}

impl EnergyMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn total(&self) -> Energy {
        Energy::from_kilowatt_hours(self.total_kwh)
    }

    /// Add the energy drawn since the previous reading and stamp the total
    /// into `snapshot`.
    pub fn account(&mut self, mut snapshot: MinerData, now: Instant) -> MinerData {
        if let (Some(last), Some(power)) = (self.last_reading, snapshot.wattage) {
            self.total_kwh += kwh(power, now.duration_since(last).as_secs_f64());
        }
        self.last_reading = Some(now);
        snapshot.energy_consumed = Some(self.total());
        snapshot
    }

    pub fn pause(&mut self) {
        self.last_reading = None;
    }
}

fn kwh(power: Power, seconds: f64) -> f64 {
    if power.as_watts() <= 0.0 {
        return 0.0;
    }
    power.as_kilowatts() * seconds / 3600.0
}
