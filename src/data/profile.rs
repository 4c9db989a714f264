//! User-owned frequency/voltage profile and its validation.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Every ASIC clock step (MHz) the firmware accepts for a frequency zone.
pub const FREQUENCY_STEPS: [u32; 69] = [
    25, 300, 312, 325, 337, 350, 362, 375, 387, 400, 408, 412, 416, 425, 433, 437, 441, 450, 458,
    462, 466, 475, 483, 487, 491, 500, 508, 512, 516, 525, 533, 537, 550, 562, 575, 587, 600, 612,
    625, 637, 650, 662, 675, 687, 700, 712, 725, 737, 750, 762, 775, 787, 800, 825, 850, 875, 900,
    925, 950, 975, 1000, 1025, 1050, 1075, 1100, 1125, 1150, 1175, 1200,
];

pub const VOLTAGE_LEVEL_MIN: u8 = 0;
pub const VOLTAGE_LEVEL_MAX: u8 = 60;

/// Frequency/voltage settings pushed to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    /// Zone 1..4 frequencies in MHz
    pub frequencies: [u32; 4],
    /// Hardware voltage level
    pub voltage: u8,
    /// Target hash board, 0 for all boards
    pub board: u8,
    /// Re-apply this profile whenever the device comes back online
    pub auto_start: bool,
}

impl Default for Profile {
    fn default() -> Self {
        Profile {
            frequencies: [325, 337, 350, 362],
            voltage: 25,
            board: 0,
            auto_start: true,
        }
    }
}

impl Profile {
    /// Check the profile against the firmware's constraints.
    ///
    /// The board index is deliberately not checked: only the device knows its
    /// board count, and it rejects bad indices itself.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (i, &mhz) in self.frequencies.iter().enumerate() {
            if !is_supported_frequency(mhz) {
                return Err(ValidationError::UnsupportedFrequency { zone: i + 1, mhz });
            }
        }
        if !self.frequencies.windows(2).all(|w| w[0] < w[1]) {
            return Err(ValidationError::NotAscending {
                zones: self.frequencies,
            });
        }
        validate_voltage(self.voltage)
    }
}

pub fn validate_voltage(level: u8) -> Result<(), ValidationError> {
    if !(VOLTAGE_LEVEL_MIN..=VOLTAGE_LEVEL_MAX).contains(&level) {
        return Err(ValidationError::VoltageOutOfRange {
            level,
            min: VOLTAGE_LEVEL_MIN,
            max: VOLTAGE_LEVEL_MAX,
        });
    }
    Ok(())
}

pub fn is_supported_frequency(mhz: u32) -> bool {
    FREQUENCY_STEPS.binary_search(&mhz).is_ok()
}

/// Snap an arbitrary frequency to the closest supported clock step.
///
/// Ties resolve to the lower step.
pub fn nearest_valid_frequency(mhz: u32) -> u32 {
    FREQUENCY_STEPS
        .iter()
        .copied()
        .min_by_key(|step| step.abs_diff(mhz))
        .unwrap_or(FREQUENCY_STEPS[0])
}
