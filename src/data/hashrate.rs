use measurements::Power;
use std::fmt;
use std::ops::Div;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashRateUnit {
    Hash,
    KiloHash,
    MegaHash,
    GigaHash,
    TeraHash,
    PetaHash,
}

impl HashRateUnit {
    fn multiplier(self) -> f64 {
        match self {
            HashRateUnit::Hash => 1.0,
            HashRateUnit::KiloHash => 1e3,
            HashRateUnit::MegaHash => 1e6,
            HashRateUnit::GigaHash => 1e9,
            HashRateUnit::TeraHash => 1e12,
            HashRateUnit::PetaHash => 1e15,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            HashRateUnit::Hash => "H/s",
            HashRateUnit::KiloHash => "KH/s",
            HashRateUnit::MegaHash => "MH/s",
            HashRateUnit::GigaHash => "GH/s",
            HashRateUnit::TeraHash => "TH/s",
            HashRateUnit::PetaHash => "PH/s",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashRate {
    /// The current amount of hashes being computed
    pub value: f64,
    /// The unit of the hashes in value
    pub unit: HashRateUnit,
    /// The algorithm of the computed hashes
    pub algo: String,
}

impl HashRate {
    /// A SHA256 hashrate in MH/s, the unit cgminer reports in.
    pub fn megahash(value: f64) -> Self {
        HashRate {
            value,
            unit: HashRateUnit::MegaHash,
            algo: String::from("SHA256"),
        }
    }

    pub fn as_unit(&self, unit: HashRateUnit) -> HashRate {
        HashRate {
            value: self.value * self.unit.multiplier() / unit.multiplier(),
            unit,
            algo: self.algo.clone(),
        }
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} {}", self.value, self.unit.suffix())
    }
}

/// Efficiency in W per unit of `hash_rate`.
impl Div<HashRate> for Power {
    type Output = f64;

    fn div(self, hash_rate: HashRate) -> Self::Output {
        self.as_watts() / hash_rate.value
    }
}
