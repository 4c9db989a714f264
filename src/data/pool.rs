use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    Alive,
    Dead,
    Disabled,
    Rejecting,
    Unknown,
}

impl From<&str> for PoolStatus {
    fn from(value: &str) -> Self {
        match value {
            "Alive" => PoolStatus::Alive,
            "Dead" => PoolStatus::Dead,
            "Disabled" => PoolStatus::Disabled,
            "Rejecting" => PoolStatus::Rejecting,
            _ => PoolStatus::Unknown,
        }
    }
}

/// Stratum URL as configured on the miner.
///
/// cgminer accepts bare `host:port` pool addresses, so those are read as
/// `stratum+tcp://host:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUrl(Url);

impl PoolUrl {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed = if raw.contains("://") {
            Url::parse(raw)
        } else {
            Url::parse(&format!("stratum+tcp://{raw}"))
        };
        parsed.ok().map(PoolUrl)
    }

    pub fn host(&self) -> Option<&str> {
        self.0.host_str()
    }

    pub fn port(&self) -> Option<u16> {
        self.0.port()
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for PoolUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolData {
    /// The pool's index in the miner's pool list
    pub position: u16,
    /// The stratum URL of the pool
    pub url: Option<PoolUrl>,
    /// The worker name used on this pool
    pub user: Option<String>,
    /// Whether the miner considers the pool usable
    pub status: PoolStatus,
    pub accepted_shares: Option<u64>,
    pub rejected_shares: Option<u64>,
    /// Percentage of shares the pool rejected
    pub rejected_percent: Option<f64>,
    pub stratum_difficulty: Option<f64>,
    pub current_block_height: Option<u64>,
}

impl PoolData {
    pub fn is_alive(&self) -> bool {
        self.status == PoolStatus::Alive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_is_read_as_stratum() {
        let url = PoolUrl::parse("pool.example.com:3333").unwrap();
        assert_eq!(url.host(), Some("pool.example.com"));
        assert_eq!(url.port(), Some(3333));
        assert!(url.as_str().starts_with("stratum+tcp://"));
    }

    #[test]
    fn explicit_scheme_is_kept() {
        let url = PoolUrl::parse("stratum+ssl://btc.example.org:443").unwrap();
        assert!(url.as_str().starts_with("stratum+ssl://"));
    }

    #[test]
    fn empty_url_is_none() {
        assert!(PoolUrl::parse("  ").is_none());
    }
}
