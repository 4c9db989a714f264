use macaddr::MacAddr6;
use std::str::FromStr;

/// Controller identity, as reported by the `version` command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceInfo {
    /// Product name, e.g. `AvalonMiner Nano3`
    pub product: Option<String>,
    /// Firmware model number
    pub model: Option<String>,
    pub hardware_type: Option<String>,
    pub software_type: Option<String>,
    /// The firmware version string
    pub firmware_version: Option<String>,
    /// The cgminer API version
    pub api_version: Option<String>,
    /// Unique chip identifier of the controller
    pub dna: Option<String>,
}

/// Parse a MAC address as printed by the firmware.
///
/// Avalon controllers print the address without separators
/// (`b4a2eb3f2c00`), which `macaddr` does not accept on its own.
pub fn parse_mac(raw: &str) -> Option<MacAddr6> {
    let raw = raw.trim();
    if let Ok(mac) = MacAddr6::from_str(raw) {
        return Some(mac);
    }
    if raw.len() != 12 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = u8::from_str_radix(&raw[i * 2..i * 2 + 2], 16).ok()?;
    }
    Some(MacAddr6::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_hex_mac() {
        let mac = parse_mac("b4a2eb3f2c00").unwrap();
        assert_eq!(mac.into_array(), [0xb4, 0xa2, 0xeb, 0x3f, 0x2c, 0x00]);
    }

    #[test]
    fn parses_colon_mac() {
        let mac = parse_mac("B4:A2:EB:3F:2C:00").unwrap();
        assert_eq!(mac.into_array(), [0xb4, 0xa2, 0xeb, 0x3f, 0x2c, 0x00]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_mac("not-a-mac").is_none());
        assert!(parse_mac("b4a2eb3f2c0").is_none());
    }
}
