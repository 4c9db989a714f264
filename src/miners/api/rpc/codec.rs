//! Text codec for the cgminer API.
//!
//! Commands are sent as bare text, with `ascset` arguments appended after a
//! `|`. A response is a list of sections separated by `|`, the first one being
//! the `STATUS` section. Each section is a comma separated list of `KEY=VALUE`
//! pairs. Avalon firmware packs whole objects into a single value as space
//! separated `key[value]` tokens, e.g.
//!
//! ```text
//! STATUS=S,When=1700000000,Code=70,Msg=CGMiner stats,Description=cgminer 4.11.1|
//! STATS=0,ID=AVA100,MM ID0=Ver[1126-21] Temp[31] SF0[325 337 350 362]|
//! ```
//!
//! Delimiters inside `[...]` never split. Decoded sections are JSON objects so
//! that fields can be located with JSON pointers.

use serde_json::{Map, Number, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{ApiError, CommandError};

/// One decoded response section.
pub type Record = Map<String, Value>;

/// The ASIC index all `ascset` commands address.
const ASC_DEVICE: &str = "0";

/// Fan duty cycle used to switch the fans on.
pub const FAN_ON_PERCENT: u8 = 100;

/// Identity fields of the `version` reply. `API=3.10` is a version, not 3.1.
const VERBATIM_KEYS: &[&str] = &[
    "API", "VERSION", "CGMiner", "LVERSION", "BVERSION", "CGVERSION", "PROD", "MODEL", "HWTYPE",
    "SWTYPE", "DNA", "MAC",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Estats,
    Summary,
    Pools,
    Version,
    /// Power supply readings, answered with `PS[...]` in the status message
    HashPower,
    SetFanSpeed(u8),
    SetVoltage(u8),
    SetFrequency { zones: [u32; 4], board: u8 },
    SetWorkMode(u8),
    Reboot,
    SoftOff,
    HashPowerOff,
}

impl Command {
    pub fn enable_fan() -> Self {
        Command::SetFanSpeed(FAN_ON_PERCENT)
    }

    pub fn disable_fan() -> Self {
        Command::SetFanSpeed(0)
    }

    /// Encode the command as sent on the wire.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::Estats
                | Command::Summary
                | Command::Pools
                | Command::Version
                | Command::HashPower
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Estats => f.write_str("estats"),
            Command::Summary => f.write_str("summary"),
            Command::Pools => f.write_str("pools"),
            Command::Version => f.write_str("version"),
            Command::HashPower => write!(f, "ascset|{ASC_DEVICE},hashpower"),
            Command::SetFanSpeed(percent) => write!(f, "ascset|{ASC_DEVICE},fan-spd,{percent}"),
            Command::SetVoltage(level) => {
                write!(f, "ascset|{ASC_DEVICE},voltage-level,{level}-0-0")
            }
            Command::SetFrequency { zones, board } => write!(
                f,
                "ascset|{ASC_DEVICE},frequency,{}:{}:{}:{}-0-{board}-0",
                zones[0], zones[1], zones[2], zones[3]
            ),
            Command::SetWorkMode(mode) => write!(f, "ascset|{ASC_DEVICE},workmode,{mode}"),
            Command::Reboot => write!(f, "ascset|{ASC_DEVICE},reboot,0"),
            Command::SoftOff => write!(f, "ascset|{ASC_DEVICE},softoff"),
            Command::HashPowerOff => write!(f, "ascset|{ASC_DEVICE},hashpower,0"),
        }
    }
}

/// Unrecognised command text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCommand(pub String);

impl fmt::Display for UnknownCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown command `{}`", self.0)
    }
}

impl std::error::Error for UnknownCommand {}

impl FromStr for Command {
    type Err = UnknownCommand;

    fn from_str(wire: &str) -> Result<Self, Self::Err> {
        let unknown = || UnknownCommand(wire.to_string());
        let wire = wire.trim();

        let Some((name, param)) = wire.split_once('|') else {
            return match wire {
                "estats" => Ok(Command::Estats),
                "summary" => Ok(Command::Summary),
                "pools" => Ok(Command::Pools),
                "version" => Ok(Command::Version),
                _ => Err(unknown()),
            };
        };
        if name != "ascset" {
            return Err(unknown());
        }

        let args: Vec<&str> = param.split(',').collect();
        match args.as_slice() {
            [ASC_DEVICE, "hashpower"] => Ok(Command::HashPower),
            [ASC_DEVICE, "hashpower", "0"] => Ok(Command::HashPowerOff),
            [ASC_DEVICE, "reboot", "0"] => Ok(Command::Reboot),
            [ASC_DEVICE, "softoff"] => Ok(Command::SoftOff),
            [ASC_DEVICE, "fan-spd", percent] => {
                percent.parse().map(Command::SetFanSpeed).map_err(|_| unknown())
            }
            [ASC_DEVICE, "workmode", mode] => {
                mode.parse().map(Command::SetWorkMode).map_err(|_| unknown())
            }
            [ASC_DEVICE, "voltage-level", arg] => arg
                .strip_suffix("-0-0")
                .and_then(|level| level.parse().ok())
                .map(Command::SetVoltage)
                .ok_or_else(unknown),
            [ASC_DEVICE, "frequency", arg] => parse_frequency_arg(arg).ok_or_else(unknown),
            _ => Err(unknown()),
        }
    }
}

// `<z1>:<z2>:<z3>:<z4>-0-<board>-0`
fn parse_frequency_arg(arg: &str) -> Option<Command> {
    let mut parts = arg.split('-');
    let zones_text = parts.next()?;
    if parts.next()? != "0" {
        return None;
    }
    let board = parts.next()?.parse().ok()?;
    if parts.next()? != "0" || parts.next().is_some() {
        return None;
    }

    let zones: Vec<u32> = zones_text
        .split(':')
        .map(|z| z.parse().ok())
        .collect::<Option<_>>()?;
    let zones: [u32; 4] = zones.try_into().ok()?;
    Some(Command::SetFrequency { zones, board })
}

/// A decoded response: the status section and any data sections after it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub status: Record,
    pub data: Vec<Record>,
}

impl Response {
    /// The status letter: `S`uccess, `I`nfo, `W`arning, `E`rror or `F`atal.
    pub fn status_code(&self) -> Option<&str> {
        self.status.get("STATUS").and_then(Value::as_str)
    }

    pub fn message(&self) -> Option<&Value> {
        self.status.get("Msg")
    }

    /// Turn an error status into a [`CommandError`].
    pub fn check(self, command: &Command) -> Result<Response, CommandError> {
        match self.status_code() {
            Some("E") | Some("F") => Err(CommandError {
                command: command.encode(),
                code: self.status.get("Code").and_then(Value::as_i64).unwrap_or(-1),
                message: self
                    .message()
                    .map(|msg| match msg {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default(),
            }),
            _ => Ok(self),
        }
    }

    /// The whole response as one JSON object, `{"STATUS": {..}, "DATA": [..]}`.
    pub fn into_value(self) -> Value {
        let mut root = Map::new();
        root.insert("STATUS".into(), Value::Object(self.status));
        root.insert(
            "DATA".into(),
            Value::Array(self.data.into_iter().map(Value::Object).collect()),
        );
        Value::Object(root)
    }
}

/// Decode a raw response as read from the socket.
pub fn decode(raw: &[u8]) -> Result<Response, ApiError> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if text.is_empty() {
        return Err(ApiError::malformed("empty response"));
    }

    let mut sections = text
        .split('|')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_section);

    let status = match sections.next() {
        Some(status) if status.contains_key("STATUS") => status,
        _ => return Err(ApiError::malformed("no STATUS section")),
    };

    Ok(Response {
        status,
        data: sections.filter(|record| !record.is_empty()).collect(),
    })
}

fn parse_section(section: &str) -> Record {
    let mut record = Record::new();
    for pair in split_outside_brackets(section, ',') {
        let Some((key, value)) = split_once_outside_brackets(pair, '=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        let parsed = if VERBATIM_KEYS.contains(&key) {
            Value::String(value.to_string())
        } else {
            parse_value(value)
        };
        record.insert(key.to_string(), parsed);
    }
    record
}

fn parse_value(value: &str) -> Value {
    let tokens: Vec<&str> = split_outside_brackets(value, ' ')
        .into_iter()
        .filter(|t| !t.is_empty())
        .collect();

    if !tokens.iter().any(|t| t.contains('[')) {
        return if tokens.len() == 1 {
            coerce(value)
        } else {
            Value::String(value.to_string())
        };
    }

    // key[value] tokens; bare words between them carry no data
    let mut nested = Map::new();
    for token in tokens {
        let Some((key, rest)) = token.split_once('[') else {
            continue;
        };
        let inner = rest.strip_suffix(']').unwrap_or(rest).trim();
        if key.is_empty() || inner.is_empty() {
            continue;
        }
        let items: Vec<&str> = inner.split_whitespace().collect();
        let parsed = if items.len() > 1 {
            Value::Array(items.into_iter().map(coerce).collect())
        } else {
            coerce(inner)
        };
        nested.insert(key.to_string(), parsed);
    }
    Value::Object(nested)
}

fn coerce(text: &str) -> Value {
    // Zero padded numbers (DNA, MACs) are identifiers, not quantities
    let zero_padded = text.len() > 1 && text.starts_with('0') && !text.starts_with("0.");
    if !zero_padded {
        if let Ok(int) = text.parse::<i64>() {
            return Value::Number(int.into());
        }
        let numeric = text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
        if numeric && text.contains('.') {
            if let Some(number) = text.parse::<f64>().ok().and_then(Number::from_f64) {
                return Value::Number(number);
            }
        }
    }
    if text.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    Value::String(text.to_string())
}

fn split_outside_brackets(text: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            c if c == delimiter && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }
    parts
}

fn split_once_outside_brackets(text: &str, delimiter: char) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            c if c == delimiter && depth == 0 => {
                return Some((&text[..i], &text[i + c.len_utf8()..]));
            }
            _ => {}
        }
    }
    None
}
