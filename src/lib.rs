//! Monitoring and control of Avalon miners over the cgminer text API.
//!
//! [`Monitor`] polls a fleet of devices, tracks which ones are reachable and
//! brings devices back to their configured [`Profile`] after a restart.
//! [`AvalonMiner`] can also be used on its own for one-off queries.

pub mod config;
pub mod data;
pub mod error;
pub mod miners;
pub mod monitor;
pub mod tracing;

pub use data::miner::MinerData;
pub use data::profile::Profile;
pub use error::{ApiError, CommandError, MonitorError, ValidationError};
pub use miners::backends::avalon::AvalonMiner;
pub use monitor::{Availability, ControlAction, Monitor, MonitorEvent};
