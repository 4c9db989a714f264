//! The cgminer text API over raw TCP.

pub mod client;
pub mod codec;
pub mod probe;

pub use client::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_PORT, RpcApi};
pub use codec::{Command, Record, Response};
pub use probe::{DEFAULT_PROBE_TIMEOUT, HealthProber};
