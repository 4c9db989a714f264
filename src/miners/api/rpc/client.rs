use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::codec::{self, Command, Response};
use super::probe::HealthProber;
use crate::error::ApiError;
use crate::miners::api::ApiClient;
use crate::tracing::prelude::*;

pub const DEFAULT_PORT: u16 = 4028;
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Responses larger than this are not cgminer responses.
const MAX_RESPONSE_LEN: usize = 1 << 20;

/// cgminer API client for Avalon miners.
///
/// Every command opens its own connection, which is closed before the call
/// returns, whatever the outcome. The client keeps no state between calls.
#[derive(Debug, Clone)]
pub struct RpcApi {
    ip: IpAddr,
    port: u16,
    timeout: Duration,
    prober: HealthProber,
}

impl RpcApi {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        let addr = SocketAddr::new(ip, port);
        Self {
            ip,
            port,
            timeout: DEFAULT_COMMAND_TIMEOUT,
            prober: HealthProber::new(addr),
        }
    }

    /// Set the timeout covering connect, write and read of one command
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the timeout of the reachability probe
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.prober = self.prober.with_timeout(timeout);
        self
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    async fn round_trip(&self, wire: &str) -> Result<Vec<u8>, ApiError> {
        let addr = self.addr();
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| map_io_error(e, addr))?;

        stream
            .write_all(wire.as_bytes())
            .await
            .map_err(|e| map_io_error(e, addr))?;

        let mut raw = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream
                .read(&mut chunk)
                .await
                .map_err(|e| map_io_error(e, addr))?;
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&chunk[..n]);
            // cgminer terminates its reply with a NUL
            if chunk[..n].contains(&0) {
                break;
            }
            if raw.len() > MAX_RESPONSE_LEN {
                return Err(ApiError::malformed(format!(
                    "response exceeds {MAX_RESPONSE_LEN} bytes"
                )));
            }
        }

        let _ = stream.shutdown().await;
        Ok(raw)
    }
}

#[async_trait]
impl ApiClient for RpcApi {
    async fn send_command(&self, command: Command) -> Result<Response, ApiError> {
        let wire = command.encode();
        trace!(ip = %self.ip, tx = %wire, "Sending command");

        // the stream lives inside the future, so a timeout drops and closes it
        let raw = timeout(self.timeout, self.round_trip(&wire))
            .await
            .map_err(|_| ApiError::Timeout {
                addr: self.addr().to_string(),
            })??;

        trace!(ip = %self.ip, rx = %String::from_utf8_lossy(&raw), "Received response");

        let response = codec::decode(&raw)?;
        Ok(response.check(&command)?)
    }

    async fn probe(&self) -> bool {
        self.prober.probe().await
    }
}

fn map_io_error(error: io::Error, addr: SocketAddr) -> ApiError {
    match error.kind() {
        io::ErrorKind::ConnectionRefused => ApiError::ConnectionRefused {
            addr: addr.to_string(),
        },
        io::ErrorKind::TimedOut => ApiError::Timeout {
            addr: addr.to_string(),
        },
        _ => ApiError::Io(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_its_address() {
        let api = RpcApi::new("10.0.0.9".parse().unwrap(), 4029);
        assert_eq!(api.ip(), "10.0.0.9".parse::<IpAddr>().unwrap());
        assert_eq!(api.port(), 4029);
        assert_eq!(api.addr().to_string(), "10.0.0.9:4029");
    }

    #[test]
    fn io_errors_keep_their_kind() {
        let addr: SocketAddr = "10.0.0.9:4028".parse().unwrap();
        assert!(matches!(
            map_io_error(io::ErrorKind::ConnectionRefused.into(), addr),
            ApiError::ConnectionRefused { .. }
        ));
        assert!(matches!(
            map_io_error(io::ErrorKind::TimedOut.into(), addr),
            ApiError::Timeout { .. }
        ));
        assert!(matches!(
            map_io_error(io::ErrorKind::BrokenPipe.into(), addr),
            ApiError::Io(_)
        ));
    }
}
