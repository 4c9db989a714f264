use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::tracing::prelude::*;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(400);

/// Connect-and-close reachability check.
///
/// Much cheaper than a real query, so it gates every poll and fails fast when
/// the device is powered off.
#[derive(Debug, Clone)]
pub struct HealthProber {
    addr: SocketAddr,
    timeout: Duration,
}

impl HealthProber {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether the API port accepted a connection within the timeout.
    pub async fn probe(&self) -> bool {
        match timeout(self.timeout, TcpStream::connect(self.addr)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                true
            }
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "Probe failed");
                false
            }
            Err(_) => {
                debug!(addr = %self.addr, timeout_ms = self.timeout.as_millis() as u64, "Probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_port_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let prober = HealthProber::new(listener.local_addr().unwrap());
        assert!(prober.probe().await);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prober = HealthProber::new(addr).with_timeout(Duration::from_millis(200));
        assert!(!prober.probe().await);
    }
}
