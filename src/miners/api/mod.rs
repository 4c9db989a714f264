use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::ApiError;

pub mod rpc;

use rpc::{Command, Response};

/// Transport to one miner's API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Send one command and return its decoded response.
    ///
    /// An error status from the device is returned as
    /// [`ApiError::Command`].
    async fn send_command(&self, command: Command) -> Result<Response, ApiError>;

    /// Cheap reachability check; never fails, unreachable is `false`.
    async fn probe(&self) -> bool;
}

/// Sends the commands of one miner one at a time.
///
/// Avalon firmware handles a single command at a time, so every caller
/// sharing a miner queues here, first come first served. Probes only connect
/// and do not queue.
pub struct ExclusiveApi {
    inner: Arc<dyn ApiClient>,
    turn: Mutex<()>,
}

impl ExclusiveApi {
    pub fn new(inner: Arc<dyn ApiClient>) -> Self {
        Self {
            inner,
            turn: Mutex::new(()),
        }
    }
}

#[async_trait]
impl ApiClient for ExclusiveApi {
    async fn send_command(&self, command: Command) -> Result<Response, ApiError> {
        let _turn = self.turn.lock().await;
        self.inner.send_command(command).await
    }

    async fn probe(&self) -> bool {
        self.inner.probe().await
    }
}
