//! Re-applies a device's profile after it comes back online.
//!
//! The controller first waits until the device reports meaningful hashing
//! activity, then pushes fan, voltage and frequency, strictly in that order.
//! Any failure ends the attempt; the next offline→online edge starts a new
//! one.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::data::profile::{Profile, validate_voltage};
use crate::error::{ApiError, ValidationError};
use crate::miners::backends::avalon::AvalonMiner;
use crate::tracing::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct AutoStartSettings {
    /// How many times the 30s hashrate is checked before giving up
    pub max_checks: u32,
    /// Delay between two checks
    pub check_interval: Duration,
    /// The 30s hashrate (MH/s) must exceed this before settings are pushed
    pub min_hashrate_mhs: f64,
}

impl Default for AutoStartSettings {
    fn default() -> Self {
        Self {
            max_checks: 10,
            check_interval: Duration::from_secs(10),
            min_hashrate_mhs: 5.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AutoStartPhase {
    WaitingForHashrate,
    PushingFan,
    PushingVoltage,
    PushingFrequency,
    Done,
    Abandoned,
}

/// Progress of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptState {
    /// Hashrate checks made so far
    pub checks: u32,
    pub last_hashrate_30s: Option<f64>,
    pub phase: AutoStartPhase,
}

impl Default for AttemptState {
    fn default() -> Self {
        Self {
            checks: 0,
            last_hashrate_30s: None,
            phase: AutoStartPhase::WaitingForHashrate,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AbandonReason {
    /// The device never reported enough hashrate
    NeverHashed {
        checks: u32,
        last_hashrate_30s: Option<f64>,
    },
    /// The device rejected or failed a push
    Command {
        phase: AutoStartPhase,
        error: ApiError,
    },
    /// The profile cannot be pushed
    Validation(ValidationError),
    /// The device went offline, was removed, or its profile changed
    Cancelled { phase: AutoStartPhase },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutoStartOutcome {
    Completed,
    Abandoned(AbandonReason),
}

pub struct AutoStart {
    device_id: String,
    miner: Arc<AvalonMiner>,
    profile: Profile,
    settings: AutoStartSettings,
    state: AttemptState,
}

impl AutoStart {
    pub fn new(
        device_id: String,
        miner: Arc<AvalonMiner>,
        profile: Profile,
        settings: AutoStartSettings,
    ) -> Self {
        Self {
            device_id,
            miner,
            profile,
            settings,
            state: AttemptState::default(),
        }
    }

    /// Progress so far; after [`AutoStart::run`] returns, how the attempt ended.
    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    /// Run the attempt to completion or until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) -> AutoStartOutcome {
        info!(device = %self.device_id, "Waiting for hashing before pushing profile");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => AutoStartOutcome::Abandoned(AbandonReason::Cancelled {
                phase: self.state.phase,
            }),
            outcome = self.sequence() => outcome,
        };

        match &outcome {
            AutoStartOutcome::Completed => {
                info!(device = %self.device_id, "Profile applied, hashing started")
            }
            AutoStartOutcome::Abandoned(reason) => {
                self.state.phase = AutoStartPhase::Abandoned;
                warn!(device = %self.device_id, ?reason, "Auto-start abandoned")
            }
        }
        outcome
    }

    async fn sequence(&mut self) -> AutoStartOutcome {
        if let Err(reason) = self.wait_for_hashrate().await {
            return AutoStartOutcome::Abandoned(reason);
        }

        self.state.phase = AutoStartPhase::PushingFan;
        if let Err(error) = self.miner.enable_fan().await {
            return self.command_failed(error);
        }

        self.state.phase = AutoStartPhase::PushingVoltage;
        if let Err(e) = validate_voltage(self.profile.voltage) {
            return AutoStartOutcome::Abandoned(AbandonReason::Validation(e));
        }
        if let Err(error) = self.miner.set_voltage(self.profile.voltage).await {
            return self.command_failed(error);
        }

        self.state.phase = AutoStartPhase::PushingFrequency;
        if let Err(e) = self.profile.validate() {
            return AutoStartOutcome::Abandoned(AbandonReason::Validation(e));
        }
        if let Err(error) = self
            .miner
            .set_frequency(self.profile.frequencies, self.profile.board)
            .await
        {
            return self.command_failed(error);
        }

        self.state.phase = AutoStartPhase::Done;
        AutoStartOutcome::Completed
    }

    async fn wait_for_hashrate(&mut self) -> Result<(), AbandonReason> {
        self.state.phase = AutoStartPhase::WaitingForHashrate;
        loop {
            self.state.checks += 1;
            match self.miner.hashrate_30s().await {
                Ok(reading) => {
                    self.state.last_hashrate_30s = reading;
                    if reading.is_some_and(|mhs| mhs > self.settings.min_hashrate_mhs) {
                        return Ok(());
                    }
                    debug!(
                        device = %self.device_id,
                        hashrate_30s = ?reading,
                        check = self.state.checks,
                        max_checks = self.settings.max_checks,
                        "Not hashing yet"
                    );
                }
                Err(error) => {
                    debug!(device = %self.device_id, %error, check = self.state.checks, "Hashrate check failed");
                }
            }

            if self.state.checks >= self.settings.max_checks {
                return Err(AbandonReason::NeverHashed {
                    checks: self.state.checks,
                    last_hashrate_30s: self.state.last_hashrate_30s,
                });
            }
            sleep(self.settings.check_interval).await;
        }
    }

    fn command_failed(&self, error: ApiError) -> AutoStartOutcome {
        error!(device = %self.device_id, phase = %self.state.phase, %error, "Push failed");
        AutoStartOutcome::Abandoned(AbandonReason::Command {
            phase: self.state.phase,
            error,
        })
    }
}
