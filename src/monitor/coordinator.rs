//! Per-device poll loop.
//!
//! One task per device ticks at the poll interval. Each tick probes the
//! device, and only a reachable device is asked for a full snapshot. A poll
//! runs inline in the loop, so polls of one device never overlap. Ticks stay
//! on a fixed grid; a tick that arrives while a poll is in flight is skipped.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;

use super::autostart::AutoStart;
use super::energy::EnergyMeter;
use super::{Availability, DeviceState, MonitorEvent, PollSettings};
use crate::data::profile::Profile;
use crate::miners::backends::avalon::AvalonMiner;
use crate::miners::backends::traits::GetMinerData;
use crate::tracing::prelude::*;

/// The auto-start attempt currently running for a device.
pub(crate) struct ActiveAttempt {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveAttempt {
    /// Cancel the attempt and wait until it can no longer send anything.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Holds the running attempt of one device.
///
/// Shared by the poll loop, which starts and abandons attempts, and the
/// monitor, which stops the attempt before pushing a new profile.
#[derive(Clone, Default)]
pub(crate) struct AttemptSlot(Arc<Mutex<Option<ActiveAttempt>>>);

impl AttemptSlot {
    pub(crate) fn take(&self) -> Option<ActiveAttempt> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn put(&self, attempt: ActiveAttempt) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(attempt);
    }
}

pub(crate) struct PollCoordinator {
    device_id: String,
    miner: Arc<AvalonMiner>,
    settings: PollSettings,
    state: watch::Sender<DeviceState>,
    profile: watch::Receiver<Profile>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    cancel: CancellationToken,
    energy: EnergyMeter,
    attempt: AttemptSlot,
}

impl PollCoordinator {
    pub(crate) fn new(
        device_id: String,
        miner: Arc<AvalonMiner>,
        settings: PollSettings,
        state: watch::Sender<DeviceState>,
        profile: watch::Receiver<Profile>,
        events: mpsc::UnboundedSender<MonitorEvent>,
        attempt: AttemptSlot,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            device_id,
            miner,
            settings,
            state,
            profile,
            events,
            cancel,
            energy: EnergyMeter::new(),
            attempt,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(device = %self.device_id, interval = ?self.settings.poll_interval, "Poll loop started");

        let period = self.settings.poll_interval;
        let mut ticker = interval(period);
        let cancel = self.cancel.clone();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                scheduled = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.poll_once() => {}
                    }
                    // ticks that fell inside this poll are dropped, not queued
                    ticker.reset_at(next_on_grid(scheduled, Instant::now(), period));
                }
            }
        }

        if let Some(attempt) = self.attempt.take() {
            attempt.stop().await;
        }
        debug!(device = %self.device_id, "Poll loop stopped");
    }

    async fn poll_once(&mut self) {
        let previous = self.state.borrow().availability;

        if !self.miner.probe().await {
            trace!(device = %self.device_id, "Probe failed");
            self.mark_offline(previous);
            return;
        }

        match self.miner.get_data().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(self.energy.account(snapshot, Instant::now()));
                self.state.send_replace(DeviceState {
                    availability: Availability::Online,
                    snapshot: Some(snapshot.clone()),
                });

                if previous != Availability::Online {
                    info!(device = %self.device_id, from = %previous, "Device online");
                    self.emit(MonitorEvent::AvailabilityChanged {
                        device_id: self.device_id.clone(),
                        old: previous,
                        new: Availability::Online,
                    });
                    self.start_attempt();
                }
                self.emit(MonitorEvent::SnapshotReady {
                    device_id: self.device_id.clone(),
                    snapshot,
                });
            }
            Err(error) => {
                if error.is_unreachable() {
                    debug!(device = %self.device_id, %error, "Poll failed");
                } else {
                    warn!(device = %self.device_id, %error, "Poll failed");
                }
                self.mark_offline(previous);
            }
        }
    }

    fn mark_offline(&mut self, previous: Availability) {
        self.energy.pause();
        self.state.send_replace(DeviceState {
            availability: Availability::Offline,
            snapshot: None,
        });

        if previous != Availability::Offline {
            info!(device = %self.device_id, from = %previous, "Device offline");
            self.abandon_attempt("device offline");
            self.emit(MonitorEvent::AvailabilityChanged {
                device_id: self.device_id.clone(),
                old: previous,
                new: Availability::Offline,
            });
        }
    }

    fn start_attempt(&mut self) {
        let profile = self.profile.borrow().clone();
        if !profile.auto_start {
            return;
        }
        self.abandon_attempt("superseded");

        let cancel = self.cancel.child_token();
        let mut controller = AutoStart::new(
            self.device_id.clone(),
            self.miner.clone(),
            profile,
            self.settings.autostart.clone(),
        );
        let events = self.events.clone();
        let device_id = self.device_id.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = controller.run(token).await;
            let _ = events.send(MonitorEvent::AutoStartFinished {
                device_id,
                outcome,
                state: controller.state().clone(),
            });
        });

        self.attempt.put(ActiveAttempt { cancel, task });
    }

    fn abandon_attempt(&self, reason: &str) {
        if let Some(attempt) = self.attempt.take() {
            if !attempt.task.is_finished() {
                debug!(device = %self.device_id, reason, "Cancelling auto-start");
            }
            attempt.cancel.cancel();
        }
    }

    fn emit(&self, event: MonitorEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// First tick of the `period` grid anchored at `scheduled` that lies after `now`.
fn next_on_grid(scheduled: Instant, now: Instant, period: Duration) -> Instant {
    let elapsed = now.saturating_duration_since(scheduled).as_nanos();
    let periods = elapsed / period.as_nanos().max(1) + 1;
    scheduled + period * u32::try_from(periods).unwrap_or(u32::MAX)
}
