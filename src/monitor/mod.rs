//! Fleet monitoring: one poll loop per registered device.
//!
//! [`Monitor`] owns the per-device tasks. Everything the loops learn is
//! published two ways: the latest [`DeviceState`] of each device can be read
//! at any time, and every change is also sent as a [`MonitorEvent`].

pub mod autostart;
mod coordinator;
pub mod energy;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub use autostart::{AbandonReason, AttemptState, AutoStartOutcome, AutoStartPhase, AutoStartSettings};

use crate::data::miner::MinerData;
use crate::data::profile::Profile;
use crate::error::MonitorError;
use crate::miners::backends::avalon::AvalonMiner;
use crate::tracing::prelude::*;
use coordinator::{AttemptSlot, PollCoordinator};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Availability {
    /// Not polled yet
    #[default]
    Unknown,
    Online,
    Offline,
}

/// Operator commands that can be sent to a device at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ControlAction {
    /// Fans on, then the device's profile
    Start,
    /// Hash power off
    Stop,
    Reboot,
    /// Stop hashing in software, leaving the controller up
    SoftShutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    AvailabilityChanged {
        device_id: String,
        old: Availability,
        new: Availability,
    },
    SnapshotReady {
        device_id: String,
        snapshot: Arc<MinerData>,
    },
    AutoStartFinished {
        device_id: String,
        outcome: AutoStartOutcome,
        /// Checks made, last hashrate seen and the phase the attempt ended in
        state: AttemptState,
    },
}

/// What is currently known about one device.
///
/// `snapshot` is the data of the last poll while the device is online, and
/// `None` otherwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub availability: Availability,
    pub snapshot: Option<Arc<MinerData>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub autostart: AutoStartSettings,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            autostart: AutoStartSettings::default(),
        }
    }
}

struct DeviceHandle {
    miner: Arc<AvalonMiner>,
    state: watch::Receiver<DeviceState>,
    profile: watch::Sender<Profile>,
    attempt: AttemptSlot,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Monitor {
    settings: PollSettings,
    devices: HashMap<String, DeviceHandle>,
    events: mpsc::UnboundedSender<MonitorEvent>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Monitor {
    /// Create an empty monitor and the receiving end of its event stream.
    pub fn new(settings: PollSettings) -> (Self, mpsc::UnboundedReceiver<MonitorEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let monitor = Monitor {
            settings,
            devices: HashMap::new(),
            events,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        };
        (monitor, rx)
    }

    /// Register a device and start polling it right away.
    pub fn add_device(
        &mut self,
        device_id: impl Into<String>,
        miner: AvalonMiner,
        profile: Profile,
    ) -> Result<(), MonitorError> {
        let device_id = device_id.into();
        if self.devices.contains_key(&device_id) {
            return Err(MonitorError::DuplicateDevice { device_id });
        }
        profile.validate()?;

        let miner = Arc::new(miner);
        let (state_tx, state) = watch::channel(DeviceState::default());
        let (profile, profile_rx) = watch::channel(profile);
        let attempt = AttemptSlot::default();
        let cancel = self.shutdown.child_token();

        let coordinator = PollCoordinator::new(
            device_id.clone(),
            miner.clone(),
            self.settings.clone(),
            state_tx,
            profile_rx,
            self.events.clone(),
            attempt.clone(),
            cancel.clone(),
        );
        let task = self.tracker.spawn(coordinator.run());

        info!(device = %device_id, ip = %miner.ip(), port = miner.port(), "Device added");
        self.devices.insert(
            device_id,
            DeviceHandle {
                miner,
                state,
                profile,
                attempt,
                cancel,
                task,
            },
        );
        Ok(())
    }

    /// Stop polling a device and forget it.
    ///
    /// Returns once its poll loop and any auto-start attempt have stopped.
    pub async fn remove_device(&mut self, device_id: &str) -> Result<(), MonitorError> {
        let handle = self
            .devices
            .remove(device_id)
            .ok_or_else(|| unknown(device_id))?;

        handle.cancel.cancel();
        if let Err(e) = handle.task.await {
            error!(device = %device_id, error = %e, "Poll loop ended abnormally");
        }
        info!(device = %device_id, "Device removed");
        Ok(())
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn get_latest_snapshot(&self, device_id: &str) -> Option<Arc<MinerData>> {
        self.devices.get(device_id)?.state.borrow().snapshot.clone()
    }

    pub fn get_availability(&self, device_id: &str) -> Option<Availability> {
        Some(self.devices.get(device_id)?.state.borrow().availability)
    }

    /// Watch every state change of one device.
    pub fn subscribe(&self, device_id: &str) -> Option<watch::Receiver<DeviceState>> {
        Some(self.devices.get(device_id)?.state.clone())
    }

    pub fn get_configuration(&self, device_id: &str) -> Option<Profile> {
        Some(self.devices.get(device_id)?.profile.borrow().clone())
    }

    /// Replace a device's profile.
    ///
    /// An invalid profile is rejected before anything is stored or sent. A
    /// device that is online gets the new voltage and frequencies right away;
    /// any other device picks them up on its next auto-start. A running
    /// auto-start attempt is stopped before anything is sent, so it cannot
    /// push the old profile over the new one.
    pub async fn set_configuration(
        &self,
        device_id: &str,
        profile: Profile,
    ) -> Result<(), MonitorError> {
        let handle = self.devices.get(device_id).ok_or_else(|| unknown(device_id))?;
        profile.validate()?;

        handle.profile.send_replace(profile.clone());
        info!(device = %device_id, ?profile, "Profile updated");

        if let Some(attempt) = handle.attempt.take() {
            debug!(device = %device_id, "Stopping auto-start for the new profile");
            attempt.stop().await;
        }

        let online = handle.state.borrow().availability == Availability::Online;
        if online {
            handle.miner.apply_profile(&profile).await?;
        }
        Ok(())
    }

    /// Send an operator command to a device.
    pub async fn issue_control(
        &self,
        device_id: &str,
        action: ControlAction,
    ) -> Result<(), MonitorError> {
        let handle = self.devices.get(device_id).ok_or_else(|| unknown(device_id))?;
        info!(device = %device_id, %action, "Issuing control action");

        match action {
            ControlAction::Start => {
                let profile = handle.profile.borrow().clone();
                handle.miner.start_hashing(&profile).await?;
            }
            ControlAction::Stop => {
                handle.miner.hash_power_off().await?;
            }
            ControlAction::Reboot => {
                handle.miner.reboot().await?;
            }
            ControlAction::SoftShutdown => {
                handle.miner.soft_off().await?;
            }
        }
        Ok(())
    }

    /// Stop every poll loop and wait for them to finish.
    pub async fn shutdown(self) {
        info!(devices = self.devices.len(), "Shutting down monitor");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

fn unknown(device_id: &str) -> MonitorError {
    MonitorError::UnknownDevice {
        device_id: device_id.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ApiError, ValidationError};
    use crate::miners::api::rpc::Command;
    use crate::miners::backends::avalon::tests::{ERROR, ScriptedApi};
    use std::str::FromStr;

    fn scripted(api: ScriptedApi) -> (AvalonMiner, Arc<ScriptedApi>) {
        let api = Arc::new(api);
        let miner = AvalonMiner::with_api("10.0.0.9".parse().unwrap(), 4028, api.clone());
        (miner, api)
    }

    fn manual() -> Profile {
        Profile {
            auto_start: false,
            ..Profile::default()
        }
    }

    async fn wait_online(events: &mut mpsc::UnboundedReceiver<MonitorEvent>) {
        while let Some(event) = events.recv().await {
            if let MonitorEvent::SnapshotReady { .. } = event {
                return;
            }
        }
    }

    #[test]
    fn control_actions_parse_from_cli_names() {
        assert_eq!(ControlAction::from_str("start"), Ok(ControlAction::Start));
        assert_eq!(
            ControlAction::from_str("soft-shutdown"),
            Ok(ControlAction::SoftShutdown)
        );
        assert_eq!(ControlAction::from_str("REBOOT"), Ok(ControlAction::Reboot));
        assert!(ControlAction::from_str("explode").is_err());
        assert_eq!(Availability::Offline.to_string(), "offline");
    }

    #[tokio::test(start_paused = true)]
    async fn new_device_starts_unknown() {
        let (mut monitor, _events) = Monitor::new(PollSettings::default());
        let (miner, _) = scripted(ScriptedApi::healthy());

        monitor.add_device("a", miner, manual()).unwrap();

        assert_eq!(monitor.get_availability("a"), Some(Availability::Unknown));
        assert_eq!(monitor.get_latest_snapshot("a"), None);
        assert_eq!(monitor.get_availability("b"), None);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_duplicates_and_invalid_profiles() {
        let (mut monitor, _events) = Monitor::new(PollSettings::default());
        monitor
            .add_device("a", scripted(ScriptedApi::healthy()).0, manual())
            .unwrap();

        assert_eq!(
            monitor.add_device("a", scripted(ScriptedApi::healthy()).0, manual()),
            Err(MonitorError::DuplicateDevice {
                device_id: "a".into()
            })
        );

        let bad = Profile {
            voltage: 61,
            ..manual()
        };
        assert!(matches!(
            monitor.add_device("b", scripted(ScriptedApi::healthy()).0, bad),
            Err(MonitorError::Validation(ValidationError::VoltageOutOfRange { .. }))
        ));
        assert_eq!(monitor.device_ids().count(), 1);
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_readable_once_polled() {
        let (mut monitor, _events) = Monitor::new(PollSettings::default());
        monitor
            .add_device("a", scripted(ScriptedApi::healthy()).0, manual())
            .unwrap();

        let mut state = monitor.subscribe("a").unwrap();
        state
            .wait_for(|s| s.availability == Availability::Online)
            .await
            .unwrap();

        assert_eq!(monitor.get_availability("a"), Some(Availability::Online));
        let snapshot = monitor.get_latest_snapshot("a").unwrap();
        assert_eq!(snapshot.device_info.model.as_deref(), Some("Nano3"));
        assert!(snapshot.energy_consumed.is_some());
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn new_profile_is_pushed_to_online_device() {
        let (mut monitor, mut events) = Monitor::new(PollSettings::default());
        let (miner, api) = scripted(ScriptedApi::healthy());
        monitor.add_device("a", miner, manual()).unwrap();
        wait_online(&mut events).await;

        let profile = Profile {
            frequencies: [300, 312, 325, 337],
            voltage: 20,
            ..manual()
        };
        monitor
            .set_configuration("a", profile.clone())
            .await
            .unwrap();

        let sent = api.sent();
        assert_eq!(
            &sent[sent.len() - 2..],
            &[
                Command::SetVoltage(20),
                Command::SetFrequency {
                    zones: [300, 312, 325, 337],
                    board: 0
                }
            ]
        );
        assert_eq!(monitor.get_configuration("a"), Some(profile));
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn profile_change_mid_attempt_is_not_overwritten() {
        let (mut monitor, mut events) = Monitor::new(PollSettings::default());
        let api = ScriptedApi::healthy()
            .with_delay(Command::Estats, Duration::from_secs(20))
            .with_delay(Command::SetVoltage(25), Duration::from_secs(50));
        let (miner, api) = scripted(api);
        monitor.add_device("a", miner, Profile::default()).unwrap();

        // online at 20s, the attempt is stuck pushing voltage 25 and the
        // second poll is in flight
        tokio::time::sleep(Duration::from_secs(65)).await;
        let profile = Profile {
            frequencies: [400, 408, 412, 416],
            voltage: 30,
            ..Profile::default()
        };
        monitor
            .set_configuration("a", profile.clone())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        let pushed: Vec<Command> = api.sent().into_iter().filter(|c| !c.is_query()).collect();
        assert_eq!(
            pushed,
            vec![
                Command::enable_fan(),
                Command::SetVoltage(25),
                Command::SetVoltage(30),
                Command::SetFrequency {
                    zones: [400, 408, 412, 416],
                    board: 0
                },
            ]
        );
        assert_eq!(monitor.get_configuration("a"), Some(profile));

        let mut finished = None;
        while let Ok(event) = events.try_recv() {
            if let MonitorEvent::AutoStartFinished { outcome, .. } = event {
                finished = Some(outcome);
            }
        }
        assert_eq!(
            finished,
            Some(AutoStartOutcome::Abandoned(AbandonReason::Cancelled {
                phase: AutoStartPhase::PushingVoltage
            }))
        );
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_profile_is_neither_stored_nor_sent() {
        let (mut monitor, mut events) = Monitor::new(PollSettings::default());
        let (miner, api) = scripted(ScriptedApi::healthy());
        monitor.add_device("a", miner, manual()).unwrap();
        wait_online(&mut events).await;
        let before = api.sent().len();

        let result = monitor
            .set_configuration(
                "a",
                Profile {
                    frequencies: [350, 337, 325, 312],
                    ..manual()
                },
            )
            .await;

        assert_eq!(
            result,
            Err(MonitorError::Validation(ValidationError::NotAscending {
                zones: [350, 337, 325, 312]
            }))
        );
        assert_eq!(api.sent().len(), before);
        assert_eq!(monitor.get_configuration("a"), Some(manual()));
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn profile_for_offline_device_is_only_stored() {
        let (mut monitor, mut events) = Monitor::new(PollSettings::default());
        let api = ScriptedApi::healthy();
        api.set_reachable(false);
        let (miner, api) = scripted(api);
        monitor.add_device("a", miner, manual()).unwrap();
        events.recv().await;

        monitor
            .set_configuration("a", Profile { voltage: 10, ..manual() })
            .await
            .unwrap();

        assert!(api.sent().is_empty());
        assert_eq!(monitor.get_configuration("a").map(|p| p.voltage), Some(10));
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn control_actions_map_to_commands() {
        let (mut monitor, _events) = Monitor::new(PollSettings::default());
        let (miner, api) = scripted(ScriptedApi::healthy());
        monitor.add_device("a", miner, manual()).unwrap();

        for action in [
            ControlAction::Stop,
            ControlAction::Reboot,
            ControlAction::SoftShutdown,
        ] {
            monitor.issue_control("a", action).await.unwrap();
        }
        let controls: Vec<Command> = api.sent().into_iter().filter(|c| !c.is_query()).collect();
        assert_eq!(
            controls,
            vec![Command::HashPowerOff, Command::Reboot, Command::SoftOff]
        );
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_control_surfaces_command_error() {
        let (mut monitor, _events) = Monitor::new(PollSettings::default());
        let (miner, _) = scripted(ScriptedApi::healthy().with(Command::Reboot, Ok(ERROR)));
        monitor.add_device("a", miner, manual()).unwrap();

        let result = monitor.issue_control("a", ControlAction::Reboot).await;
        assert!(matches!(
            result,
            Err(MonitorError::Api(ApiError::Command(ref e))) if e.code == 45
        ));
        assert_eq!(
            monitor.issue_control("zz", ControlAction::Reboot).await,
            Err(MonitorError::UnknownDevice {
                device_id: "zz".into()
            })
        );
        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn removed_device_is_no_longer_polled() {
        let (mut monitor, mut events) = Monitor::new(PollSettings::default());
        let (miner, api) = scripted(ScriptedApi::healthy());
        monitor.add_device("a", miner, manual()).unwrap();
        wait_online(&mut events).await;

        monitor.remove_device("a").await.unwrap();
        let polled = api.sent().len();
        tokio::time::sleep(Duration::from_secs(300)).await;

        assert_eq!(api.sent().len(), polled);
        assert_eq!(monitor.get_availability("a"), None);
        assert_eq!(
            monitor.remove_device("a").await,
            Err(MonitorError::UnknownDevice {
                device_id: "a".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_auto_start() {
        let idle = "STATUS=S,When=1,Code=11,Msg=Summary|SUMMARY,Elapsed=5,MHS 30s=0.00|";
        let (mut monitor, mut events) = Monitor::new(PollSettings::default());
        let (miner, _) = scripted(ScriptedApi::healthy().with(Command::Summary, Ok(idle)));
        monitor.add_device("a", miner, Profile::default()).unwrap();
        wait_online(&mut events).await;

        monitor.shutdown().await;

        assert!(matches!(
            events.recv().await,
            Some(MonitorEvent::AutoStartFinished {
                outcome: AutoStartOutcome::Abandoned(AbandonReason::Cancelled { .. }),
                ..
            })
        ));
    }
}
