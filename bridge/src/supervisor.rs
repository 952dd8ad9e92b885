//! Keeps the control loops running against whatever device connection is
//! currently available.
//!
//! One supervision cycle: connect, scan, bind devices, then run the loop
//! group until a member ends, the hub drops or shutdown is requested. The
//! whole group is torn down and rebuilt on every new connection.

use crate::hub::{DeviceHub, HubConnector, HubError};
use feed::{FeedListener, Ingress};
use motion::config::{ConfigError, ConfigStore};
use motion::loops::{ClimaxLoop, HOME, HOME_DURATION, IdleLoop, PistonLoop, PoseLoop, VibeLoop};
use motion::registry::{Bindings, Capability, DeviceIndex, DeviceInfo, Signal};
use motion::state::{ControlState, LinkStatus, pose_channel};
use motion::task_group::{TaskExit, TaskGroup};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub game_url: String,
    /// Scan window right after connecting.
    pub scan: Duration,
    /// Pause between background rescans.
    pub rescan: Duration,
    /// Scan window of a background rescan.
    pub rescan_window: Duration,
    /// Pause before reconnecting to the hub.
    pub retry: Duration,
    /// Pause before reconnecting to the game.
    pub feed_retry: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            game_url: "ws://localhost:11451/ws".into(),
            scan: Duration::from_secs(3),
            rescan: Duration::from_secs(10),
            rescan_window: Duration::from_secs(2),
            retry: Duration::from_secs(3),
            feed_retry: feed::listener::RETRY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CycleEnd {
    Shutdown,
    Restart,
}

pub struct Supervisor<C> {
    connector: C,
    state: Arc<ControlState>,
    store: Arc<dyn ConfigStore>,
    config: SupervisorConfig,
    hub_status: watch::Sender<LinkStatus>,
    feed_status: watch::Sender<LinkStatus>,
}

impl<C: HubConnector> Supervisor<C> {
    pub fn new(
        connector: C,
        state: Arc<ControlState>,
        store: Arc<dyn ConfigStore>,
        config: SupervisorConfig,
    ) -> Self {
        let (hub_status, _) = watch::channel(LinkStatus::Waiting);
        let (feed_status, _) = watch::channel(LinkStatus::Waiting);
        Self {
            connector,
            state,
            store,
            config,
            hub_status,
            feed_status,
        }
    }

    pub fn hub_status(&self) -> watch::Receiver<LinkStatus> {
        self.hub_status.subscribe()
    }

    pub fn feed_status(&self) -> watch::Receiver<LinkStatus> {
        self.feed_status.subscribe()
    }

    /// Run until shutdown is requested, then save the settings.
    pub async fn run(self) -> Result<(), ConfigError> {
        let mut retrying = false;
        // Selection to restore on the next connection.
        let mut chosen = Bindings::default();
        while !self.state.is_shutting_down() {
            if !retrying {
                self.hub_status.send_replace(LinkStatus::Connecting);
            }
            match self.cycle(chosen).await {
                Ok(CycleEnd::Shutdown) => break,
                Ok(CycleEnd::Restart) => {}
                Err(e) => warn!(error = %e, "device server unavailable"),
            }

            let last = self.state.edit_registry(|r| {
                let bindings = (!r.is_empty()).then(|| r.bindings());
                r.clear();
                bindings
            });
            if let Some(last) = last {
                chosen = last;
            }
            self.state.reset_modes();
            self.state.set_pose_homing(false);
            if self.state.is_shutting_down() {
                break;
            }
            retrying = true;
            self.hub_status.send_replace(LinkStatus::Retrying);
            self.feed_status.send_replace(LinkStatus::Waiting);
            tokio::select! {
                _ = sleep(self.config.retry) => {}
                _ = self.state.shutdown_requested() => break,
            }
        }

        self.hub_status.send_replace(LinkStatus::Stopped);
        self.feed_status.send_replace(LinkStatus::Stopped);
        let settings = self.state.config();
        self.store.save(&settings)
    }

    async fn cycle(&self, chosen: Bindings) -> Result<CycleEnd, HubError> {
        let hub = tokio::select! {
            hub = self.connector.connect() => hub?,
            _ = self.state.shutdown_requested() => return Ok(CycleEnd::Shutdown),
        };
        let end = self.supervise(&hub, chosen).await;
        hub.disconnect().await;
        end
    }

    async fn supervise(
        &self,
        hub: &Arc<dyn DeviceHub>,
        chosen: Bindings,
    ) -> Result<CycleEnd, HubError> {
        scan(hub.as_ref(), self.config.scan, &self.hub_status).await?;
        let devices = hub.devices().await?;
        let known = install(&self.state, devices, Some(chosen), &self.hub_status);

        let actuator = hub.clone().into_actuator();
        let (poses, pose_events) = pose_channel();
        let state = &self.state;
        let mut group = TaskGroup::new();
        group.spawn("piston", PistonLoop::new(state.clone(), actuator.clone()).run());
        group.spawn("vibe", VibeLoop::new(state.clone(), actuator.clone()).run());
        group.spawn("pose", PoseLoop::new(state.clone(), actuator.clone(), pose_events).run());
        group.spawn("climax", ClimaxLoop::new(state.clone(), actuator.clone()).run());
        group.spawn("idle", IdleLoop::new(state.clone(), actuator.clone()).run());
        let listener = FeedListener::new(
            self.config.game_url.clone(),
            Ingress::new(state.clone(), poses),
            state.clone(),
        )
        .with_retry(self.config.feed_retry)
        .with_status(self.feed_status.clone());
        group.spawn("feed", listener.run());
        group.spawn(
            "rescan",
            rescan_periodically(
                hub.clone(),
                state.clone(),
                known,
                self.config.rescan,
                self.config.rescan_window,
                self.hub_status.clone(),
            ),
        );

        tokio::select! {
            exit = group.next_exit() => match exit {
                TaskExit::Finished(task) if !state.is_shutting_down() => {
                    warn!(task, "task ended, restarting");
                }
                TaskExit::Panicked(task) => error!(task, "task panicked, restarting"),
                TaskExit::Finished(_) => {}
            },
            _ = hub.closed() => warn!("device server connection lost"),
            _ = state.shutdown_requested() => {}
        }
        group.shutdown().await;

        if state.is_shutting_down() {
            park(state, actuator.as_ref()).await;
            return Ok(CycleEnd::Shutdown);
        }
        Ok(CycleEnd::Restart)
    }
}

async fn scan(
    hub: &dyn DeviceHub,
    window: Duration,
    status: &watch::Sender<LinkStatus>,
) -> Result<(), HubError> {
    status.send_replace(LinkStatus::Scanning);
    hub.start_scanning().await?;
    sleep(window).await;
    hub.stop_scanning().await
}

/// Rebuild the registry from `devices`, restore `chosen` (or the current
/// bindings) where possible, auto-pick the rest and publish the result.
/// Returns the raw index set for change detection.
fn install(
    state: &ControlState,
    devices: Vec<DeviceInfo>,
    chosen: Option<Bindings>,
    status: &watch::Sender<LinkStatus>,
) -> BTreeSet<DeviceIndex> {
    let indices: BTreeSet<DeviceIndex> = devices.iter().map(|d| d.index).collect();
    let (usable, bindings) = state.edit_registry(|r| {
        let previous = chosen.unwrap_or_else(|| r.bindings());
        r.rebuild(devices);
        r.auto_bind(previous);
        (r.devices().count(), r.bindings())
    });
    info!(
        usable,
        piston = ?bindings.piston,
        vibe = ?bindings.vibe,
        "devices bound"
    );
    publish(status, usable);
    indices
}

fn publish(status: &watch::Sender<LinkStatus>, usable: usize) {
    status.send_replace(if usable == 0 {
        LinkStatus::NoDevices
    } else {
        LinkStatus::Connected { devices: usable }
    });
}

async fn rescan_periodically(
    hub: Arc<dyn DeviceHub>,
    state: Arc<ControlState>,
    mut known: BTreeSet<DeviceIndex>,
    every: Duration,
    window: Duration,
    status: watch::Sender<LinkStatus>,
) {
    loop {
        sleep(every).await;
        let devices = match scan(hub.as_ref(), window, &status).await {
            Ok(()) => hub.devices().await,
            Err(e) => Err(e),
        };
        let devices = match devices {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "rescan failed");
                return;
            }
        };
        let indices: BTreeSet<DeviceIndex> = devices.iter().map(|d| d.index).collect();
        if indices != known {
            info!(?indices, "device list changed");
            known = install(&state, devices, None, &status);
        } else {
            publish(&status, state.with_registry(|r| r.devices().count()));
        }
    }
}

/// Leave the hardware at rest: stroke devices home, vibrators off.
async fn park(state: &ControlState, actuator: &dyn motion::Actuator) {
    let bound: Vec<DeviceInfo> = state.with_registry(|r| {
        [Signal::Piston, Signal::Vibe]
            .into_iter()
            .filter_map(|s| r.bound(s).cloned())
            .collect()
    });
    let mut seen = BTreeSet::new();
    for device in bound {
        if !seen.insert(device.index) {
            continue;
        }
        if device.has(Capability::Piston) {
            if let Err(e) = actuator.set_position(device.index, HOME, HOME_DURATION).await {
                warn!(device = device.index, error = %e, "could not home device");
            }
        }
        if device.has(Capability::Vibe) {
            if let Err(e) = actuator.set_intensity(device.index, 0.0).await {
                warn!(device = device.index, error = %e, "could not stop vibration");
            }
        }
    }
    info!("devices parked");
}
