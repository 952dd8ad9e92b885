//! Client for the Buttplug v3 JSON protocol spoken by Intiface Central.
//!
//! Every frame on the socket is a JSON array of single-key objects. Requests
//! carry a nonzero `Id` that the server echoes in its reply; server-initiated
//! events (device added/removed, scanning finished) use `Id` 0.

use crate::hub::{DeviceHub, HubConnector, HubError};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use motion::registry::{Capabilities, Capability, DeviceIndex, DeviceInfo};
use motion::task_group::TaskGroup;
use motion::traits::{Actuator, ActuatorError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub const MESSAGE_VERSION: u32 = 3;
/// Replies slower than this fail the request.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all_fields = "PascalCase")]
pub enum ClientMessage {
    RequestServerInfo {
        id: u32,
        client_name: String,
        message_version: u32,
    },
    Ping {
        id: u32,
    },
    StartScanning {
        id: u32,
    },
    StopScanning {
        id: u32,
    },
    RequestDeviceList {
        id: u32,
    },
    LinearCmd {
        id: u32,
        device_index: DeviceIndex,
        vectors: Vec<LinearVector>,
    },
    ScalarCmd {
        id: u32,
        device_index: DeviceIndex,
        scalars: Vec<ScalarValue>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinearVector {
    pub index: u32,
    /// Milliseconds.
    pub duration: u64,
    pub position: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalarValue {
    pub index: u32,
    pub scalar: f64,
    pub actuator_type: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all_fields = "PascalCase")]
pub enum ServerMessage {
    Ok {
        id: u32,
    },
    Error {
        id: u32,
        error_message: String,
        error_code: i64,
    },
    ServerInfo {
        id: u32,
        #[serde(default)]
        server_name: String,
        message_version: u32,
        #[serde(default)]
        max_ping_time: u64,
    },
    DeviceList {
        id: u32,
        devices: Vec<DeviceRecord>,
    },
    DeviceAdded {
        id: u32,
        #[serde(flatten)]
        device: DeviceRecord,
    },
    DeviceRemoved {
        id: u32,
        device_index: DeviceIndex,
    },
    ScanningFinished {
        id: u32,
    },
}

impl ServerMessage {
    pub fn id(&self) -> u32 {
        match self {
            ServerMessage::Ok { id }
            | ServerMessage::Error { id, .. }
            | ServerMessage::ServerInfo { id, .. }
            | ServerMessage::DeviceList { id, .. }
            | ServerMessage::DeviceAdded { id, .. }
            | ServerMessage::DeviceRemoved { id, .. }
            | ServerMessage::ScanningFinished { id } => *id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceRecord {
    pub device_name: String,
    pub device_index: DeviceIndex,
    #[serde(default)]
    pub device_messages: DeviceMessages,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMessages {
    #[serde(default)]
    pub linear_cmd: Vec<ActuatorAttributes>,
    #[serde(default)]
    pub scalar_cmd: Vec<ActuatorAttributes>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActuatorAttributes {
    #[serde(default)]
    pub actuator_type: String,
    #[serde(default)]
    pub step_count: u32,
}

/// What a device can be told to do, by feature index.
#[derive(Debug, Clone, PartialEq)]
struct HubDevice {
    info: DeviceInfo,
    linear: Vec<u32>,
    vibrators: Vec<u32>,
}

impl From<&DeviceRecord> for HubDevice {
    fn from(record: &DeviceRecord) -> Self {
        let linear: Vec<u32> = (0..record.device_messages.linear_cmd.len() as u32).collect();
        let vibrators: Vec<u32> = record
            .device_messages
            .scalar_cmd
            .iter()
            .enumerate()
            .filter(|(_, a)| a.actuator_type == "Vibrate")
            .map(|(i, _)| i as u32)
            .collect();
        let capabilities = Capabilities::new(!linear.is_empty(), !vibrators.is_empty());
        Self {
            info: DeviceInfo::new(record.device_index, record.device_name.clone(), capabilities),
            linear,
            vibrators,
        }
    }
}

pub fn encode(message: &ClientMessage) -> Result<String, HubError> {
    serde_json::to_string(&[message]).map_err(|e| HubError::Protocol(e.to_string()))
}

/// Split a frame into its messages. Unknown message types are skipped.
pub fn decode(text: &str) -> Result<Vec<ServerMessage>, HubError> {
    let items: Vec<Value> =
        serde_json::from_str(text).map_err(|e| HubError::Protocol(e.to_string()))?;
    Ok(items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<ServerMessage>(item.clone()) {
            Ok(msg) => Some(msg),
            Err(_) => {
                debug!(%item, "ignoring server message");
                None
            }
        })
        .collect())
}

type Reply = Result<ServerMessage, HubError>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State reachable from both the socket tasks and the request side.
struct Shared {
    next_id: AtomicU32,
    pending: Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
    devices: Mutex<BTreeMap<DeviceIndex, HubDevice>>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn next_id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn dispatch(&self, text: &str) {
        let messages = match decode(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "bad frame from device server");
                return;
            }
        };
        for msg in messages {
            match &msg {
                ServerMessage::DeviceAdded { device, .. } => {
                    info!(device = device.device_index, name = %device.device_name, "device added");
                    lock(&self.devices).insert(device.device_index, HubDevice::from(device));
                }
                ServerMessage::DeviceRemoved { device_index, .. } => {
                    info!(device = device_index, "device removed");
                    lock(&self.devices).remove(device_index);
                }
                ServerMessage::DeviceList { devices, .. } => {
                    *lock(&self.devices) = devices
                        .iter()
                        .map(|d| (d.device_index, HubDevice::from(d)))
                        .collect();
                }
                ServerMessage::ScanningFinished { .. } => debug!("scanning finished"),
                _ => {}
            }
            let id = msg.id();
            if id != 0 {
                if let Some(tx) = lock(&self.pending).remove(&id) {
                    let _ = tx.send(Ok(msg));
                }
            }
        }
    }

    fn close(&self) {
        self.closed.send_replace(true);
        for (_, tx) in lock(&self.pending).drain() {
            let _ = tx.send(Err(HubError::Closed));
        }
    }

    fn device(&self, index: DeviceIndex) -> Option<HubDevice> {
        lock(&self.devices).get(&index).cloned()
    }
}

/// A live Intiface connection.
pub struct IntifaceHub {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Message>,
    tasks: Mutex<Option<TaskGroup>>,
}

impl IntifaceHub {
    /// Connect, handshake and fetch the initial device list.
    pub async fn connect(url: &str, client_name: &str) -> Result<Arc<Self>, HubError> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| HubError::Connect(e.to_string()))?;
        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Message>();
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            next_id: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            devices: Mutex::new(BTreeMap::new()),
            closed,
        });

        let mut tasks = TaskGroup::new();
        let writer_shared = shared.clone();
        tasks.spawn("intiface-writer", async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    warn!(error = %e, "device server write failed");
                    break;
                }
            }
            writer_shared.close();
        });
        let reader_shared = shared.clone();
        tasks.spawn("intiface-reader", async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => reader_shared.dispatch(text.as_str()),
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "device server read failed");
                        break;
                    }
                }
            }
            reader_shared.close();
        });

        let hub = Arc::new(Self {
            shared,
            outgoing,
            tasks: Mutex::new(Some(tasks)),
        });

        let info = hub
            .request(|id| ClientMessage::RequestServerInfo {
                id,
                client_name: client_name.to_string(),
                message_version: MESSAGE_VERSION,
            })
            .await?;
        let ServerMessage::ServerInfo {
            server_name,
            message_version,
            max_ping_time,
            ..
        } = info
        else {
            return Err(HubError::Protocol(format!("expected ServerInfo, got {info:?}")));
        };
        info!(url, server = %server_name, version = message_version, "connected to device server");
        if max_ping_time > 0 {
            hub.start_pinger(Duration::from_millis(max_ping_time / 2));
        }

        hub.refresh_devices().await?;
        Ok(hub)
    }

    fn start_pinger(&self, every: Duration) {
        let shared = self.shared.clone();
        let outgoing = self.outgoing.clone();
        let ping = async move {
            let mut tick = tokio::time::interval(every.max(Duration::from_millis(50)));
            loop {
                tick.tick().await;
                let msg = ClientMessage::Ping {
                    id: shared.next_id(),
                };
                let Ok(text) = encode(&msg) else { break };
                if outgoing.send(Message::text(text)).is_err() {
                    break;
                }
            }
        };
        if let Some(tasks) = lock(&self.tasks).as_mut() {
            tasks.spawn("intiface-ping", ping);
        }
    }

    /// Send a request and wait for the reply carrying the same Id.
    async fn request(&self, build: impl FnOnce(u32) -> ClientMessage) -> Result<ServerMessage, HubError> {
        let id = self.shared.next_id();
        let text = encode(&build(id))?;
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(id, tx);
        if *self.shared.closed.borrow() || self.outgoing.send(Message::text(text)).is_err() {
            lock(&self.shared.pending).remove(&id);
            return Err(HubError::Closed);
        }

        let reply = match timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply?,
            Ok(Err(_)) => return Err(HubError::Closed),
            Err(_) => {
                lock(&self.shared.pending).remove(&id);
                return Err(HubError::Timeout);
            }
        };
        match reply {
            ServerMessage::Error {
                error_code,
                error_message,
                ..
            } => Err(HubError::Server {
                code: error_code,
                message: error_message,
            }),
            other => Ok(other),
        }
    }

    async fn expect_ok(&self, build: impl FnOnce(u32) -> ClientMessage) -> Result<(), HubError> {
        match self.request(build).await? {
            ServerMessage::Ok { .. } => Ok(()),
            other => Err(HubError::Protocol(format!("expected Ok, got {other:?}"))),
        }
    }

    async fn refresh_devices(&self) -> Result<(), HubError> {
        match self.request(|id| ClientMessage::RequestDeviceList { id }).await? {
            ServerMessage::DeviceList { .. } => Ok(()),
            other => Err(HubError::Protocol(format!("expected DeviceList, got {other:?}"))),
        }
    }

    fn device_with(&self, index: DeviceIndex, capability: Capability) -> Result<HubDevice, ActuatorError> {
        let device = self
            .shared
            .device(index)
            .ok_or(ActuatorError::UnknownDevice(index))?;
        if !device.info.has(capability) {
            return Err(ActuatorError::Unsupported {
                device: index,
                capability,
            });
        }
        Ok(device)
    }
}

#[async_trait]
impl Actuator for IntifaceHub {
    async fn set_position(
        &self,
        device: DeviceIndex,
        position: f64,
        duration: Duration,
    ) -> Result<(), ActuatorError> {
        let target = self.device_with(device, Capability::Piston)?;
        let position = position.clamp(0.0, 1.0);
        let duration = duration.as_millis() as u64;
        let vectors: Vec<LinearVector> = target
            .linear
            .iter()
            .map(|&index| LinearVector {
                index,
                duration,
                position,
            })
            .collect();
        self.expect_ok(|id| ClientMessage::LinearCmd {
            id,
            device_index: device,
            vectors,
        })
        .await?;
        Ok(())
    }

    async fn set_intensity(&self, device: DeviceIndex, level: f64) -> Result<(), ActuatorError> {
        let target = self.device_with(device, Capability::Vibe)?;
        let scalar = level.clamp(0.0, 1.0);
        let scalars: Vec<ScalarValue> = target
            .vibrators
            .iter()
            .map(|&index| ScalarValue {
                index,
                scalar,
                actuator_type: "Vibrate".into(),
            })
            .collect();
        self.expect_ok(|id| ClientMessage::ScalarCmd {
            id,
            device_index: device,
            scalars,
        })
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceHub for IntifaceHub {
    async fn start_scanning(&self) -> Result<(), HubError> {
        self.expect_ok(|id| ClientMessage::StartScanning { id }).await
    }

    async fn stop_scanning(&self) -> Result<(), HubError> {
        self.expect_ok(|id| ClientMessage::StopScanning { id }).await
    }

    async fn devices(&self) -> Result<Vec<DeviceInfo>, HubError> {
        self.refresh_devices().await?;
        Ok(lock(&self.shared.devices)
            .values()
            .map(|d| d.info.clone())
            .collect())
    }

    async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    async fn disconnect(&self) {
        let _ = self.outgoing.send(Message::Close(None));
        let _ = timeout(Duration::from_secs(1), self.closed()).await;
        let tasks = lock(&self.tasks).take();
        if let Some(tasks) = tasks {
            tasks.shutdown().await;
        }
        self.shared.close();
        info!("disconnected from device server");
    }

    fn into_actuator(self: Arc<Self>) -> Arc<dyn Actuator> {
        self
    }
}

/// Connects to an Intiface server at a fixed websocket URL.
#[derive(Clone, Debug)]
pub struct IntifaceConnector {
    url: String,
    client_name: String,
}

impl IntifaceConnector {
    pub fn new(url: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client_name: client_name.into(),
        }
    }
}

#[async_trait]
impl HubConnector for IntifaceConnector {
    async fn connect(&self) -> Result<Arc<dyn DeviceHub>, HubError> {
        let hub = IntifaceHub::connect(&self.url, &self.client_name).await?;
        Ok(hub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_are_wrapped_in_an_array() {
        let text = encode(&ClientMessage::LinearCmd {
            id: 4,
            device_index: 1,
            vectors: vec![LinearVector {
                index: 0,
                duration: 500,
                position: 0.8,
            }],
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!([{"LinearCmd": {"Id": 4, "DeviceIndex": 1, "Vectors": [
                {"Index": 0, "Duration": 500, "Position": 0.8}
            ]}}])
        );
    }

    #[test]
    fn handshake_request_shape() {
        let text = encode(&ClientMessage::RequestServerInfo {
            id: 1,
            client_name: "bridge".into(),
            message_version: MESSAGE_VERSION,
        })
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!([{"RequestServerInfo": {"Id": 1, "ClientName": "bridge", "MessageVersion": 3}}])
        );
    }

    #[test]
    fn unknown_messages_are_skipped() {
        let text = json!([
            {"Ok": {"Id": 2}},
            {"SensorReading": {"Id": 0}},
            {"DeviceRemoved": {"Id": 0, "DeviceIndex": 3}}
        ])
        .to_string();
        assert_eq!(
            decode(&text).unwrap(),
            vec![
                ServerMessage::Ok { id: 2 },
                ServerMessage::DeviceRemoved {
                    id: 0,
                    device_index: 3
                }
            ]
        );
    }

    #[test]
    fn capabilities_follow_advertised_messages() {
        let added = json!([{"DeviceAdded": {
            "Id": 0,
            "DeviceName": "Combo",
            "DeviceIndex": 5,
            "DeviceMessages": {
                "LinearCmd": [{"StepCount": 100, "ActuatorType": "Position"}],
                "ScalarCmd": [
                    {"StepCount": 20, "ActuatorType": "Rotate"},
                    {"StepCount": 20, "ActuatorType": "Vibrate"}
                ],
                "StopDeviceCmd": {}
            }
        }}])
        .to_string();
        let msgs = decode(&added).unwrap();
        let ServerMessage::DeviceAdded { device, .. } = &msgs[0] else {
            panic!("not a DeviceAdded: {msgs:?}");
        };
        let hub_device = HubDevice::from(device);
        assert_eq!(hub_device.info.capabilities, Capabilities::BOTH);
        assert_eq!(hub_device.linear, vec![0]);
        assert_eq!(hub_device.vibrators, vec![1]);
    }

    #[test]
    fn scalar_only_rotator_is_not_a_vibrator() {
        let record = DeviceRecord {
            device_name: "spinner".into(),
            device_index: 0,
            device_messages: DeviceMessages {
                linear_cmd: vec![],
                scalar_cmd: vec![ActuatorAttributes {
                    actuator_type: "Rotate".into(),
                    step_count: 10,
                }],
            },
        };
        assert!(HubDevice::from(&record).info.capabilities.is_empty());
    }
}
