//! # Device Transport Module
//!
//! The link to a sensor device, behind the `SensorLink` trait so the rest
//! of the application does not care whether frames come from a real radio
//! or the simulated device.
//!
//! ## Implementations
//! - `BleLink`: discovers a device with an inclusive scan filter, takes the
//!   first readable-or-notifiable characteristic as the data channel, and
//!   forwards notification payloads (or polled reads) as raw frames.
//! - `SimulatedLink`: synthesizes one plausible JSON frame per acquisition
//!   interval and answers on-board file commands from a canned catalog.
//!   This is the documented fallback when no transport is available, so
//!   every flow works headlessly.
//!
//! Both directions of the data channel carry UTF-8 JSON text.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::ConnectionError;
use crate::telemetry::{now_ms, DeviceInfo, SensorFile};

/// A live link to a sensor device.
#[async_trait]
pub trait SensorLink: Send + Sync {
    /// Identity of the attached device.
    fn info(&self) -> DeviceInfo;

    /// Forward raw data frames into `frames` until the stop flag is set or
    /// the receiver goes away. Returning ends the stream for good.
    async fn stream(&self, frames: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>);

    /// Write a command payload to the data channel and read the reply.
    async fn request(&self, payload: &[u8]) -> Result<Vec<u8>, ConnectionError>;

    /// Tear the link down.
    async fn close(&self);
}

/// Command written to a device's data channel.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceCommand {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

impl DeviceCommand {
    pub fn list_files() -> Self {
        Self { command: "list_files".to_string(), filename: None }
    }

    pub fn download(filename: &str) -> Self {
        Self { command: "download_file".to_string(), filename: Some(filename.to_string()) }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Commands are plain structs; serialization cannot fail
        serde_json::to_vec(self).expect("command serialization")
    }
}

/// Reply to a `list_files` command.
#[derive(Debug, Deserialize)]
pub struct FileListReply {
    #[serde(default)]
    pub files: Vec<SensorFile>,
}

/// Completes once the stop flag is set, checking every 100 ms.
pub(crate) async fn wait_for_stop(stop: &AtomicBool) {
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// ---------------------------------------------------------------------------
// BLE transport
// ---------------------------------------------------------------------------

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Manager, Peripheral};
use futures_util::StreamExt;

pub struct BleLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
    info: DeviceInfo,
    notifiable: bool,
    poll_interval: Duration,
}

impl BleLink {
    /// Scan for a sensor-capable device and negotiate a data channel.
    ///
    /// Uses an inclusive filter (any advertising device is a candidate) and
    /// selects the first characteristic that can be read or notified. When
    /// the channel only supports reads, frames are polled at
    /// `poll_interval_ms` instead of pushed.
    pub async fn discover(scan_seconds: u64, poll_interval_ms: u64) -> Result<Self, ConnectionError> {
        let manager = Manager::new()
            .await
            .map_err(|e| ConnectionError::ScanFailed(e.to_string()))?;

        let adapters = manager
            .adapters()
            .await
            .map_err(|e| ConnectionError::ScanFailed(e.to_string()))?;

        let central = adapters.into_iter().next().ok_or(ConnectionError::NoAdapter)?;

        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ConnectionError::ScanFailed(e.to_string()))?;

        tokio::time::sleep(Duration::from_secs(scan_seconds)).await;

        central
            .stop_scan()
            .await
            .map_err(|e| ConnectionError::ScanFailed(e.to_string()))?;

        let peripherals = central
            .peripherals()
            .await
            .map_err(|e| ConnectionError::ScanFailed(e.to_string()))?;

        let peripheral = peripherals
            .into_iter()
            .next()
            .ok_or_else(|| ConnectionError::ScanFailed("no devices discovered".to_string()))?;

        let device_id = peripheral.address().to_string();
        let name = match peripheral.properties().await {
            Ok(Some(props)) => props.local_name.unwrap_or_else(|| "Unknown Device".to_string()),
            _ => "Unknown Device".to_string(),
        };
        log::info!("Connecting to {} ({})", name, device_id);

        peripheral.connect().await.map_err(|e| ConnectionError::DeviceConnection {
            device_id: device_id.clone(),
            reason: e.to_string(),
        })?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| ConnectionError::DeviceConnection {
                device_id: device_id.clone(),
                reason: e.to_string(),
            })?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| {
                c.properties.contains(CharPropFlags::READ)
                    || c.properties.contains(CharPropFlags::NOTIFY)
            })
            .ok_or_else(|| ConnectionError::NoDataChannel { device_id: device_id.clone() })?;

        let notifiable = characteristic.properties.contains(CharPropFlags::NOTIFY);
        if notifiable {
            peripheral
                .subscribe(&characteristic)
                .await
                .map_err(|e| ConnectionError::DeviceConnection {
                    device_id: device_id.clone(),
                    reason: format!("subscribe failed: {}", e),
                })?;
        }
        log::debug!(
            "Data channel {} (notify: {})",
            characteristic.uuid,
            notifiable
        );

        Ok(Self {
            peripheral,
            characteristic,
            info: DeviceInfo { id: device_id, name },
            notifiable,
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }
}

#[async_trait]
impl SensorLink for BleLink {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    async fn stream(&self, frames: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>) {
        if self.notifiable {
            let mut notifications = match self.peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    log::error!("Could not open notification stream: {}", e);
                    return;
                }
            };

            loop {
                tokio::select! {
                    event = notifications.next() => match event {
                        Some(event) => {
                            if event.uuid != self.characteristic.uuid {
                                continue;
                            }
                            if frames.send(event.value).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            log::info!("Notification stream ended");
                            break;
                        }
                    },
                    _ = wait_for_stop(&stop) => {
                        log::debug!("BLE stream stopped");
                        break;
                    }
                }
            }
        } else {
            // Read-only channel: poll at the acquisition interval
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {
                        match self.peripheral.read(&self.characteristic).await {
                            Ok(value) => {
                                if frames.send(value).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => log::warn!("Characteristic read failed: {}", e),
                        }
                    }
                    _ = wait_for_stop(&stop) => break,
                }
            }
        }
    }

    async fn request(&self, payload: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        if !self.characteristic.properties.contains(CharPropFlags::WRITE) {
            return Err(ConnectionError::CommandFailed(
                "data channel is not writable".to_string(),
            ));
        }

        self.peripheral
            .write(&self.characteristic, payload, WriteType::WithResponse)
            .await
            .map_err(|e| ConnectionError::CommandFailed(e.to_string()))?;

        self.peripheral
            .read(&self.characteristic)
            .await
            .map_err(|e| ConnectionError::CommandFailed(e.to_string()))
    }

    async fn close(&self) {
        if self.notifiable {
            let _ = self.peripheral.unsubscribe(&self.characteristic).await;
        }
        if let Err(e) = self.peripheral.disconnect().await {
            log::warn!("BLE disconnect failed: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Simulated transport
// ---------------------------------------------------------------------------

pub struct SimulatedLink {
    info: DeviceInfo,
    serial: String,
    interval: Duration,
    catalog: Vec<(SensorFile, &'static str)>,
}

impl SimulatedLink {
    pub fn new(interval_ms: u64) -> Self {
        let serial = format!("SURF-001-{:06X}", rand::thread_rng().gen_range(0..=0xFF_FFFFu32));
        Self {
            info: DeviceInfo {
                id: "simulated-device".to_string(),
                name: "Simulated Surf Sensor".to_string(),
            },
            serial,
            interval: Duration::from_millis(interval_ms),
            catalog: vec![
                (
                    SensorFile {
                        name: "session_20250712.csv".to_string(),
                        size: 18_432,
                        last_modified: 1_752_300_000_000,
                    },
                    "timestamp,temperature,accel\n1752300000000,19.2,0.84\n",
                ),
                (
                    SensorFile {
                        name: "diagnostics.log".to_string(),
                        size: 2_048,
                        last_modified: 1_752_386_400_000,
                    },
                    "battery=87% firmware=2.4.1\n",
                ),
            ],
        }
    }

    /// One plausible frame: temperature is a base range plus a slow
    /// sinusoidal component, axis accelerations are uniform in [-1, 1].
    fn synth_frame(&self, rng: &mut StdRng) -> Vec<u8> {
        let now = now_ms();
        let temperature = 20.0 + rng.gen::<f64>() * 15.0 + (now as f64 / 10_000.0).sin() * 5.0;

        let frame = serde_json::json!({
            "serialNumber": self.serial,
            "temperature": temperature,
            "accel": {
                "x": rng.gen_range(-1.0..=1.0),
                "y": rng.gen_range(-1.0..=1.0),
                "z": rng.gen_range(-1.0..=1.0),
            },
            "gyro": {
                "x": rng.gen_range(-0.25..=0.25),
                "y": rng.gen_range(-0.25..=0.25),
                "z": rng.gen_range(-0.25..=0.25),
            },
        });
        frame.to_string().into_bytes()
    }
}

#[async_trait]
impl SensorLink for SimulatedLink {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    async fn stream(&self, frames: mpsc::Sender<Vec<u8>>, stop: Arc<AtomicBool>) {
        let mut rng = StdRng::from_entropy();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if frames.send(self.synth_frame(&mut rng)).await.is_err() {
                        break;
                    }
                }
                _ = wait_for_stop(&stop) => {
                    log::debug!("Simulated stream stopped");
                    break;
                }
            }
        }
    }

    async fn request(&self, payload: &[u8]) -> Result<Vec<u8>, ConnectionError> {
        let command: DeviceCommand = serde_json::from_slice(payload)
            .map_err(|e| ConnectionError::CommandFailed(format!("unparseable command: {}", e)))?;

        match command.command.as_str() {
            "list_files" => {
                let files: Vec<&SensorFile> = self.catalog.iter().map(|(file, _)| file).collect();
                Ok(serde_json::json!({ "files": files }).to_string().into_bytes())
            }
            "download_file" => {
                let wanted = command.filename.unwrap_or_default();
                self.catalog
                    .iter()
                    .find(|(file, _)| file.name == wanted)
                    .map(|(_, content)| content.as_bytes().to_vec())
                    .ok_or_else(|| {
                        ConnectionError::CommandFailed(format!("no such file: {}", wanted))
                    })
            }
            other => Err(ConnectionError::CommandFailed(format!("unknown command: {}", other))),
        }
    }

    async fn close(&self) {}
}
