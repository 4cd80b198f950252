//! # Connection Management Module
//!
//! Owns the link to a sensor device: discovery, attach, teardown, and the
//! on-board file operations that ride the same data channel.
//!
//! ## Fallback behavior
//! When no wireless transport is available, or negotiation fails at any
//! step, a simulated device attaches after a short fixed delay. This is
//! load-bearing application behavior, not an error path: every session
//! flow must work headlessly on machines without a usable radio.
//!
//! ## Invariants
//! - At most one link is attached; a second connect is a logged no-op.
//! - Every exit path from the connected state cancels the acquisition
//!   handle, so no timer or notification stream outlives the link.
//! - Disconnecting while recording finalizes the session through the
//!   normal stop path; there are no separate abort semantics.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::acquisition::{self, AcquisitionHandle, ReadingSink};
use crate::config::{ConnectionSettings, Transport};
use crate::device::{BleLink, DeviceCommand, FileListReply, SensorLink, SimulatedLink};
use crate::error::ConnectionError;
use crate::manager::SessionCore;
use crate::telemetry::SensorFile;

pub struct ConnectionManager {
    settings: ConnectionSettings,
    interval_ms: u64,
    data_dir: PathBuf,
    core: Arc<SessionCore>,
    link: Option<Arc<dyn SensorLink>>,
    acquisition: Option<AcquisitionHandle>,
    files: Vec<SensorFile>,
}

impl ConnectionManager {
    pub(crate) fn new(
        settings: ConnectionSettings,
        interval_ms: u64,
        data_dir: PathBuf,
        core: Arc<SessionCore>,
    ) -> Self {
        Self {
            settings,
            interval_ms,
            data_dir,
            core,
            link: None,
            acquisition: None,
            files: Vec::new(),
        }
    }

    /// Discover and attach a sensor device, then start the acquisition
    /// loop. Falls back to the simulated device whenever the real
    /// transport cannot deliver a link.
    pub async fn connect(&mut self) {
        if self.link.is_some() {
            log::warn!("Connect ignored: a device is already connected");
            return;
        }

        self.core.set_scanning(true);

        let link: Arc<dyn SensorLink> = match self.settings.transport {
            Transport::Auto => {
                match BleLink::discover(self.settings.scan_seconds, self.interval_ms).await {
                    Ok(ble) => Arc::new(ble),
                    Err(e) => {
                        log::warn!("Transport unavailable ({}), attaching simulated device", e);
                        self.simulated_fallback().await
                    }
                }
            }
            Transport::Simulated => {
                log::info!("Simulated transport configured, skipping device scan");
                self.simulated_fallback().await
            }
        };

        let info = link.info();
        log::info!("Sensor connected: {} ({})", info.name, info.id);
        self.core.attach_device(info);
        self.core.refresh_location().await;

        let sink: Arc<dyn ReadingSink> = self.core.clone();
        self.acquisition = Some(acquisition::spawn(link.clone(), sink));
        self.link = Some(link);
    }

    async fn simulated_fallback(&self) -> Arc<dyn SensorLink> {
        tokio::time::sleep(Duration::from_millis(self.settings.fallback_delay_ms)).await;
        Arc::new(SimulatedLink::new(self.interval_ms))
    }

    /// Tear the link down. An active recording runs the normal
    /// stop-recording path before the device detaches.
    pub async fn disconnect(&mut self) {
        if self.link.is_none() {
            log::debug!("Disconnect ignored: nothing connected");
            return;
        }

        // Stop acquisition first so no tick lands mid-teardown
        if let Some(handle) = self.acquisition.take() {
            handle.shutdown().await;
        }

        if self.core.is_recording() {
            log::info!("Disconnecting with an active session, finalizing first");
            self.core.stop_recording().await;
        }

        if let Some(link) = self.link.take() {
            link.close().await;
        }
        self.files.clear();
        self.core.set_disconnected();
        log::info!("Sensor disconnected");
    }

    /// Ask the device for its on-board file listing.
    pub async fn list_files(&mut self) -> Result<Vec<SensorFile>, ConnectionError> {
        let link = self.link.as_ref().ok_or(ConnectionError::NotConnected)?;

        let reply = link.request(&DeviceCommand::list_files().encode()).await?;
        let listing: FileListReply = serde_json::from_slice(&reply)
            .map_err(|e| ConnectionError::CommandFailed(format!("bad file list reply: {}", e)))?;

        self.files = listing.files.clone();
        Ok(listing.files)
    }

    /// Fetch one on-board file and save it under the data directory.
    pub async fn download_file(&self, name: &str) -> Result<PathBuf, ConnectionError> {
        let link = self.link.as_ref().ok_or(ConnectionError::NotConnected)?;

        let reply = link.request(&DeviceCommand::download(name).encode()).await?;

        // Only the final path component; device names never pick the directory
        let file_name = Path::new(name).file_name().ok_or_else(|| {
            ConnectionError::CommandFailed(format!("unusable file name: {}", name))
        })?;

        let dir = self.data_dir.join("downloads");
        fs::create_dir_all(&dir).map_err(|e| {
            ConnectionError::CommandFailed(format!("could not create download directory: {}", e))
        })?;

        let path = dir.join(file_name);
        fs::write(&path, &reply).map_err(|e| {
            ConnectionError::CommandFailed(format!("could not save {}: {}", path.display(), e))
        })?;

        log::info!("Downloaded {} ({} bytes)", path.display(), reply.len());
        Ok(path)
    }

    /// Most recent file listing fetched from the device.
    pub fn files(&self) -> &[SensorFile] {
        &self.files
    }
}
