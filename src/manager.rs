//! # Sensor Manager Module
//!
//! The single owned object the UI layer talks to. `SensorManager` composes
//! the connection manager, the session recorder, and the sync reconciler
//! around one shared core, and publishes state changes over a channel of
//! `SensorEvent` values so the embedding layer can render without polling.
//!
//! ## Why one owner
//! Connection and recording state are a single invariant (at most one
//! device, at most one active session). Holding both behind one core
//! object, passed explicitly to whoever needs it, keeps every transition
//! in one place instead of scattering it through ambient globals.

use crossbeam_channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::acquisition::ReadingSink;
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{ConnectionError, StoreError};
use crate::location::LocationSource;
use crate::remote::RemoteSessionStore;
use crate::session::SessionRecorder;
use crate::storage::{Store, HISTORICAL_SESSIONS_KEY, LOCAL_SESSIONS_KEY};
use crate::sync::{merge_sessions, SyncReconciler, RECENT_WINDOW};
use crate::telemetry::{
    ConnectionState, DeviceInfo, LocationFix, Reading, SensorFile, Session, SessionPoint,
};

/// State changes published to the embedding layer.
#[derive(Debug, Clone)]
pub enum SensorEvent {
    Connection(ConnectionState),
    Reading(Reading),
    RecordingStarted { session_id: String },
    SessionFinalized(Session),
    HistoryLoaded { recent: usize, pending: usize },
}

struct CoreState {
    connection: ConnectionState,
    current: Option<Reading>,
    last_fix: Option<LocationFix>,
    recent: Vec<Session>,
}

/// Shared state and collaborators behind the public facade. The
/// acquisition loop holds an `Arc` to this and feeds readings in; the
/// connection manager flips its link-state fields.
pub(crate) struct SessionCore {
    state: Mutex<CoreState>,
    store: Arc<dyn Store>,
    recorder: SessionRecorder,
    reconciler: SyncReconciler,
    remote: Option<Arc<dyn RemoteSessionStore>>,
    location: Arc<dyn LocationSource>,
    events: Sender<SensorEvent>,
}

impl SessionCore {
    fn new(
        store: Arc<dyn Store>,
        remote: Option<Arc<dyn RemoteSessionStore>>,
        location: Arc<dyn LocationSource>,
        events: Sender<SensorEvent>,
    ) -> Self {
        Self {
            state: Mutex::new(CoreState {
                connection: ConnectionState::default(),
                current: None,
                last_fix: None,
                recent: Vec::new(),
            }),
            recorder: SessionRecorder::new(store.clone(), remote.clone()),
            reconciler: SyncReconciler::new(store.clone(), remote.clone()),
            store,
            remote,
            location,
            events,
        }
    }

    // --- connection state, driven by the connection manager ---

    pub(crate) fn set_scanning(&self, scanning: bool) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.connection.is_scanning = scanning;
            state.connection.clone()
        };
        let _ = self.events.send(SensorEvent::Connection(snapshot));
    }

    pub(crate) fn attach_device(&self, device: DeviceInfo) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.connection = ConnectionState {
                is_scanning: false,
                is_connected: true,
                connected_device: Some(device),
            };
            state.connection.clone()
        };
        let _ = self.events.send(SensorEvent::Connection(snapshot));
    }

    pub(crate) fn set_disconnected(&self) {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            state.connection = ConnectionState::default();
            state.connection.clone()
        };
        let _ = self.events.send(SensorEvent::Connection(snapshot));
    }

    /// Capture a location fix if the source has one; keeps the previous
    /// fix otherwise.
    pub(crate) async fn refresh_location(&self) {
        if let Some(fix) = self.location.current_fix().await {
            self.state.lock().unwrap().last_fix = Some(fix);
        }
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    // --- recording ---

    pub(crate) async fn start_recording(&self) -> Option<String> {
        let (connected, fix) = {
            let state = self.state.lock().unwrap();
            (state.connection.is_connected, state.last_fix)
        };

        let session_id = self.recorder.start(connected, fix.as_ref()).await?;
        let _ = self
            .events
            .send(SensorEvent::RecordingStarted { session_id: session_id.clone() });
        Some(session_id)
    }

    pub(crate) async fn stop_recording(&self) -> Option<Session> {
        let (fix, device) = {
            let state = self.state.lock().unwrap();
            (state.last_fix, state.connection.connected_device.clone())
        };

        let session = self.recorder.stop(fix, device).await?;
        let _ = self.events.send(SensorEvent::SessionFinalized(session.clone()));
        Some(session)
    }

    // --- history ---

    fn emit_history(&self) {
        let recent = self.state.lock().unwrap().recent.len();
        let pending = self.recorder.pending_snapshot().len();
        let _ = self.events.send(SensorEvent::HistoryLoaded { recent, pending });
    }

    pub(crate) async fn load_history(&self) {
        // Local collections first so the caller reflects something
        // immediately; the remote fetch must never block this.
        let (durable, pending) = self.reconciler.load_local().await;
        self.recorder.set_pending(pending);
        {
            let mut state = self.state.lock().unwrap();
            let mut recent = merge_sessions(&durable, &[]);
            recent.truncate(RECENT_WINDOW);
            state.recent = recent;
        }
        self.emit_history();

        let remote_sessions = self.reconciler.fetch_remote().await;
        if !remote_sessions.is_empty() {
            let mut recent = merge_sessions(&remote_sessions, &durable);
            recent.truncate(RECENT_WINDOW);
            self.state.lock().unwrap().recent = recent;
            self.emit_history();
        }
    }

    pub(crate) async fn flush_pending(&self) -> Result<(), StoreError> {
        let pending = self.recorder.pending_snapshot();
        if pending.is_empty() {
            log::debug!("No pending sessions to flush");
            return Ok(());
        }

        let recent = self.reconciler.flush_pending_to_durable(&pending).await?;
        self.recorder.clear_pending();
        self.state.lock().unwrap().recent = recent;
        self.emit_history();
        Ok(())
    }

    pub(crate) async fn clear_all_data(&self) {
        if let Err(e) = self.store.remove(HISTORICAL_SESSIONS_KEY).await {
            log::warn!("Could not remove durable history: {}", e);
        }
        if let Err(e) = self.store.remove(LOCAL_SESSIONS_KEY).await {
            log::warn!("Could not remove pending sessions: {}", e);
        }
        self.recorder.reset();
        {
            let mut state = self.state.lock().unwrap();
            state.recent.clear();
            state.current = None;
        }
        self.emit_history();
    }
}

impl ReadingSink for SessionCore {
    /// One acquisition tick. The reading always becomes the live value;
    /// it joins the session buffer (with the latest fix) only while
    /// recording, and the buffer append happens before any remote write
    /// is even spawned.
    fn handle_reading(&self, reading: Reading) {
        let fix = {
            let mut state = self.state.lock().unwrap();
            state.current = Some(reading.clone());
            state.last_fix
        };
        let _ = self.events.send(SensorEvent::Reading(reading.clone()));

        let session_id = match self.recorder.active_session_id() {
            Some(id) => id,
            None => return,
        };

        let point = SessionPoint { reading, location: fix };
        self.recorder.append(point.clone());

        if let Some(remote) = &self.remote {
            let remote = remote.clone();
            tokio::spawn(async move {
                if let Err(e) = remote.submit_reading(&session_id, &point).await {
                    log::warn!("Reading upload failed: {}", e);
                }
            });
        }
    }
}

/// The sensor session manager handed to the UI layer.
pub struct SensorManager {
    core: Arc<SessionCore>,
    connection: ConnectionManager,
    events_rx: Receiver<SensorEvent>,
}

impl SensorManager {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        remote: Option<Arc<dyn RemoteSessionStore>>,
        location: Arc<dyn LocationSource>,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let core = Arc::new(SessionCore::new(store, remote, location, events_tx));
        let connection = ConnectionManager::new(
            config.connection.clone(),
            config.acquisition.interval_ms,
            config.data_dir(),
            core.clone(),
        );

        Self { core, connection, events_rx }
    }

    /// Channel of state-change events for the embedding layer.
    pub fn events(&self) -> Receiver<SensorEvent> {
        self.events_rx.clone()
    }

    /// Discover and attach a sensor device, falling back to the simulated
    /// device when no transport is available. Idempotent while connected.
    pub async fn connect(&mut self) {
        self.connection.connect().await;
    }

    /// Tear down the link. An active recording is finalized through the
    /// normal stop path first.
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
    }

    pub async fn start_recording(&self) -> Option<String> {
        self.core.start_recording().await
    }

    pub async fn stop_recording(&self) -> Option<Session> {
        self.core.stop_recording().await
    }

    /// Login-time sync point: local collections first, then remote merge.
    pub async fn load_history(&self) {
        self.core.load_history().await
    }

    /// Logout-time sync point. On failure pending sessions are retained
    /// for the next attempt.
    pub async fn flush_pending(&self) -> Result<(), StoreError> {
        self.core.flush_pending().await
    }

    pub async fn clear_all_data(&self) {
        self.core.clear_all_data().await
    }

    pub fn current_reading(&self) -> Option<Reading> {
        self.core.state.lock().unwrap().current.clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.core.state.lock().unwrap().connection.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.core.is_recording()
    }

    /// Pending sessions finalized during this login.
    pub fn pending_sessions(&self) -> Vec<Session> {
        self.core.recorder.pending_snapshot()
    }

    /// The recent-history display window.
    pub fn recent_sessions(&self) -> Vec<Session> {
        self.core.state.lock().unwrap().recent.clone()
    }

    /// The user-facing list: pending sessions merged in front of recent
    /// history. Recomputed on every call, never cached.
    pub fn display_sessions(&self) -> Vec<Session> {
        let pending = self.core.recorder.pending_snapshot();
        let recent = self.core.state.lock().unwrap().recent.clone();
        merge_sessions(&pending, &recent)
    }

    /// List the connected device's on-board files.
    pub async fn list_files(&mut self) -> Result<Vec<SensorFile>, ConnectionError> {
        self.connection.list_files().await
    }

    /// Most recent file listing; cleared on disconnect.
    pub fn sensor_files(&self) -> Vec<SensorFile> {
        self.connection.files().to_vec()
    }

    /// Download an on-board file into the data directory.
    pub async fn download_file(&self, name: &str) -> Result<PathBuf, ConnectionError> {
        self.connection.download_file(name).await
    }
}
