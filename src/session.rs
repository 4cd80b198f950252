//! # Session Recorder Module
//!
//! The recording state machine: Idle → (start, requires a connected
//! device) → Recording → (stop) → Idle. While recording, the acquisition
//! loop appends points to the active buffer; `stop` freezes the buffer,
//! computes the session aggregates exactly once, prepends the finalized
//! session to the pending list, and persists that list locally before any
//! remote submission is attempted.
//!
//! ## Durability
//! The local pending copy is the source of truth. A failed store write is
//! logged and the in-memory list kept so a later flush can retry; a failed
//! remote submission never deletes or blocks anything local.
//!
//! ## Why an in-flight guard
//! Stopping is a multi-await operation. A second stop racing the first
//! could double-append the same session to the pending list, so a
//! single-slot flag turns the second call into a logged no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::remote::RemoteSessionStore;
use crate::storage::{self, Store, LOCAL_SESSIONS_KEY};
use crate::telemetry::{next_session_id, DeviceInfo, LocationFix, Session, SessionPoint};

pub struct SessionRecorder {
    store: Arc<dyn Store>,
    remote: Option<Arc<dyn RemoteSessionStore>>,
    inner: Mutex<RecorderInner>,
    finalizing: AtomicBool,
}

#[derive(Default)]
struct RecorderInner {
    active: Option<ActiveSession>,
    pending: Vec<Session>,
}

struct ActiveSession {
    id: String,
    points: Vec<SessionPoint>,
}

impl SessionRecorder {
    pub fn new(store: Arc<dyn Store>, remote: Option<Arc<dyn RemoteSessionStore>>) -> Self {
        Self {
            store,
            remote,
            inner: Mutex::new(RecorderInner::default()),
            finalizing: AtomicBool::new(false),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.inner.lock().unwrap().active.is_some()
    }

    /// Id of the session currently recording, if any.
    pub fn active_session_id(&self) -> Option<String> {
        self.inner.lock().unwrap().active.as_ref().map(|a| a.id.clone())
    }

    /// Begin a new session. No-op unless a device is connected and nothing
    /// is already recording. Returns the new session id on success.
    pub async fn start(
        &self,
        connected: bool,
        location: Option<&LocationFix>,
    ) -> Option<String> {
        if !connected {
            log::warn!("Start recording ignored: no sensor connected");
            return None;
        }

        let id = next_session_id();
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.active.is_some() {
                log::warn!("Start recording ignored: a session is already active");
                return None;
            }
            inner.active = Some(ActiveSession { id: id.clone(), points: Vec::new() });
        }
        log::info!("Recording session {}", id);

        if let Some(remote) = &self.remote {
            match remote.create_session_placeholder(location).await {
                Ok(remote_id) => log::debug!("Remote placeholder {} for session {}", remote_id, id),
                Err(e) => log::warn!("Could not create remote session placeholder: {}", e),
            }
        }

        Some(id)
    }

    /// Append a point to the active buffer. Ignored while idle.
    pub fn append(&self, point: SessionPoint) {
        if let Some(active) = self.inner.lock().unwrap().active.as_mut() {
            active.points.push(point);
        }
    }

    /// Stop recording, finalize the buffered session, and persist it as
    /// pending. Returns the finalized session, or `None` when there was
    /// nothing to finalize.
    pub async fn stop(
        &self,
        location: Option<LocationFix>,
        device_info: Option<DeviceInfo>,
    ) -> Option<Session> {
        if !self.is_recording() {
            log::debug!("Stop recording ignored: not recording");
            return None;
        }
        if self
            .finalizing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            log::warn!("Stop recording ignored: a finalize is already in flight");
            return None;
        }

        let active = match self.inner.lock().unwrap().active.take() {
            Some(active) => active,
            None => {
                self.finalizing.store(false, Ordering::Release);
                return None;
            }
        };

        if active.points.is_empty() {
            log::debug!("Discarding session {} with no data points", active.id);
            self.finalizing.store(false, Ordering::Release);
            return None;
        }

        let session = finalize_session(active.id, active.points, location, device_info);
        log::info!(
            "Finalized session {}: {} points over {}s",
            session.id,
            session.data_points,
            session.duration
        );

        let snapshot = {
            let mut inner = self.inner.lock().unwrap();
            inner.pending.insert(0, session.clone());
            inner.pending.clone()
        };

        if let Err(e) = storage::write_sessions(&*self.store, LOCAL_SESSIONS_KEY, &snapshot).await {
            log::error!("Pending sessions not yet durable: {}", e);
        }

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.submit_session(&session).await {
                log::warn!("Session {} kept locally, upload failed: {}", session.id, e);
            }
        }

        self.finalizing.store(false, Ordering::Release);
        Some(session)
    }

    pub fn pending_snapshot(&self) -> Vec<Session> {
        self.inner.lock().unwrap().pending.clone()
    }

    /// Replace the pending list with sessions loaded from the store.
    pub fn set_pending(&self, sessions: Vec<Session>) {
        self.inner.lock().unwrap().pending = sessions;
    }

    /// Forget pending sessions after a successful flush to durable history.
    pub fn clear_pending(&self) {
        self.inner.lock().unwrap().pending.clear();
    }

    /// Drop the active buffer and all pending sessions.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.active = None;
        inner.pending.clear();
    }
}

/// Compute a session's aggregates over its recorded points.
///
/// The speed and distance figures use the same simplified kinematic
/// approximation as every previously recorded session: for each
/// consecutive pair, speed = magnitude * dt and distance accumulates
/// speed * dt. Changing the formula would skew historical comparisons, so
/// it is reproduced as-is. Callers guarantee a non-empty buffer.
pub(crate) fn finalize_session(
    id: String,
    points: Vec<SessionPoint>,
    location: Option<LocationFix>,
    device_info: Option<DeviceInfo>,
) -> Session {
    let count = points.len();
    let n = count as f64;
    let start_time = points[0].reading.timestamp;
    let end_time = points[count - 1].reading.timestamp;

    let mut temp_sum = 0.0;
    let mut max_temp = f64::NEG_INFINITY;
    let mut min_temp = f64::INFINITY;
    let mut accel_sum = 0.0;
    let mut max_accel = f64::NEG_INFINITY;

    for point in &points {
        let temp = point.reading.temperature;
        let accel = point.reading.accelerometer.magnitude;
        temp_sum += temp;
        max_temp = max_temp.max(temp);
        min_temp = min_temp.min(temp);
        accel_sum += accel;
        max_accel = max_accel.max(accel);
    }

    let mut distance = 0.0;
    let mut max_speed = 0.0f64;
    let mut speed_sum = 0.0;
    for i in 1..count {
        let dt = (points[i].reading.timestamp - points[i - 1].reading.timestamp) as f64 / 1000.0;
        let speed = points[i].reading.accelerometer.magnitude * dt;
        speed_sum += speed;
        max_speed = max_speed.max(speed);
        distance += speed * dt;
    }
    let avg_speed = if count > 1 { speed_sum / (count - 1) as f64 } else { 0.0 };

    Session {
        id,
        start_time,
        end_time,
        duration: (end_time - start_time) / 1000,
        data_points: count,
        avg_temp: temp_sum / n,
        max_temp,
        min_temp,
        max_accel,
        avg_accel: accel_sum / n,
        distance,
        max_speed,
        avg_speed,
        location,
        data: points,
        device_info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RemoteError, StoreError};
    use crate::storage::MemoryStore;
    use crate::telemetry::{AccelSample, Reading};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn point(timestamp: i64, temperature: f64, magnitude: f64) -> SessionPoint {
        SessionPoint {
            reading: Reading {
                serial_number: "SURF-001-TEST".to_string(),
                timestamp,
                temperature,
                accelerometer: AccelSample::from_axes(magnitude, 0.0, 0.0),
                gyroscope: None,
                magnetometer: None,
            },
            location: None,
        }
    }

    #[test]
    fn test_aggregates_three_points() {
        let points = vec![
            point(0, 18.0, 1.0),
            point(1000, 22.0, 2.0),
            point(2000, 20.0, 1.5),
        ];
        let session = finalize_session("s-1".to_string(), points, None, None);

        assert_eq!(session.duration, 2);
        assert_eq!(session.data_points, 3);
        assert_eq!(session.avg_temp, 20.0);
        assert_eq!(session.max_temp, 22.0);
        assert_eq!(session.min_temp, 18.0);
        assert_eq!(session.avg_accel, 1.5);
        assert_eq!(session.max_accel, 2.0);
        // speeds: 2.0 * 1.0 and 1.5 * 1.0
        assert_eq!(session.max_speed, 2.0);
        assert_eq!(session.avg_speed, 1.75);
        assert_eq!(session.distance, 3.5);
    }

    #[test]
    fn test_aggregates_single_point() {
        let session = finalize_session("s-1".to_string(), vec![point(5000, 19.0, 0.8)], None, None);

        assert_eq!(session.duration, 0);
        assert_eq!(session.distance, 0.0);
        assert_eq!(session.max_speed, 0.0);
        assert_eq!(session.avg_speed, 0.0);
        assert_eq!(session.avg_temp, 19.0);
    }

    #[test]
    fn test_aggregate_ordering_invariants() {
        let points = vec![
            point(0, 17.3, 0.2),
            point(900, 24.1, 1.9),
            point(2100, 21.0, 0.7),
            point(3000, 16.5, 2.6),
        ];
        let session = finalize_session("s-1".to_string(), points, None, None);

        assert!(session.max_temp >= session.avg_temp);
        assert!(session.avg_temp >= session.min_temp);
        assert!(session.max_accel >= session.avg_accel);
        assert!(session.avg_accel >= 0.0);
    }

    #[tokio::test]
    async fn test_start_requires_connection() {
        let recorder = SessionRecorder::new(Arc::new(MemoryStore::new()), None);
        assert!(recorder.start(false, None).await.is_none());
        assert!(!recorder.is_recording());
    }

    #[tokio::test]
    async fn test_start_is_exclusive() {
        let recorder = SessionRecorder::new(Arc::new(MemoryStore::new()), None);
        let first = recorder.start(true, None).await.expect("first start");
        assert!(recorder.start(true, None).await.is_none());
        assert_eq!(recorder.active_session_id(), Some(first));
    }

    #[tokio::test]
    async fn test_stop_empty_buffer_discards() {
        let recorder = SessionRecorder::new(Arc::new(MemoryStore::new()), None);
        recorder.start(true, None).await.unwrap();

        assert!(recorder.stop(None, None).await.is_none());
        assert!(!recorder.is_recording());
        assert!(recorder.pending_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_stop_finalizes_and_persists() {
        let store = Arc::new(MemoryStore::new());
        let recorder = SessionRecorder::new(store.clone(), None);

        recorder.start(true, None).await.unwrap();
        recorder.append(point(0, 18.0, 1.0));
        recorder.append(point(1000, 20.0, 2.0));

        let device = DeviceInfo { id: "simulated-device".to_string(), name: "Sim".to_string() };
        let session = recorder.stop(None, Some(device.clone())).await.expect("finalized");

        assert!(!recorder.is_recording());
        assert_eq!(session.device_info, Some(device));

        let pending = recorder.pending_snapshot();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, session.id);

        let stored = storage::read_sessions(&*store, LOCAL_SESSIONS_KEY).await;
        assert_eq!(stored, pending);
    }

    #[tokio::test]
    async fn test_newest_pending_first() {
        let recorder = SessionRecorder::new(Arc::new(MemoryStore::new()), None);

        recorder.start(true, None).await.unwrap();
        recorder.append(point(0, 18.0, 1.0));
        let first = recorder.stop(None, None).await.unwrap();

        recorder.start(true, None).await.unwrap();
        recorder.append(point(10_000, 19.0, 1.0));
        let second = recorder.stop(None, None).await.unwrap();

        let pending = recorder.pending_snapshot();
        assert_eq!(pending[0].id, second.id);
        assert_eq!(pending[1].id, first.id);
    }

    #[tokio::test]
    async fn test_stop_in_flight_guard() {
        let recorder = SessionRecorder::new(Arc::new(MemoryStore::new()), None);
        recorder.start(true, None).await.unwrap();
        recorder.append(point(0, 18.0, 1.0));

        recorder.finalizing.store(true, Ordering::Relaxed);
        assert!(recorder.stop(None, None).await.is_none());
        assert!(recorder.is_recording());

        recorder.finalizing.store(false, Ordering::Relaxed);
        assert!(recorder.stop(None, None).await.is_some());
    }

    /// Store whose writes always fail, for durability-path tests.
    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn get(&self, _key: &str) -> Option<String> {
            None
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
        async fn remove(&self, _key: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_write_keeps_memory_pending() {
        let recorder = SessionRecorder::new(Arc::new(FailingStore), None);
        recorder.start(true, None).await.unwrap();
        recorder.append(point(0, 18.0, 1.0));

        let session = recorder.stop(None, None).await.expect("finalize succeeds locally");
        assert_eq!(recorder.pending_snapshot(), vec![session]);
    }

    /// Remote stub that counts calls and optionally fails everything.
    #[derive(Default)]
    struct CountingRemote {
        placeholders: AtomicUsize,
        sessions: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl RemoteSessionStore for CountingRemote {
        async fn create_session_placeholder(
            &self,
            _location: Option<&LocationFix>,
        ) -> Result<String, RemoteError> {
            self.placeholders.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(RemoteError::Status { endpoint: "sessions".to_string(), code: 500 });
            }
            Ok("remote-1".to_string())
        }

        async fn submit_reading(
            &self,
            _session_id: &str,
            _point: &SessionPoint,
        ) -> Result<String, RemoteError> {
            Ok("r-1".to_string())
        }

        async fn submit_session(&self, _session: &Session) -> Result<String, RemoteError> {
            self.sessions.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(RemoteError::Status { endpoint: "sessions".to_string(), code: 500 });
            }
            Ok("remote-2".to_string())
        }

        async fn list_sessions(&self) -> Result<Vec<Session>, RemoteError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_remote_failures_never_block_recording() {
        let remote = Arc::new(CountingRemote { fail: true, ..Default::default() });
        let recorder = SessionRecorder::new(Arc::new(MemoryStore::new()), Some(remote.clone()));

        let id = recorder.start(true, None).await.expect("placeholder failure ignored");
        recorder.append(point(0, 18.0, 1.0));
        let session = recorder.stop(None, None).await.expect("upload failure ignored");

        assert_eq!(session.id, id);
        assert_eq!(remote.placeholders.load(Ordering::Relaxed), 1);
        assert_eq!(remote.sessions.load(Ordering::Relaxed), 1);
        assert_eq!(recorder.pending_snapshot().len(), 1);
    }
}
