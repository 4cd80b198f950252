//! # Sync Reconciler Module
//!
//! Merges the three session sources (remote history, local durable
//! history, and this login's pending sessions) into one display list and
//! one durable store. The universal merge rule everywhere: deduplicate by
//! session id keeping the first occurrence, then sort descending by start
//! time. Whichever list is passed first therefore wins id collisions.
//!
//! Pending sessions move into the durable collection at logout (or any
//! explicit flush). The flush is at-least-once safe: the pending
//! collection is cleared only after the durable write succeeds, so a
//! failure leaves everything for the next attempt.

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::StoreError;
use crate::remote::RemoteSessionStore;
use crate::storage::{self, Store, HISTORICAL_SESSIONS_KEY, LOCAL_SESSIONS_KEY};
use crate::telemetry::Session;

/// How many merged sessions the UI shows as "recent history". A display
/// window only; the durable store keeps the full merged set.
pub const RECENT_WINDOW: usize = 5;

/// Concatenate primary-then-secondary, drop duplicate ids (first wins),
/// sort newest first. The sort is stable, so same-start-time entries keep
/// their primary-before-secondary order.
pub fn merge_sessions(primary: &[Session], secondary: &[Session]) -> Vec<Session> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut merged: Vec<Session> = Vec::with_capacity(primary.len() + secondary.len());

    for session in primary.iter().chain(secondary.iter()) {
        if seen.insert(session.id.as_str()) {
            merged.push(session.clone());
        }
    }

    merged.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    merged
}

pub struct SyncReconciler {
    store: Arc<dyn Store>,
    remote: Option<Arc<dyn RemoteSessionStore>>,
}

impl SyncReconciler {
    pub fn new(store: Arc<dyn Store>, remote: Option<Arc<dyn RemoteSessionStore>>) -> Self {
        Self { store, remote }
    }

    /// Read the local collections: (durable history, pending sessions).
    ///
    /// This runs before any remote fetch so callers can show something
    /// immediately; missing or unreadable collections are simply empty.
    pub async fn load_local(&self) -> (Vec<Session>, Vec<Session>) {
        let durable = storage::read_sessions(&*self.store, HISTORICAL_SESSIONS_KEY).await;
        let pending = storage::read_sessions(&*self.store, LOCAL_SESSIONS_KEY).await;
        log::debug!(
            "Loaded {} durable and {} pending sessions from local store",
            durable.len(),
            pending.len()
        );
        (durable, pending)
    }

    /// Fetch the remote session history. Empty when no identity is
    /// configured or the fetch fails; never an error for the caller.
    pub async fn fetch_remote(&self) -> Vec<Session> {
        let remote = match &self.remote {
            Some(remote) => remote,
            None => return Vec::new(),
        };

        match remote.list_sessions().await {
            Ok(sessions) => {
                log::info!("Loaded {} remote sessions", sessions.len());
                sessions
            }
            Err(e) => {
                log::warn!("Remote history unavailable: {}", e);
                Vec::new()
            }
        }
    }

    /// Merge pending sessions into the durable collection and clear the
    /// pending key. Pending copies win id collisions. Returns the new
    /// recent-history window on success; on failure nothing is cleared and
    /// the caller must keep its pending list for a retry.
    pub async fn flush_pending_to_durable(
        &self,
        pending: &[Session],
    ) -> Result<Vec<Session>, StoreError> {
        let durable = storage::read_sessions(&*self.store, HISTORICAL_SESSIONS_KEY).await;
        let merged = merge_sessions(pending, &durable);

        storage::write_sessions(&*self.store, HISTORICAL_SESSIONS_KEY, &merged).await?;

        if let Err(e) = self.store.remove(LOCAL_SESSIONS_KEY).await {
            // Durable copy exists; a stale pending key only costs a
            // harmless re-merge on the next login.
            log::warn!("Could not clear pending collection: {}", e);
        }
        log::info!("Flushed {} pending sessions, {} total in history", pending.len(), merged.len());

        let mut recent = merged;
        recent.truncate(RECENT_WINDOW);
        Ok(recent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(id: &str, start_time: i64) -> Session {
        Session {
            id: id.to_string(),
            start_time,
            end_time: start_time + 60_000,
            duration: 60,
            data_points: 60,
            avg_temp: 20.0,
            max_temp: 22.0,
            min_temp: 18.0,
            max_accel: 1.5,
            avg_accel: 1.0,
            distance: 3.0,
            max_speed: 1.5,
            avg_speed: 1.0,
            location: None,
            data: Vec::new(),
            device_info: None,
        }
    }

    #[test]
    fn test_merge_orders_newest_first() {
        let merged = merge_sessions(
            &[session("a", 1_000), session("b", 3_000)],
            &[session("c", 2_000)],
        );

        let ids: Vec<&str> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_merge_dedup_is_idempotent() {
        let list = vec![session("a", 2_000), session("b", 1_000)];

        let once = merge_sessions(&list, &[]);
        let with_self = merge_sessions(&list, &list);

        assert_eq!(once, with_self);
        assert_eq!(with_self.len(), 2);
    }

    #[test]
    fn test_merge_first_occurrence_wins() {
        let mut newer_payload = session("a", 5_000);
        newer_payload.avg_temp = 25.0;
        let older_payload = session("a", 5_000);

        let merged = merge_sessions(&[newer_payload.clone()], &[older_payload]);
        assert_eq!(merged, vec![newer_payload]);
    }

    #[tokio::test]
    async fn test_flush_pending_wins_collisions() {
        let store = Arc::new(MemoryStore::new());

        // Durable already holds an older payload for id "a"
        let mut stale = session("a", 2_000);
        stale.avg_temp = 10.0;
        storage::write_sessions(&*store, HISTORICAL_SESSIONS_KEY, &[stale]).await.unwrap();

        let mut fresh = session("a", 2_000);
        fresh.avg_temp = 21.5;
        let pending = vec![fresh.clone(), session("b", 4_000)];

        let reconciler = SyncReconciler::new(store.clone(), None);
        let recent = reconciler.flush_pending_to_durable(&pending).await.unwrap();

        let durable = storage::read_sessions(&*store, HISTORICAL_SESSIONS_KEY).await;
        let ids: Vec<&str> = durable.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(durable[1].avg_temp, 21.5, "pending payload must win the collision");

        // Pending key is cleared after a successful flush
        assert!(storage::read_sessions(&*store, LOCAL_SESSIONS_KEY).await.is_empty());
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn test_flush_truncates_recent_window_only() {
        let store = Arc::new(MemoryStore::new());
        let pending: Vec<Session> =
            (0..7).map(|i| session(&format!("s{}", i), i * 1_000)).collect();

        let reconciler = SyncReconciler::new(store.clone(), None);
        let recent = reconciler.flush_pending_to_durable(&pending).await.unwrap();

        assert_eq!(recent.len(), RECENT_WINDOW);
        assert_eq!(recent[0].id, "s6");
        // The store keeps the full set
        assert_eq!(storage::read_sessions(&*store, HISTORICAL_SESSIONS_KEY).await.len(), 7);
    }

    /// Store whose first N writes fail, reads backed by memory.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicUsize,
    }

    impl FlakyStore {
        fn new(failures: usize) -> Self {
            Self { inner: MemoryStore::new(), failures_left: AtomicUsize::new(failures) }
        }
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn get(&self, key: &str) -> Option<String> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            let left = self.failures_left.load(Ordering::Relaxed);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::Relaxed);
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "transient write failure",
                )));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_flush_is_at_least_once_safe() {
        let store = Arc::new(FlakyStore::new(1));
        storage::write_sessions(&store.inner, LOCAL_SESSIONS_KEY, &[session("a", 1_000)])
            .await
            .unwrap();

        let pending = vec![session("a", 1_000)];
        let reconciler = SyncReconciler::new(store.clone(), None);

        // First attempt fails; nothing is cleared or written
        assert!(reconciler.flush_pending_to_durable(&pending).await.is_err());
        assert!(storage::read_sessions(&*store, HISTORICAL_SESSIONS_KEY).await.is_empty());
        assert_eq!(storage::read_sessions(&*store, LOCAL_SESSIONS_KEY).await.len(), 1);

        // Retry succeeds and converges to the single-flush outcome
        let recent = reconciler.flush_pending_to_durable(&pending).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(storage::read_sessions(&*store, HISTORICAL_SESSIONS_KEY).await.len(), 1);
        assert!(storage::read_sessions(&*store, LOCAL_SESSIONS_KEY).await.is_empty());
    }

    /// Remote stub returning a fixed history, or failing.
    struct FixedRemote {
        sessions: Vec<Session>,
        fail: bool,
    }

    #[async_trait]
    impl RemoteSessionStore for FixedRemote {
        async fn create_session_placeholder(
            &self,
            _location: Option<&crate::telemetry::LocationFix>,
        ) -> Result<String, crate::error::RemoteError> {
            Ok("p".to_string())
        }

        async fn submit_reading(
            &self,
            _session_id: &str,
            _point: &crate::telemetry::SessionPoint,
        ) -> Result<String, crate::error::RemoteError> {
            Ok("r".to_string())
        }

        async fn submit_session(
            &self,
            _session: &Session,
        ) -> Result<String, crate::error::RemoteError> {
            Ok("s".to_string())
        }

        async fn list_sessions(&self) -> Result<Vec<Session>, crate::error::RemoteError> {
            if self.fail {
                return Err(crate::error::RemoteError::Status {
                    endpoint: "sessions".to_string(),
                    code: 500,
                });
            }
            Ok(self.sessions.clone())
        }
    }

    #[tokio::test]
    async fn test_fetch_remote_failure_is_empty() {
        let reconciler = SyncReconciler::new(
            Arc::new(MemoryStore::new()),
            Some(Arc::new(FixedRemote { sessions: vec![session("r1", 9_000)], fail: true })),
        );
        assert!(reconciler.fetch_remote().await.is_empty());

        let unconfigured = SyncReconciler::new(Arc::new(MemoryStore::new()), None);
        assert!(unconfigured.fetch_remote().await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_remote_returns_history() {
        let reconciler = SyncReconciler::new(
            Arc::new(MemoryStore::new()),
            Some(Arc::new(FixedRemote {
                sessions: vec![session("r1", 9_000), session("r2", 8_000)],
                fail: false,
            })),
        );
        assert_eq!(reconciler.fetch_remote().await.len(), 2);
    }
}
