//! # Remote Session Store Module
//!
//! Adapter for the per-user session service, present only when an identity
//! is configured. Every operation is best-effort: callers log failures and
//! carry on, because the local store is the durability source of truth and
//! anything missed here self-heals at the next sync point.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::error::RemoteError;
use crate::telemetry::{now_ms, DeviceInfo, LocationFix, Session, SessionPoint};

#[async_trait]
pub trait RemoteSessionStore: Send + Sync {
    /// Create an empty session record upstream when recording starts.
    async fn create_session_placeholder(
        &self,
        location: Option<&LocationFix>,
    ) -> Result<String, RemoteError>;

    /// Submit one in-session reading, tagged with its session id.
    async fn submit_reading(
        &self,
        session_id: &str,
        point: &SessionPoint,
    ) -> Result<String, RemoteError>;

    /// Submit a finalized session's aggregates as a single write.
    async fn submit_session(&self, session: &Session) -> Result<String, RemoteError>;

    /// List the authenticated user's session history.
    async fn list_sessions(&self) -> Result<Vec<Session>, RemoteError>;
}

/// REST adapter scoped to the configured user, with an optional bearer key.
pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    user_id: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedReply {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceholderBody<'a> {
    start_time: i64,
    data_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a LocationFix>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadingBody<'a> {
    session_id: &'a str,
    #[serde(flatten)]
    point: &'a SessionPoint,
}

/// Aggregate-only view of a finalized session; raw points travel through
/// the per-reading writes, not the session record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody<'a> {
    id: &'a str,
    start_time: i64,
    end_time: i64,
    duration: i64,
    data_points: usize,
    avg_temp: f64,
    max_temp: f64,
    min_temp: f64,
    max_accel: f64,
    avg_accel: f64,
    distance: f64,
    max_speed: f64,
    avg_speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a LocationFix>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_info: Option<&'a DeviceInfo>,
}

impl<'a> From<&'a Session> for SessionBody<'a> {
    fn from(session: &'a Session) -> Self {
        Self {
            id: &session.id,
            start_time: session.start_time,
            end_time: session.end_time,
            duration: session.duration,
            data_points: session.data_points,
            avg_temp: session.avg_temp,
            max_temp: session.max_temp,
            min_temp: session.min_temp,
            max_accel: session.max_accel,
            avg_accel: session.avg_accel,
            distance: session.distance,
            max_speed: session.max_speed,
            avg_speed: session.avg_speed,
            location: session.location.as_ref(),
            device_info: session.device_info.as_ref(),
        }
    }
}

impl HttpRemoteStore {
    pub fn new(config: &RemoteConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user_id: config.user_id.clone(),
            api_key: config.api_key.clone(),
        }
    }

    fn url(&self, tail: &str) -> String {
        format!("{}/users/{}/{}", self.base_url, self.user_id, tail)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn post_created<B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> Result<String, RemoteError> {
        let response = self
            .authorize(self.client.post(self.url(endpoint)))
            .json(body)
            .send()
            .await
            .map_err(RemoteError::Request)?;

        if !response.status().is_success() {
            return Err(RemoteError::Status {
                endpoint: endpoint.to_string(),
                code: response.status().as_u16(),
            });
        }

        let created: CreatedReply = response.json().await.map_err(RemoteError::Request)?;
        Ok(created.id)
    }
}

#[async_trait]
impl RemoteSessionStore for HttpRemoteStore {
    async fn create_session_placeholder(
        &self,
        location: Option<&LocationFix>,
    ) -> Result<String, RemoteError> {
        let body = PlaceholderBody { start_time: now_ms(), data_count: 0, location };
        let id = self.post_created("sessions", &body).await?;
        log::debug!("Created remote session placeholder {}", id);
        Ok(id)
    }

    async fn submit_reading(
        &self,
        session_id: &str,
        point: &SessionPoint,
    ) -> Result<String, RemoteError> {
        let body = ReadingBody { session_id, point };
        self.post_created("readings", &body).await
    }

    async fn submit_session(&self, session: &Session) -> Result<String, RemoteError> {
        let body = SessionBody::from(session);
        let id = self.post_created("sessions", &body).await?;
        log::info!("Session {} mirrored to remote store as {}", session.id, id);
        Ok(id)
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, RemoteError> {
        let response = self
            .authorize(self.client.get(self.url("sessions")))
            .send()
            .await
            .map_err(RemoteError::Request)?;

        if !response.status().is_success() {
            return Err(RemoteError::Status {
                endpoint: "sessions".to_string(),
                code: response.status().as_u16(),
            });
        }

        response.json().await.map_err(RemoteError::Request)
    }
}
