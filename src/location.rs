//! Geolocation collaborator boundary. A fix is attached to points and
//! sessions only when one is available; absence never blocks recording.

use async_trait::async_trait;

use crate::telemetry::LocationFix;

#[async_trait]
pub trait LocationSource: Send + Sync {
    /// Best-effort current fix. `None` when unavailable or denied.
    async fn current_fix(&self) -> Option<LocationFix>;
}

/// Used when no location provider is configured.
pub struct NoLocation;

#[async_trait]
impl LocationSource for NoLocation {
    async fn current_fix(&self) -> Option<LocationFix> {
        None
    }
}

/// Fixed coordinates from configuration, for headless deployments at a
/// known spot.
pub struct FixedLocation {
    fix: LocationFix,
}

impl FixedLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { fix: LocationFix { latitude, longitude, accuracy: None } }
    }
}

#[async_trait]
impl LocationSource for FixedLocation {
    async fn current_fix(&self) -> Option<LocationFix> {
        Some(self.fix)
    }
}
