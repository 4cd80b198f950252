//! # Error Types Module
//!
//! Centralized error handling for the surftrace application.
//! Provides custom error types for each module with proper context and error chaining.
//!
//! ## Error Types
//! - `ConnectionError`: device discovery, link, and command failures
//! - `ConfigError`: configuration file I/O and parsing errors
//! - `StoreError`: persistent store read/write failures
//! - `RemoteError`: remote session store request failures
//!
//! Transport and remote failures are recoverable by design (simulated
//! fallback, local-first persistence); these types exist so the recovery
//! sites can log precise context instead of opaque strings.

use std::fmt;

/// Errors that can occur while managing the sensor link
#[derive(Debug)]
pub enum ConnectionError {
    /// No Bluetooth adapter found or not available
    NoAdapter,
    /// Device discovery failed
    ScanFailed(String),
    /// Failed to connect to a specific device
    DeviceConnection { device_id: String, reason: String },
    /// Connected device exposes no readable or notifiable characteristic
    NoDataChannel { device_id: String },
    /// Operation requires an attached device
    NotConnected,
    /// A command written to the data channel failed or returned garbage
    CommandFailed(String),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::NoAdapter => {
                write!(f, "No Bluetooth adapter found. Please ensure Bluetooth is enabled.")
            }
            ConnectionError::ScanFailed(msg) => {
                write!(f, "Device scan failed: {}", msg)
            }
            ConnectionError::DeviceConnection { device_id, reason } => {
                write!(f, "Failed to connect to device {}: {}", device_id, reason)
            }
            ConnectionError::NoDataChannel { device_id } => {
                write!(f, "Device {} exposes no usable data characteristic", device_id)
            }
            ConnectionError::NotConnected => {
                write!(f, "No sensor connected")
            }
            ConnectionError::CommandFailed(msg) => {
                write!(f, "Device command failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConnectionError {}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

/// Errors that can occur at the persistent store boundary.
///
/// A failed read is treated as "no data" by the callers; a failed write
/// means "not yet durable" and must leave in-memory state untouched so a
/// later retry can still succeed.
#[derive(Debug)]
pub enum StoreError {
    /// Underlying filesystem operation failed
    Io(std::io::Error),
    /// Collection could not be serialized for storage
    Serialize(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Store I/O failed: {}", e),
            StoreError::Serialize(e) => write!(f, "Could not serialize collection: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Serialize(e) => Some(e),
        }
    }
}

/// Errors raised by the remote session store adapter.
///
/// Every call site treats these as best-effort failures: logged, never
/// allowed to block local recording or persistence.
#[derive(Debug)]
pub enum RemoteError {
    /// Request could not be sent or the response body was unreadable
    Request(reqwest::Error),
    /// Server answered with a non-success status
    Status { endpoint: String, code: u16 },
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Request(e) => write!(f, "Remote request failed: {}", e),
            RemoteError::Status { endpoint, code } => {
                write!(f, "Remote rejected {} with status {}", endpoint, code)
            }
        }
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RemoteError::Request(e) => Some(e),
            RemoteError::Status { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::NoAdapter;
        assert!(err.to_string().contains("Bluetooth"));

        let err = ConnectionError::NotConnected;
        assert!(err.to_string().contains("No sensor"));
    }

    #[test]
    fn test_store_error_chain() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = StoreError::Io(io_err);
        assert!(err.source().is_some());
    }

    #[test]
    fn test_remote_status_display() {
        let err = RemoteError::Status { endpoint: "sessions".to_string(), code: 503 };
        let msg = err.to_string();
        assert!(msg.contains("sessions"));
        assert!(msg.contains("503"));
    }
}
