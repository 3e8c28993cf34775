//! Error types for the publisher
//!
//! Only `connect()` ever returns these to a caller. The publish path turns
//! every variant into a logged drop.

use crate::broker::state::ConnectionState;
use crate::config::ConfigError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for publisher operations
#[derive(Debug, Error)]
pub enum PublisherError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connect failed: {0}")]
    Connect(#[source] TransportError),

    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },

    #[error("Reconnection in progress")]
    ReconnectInProgress,

    #[error("Shutdown requested")]
    ShutdownRequested,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Publish failed: {0}")]
    Publish(#[source] TransportError),
}

impl PublisherError {
    /// Fatal errors are deployment problems; retrying cannot fix them
    pub fn is_fatal(&self) -> bool {
        matches!(self, PublisherError::Config(_))
    }

    /// Short machine-friendly label, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            PublisherError::Config(_) => "config",
            PublisherError::Connect(_) => "connect",
            PublisherError::NotConnected { .. } => "not_connected",
            PublisherError::ReconnectInProgress => "reconnect_in_progress",
            PublisherError::ShutdownRequested => "shutdown_requested",
            PublisherError::Serialization(_) => "serialization",
            PublisherError::Publish(_) => "publish",
        }
    }
}

/// Result type for publisher operations
pub type PublisherResult<T> = Result<T, PublisherError>;
