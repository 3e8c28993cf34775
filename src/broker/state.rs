//! Connection state machine
//!
//! Pure transition logic, kept apart from the I/O in `controller` so every
//! transition can be tested without a broker.

use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

/// Lifecycle of the controller's single connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Events that drive state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    AttemptStarted,
    Established,
    AttemptFailed(String),
    /// Broker or network closed the connection
    ClosedByBroker(Option<String>),
    /// Channel found closed while the connection still looked live
    ChannelLost,
    CloseRequested,
    Closed,
}

/// Determine the next state after an event.
///
/// Transitions that make no sense from `current` leave it unchanged.
pub fn next_state(current: ConnectionState, event: &ConnectionEvent) -> ConnectionState {
    use ConnectionEvent as E;
    use ConnectionState as S;

    match (current, event) {
        (S::Disconnected, E::AttemptStarted) => S::Connecting,
        (S::Connecting, E::Established) => S::Connected,
        (S::Connecting, E::AttemptFailed(_)) => S::Disconnected,
        (S::Connected, E::ClosedByBroker(_)) | (S::Connected, E::ChannelLost) => S::Disconnected,
        (S::Connected, E::CloseRequested) | (S::Connecting, E::CloseRequested) => S::Closing,
        (S::Closing, E::Closed) => S::Disconnected,
        (state, _) => state,
    }
}

/// Emit the log record that accompanies a transition
pub fn log_transition(from: ConnectionState, to: ConnectionState, event: &ConnectionEvent) {
    match (from, to, event) {
        (_, ConnectionState::Connected, _) => {
            info!(from = %from, "Broker connection established");
        }
        (_, ConnectionState::Disconnected, ConnectionEvent::AttemptFailed(reason)) => {
            warn!(error = %reason, "Broker connect attempt failed");
        }
        (_, ConnectionState::Disconnected, ConnectionEvent::ClosedByBroker(reason)) => {
            error!(
                reason = reason.as_deref().unwrap_or("unspecified"),
                "Broker connection closed unexpectedly"
            );
        }
        (_, ConnectionState::Disconnected, ConnectionEvent::ChannelLost) => {
            warn!("Broker channel found closed; dropping connection");
        }
        _ => {
            tracing::debug!(from = %from, to = %to, "Connection state transition");
        }
    }
}

/// Only a connected controller hands out its channel
pub fn can_publish(state: ConnectionState) -> bool {
    matches!(state, ConnectionState::Connected)
}

/// Snapshot used by the supervisor to decide whether to keep going
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    /// `close()` was called and no caller has connected since
    pub shutdown_requested: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let s = next_state(ConnectionState::Disconnected, &ConnectionEvent::AttemptStarted);
        assert_eq!(s, ConnectionState::Connecting);
        let s = next_state(s, &ConnectionEvent::Established);
        assert_eq!(s, ConnectionState::Connected);
        let s = next_state(s, &ConnectionEvent::CloseRequested);
        assert_eq!(s, ConnectionState::Closing);
        let s = next_state(s, &ConnectionEvent::Closed);
        assert_eq!(s, ConnectionState::Disconnected);
    }

    #[test]
    fn test_failed_attempt_returns_to_disconnected() {
        let s = next_state(
            ConnectionState::Connecting,
            &ConnectionEvent::AttemptFailed("refused".to_string()),
        );
        assert_eq!(s, ConnectionState::Disconnected);
    }

    #[test]
    fn test_broker_close_only_applies_when_connected() {
        let event = ConnectionEvent::ClosedByBroker(None);
        assert_eq!(
            next_state(ConnectionState::Connected, &event),
            ConnectionState::Disconnected
        );
        assert_eq!(
            next_state(ConnectionState::Closing, &event),
            ConnectionState::Closing
        );
        assert_eq!(
            next_state(ConnectionState::Connecting, &event),
            ConnectionState::Connecting
        );
    }

    #[test]
    fn test_channel_lost_disconnects() {
        assert_eq!(
            next_state(ConnectionState::Connected, &ConnectionEvent::ChannelLost),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_irrelevant_events_keep_state() {
        assert_eq!(
            next_state(ConnectionState::Connected, &ConnectionEvent::AttemptStarted),
            ConnectionState::Connected
        );
        assert_eq!(
            next_state(ConnectionState::Disconnected, &ConnectionEvent::Closed),
            ConnectionState::Disconnected
        );
    }

    #[test]
    fn test_can_publish() {
        assert!(can_publish(ConnectionState::Connected));
        assert!(!can_publish(ConnectionState::Connecting));
        assert!(!can_publish(ConnectionState::Disconnected));
        assert!(!can_publish(ConnectionState::Closing));
    }

    #[test]
    fn test_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
