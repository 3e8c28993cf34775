//! Thread-safe publisher metrics
//!
//! Atomic counters for the connection lifecycle and the publish path, one
//! collector per publisher instance.

use crate::broker::state::ConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Counters shared between controller, supervisor and gateway
#[derive(Debug, Default)]
pub struct PublisherMetrics {
    connect_attempts: AtomicU64,
    connections_established: AtomicU64,
    connect_failures: AtomicU64,
    connections_lost: AtomicU64,
    reconnect_episodes: AtomicU64,
    reconnect_exhausted: AtomicU64,
    messages_published: AtomicU64,
    messages_dropped: AtomicU64,
    last_connected_at: Mutex<Option<DateTime<Utc>>>,
}

impl PublisherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last_connected_at.lock() {
            *last = Some(Utc::now());
        }
    }

    pub fn connect_failed(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_episode_started(&self) {
        self.reconnect_episodes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_exhausted(&self) {
        self.reconnect_exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self, state: ConnectionState) -> MetricsSnapshot {
        let last_connected_at = self.last_connected_at.lock().ok().and_then(|last| *last);

        MetricsSnapshot {
            state,
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            connections_lost: self.connections_lost.load(Ordering::Relaxed),
            reconnect_episodes: self.reconnect_episodes.load(Ordering::Relaxed),
            reconnect_exhausted: self.reconnect_exhausted.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            last_connected_at,
        }
    }
}

/// Serializable view of [`PublisherMetrics`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub state: ConnectionState,
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connect_failures: u64,
    pub connections_lost: u64,
    pub reconnect_episodes: u64,
    pub reconnect_exhausted: u64,
    pub messages_published: u64,
    pub messages_dropped: u64,
    pub last_connected_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters() {
        let metrics = PublisherMetrics::new();
        metrics.connect_attempt();
        metrics.connect_attempt();
        metrics.connect_failed();
        metrics.connection_established();
        metrics.message_published();
        metrics.message_dropped();

        let snapshot = metrics.snapshot(ConnectionState::Connected);
        assert_eq!(snapshot.connect_attempts, 2);
        assert_eq!(snapshot.connect_failures, 1);
        assert_eq!(snapshot.connections_established, 1);
        assert_eq!(snapshot.messages_published, 1);
        assert_eq!(snapshot.messages_dropped, 1);
        assert!(snapshot.last_connected_at.is_some());
        assert_eq!(snapshot.state, ConnectionState::Connected);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(PublisherMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.message_published();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot(ConnectionState::Connected);
        assert_eq!(snapshot.messages_published, 800);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = PublisherMetrics::new();
        let json = serde_json::to_value(metrics.snapshot(ConnectionState::Disconnected)).unwrap();
        assert_eq!(json["state"], "Disconnected");
        assert_eq!(json["messages_dropped"], 0);
        assert!(json["last_connected_at"].is_null());
    }
}
