//! Test helpers and utilities for integration tests

use notification_publisher::broker::{ConnectionState, NotificationPublisher};
use notification_publisher::testing::MockBroker;
use std::time::Duration;

/// A publisher wired to a fresh in-memory broker
#[allow(dead_code)]
pub fn publisher_with_broker() -> (NotificationPublisher, MockBroker) {
    let broker = MockBroker::new();
    let publisher = NotificationPublisher::new(MockBroker::config(), broker.connector());
    (publisher, broker)
}

/// Wait until the publisher reports `state`
#[allow(dead_code)]
pub async fn wait_for_state(publisher: &NotificationPublisher, state: ConnectionState) {
    let mut rx = publisher.subscribe_state();
    tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
}

/// Connect, then have the broker drop the connection and wait until the
/// publisher has noticed
#[allow(dead_code)]
pub async fn connect_then_drop(publisher: &NotificationPublisher, broker: &MockBroker) {
    publisher.connect().await.expect("initial connect should succeed");
    broker.drop_connections();
    wait_for_state(publisher, ConnectionState::Disconnected).await;
}
