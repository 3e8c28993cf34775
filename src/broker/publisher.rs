//! The handle collaborators hold
//!
//! Exposes `connect`, `publish` and `close` and nothing that reaches the
//! channel directly.

use super::controller::BrokerConnectionController;
use super::gateway::{OutboundMessage, PublishGateway};
use super::state::ConnectionState;
use crate::config::PublisherConfig;
use crate::error::PublisherResult;
use crate::observability::metrics::{MetricsSnapshot, PublisherMetrics};
use crate::transport::amqp::AmqpConnector;
use crate::transport::Connector;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Resilient fire-and-forget notification publisher
#[derive(Clone)]
pub struct NotificationPublisher {
    controller: BrokerConnectionController,
    gateway: PublishGateway,
}

impl NotificationPublisher {
    pub fn new(config: PublisherConfig, connector: Arc<dyn Connector>) -> Self {
        let controller =
            BrokerConnectionController::new(config, connector, Arc::new(PublisherMetrics::new()));
        let gateway = PublishGateway::new(controller.clone());
        Self {
            controller,
            gateway,
        }
    }

    /// Publisher speaking AMQP through `lapin`
    pub fn amqp(config: PublisherConfig) -> Self {
        Self::new(config, Arc::new(AmqpConnector::new()))
    }

    pub async fn connect(&self) -> PublisherResult<()> {
        self.controller.connect().await
    }

    /// Fire-and-forget; see [`PublishGateway::publish`]
    pub async fn publish<T: Serialize + ?Sized>(&self, exchange: &str, routing_key: &str, message: &T) {
        self.gateway.publish(exchange, routing_key, message).await
    }

    pub async fn publish_message(&self, message: &OutboundMessage) {
        self.gateway.publish_message(message).await
    }

    pub async fn close(&self) {
        self.controller.close().await
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.controller.is_reconnecting()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.controller.subscribe_state()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.controller.metrics().snapshot(self.state())
    }

    pub fn config(&self) -> &PublisherConfig {
        self.controller.config()
    }
}
