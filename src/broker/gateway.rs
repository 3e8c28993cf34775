//! Fire-and-forget send path
//!
//! `publish` never returns an error. A message either reaches the channel
//! buffer or is dropped with an error log and a metrics tick; there is no
//! outbound queue and no per-message retry.

use super::controller::BrokerConnectionController;
use crate::error::{PublisherError, PublisherResult};
use crate::transport::{BrokerChannel, MessageProperties};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// An immutable message ready to hand to a channel
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    exchange: String,
    routing_key: String,
    payload: Bytes,
    properties: MessageProperties,
}

impl OutboundMessage {
    /// Serialize `message` as JSON
    pub fn json<T: Serialize + ?Sized>(
        exchange: impl Into<String>,
        routing_key: impl Into<String>,
        message: &T,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(message)?;
        Ok(Self {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            payload: Bytes::from(payload),
            properties: MessageProperties {
                content_type: JSON_CONTENT_TYPE.to_string(),
                message_id: Uuid::new_v4().to_string(),
                timestamp: u64::try_from(Utc::now().timestamp()).unwrap_or_default(),
            },
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn properties(&self) -> &MessageProperties {
        &self.properties
    }
}

/// Public send path over the controller's channel
#[derive(Clone)]
pub struct PublishGateway {
    controller: BrokerConnectionController,
}

impl PublishGateway {
    pub fn new(controller: BrokerConnectionController) -> Self {
        Self { controller }
    }

    /// Serialize and publish; failures are logged and the message dropped
    #[tracing::instrument(name = "publish", skip_all, fields(exchange = %exchange, routing_key = %routing_key))]
    pub async fn publish<T: Serialize + ?Sized>(&self, exchange: &str, routing_key: &str, message: &T) {
        let result = match OutboundMessage::json(exchange, routing_key, message) {
            Ok(outbound) => self.send(&outbound).await,
            Err(e) => Err(PublisherError::Serialization(e)),
        };
        self.record(exchange, routing_key, result);
    }

    /// Publish an already-built message
    pub async fn publish_message(&self, message: &OutboundMessage) {
        let result = self.send(message).await;
        self.record(message.exchange(), message.routing_key(), result);
    }

    pub(crate) async fn send(&self, message: &OutboundMessage) -> PublisherResult<()> {
        let channel = self.acquire_channel().await?;
        channel
            .publish(
                message.exchange(),
                message.routing_key(),
                message.payload(),
                message.properties(),
            )
            .await
            .map_err(PublisherError::Publish)
    }

    /// Live channel, lazily connecting when none exists. While a
    /// reconnection episode runs the message is dropped instead, so the
    /// publish path never competes with the supervisor.
    async fn acquire_channel(&self) -> PublisherResult<Arc<dyn BrokerChannel>> {
        if let Some(channel) = self.controller.live_channel().await {
            return Ok(channel);
        }

        if self.controller.is_reconnecting() {
            return Err(PublisherError::ReconnectInProgress);
        }

        debug!("No live channel; connecting before publish");
        self.controller.connect().await?;

        self.controller
            .live_channel()
            .await
            .ok_or_else(|| PublisherError::NotConnected {
                state: self.controller.state(),
            })
    }

    fn record(&self, exchange: &str, routing_key: &str, result: PublisherResult<()>) {
        let metrics = self.controller.metrics();
        match result {
            Ok(()) => {
                metrics.message_published();
                debug!(exchange, routing_key, "Published message");
            }
            Err(e) => {
                metrics.message_dropped();
                error!(
                    exchange,
                    routing_key,
                    reason = e.kind(),
                    error = %e,
                    "Dropped message"
                );
            }
        }
    }
}
