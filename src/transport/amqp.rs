//! AMQP 0-9-1 transport backed by `lapin`

use super::{
    BrokerChannel, BrokerConnection, BrokerEvent, BrokerEventSender, Connector, MessageProperties,
    TransportError,
};
use crate::broker::topology::{ExchangeDeclaration, ExchangeKind};
use async_trait::async_trait;
use lapin::{
    options::{BasicPublishOptions, ExchangeDeclareOptions},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::debug;

/// AMQP reply code for a normal shutdown
const REPLY_SUCCESS: u16 = 200;

/// Connector that opens real AMQP connections
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

impl AmqpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    async fn open(
        &self,
        url: &str,
        events: BrokerEventSender,
    ) -> Result<Box<dyn BrokerConnection>, TransportError> {
        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        // lapin reports both broker-initiated closes and I/O failures through
        // the error hook; the paired close is derived from the status.
        let status = connection.status().clone();
        connection.on_error(move |err| {
            let _ = events.send(BrokerEvent::Error(err.to_string()));
            if !status.connected() {
                let _ = events.send(BrokerEvent::Closed(Some(err.to_string())));
            }
        });

        debug!(target: "amqp_transport", "AMQP connection opened");
        Ok(Box::new(AmqpConnection { connection }))
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        Ok(Box::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.connection
            .close(REPLY_SUCCESS, "client shutdown")
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

struct AmqpChannel {
    channel: Channel,
}

fn lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Headers => lapin::ExchangeKind::Headers,
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), TransportError> {
        self.channel
            .exchange_declare(
                &exchange.name,
                lapin_kind(exchange.kind),
                ExchangeDeclareOptions {
                    durable: exchange.durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::Declare(e.to_string()))
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), TransportError> {
        let amqp_properties = BasicProperties::default()
            .with_content_type(properties.content_type.as_str().into())
            .with_message_id(properties.message_id.as_str().into())
            .with_timestamp(properties.timestamp);

        // The returned confirm is intentionally dropped: this is a
        // non-confirm channel and delivery ends at the channel buffer.
        let _confirm = self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                amqp_properties,
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.channel
            .close(REPLY_SUCCESS, "client shutdown")
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_kind_mapping() {
        assert!(matches!(
            lapin_kind(ExchangeKind::Direct),
            lapin::ExchangeKind::Direct
        ));
        assert!(matches!(
            lapin_kind(ExchangeKind::Topic),
            lapin::ExchangeKind::Topic
        ));
    }

    #[tokio::test]
    async fn test_open_unreachable_broker_fails() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let connector = AmqpConnector::new();

        // Nothing listens on port 1 locally
        let result = connector.open("amqp://127.0.0.1:1/%2f", events_tx).await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
