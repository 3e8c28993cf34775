//! Transport layer for broker communication
//!
//! The publishing policy (state machine, reconnection, lazy connect) never
//! talks to the wire directly. It goes through three traits that mirror the
//! AMQP object model: a [`Connector`] opens a [`BrokerConnection`], which
//! opens a [`BrokerChannel`]. The production implementation lives in
//! [`amqp`]; an in-memory one lives in `crate::testing::mocks`.

use crate::broker::topology::ExchangeDeclaration;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod amqp;

/// Unsolicited notifications raised by a live connection
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Transport-level error; diagnostic only, never a state change by itself
    Error(String),
    /// The connection was closed by the broker or the network
    Closed(Option<String>),
}

pub type BrokerEventSender = mpsc::UnboundedSender<BrokerEvent>;
pub type BrokerEventReceiver = mpsc::UnboundedReceiver<BrokerEvent>;

/// Wire-level failures. Cloneable so a coalesced connect can hand the same
/// outcome to every caller that joined it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Connection attempt timed out after {0}s")]
    Timeout(u64),
    #[error("Channel creation failed: {0}")]
    Channel(String),
    #[error("Exchange declaration failed: {0}")]
    Declare(String),
    #[error("Publishing failed: {0}")]
    Publish(String),
    #[error("Close failed: {0}")]
    Close(String),
}

/// Opens transport connections to a broker
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a connection to `url`.
    ///
    /// The connection must report unsolicited closes and transport errors on
    /// `events` for as long as it lives.
    async fn open(
        &self,
        url: &str,
        events: BrokerEventSender,
    ) -> Result<Box<dyn BrokerConnection>, TransportError>;
}

/// A live transport connection
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, TransportError>;

    /// Graceful close initiated by this client
    async fn close(&self) -> Result<(), TransportError>;
}

/// Logical publish pathway multiplexed over a connection
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn declare_exchange(&self, exchange: &ExchangeDeclaration) -> Result<(), TransportError>;

    /// Hand a message to the channel without waiting for a broker confirm
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;
}

/// Envelope properties attached to every publish
#[derive(Debug, Clone, PartialEq)]
pub struct MessageProperties {
    pub content_type: String,
    pub message_id: String,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}
