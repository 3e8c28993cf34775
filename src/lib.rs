//! Notification Publisher
//!
//! Resilient, fire-and-forget publishing of JSON notifications to a
//! RabbitMQ direct exchange.
//!
//! # Overview
//!
//! - one long-lived connection and channel, opened lazily or at startup
//! - the `notifications.direct` exchange declared on every connect
//! - bounded reconnection (5 attempts, 5 s apart by default) after the
//!   broker drops the connection
//! - `publish` never fails the caller; undeliverable messages are logged
//!   and dropped
//!
//! # Quick Start
//!
//! ```rust
//! use notification_publisher::testing::MockBroker;
//! use notification_publisher::{NotificationPublisher, EXCHANGE_NAME};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let broker = MockBroker::new();
//! let publisher = NotificationPublisher::new(MockBroker::config(), broker.connector());
//!
//! publisher
//!     .publish(EXCHANGE_NAME, "email.queue", &json!({"type": "welcome_email"}))
//!     .await;
//! publisher.close().await;
//!
//! assert_eq!(broker.published().len(), 1);
//! # });
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod observability;
pub mod testing;
pub mod transport;

pub use broker::{
    BrokerConnectionController, ConnectionState, ExchangeDeclaration, ExchangeKind,
    NotificationPublisher, OutboundMessage, PublishGateway, ReconnectPolicy, EXCHANGE_NAME,
};
pub use config::{ConfigError, PublisherConfig};
pub use error::{PublisherError, PublisherResult};
pub use transport::{Connector, TransportError};
