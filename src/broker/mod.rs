//! Connection lifecycle and resilient publishing
//!
//! # Architecture
//!
//! - [`topology`] - declares the notification exchange on each connect
//! - [`state`] - pure connection state machine
//! - [`controller`] - owns the connection/channel pair and serializes transitions
//! - [`supervisor`] - bounded reconnection after unsolicited closes
//! - [`gateway`] - fire-and-forget publish path with lazy connect
//! - [`publisher`] - the façade handed to collaborators
//!
//! # Usage
//!
//! ```rust,no_run
//! use notification_publisher::broker::{NotificationPublisher, EXCHANGE_NAME};
//! use notification_publisher::config::PublisherConfig;
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let publisher = NotificationPublisher::amqp(PublisherConfig::default());
//! publisher.connect().await?;
//! publisher
//!     .publish(EXCHANGE_NAME, "email.queue", &json!({"type": "welcome_email"}))
//!     .await;
//! publisher.close().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod controller;
pub mod gateway;
pub mod publisher;
pub mod state;
pub mod supervisor;
pub mod topology;

pub use controller::BrokerConnectionController;
pub use gateway::{OutboundMessage, PublishGateway};
pub use publisher::NotificationPublisher;
pub use state::ConnectionState;
pub use supervisor::{ReconnectPolicy, ReconnectionSupervisor, RetryBudget};
pub use topology::{ExchangeDeclaration, ExchangeKind, TopologyInitializer, EXCHANGE_NAME};
