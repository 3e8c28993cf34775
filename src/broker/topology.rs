//! Exchange topology declared on every connect

use crate::transport::{BrokerChannel, TransportError};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Name of the single exchange notifications are routed through
pub const EXCHANGE_NAME: &str = "notifications.direct";

/// AMQP exchange kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        };
        f.write_str(name)
    }
}

/// Exchange parameters. Broker-side declaration is idempotent as long as
/// these stay identical across declares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeDeclaration {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

impl ExchangeDeclaration {
    /// The fixed notification exchange: `notifications.direct`, direct, durable
    pub fn notifications() -> Self {
        Self {
            name: EXCHANGE_NAME.to_string(),
            kind: ExchangeKind::Direct,
            durable: true,
        }
    }
}

/// Declares the topology a channel needs before its first publish
pub struct TopologyInitializer;

impl TopologyInitializer {
    /// Declare the notification exchange on `channel`.
    ///
    /// Any failure is reported as a connect failure by the caller.
    pub async fn declare(channel: &dyn BrokerChannel) -> Result<ExchangeDeclaration, TransportError> {
        let exchange = ExchangeDeclaration::notifications();
        channel.declare_exchange(&exchange).await?;
        debug!(
            exchange = %exchange.name,
            kind = %exchange.kind,
            durable = exchange.durable,
            "Exchange declared"
        );
        Ok(exchange)
    }
}
