//! Observability: structured logging, publisher metrics and health endpoints

pub mod health;
pub mod logging;
pub mod metrics;

pub use health::HealthServer;
pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{MetricsSnapshot, PublisherMetrics};

pub use logging::{broker_span, publish_span};
