//! Tests for logging configuration and the publisher's log output

use notification_publisher::observability::logging::{build_filter, parse_level, LogFormat};
use notification_publisher::testing::MockBroker;
use notification_publisher::{NotificationPublisher, EXCHANGE_NAME};
use serde_json::json;
use std::io;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Collects formatted log output in memory
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn json_subscriber(logs: &CapturedLogs) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .json()
        .with_max_level(Level::DEBUG)
        .with_writer(logs.clone())
        .finish()
}

#[test]
fn test_log_format_parse() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("yaml"), LogFormat::Json);
}

#[test]
fn test_log_level_parsing() {
    assert_eq!(parse_level("warn"), Level::WARN);
    assert_eq!(parse_level("nonsense"), Level::INFO);
}

#[test]
fn test_default_filter_keeps_amqp_client_quiet() {
    let filter = build_filter(Level::TRACE, None).to_string();
    assert!(filter.contains("lapin=warn"));
    assert!(filter.contains("amq_protocol=warn"));
}

#[tokio::test]
async fn test_dropped_message_logged_at_error_with_routing() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(json_subscriber(&logs));

    let broker = MockBroker::unreachable();
    let publisher = NotificationPublisher::new(MockBroker::config(), broker.connector());
    publisher
        .publish(EXCHANGE_NAME, "email.queue", &json!({"type": "welcome_email"}))
        .await;

    let output = logs.contents();
    let dropped = output
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .find(|record| record["fields"]["message"] == "Dropped message")
        .expect("drop must be logged");

    assert_eq!(dropped["level"], "ERROR");
    assert_eq!(dropped["fields"]["exchange"], "notifications.direct");
    assert_eq!(dropped["fields"]["routing_key"], "email.queue");
    assert_eq!(dropped["fields"]["reason"], "connect");
}

#[tokio::test]
async fn test_connect_does_not_log_credentials() {
    let logs = CapturedLogs::default();
    let _guard = tracing::subscriber::set_default(json_subscriber(&logs));

    let broker = MockBroker::new();
    let publisher = NotificationPublisher::new(MockBroker::config(), broker.connector());
    publisher.connect().await.unwrap();
    publisher.close().await;

    let output = logs.contents();
    assert!(output.contains("Connected to broker"));
    assert!(!output.contains("guest:guest"), "password leaked: {output}");
}
