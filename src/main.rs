//! notification-publisher command line entry point

use clap::{Parser, Subcommand};
use notification_publisher::broker::{NotificationPublisher, EXCHANGE_NAME};
use notification_publisher::config::{redact_url, PublisherConfig};
use notification_publisher::observability::{init_default_logging, publish_span, HealthServer};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn, Instrument};

/// Fire-and-forget notification publisher for RabbitMQ
#[derive(Parser)]
#[command(name = "notification-publisher")]
#[command(about = "Publish JSON notifications to a RabbitMQ direct exchange")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish newline-delimited JSON events read from stdin until EOF or a signal
    Run,
    /// Publish a single message and exit
    Publish {
        #[arg(long)]
        routing_key: String,
        /// JSON payload
        #[arg(long)]
        payload: String,
        #[arg(long, default_value = EXCHANGE_NAME)]
        exchange: String,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// One line of `run` input
#[derive(Debug, Deserialize, PartialEq)]
struct InboundEvent {
    routing_key: String,
    payload: serde_json::Value,
    #[serde(default = "default_exchange")]
    exchange: String,
}

fn default_exchange() -> String {
    EXCHANGE_NAME.to_string()
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_publisher(config).await,
        Commands::Publish {
            routing_key,
            payload,
            exchange,
        } => publish_once(config, &exchange, &routing_key, &payload).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<PublisherConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(PublisherConfig::load_from_file(path)?);
    }

    for candidate in ["publisher.toml", "config/publisher.toml"] {
        let path = Path::new(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(PublisherConfig::load_from_file(path)?);
        }
    }

    info!("No configuration file found; using defaults");
    Ok(PublisherConfig::default())
}

async fn run_publisher(config: PublisherConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting notification publisher"
    );

    let publisher = NotificationPublisher::amqp(config.clone());

    let health_server = Arc::new(HealthServer::new(
        config.service.name.clone(),
        config.service.health_port,
        publisher.clone(),
    ));
    let health_task = tokio::spawn(health_server.start());

    // Only a configuration error is worth refusing to start over; anything
    // else is left to the reconnection supervisor
    if let Err(e) = publisher.connect().await {
        if e.is_fatal() {
            health_task.abort();
            return Err(e.into());
        }
        warn!(error = %e, "Starting without a broker connection");
    }

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no: u64 = 0;

    info!("Reading events from stdin");

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input");
                    break;
                };
                line_no += 1;
                if line.trim().is_empty() {
                    continue;
                }
                match parse_event(&line) {
                    Ok(event) => {
                        publisher
                            .publish(&event.exchange, &event.routing_key, &event.payload)
                            .instrument(publish_span!(line = line_no))
                            .await;
                    }
                    Err(e) => warn!(line = line_no, error = %e, "Skipping malformed event"),
                }
            }
        }
    }

    publisher.close().await;
    health_task.abort();

    let metrics = publisher.metrics();
    info!(
        published = metrics.messages_published,
        dropped = metrics.messages_dropped,
        "Publisher stopped"
    );
    Ok(())
}

fn parse_event(line: &str) -> Result<InboundEvent, serde_json::Error> {
    serde_json::from_str(line)
}

async fn publish_once(
    config: PublisherConfig,
    exchange: &str,
    routing_key: &str,
    payload: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload: serde_json::Value = serde_json::from_str(payload)?;
    let publisher = NotificationPublisher::amqp(config);

    if let Err(e) = publisher.connect().await {
        publisher.close().await;
        return Err(e.into());
    }
    publisher.publish(exchange, routing_key, &payload).await;
    publisher.close().await;

    if publisher.metrics().messages_dropped > 0 {
        return Err(format!("message to {exchange}/{routing_key} was dropped").into());
    }
    info!(exchange, routing_key, "Message published");
    Ok(())
}

fn handle_config_command(
    mut config: PublisherConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    match config.broker.resolve_url() {
        Ok(url) => info!(broker = %redact_url(&url), "Broker URL resolved"),
        Err(e) => warn!(error = %e, "Broker URL not available; connect() will fail"),
    }

    if show {
        config.broker.url = config.broker.url.as_deref().map(redact_url);
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_defaults_exchange() {
        let event = parse_event(r#"{"routing_key":"email.queue","payload":{"type":"welcome_email"}}"#)
            .unwrap();
        assert_eq!(event.exchange, EXCHANGE_NAME);
        assert_eq!(event.routing_key, "email.queue");
        assert_eq!(event.payload["type"], "welcome_email");
    }

    #[test]
    fn test_parse_event_explicit_exchange() {
        let event =
            parse_event(r#"{"routing_key":"sms.queue","payload":1,"exchange":"alerts"}"#).unwrap();
        assert_eq!(event.exchange, "alerts");
    }

    #[test]
    fn test_parse_event_requires_routing_key() {
        assert!(parse_event(r#"{"payload":{}}"#).is_err());
        assert!(parse_event("not json").is_err());
    }

    #[test]
    fn test_cli_parses_publish() {
        let cli = Cli::parse_from([
            "notification-publisher",
            "publish",
            "--routing-key",
            "email.queue",
            "--payload",
            "{}",
        ]);
        match cli.command {
            Commands::Publish { exchange, .. } => assert_eq!(exchange, EXCHANGE_NAME),
            _ => panic!("expected publish subcommand"),
        }
    }
}
