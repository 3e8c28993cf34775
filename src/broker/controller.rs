//! Owner of the broker connection and its channel
//!
//! Every state mutation happens under one async mutex. Holding it across a
//! connect attempt is what makes concurrent `connect()` calls coalesce: a
//! caller queued behind an attempt that finished after its own call began
//! adopts that attempt's outcome instead of opening another connection.

use super::state::{self, ConnectionEvent, ConnectionState, LinkStatus};
use super::supervisor::{ReconnectPolicy, ReconnectTrigger, ReconnectionSupervisor};
use super::topology::TopologyInitializer;
use crate::config::{redact_url, PublisherConfig};
use crate::error::{PublisherError, PublisherResult};
use crate::observability::metrics::PublisherMetrics;
use crate::transport::{
    BrokerChannel, BrokerConnection, BrokerEvent, BrokerEventReceiver, Connector, TransportError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Who asked for a connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOrigin {
    /// Startup code or the lazy-connect path of a publish
    Caller,
    /// An attempt made by a reconnection episode
    Supervisor { episode: u64 },
}

/// Everything guarded by the controller lock
struct Link {
    state: ConnectionState,
    connection: Option<Box<dyn BrokerConnection>>,
    channel: Option<Arc<dyn BrokerChannel>>,
    /// Bumped for every established connection; tags broker events
    generation: u64,
    listener: Option<JoinHandle<()>>,
    last_error: Option<String>,
    /// Sequence number and outcome of the most recent attempt
    last_attempt: Option<(u64, Result<(), TransportError>)>,
    shutdown_requested: bool,
}

impl Link {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            connection: None,
            channel: None,
            generation: 0,
            listener: None,
            last_error: None,
            last_attempt: None,
            shutdown_requested: false,
        }
    }
}

struct ControllerInner {
    connector: Arc<dyn Connector>,
    config: PublisherConfig,
    link: Mutex<Link>,
    state_tx: watch::Sender<ConnectionState>,
    attempts_started: AtomicU64,
    attempts_completed: AtomicU64,
    supervisor: ReconnectionSupervisor,
    metrics: Arc<PublisherMetrics>,
}

/// Single owner of the connection/channel pair.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct BrokerConnectionController {
    inner: Arc<ControllerInner>,
}

impl BrokerConnectionController {
    pub fn new(
        config: PublisherConfig,
        connector: Arc<dyn Connector>,
        metrics: Arc<PublisherMetrics>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let policy = ReconnectPolicy::from(&config.reconnect);

        Self {
            inner: Arc::new(ControllerInner {
                connector,
                config,
                link: Mutex::new(Link::new()),
                state_tx,
                attempts_started: AtomicU64::new(0),
                attempts_completed: AtomicU64::new(0),
                supervisor: ReconnectionSupervisor::new(policy),
                metrics,
            }),
        }
    }

    /// Connect to the broker; a no-op when already connected.
    ///
    /// A configuration error is returned as-is and never retried. Any other
    /// failure hands off to the reconnection supervisor (joining a running
    /// episode if there is one) before being returned.
    pub async fn connect(&self) -> PublisherResult<()> {
        match self.establish(ConnectOrigin::Caller).await {
            Err(PublisherError::Connect(e)) => {
                let started = self
                    .inner
                    .supervisor
                    .trigger(self, ReconnectTrigger::ConnectFailed);
                warn!(
                    error = %e,
                    supervisor_started = started,
                    "Broker connect failed; reconnection supervisor engaged"
                );
                Err(PublisherError::Connect(e))
            }
            other => other,
        }
    }

    /// One connect attempt, serialized with every other state change
    pub(crate) async fn establish(&self, origin: ConnectOrigin) -> PublisherResult<()> {
        let completed_at_call = self.inner.attempts_completed.load(Ordering::Acquire);
        let mut link = self.inner.link.lock().await;

        match origin {
            ConnectOrigin::Caller => link.shutdown_requested = false,
            // close() may have run between the supervisor's check and this lock
            ConnectOrigin::Supervisor { episode } if link.shutdown_requested => {
                debug!(episode, "Shutdown requested; skipping reconnection attempt");
                return Err(PublisherError::ShutdownRequested);
            }
            ConnectOrigin::Supervisor { .. } => {}
        }

        if link.state == ConnectionState::Connected {
            if matches!(origin, ConnectOrigin::Supervisor { .. }) {
                self.inner.supervisor.release();
            }
            return Ok(());
        }

        // An attempt finished while this call waited for the lock: adopt it.
        // Leaving Connected clears it, so a stale success is never adopted.
        if let Some((seq, outcome)) = &link.last_attempt {
            if *seq > completed_at_call {
                debug!(attempt = seq, "Joining outcome of concurrent connect attempt");
                return outcome.clone().map_err(PublisherError::Connect);
            }
        }

        let url = self.inner.config.broker.resolve_url()?;

        let seq = self.inner.attempts_started.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.metrics.connect_attempt();
        self.transition(&mut link, ConnectionEvent::AttemptStarted);
        debug!(attempt = seq, broker = %redact_url(&url), ?origin, "Connecting to broker");

        match self.open_link(&url).await {
            Ok((connection, channel, events)) => {
                link.generation += 1;
                let generation = link.generation;

                link.connection = Some(connection);
                link.channel = Some(Arc::from(channel));
                link.listener = Some(self.spawn_event_listener(generation, events));
                link.last_error = None;
                link.last_attempt = Some((seq, Ok(())));
                self.inner.attempts_completed.store(seq, Ordering::Release);
                self.transition(&mut link, ConnectionEvent::Established);

                self.inner.supervisor.release();
                self.inner.metrics.connection_established();
                info!(
                    generation,
                    broker = %redact_url(&url),
                    "Connected to broker and exchange declared"
                );
                Ok(())
            }
            Err(e) => {
                link.last_error = Some(e.to_string());
                link.last_attempt = Some((seq, Err(e.clone())));
                self.inner.attempts_completed.store(seq, Ordering::Release);
                self.transition(&mut link, ConnectionEvent::AttemptFailed(e.to_string()));
                self.inner.metrics.connect_failed();
                Err(PublisherError::Connect(e))
            }
        }
    }

    /// Open transport, channel and topology; undo partial work on failure
    async fn open_link(
        &self,
        url: &str,
    ) -> Result<
        (
            Box<dyn BrokerConnection>,
            Box<dyn BrokerChannel>,
            BrokerEventReceiver,
        ),
        TransportError,
    > {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let timeout = self.inner.config.broker.connect_timeout();

        let connection = tokio::time::timeout(timeout, self.inner.connector.open(url, events_tx))
            .await
            .map_err(|_| TransportError::Timeout(timeout.as_secs()))??;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        if let Err(e) = TopologyInitializer::declare(channel.as_ref()).await {
            let _ = channel.close().await;
            let _ = connection.close().await;
            return Err(e);
        }

        Ok((connection, channel, events_rx))
    }

    /// One listener per connection. It holds only a weak reference so a
    /// dropped controller is not kept alive by its own connection.
    fn spawn_event_listener(&self, generation: u64, mut events: BrokerEventReceiver) -> JoinHandle<()> {
        let controller = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    BrokerEvent::Error(message) => {
                        warn!(generation, error = %message, "Broker transport error");
                    }
                    BrokerEvent::Closed(reason) => {
                        if let Some(controller) = Self::upgrade(&controller) {
                            controller.handle_unsolicited_close(generation, reason).await;
                        }
                        break;
                    }
                }
            }
        })
    }

    fn upgrade(inner: &Weak<ControllerInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    async fn handle_unsolicited_close(&self, generation: u64, reason: Option<String>) {
        {
            let mut link = self.inner.link.lock().await;
            if link.generation != generation || link.state != ConnectionState::Connected {
                debug!(generation, "Ignoring close event for a retired connection");
                return;
            }

            link.channel = None;
            link.connection = None;
            // This task is the listener; detach rather than abort it
            link.listener = None;
            link.last_error = reason.clone();
            self.transition(&mut link, ConnectionEvent::ClosedByBroker(reason));
            self.inner.metrics.connection_lost();
        }

        self.inner
            .supervisor
            .trigger(self, ReconnectTrigger::UnsolicitedClose);
    }

    /// Best-effort graceful shutdown; never fails and is idempotent
    pub async fn close(&self) {
        let mut link = self.inner.link.lock().await;
        link.shutdown_requested = true;

        if link.state == ConnectionState::Disconnected && link.connection.is_none() {
            debug!("close() on a disconnected controller; nothing to do");
            return;
        }

        self.transition(&mut link, ConnectionEvent::CloseRequested);
        if let Some(listener) = link.listener.take() {
            listener.abort();
        }

        // Channel first, then connection; neither failure skips the other
        if let Some(channel) = link.channel.take() {
            if let Err(e) = channel.close().await {
                warn!(error = %e, "Failed to close broker channel");
            }
        }
        if let Some(connection) = link.connection.take() {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Failed to close broker connection");
            }
        }

        self.transition(&mut link, ConnectionEvent::Closed);
        info!("Broker connection closed");
    }

    /// The live channel, if any. A channel that reports closed is torn down
    /// here so the caller's next step is a fresh connect.
    pub(crate) async fn live_channel(&self) -> Option<Arc<dyn BrokerChannel>> {
        let mut link = self.inner.link.lock().await;
        if !state::can_publish(link.state) {
            return None;
        }

        if let Some(channel) = link.channel.as_ref().filter(|channel| channel.is_open()) {
            return Some(channel.clone());
        }

        if let Some(listener) = link.listener.take() {
            listener.abort();
        }
        link.channel = None;
        if let Some(connection) = link.connection.take() {
            if let Err(e) = connection.close().await {
                warn!(error = %e, "Failed to close broker connection after channel loss");
            }
        }
        self.transition(&mut link, ConnectionEvent::ChannelLost);
        self.inner.metrics.connection_lost();
        None
    }

    fn transition(&self, link: &mut Link, event: ConnectionEvent) {
        let from = link.state;
        let to = state::next_state(from, &event);
        if from != to {
            state::log_transition(from, to, &event);
            if from == ConnectionState::Connected {
                link.last_attempt = None;
            }
            link.state = to;
            self.inner.state_tx.send_replace(to);
        }
    }

    pub async fn link_status(&self) -> LinkStatus {
        let link = self.inner.link.lock().await;
        LinkStatus {
            state: link.state,
            shutdown_requested: link.shutdown_requested,
        }
    }

    /// Current state without taking the lock
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.link.lock().await.last_error.clone()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.supervisor.is_active()
    }

    pub fn metrics(&self) -> &Arc<PublisherMetrics> {
        &self.inner.metrics
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.inner.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::topology::ExchangeDeclaration;
    use crate::config::BrokerSection;
    use crate::testing::MockBroker;

    fn controller_for(broker: &MockBroker) -> BrokerConnectionController {
        BrokerConnectionController::new(
            MockBroker::config(),
            broker.connector(),
            Arc::new(PublisherMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_connect_declares_exchange_once() {
        let broker = MockBroker::new();
        let controller = controller_for(&broker);

        controller.connect().await.unwrap();

        assert_eq!(controller.state(), ConnectionState::Connected);
        assert_eq!(broker.connections_opened(), 1);
        assert_eq!(broker.channels_created(), 1);
        assert_eq!(broker.declarations(), vec![ExchangeDeclaration::notifications()]);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let broker = MockBroker::new();
        let controller = controller_for(&broker);

        controller.connect().await.unwrap();
        controller.connect().await.unwrap();

        assert_eq!(broker.open_attempts(), 1);
        assert_eq!(broker.declarations().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_url_is_fatal_and_not_retried() {
        let broker = MockBroker::new();
        let mut config = MockBroker::config();
        config.broker = BrokerSection {
            url: None,
            url_env: "NOTIFICATION_PUBLISHER_TEST_UNSET_VAR".to_string(),
            ..Default::default()
        };
        let controller =
            BrokerConnectionController::new(config, broker.connector(), Arc::new(PublisherMetrics::new()));

        let err = controller.connect().await.unwrap_err();

        assert!(err.is_fatal());
        assert!(!controller.is_reconnecting());
        assert_eq!(broker.open_attempts(), 0);
        assert_eq!(controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_declare_failure_is_connect_failure() {
        let broker = MockBroker::new();
        broker.fail_declares(true);
        let controller = controller_for(&broker);

        let err = controller.connect().await.unwrap_err();

        assert!(matches!(err, PublisherError::Connect(TransportError::Declare(_))));
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(broker.connections_closed(), 1, "partial connection must be closed");
        assert!(controller.last_error().await.is_some());
        controller.close().await;
    }

    #[tokio::test]
    async fn test_close_when_never_connected_is_noop() {
        let broker = MockBroker::new();
        let controller = controller_for(&broker);

        controller.close().await;
        controller.close().await;

        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(broker.channels_closed(), 0);
        assert_eq!(broker.connections_closed(), 0);
    }

    #[tokio::test]
    async fn test_close_attempts_connection_even_if_channel_close_fails() {
        let broker = MockBroker::new();
        let controller = controller_for(&broker);
        controller.connect().await.unwrap();
        broker.fail_channel_close(true);

        controller.close().await;

        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(broker.connections_closed(), 1);
        assert!(controller.live_channel().await.is_none());
    }

    #[tokio::test]
    async fn test_closed_channel_is_torn_down_on_use() {
        let broker = MockBroker::new();
        let controller = controller_for(&broker);
        controller.connect().await.unwrap();

        broker.close_channels_silently();

        assert!(controller.live_channel().await.is_none());
        assert_eq!(controller.state(), ConnectionState::Disconnected);
        assert_eq!(broker.connections_closed(), 1);
        assert_eq!(broker.live_connections(), 0);

        controller.connect().await.unwrap();
        assert!(controller.live_channel().await.is_some());
        assert_eq!(broker.connections_opened(), 2);
    }

    #[tokio::test]
    async fn test_close_event_from_retired_connection_is_ignored() {
        let broker = MockBroker::new();
        let controller = controller_for(&broker);
        controller.connect().await.unwrap();

        controller
            .handle_unsolicited_close(99, Some("stale".to_string()))
            .await;

        assert_eq!(controller.state(), ConnectionState::Connected);
        assert!(!controller.is_reconnecting());
        assert!(controller.live_channel().await.is_some());
    }

    #[tokio::test]
    async fn test_state_watch_sees_connected() {
        let broker = MockBroker::new();
        let controller = controller_for(&broker);
        let mut rx = controller.subscribe_state();

        controller.connect().await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);
    }
}
