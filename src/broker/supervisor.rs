//! Bounded reconnection after unsolicited connection loss
//!
//! At most one supervisor episode runs at a time. The episode slot is a
//! single atomic: starting an episode is a compare-and-swap from "idle",
//! so a connect failure that happens while an episode is running joins it
//! instead of spawning a second loop.

use super::controller::{BrokerConnectionController, ConnectOrigin};
use super::state::{ConnectionState, LinkStatus};
use crate::config::ReconnectSection;
use crate::error::PublisherError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

const IDLE: u64 = 0;

/// Fixed-count, fixed-delay retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&ReconnectSection> for ReconnectPolicy {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            max_attempts: section.max_attempts,
            delay: Duration::from_secs(section.delay_secs),
        }
    }
}

/// Attempts left in one supervisor episode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryBudget {
    max_attempts: u32,
    used: u32,
    delay: Duration,
}

impl RetryBudget {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            used: 0,
            delay: policy.delay,
        }
    }

    pub fn remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.used)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Spend one attempt; returns its 1-based number
    pub fn consume(&mut self) -> u32 {
        if !self.is_exhausted() {
            self.used += 1;
        }
        self.used
    }
}

/// What the supervisor should do after its delay has elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32 },
    AbortShutdownRequested,
    AbortAlreadyConnected,
    AbortSuperseded,
    AbortBudgetExhausted,
}

/// Why an episode was started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    UnsolicitedClose,
    ConnectFailed,
}

/// How an episode ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    Reconnected { attempt: u32 },
    AlreadyConnected,
    Cancelled,
    Superseded,
    Exhausted,
    Aborted,
}

/// Decide the next step of an episode (pure function)
pub fn decide(budget: &RetryBudget, status: LinkStatus, owns_slot: bool) -> ReconnectionDecision {
    if !owns_slot {
        return ReconnectionDecision::AbortSuperseded;
    }
    if status.shutdown_requested {
        return ReconnectionDecision::AbortShutdownRequested;
    }
    if status.state == ConnectionState::Connected {
        return ReconnectionDecision::AbortAlreadyConnected;
    }
    if budget.is_exhausted() {
        return ReconnectionDecision::AbortBudgetExhausted;
    }
    ReconnectionDecision::Proceed {
        attempt: budget.max_attempts - budget.remaining() + 1,
    }
}

/// Holds the episode slot for the lifetime of a supervisor task
struct EpisodeSlot {
    active: Arc<AtomicU64>,
    episode: u64,
}

impl EpisodeSlot {
    fn is_current(&self) -> bool {
        self.active.load(Ordering::Acquire) == self.episode
    }
}

impl Drop for EpisodeSlot {
    fn drop(&mut self) {
        // Only clear the slot if a newer episode has not taken it
        let _ = self.active.compare_exchange(
            self.episode,
            IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Drives bounded retries of the controller's connect
#[derive(Debug)]
pub struct ReconnectionSupervisor {
    policy: ReconnectPolicy,
    active: Arc<AtomicU64>,
    next_episode: AtomicU64,
}

impl ReconnectionSupervisor {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            active: Arc::new(AtomicU64::new(IDLE)),
            next_episode: AtomicU64::new(IDLE),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) != IDLE
    }

    /// Free the slot once a connection is established, whoever made it.
    /// A still-running loop notices on its next check and stops.
    pub(crate) fn release(&self) {
        self.active.store(IDLE, Ordering::Release);
    }

    /// Start an episode unless one is already running.
    ///
    /// Returns false when the trigger joined an existing episode.
    pub(crate) fn trigger(
        &self,
        controller: &BrokerConnectionController,
        trigger: ReconnectTrigger,
    ) -> bool {
        let episode = self.next_episode.fetch_add(1, Ordering::AcqRel) + 1;
        if self
            .active
            .compare_exchange(IDLE, episode, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(?trigger, "Reconnection already in progress; joining current episode");
            return false;
        }

        controller.metrics().reconnect_episode_started();
        info!(
            episode,
            ?trigger,
            max_attempts = self.policy.max_attempts,
            delay_secs = self.policy.delay.as_secs_f64(),
            "Starting reconnection supervisor"
        );

        let slot = EpisodeSlot {
            active: self.active.clone(),
            episode,
        };
        let controller = controller.clone();
        let policy = self.policy.clone();

        tokio::spawn(
            async move {
                let outcome = Self::run(&controller, &policy, &slot).await;
                Self::log_outcome(episode, outcome, &policy);
                if outcome == SupervisorOutcome::Exhausted {
                    controller.metrics().reconnect_exhausted();
                }
            }
            .instrument(crate::broker_span!(operation = "reconnect", episode)),
        );

        true
    }

    async fn run(
        controller: &BrokerConnectionController,
        policy: &ReconnectPolicy,
        slot: &EpisodeSlot,
    ) -> SupervisorOutcome {
        let mut budget = RetryBudget::new(policy);

        loop {
            if budget.is_exhausted() {
                return SupervisorOutcome::Exhausted;
            }

            // Only this task sleeps; the controller lock is not held here
            tokio::time::sleep(budget.delay()).await;

            let status = controller.link_status().await;
            match decide(&budget, status, slot.is_current()) {
                ReconnectionDecision::Proceed { attempt } => {
                    budget.consume();
                    info!(
                        episode = slot.episode,
                        attempt,
                        max_attempts = policy.max_attempts,
                        "Reconnection attempt"
                    );

                    match controller
                        .establish(ConnectOrigin::Supervisor {
                            episode: slot.episode,
                        })
                        .await
                    {
                        Ok(()) => return SupervisorOutcome::Reconnected { attempt },
                        Err(PublisherError::ShutdownRequested) => {
                            return SupervisorOutcome::Cancelled
                        }
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "Reconnection aborted by configuration error");
                            return SupervisorOutcome::Aborted;
                        }
                        Err(e) => {
                            warn!(
                                attempt,
                                remaining = budget.remaining(),
                                error = %e,
                                "Reconnection attempt failed"
                            );
                        }
                    }
                }
                ReconnectionDecision::AbortShutdownRequested => return SupervisorOutcome::Cancelled,
                ReconnectionDecision::AbortAlreadyConnected => {
                    return SupervisorOutcome::AlreadyConnected
                }
                ReconnectionDecision::AbortSuperseded => return SupervisorOutcome::Superseded,
                ReconnectionDecision::AbortBudgetExhausted => return SupervisorOutcome::Exhausted,
            }
        }
    }

    fn log_outcome(episode: u64, outcome: SupervisorOutcome, policy: &ReconnectPolicy) {
        match outcome {
            SupervisorOutcome::Reconnected { attempt } => {
                info!(episode, attempt, "Reconnected to broker");
            }
            SupervisorOutcome::AlreadyConnected | SupervisorOutcome::Superseded => {
                debug!(episode, ?outcome, "Reconnection no longer needed");
            }
            SupervisorOutcome::Cancelled => {
                info!(episode, "Reconnection cancelled by close()");
            }
            SupervisorOutcome::Exhausted => {
                error!(
                    episode,
                    max_attempts = policy.max_attempts,
                    "Reconnection attempts exhausted; staying disconnected until the next broker close"
                );
            }
            SupervisorOutcome::Aborted => {
                error!(episode, "Reconnection aborted");
            }
        }
    }
}
