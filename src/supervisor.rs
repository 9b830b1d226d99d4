// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Reconnect Supervisor
//!
//! Keeps one subscription alive across broker failures. Each attempt runs a
//! brand new `ConsumerSession`; when the session closes on a recoverable
//! failure the supervisor waits for the backoff delay and starts another one.
//! There is no limit on the number of attempts, only cancelling the shutdown
//! token ends the loop for good.
//!
//! The supervisor publishes its progress on a `watch` channel, see
//! `SupervisorStatus`.

use crate::{
    backoff::ReconnectBackoff,
    handler::MessageHandler,
    session::{ConsumerSession, SessionOutcome, SessionSettings},
    subscription::Subscription,
    transport::TransportFactory,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Observable progress of a supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// Sessions started so far
    pub attempts: u64,
    /// Delay chosen after the last session
    pub reconnect_delay: Duration,
    /// How the last session ended
    pub last_outcome: Option<SessionOutcome>,
    /// The supervisor loop has ended
    pub stopped: bool,
}

pub struct ReconnectSupervisor {
    subscription: Arc<Subscription>,
    connector: Arc<dyn TransportFactory>,
    handler: Arc<dyn MessageHandler>,
    settings: SessionSettings,
    backoff: ReconnectBackoff,
    status: watch::Sender<SupervisorStatus>,
}

impl ReconnectSupervisor {
    /// # Parameters
    /// * `subscription` - Immutable parameters shared by every session
    /// * `connector` - Creates the transport of each session
    /// * `handler` - Receives every delivery
    /// * `settings` - Timeouts and handler failure policy of each session
    /// * `backoff` - Reconnect delay policy
    pub fn new(
        subscription: Subscription,
        connector: Arc<dyn TransportFactory>,
        handler: Arc<dyn MessageHandler>,
        settings: SessionSettings,
        backoff: ReconnectBackoff,
    ) -> Self {
        let (status, _) = watch::channel(SupervisorStatus::default());

        ReconnectSupervisor {
            subscription: Arc::new(subscription),
            connector,
            handler,
            settings,
            backoff,
            status,
        }
    }

    /// Receives every status update of this supervisor.
    pub fn status(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.subscribe()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Runs sessions one after another until `shutdown` is cancelled or a
    /// session ends without asking to reconnect.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let span = info_span!(
            "reconnect_supervisor",
            consumer = self.subscription.consumer_id,
            topic = self.subscription.topic,
        );

        self.supervise(shutdown).instrument(span).await
    }

    async fn supervise(&mut self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            self.status.send_modify(|status| status.attempts += 1);

            let mut session = ConsumerSession::new(
                self.subscription.clone(),
                self.connector.create(),
                self.handler.clone(),
                self.settings.clone(),
            );
            session.run(&shutdown).await;

            let outcome = session.outcome();
            self.status
                .send_modify(|status| status.last_outcome = Some(outcome));

            if shutdown.is_cancelled() {
                info!("stop requested");
                break;
            }

            if !outcome.should_reconnect {
                info!("session stopped, not reconnecting");
                break;
            }

            let delay = self.backoff.next(outcome.was_consuming);
            self.status
                .send_modify(|status| status.reconnect_delay = delay);
            warn!(
                delay_secs = delay.as_secs(),
                was_consuming = outcome.was_consuming,
                "reconnecting"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => {
                    info!("stop requested while waiting to reconnect");
                    break;
                }
            }
        }

        self.status.send_modify(|status| status.stopped = true);
    }
}
