// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topic Dispatcher
//!
//! This module is the entry point for running subscriptions. The dispatcher
//! starts one `ReconnectSupervisor` per subscription, each on its own task and
//! with its own cancellation token derived from the dispatcher's root token.
//! Subscriptions share nothing but the transport factory and their handler,
//! so a failing subscription never affects another one.

use crate::{
    backoff::ReconnectBackoff,
    channel::LapinConnector,
    config::Configs,
    errors::AmqpError,
    handler::MessageHandler,
    session::SessionSettings,
    subscription::Subscription,
    supervisor::{ReconnectSupervisor, SupervisorStatus},
    transport::TransportFactory,
};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct TopicDispatcher {
    connector: Arc<dyn TransportFactory>,
    settings: SessionSettings,
    max_reconnect_delay_secs: u64,
    shutdown: CancellationToken,
}

impl TopicDispatcher {
    /// Creates a new dispatcher.
    ///
    /// # Parameters
    /// * `connector` - Creates the transport of every session
    /// * `settings` - Timeouts and handler failure policy of every session
    /// * `max_reconnect_delay_secs` - Upper bound of the reconnect delay
    pub fn new(
        connector: Arc<dyn TransportFactory>,
        settings: SessionSettings,
        max_reconnect_delay_secs: u64,
    ) -> Self {
        TopicDispatcher {
            connector,
            settings,
            max_reconnect_delay_secs,
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a dispatcher talking to RabbitMQ through lapin.
    pub fn from_configs(cfg: &Configs) -> Self {
        TopicDispatcher::new(
            Arc::new(LapinConnector::new(&cfg.app.name)),
            SessionSettings::from(&cfg.consumer),
            cfg.consumer.max_reconnect_delay_secs,
        )
    }

    /// Starts consuming `subscription` in the background.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Parameters
    /// * `subscription` - What to consume
    /// * `handler` - Receives every delivery of this subscription
    ///
    /// # Returns
    /// A handle to observe and stop the subscription
    pub fn start(
        &self,
        subscription: Subscription,
        handler: Arc<dyn MessageHandler>,
    ) -> SubscriptionHandle {
        let token = self.shutdown.child_token();
        let consumer_id = subscription.consumer_id().to_owned();
        let topic = subscription.topic().to_owned();

        let mut supervisor = ReconnectSupervisor::new(
            subscription,
            self.connector.clone(),
            handler,
            self.settings.clone(),
            ReconnectBackoff::new(self.max_reconnect_delay_secs),
        );
        let status = supervisor.status();

        info!(consumer = consumer_id, topic, "starting subscription");

        let task = tokio::spawn({
            let token = token.clone();
            async move { supervisor.run(token).await }
        });

        SubscriptionHandle {
            consumer_id,
            topic,
            token,
            status,
            task,
        }
    }

    /// Stops every subscription started by this dispatcher. Use
    /// `SubscriptionHandle::stop` to also wait for them to finish.
    pub fn shutdown(&self) {
        info!("shutting down every subscription");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// A running subscription.
pub struct SubscriptionHandle {
    consumer_id: String,
    topic: String,
    token: CancellationToken,
    status: watch::Receiver<SupervisorStatus>,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Latest status of the subscription's supervisor.
    pub fn status(&self) -> SupervisorStatus {
        self.status.borrow().clone()
    }

    /// Receives every status update of the subscription's supervisor.
    pub fn watch(&self) -> watch::Receiver<SupervisorStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the subscription and waits until its session closed.
    pub async fn stop(self) -> Result<(), AmqpError> {
        info!(consumer = self.consumer_id, topic = self.topic, "stopping subscription");
        self.token.cancel();

        self.task.await.map_err(|err| {
            error!(
                error = err.to_string(),
                consumer = self.consumer_id,
                "subscription task failed"
            );
            AmqpError::InternalError
        })
    }
}

/// Stops every subscription concurrently and waits for all of them.
pub async fn stop_all(handles: Vec<SubscriptionHandle>) -> Result<(), AmqpError> {
    let results = join_all(handles.into_iter().map(SubscriptionHandle::stop)).await;

    for res in results {
        res?;
    }

    Ok(())
}
