// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Consumer Session
//!
//! A `ConsumerSession` is one attempt at keeping a subscription alive: one
//! connection, one channel, one consumer. It feeds broker confirmations and
//! notifications into a `SessionMachine` one at a time and executes the
//! commands the machine answers with, until the connection is closed.
//!
//! Sessions are never reused. Once `run` returns, the supervisor reads
//! `was_consuming` and `should_reconnect` and throws the session away.

use crate::{
    consumer::{self, DeliveryContext, Disposition},
    errors::AmqpError,
    handler::{InboundMessage, MessageHandler},
    state::{Command, SessionEvent, SessionMachine, SessionState},
    subscription::Subscription,
    topology::Topology,
    transport::{EventSink, Transport},
};
use opentelemetry::global;
use std::{collections::VecDeque, future::Future, sync::Arc, time::Duration};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// Timeouts and handler failure policy of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Limit for opening the connection
    pub connect_timeout: Duration,
    /// Limit for every other broker request
    pub operation_timeout: Duration,
    /// Limit for a single handler invocation, unbounded when `None`
    pub handler_timeout: Option<Duration>,
    /// Whether a failed delivery is requeued instead of dropped
    pub requeue_on_handler_failure: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            connect_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30),
            handler_timeout: None,
            requeue_on_handler_failure: false,
        }
    }
}

/// How a finished session ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    /// The session reached `Consuming` at least once
    pub was_consuming: bool,
    /// The session ended on a recoverable failure
    pub should_reconnect: bool,
}

/// Requests a graceful stop of a session, running or not yet started.
#[derive(Debug, Clone)]
pub struct StopHandle {
    token: CancellationToken,
}

impl StopHandle {
    /// Idempotent; requests after the first one have no effect.
    pub fn stop(&self) {
        self.token.cancel();
    }
}

pub struct ConsumerSession {
    subscription: Arc<Subscription>,
    topology: Topology,
    settings: SessionSettings,
    transport: Box<dyn Transport>,
    delivery: DeliveryContext,
    machine: SessionMachine,
    stop: CancellationToken,
    events_tx: UnboundedSender<SessionEvent>,
    events_rx: UnboundedReceiver<SessionEvent>,
}

impl ConsumerSession {
    /// Creates a session that has not connected yet.
    ///
    /// # Parameters
    /// * `subscription` - What to consume
    /// * `transport` - A fresh, unconnected transport
    /// * `handler` - Receives every delivery
    /// * `settings` - Timeouts and handler failure policy
    pub fn new(
        subscription: Arc<Subscription>,
        transport: Box<dyn Transport>,
        handler: Arc<dyn MessageHandler>,
        settings: SessionSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let delivery = DeliveryContext {
            consumer_id: subscription.consumer_id.clone(),
            topic: subscription.topic.clone(),
            handler,
            handler_timeout: settings.handler_timeout,
            requeue_on_failure: settings.requeue_on_handler_failure,
        };

        ConsumerSession {
            topology: Topology::for_subscription(&subscription),
            subscription,
            settings,
            transport,
            delivery,
            machine: SessionMachine::new(),
            stop: CancellationToken::new(),
            events_tx,
            events_rx,
        }
    }

    pub fn stopper(&self) -> StopHandle {
        StopHandle {
            token: self.stop.clone(),
        }
    }

    /// Requests a graceful stop, see `SessionMachine::stop`.
    pub fn stop(&self) {
        self.stopper().stop();
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn was_consuming(&self) -> bool {
        self.machine.was_consuming()
    }

    pub fn should_reconnect(&self) -> bool {
        self.machine.should_reconnect()
    }

    /// Broker assigned queue name, empty before the queue was declared.
    pub fn queue_name(&self) -> &str {
        self.machine.queue_name()
    }

    pub fn consumer_tag(&self) -> Option<&str> {
        self.machine.consumer_tag()
    }

    pub fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            was_consuming: self.machine.was_consuming(),
            should_reconnect: self.machine.should_reconnect(),
        }
    }

    /// Connects, sets up the subscription and processes broker events until
    /// the connection is closed.
    ///
    /// Cancelling `shutdown` has the same effect as `stop`. Broker failures
    /// are never returned; read `outcome` once this resolves.
    pub async fn run(&mut self, shutdown: &CancellationToken) {
        let span = info_span!(
            "consumer_session",
            consumer = self.subscription.consumer_id,
            binding_key = self.subscription.binding_key,
        );

        self.drive(shutdown).instrument(span).await
    }

    async fn drive(&mut self, shutdown: &CancellationToken) {
        let stop = self.stop.clone();
        let mut stop_forwarded = false;

        let mut pending: VecDeque<Command> = if is_requested(shutdown, &stop) {
            info!("stop requested before connecting");
            stop_forwarded = true;
            self.machine.handle(SessionEvent::StopRequested).into()
        } else {
            info!(url = redact(&self.subscription.url), "connecting");
            self.machine.start().into()
        };

        loop {
            // command results are applied right away, so each setup step
            // only starts after the previous one was confirmed
            while let Some(command) = pending.pop_front() {
                if !stop_forwarded && is_requested(shutdown, &stop) {
                    stop_forwarded = true;
                    pending.push_front(command);
                    self.forward_stop(&mut pending);
                    continue;
                }

                let result = if self.machine.is_setting_up() && !stop_forwarded {
                    tokio::select! {
                        biased;
                        _ = requested(shutdown, &stop) => None,
                        event = self.execute(command) => Some(event),
                    }
                } else {
                    Some(self.execute(command).await)
                };

                match result {
                    Some(Some(event)) => pending.extend(self.machine.handle(event)),
                    Some(None) => {}
                    None => {
                        info!("stop requested while setting up, abandoning the pending request");
                        stop_forwarded = true;
                        self.forward_stop(&mut pending);
                    }
                }
            }

            if self.machine.is_closed() {
                break;
            }

            let event = tokio::select! {
                biased;
                _ = requested(shutdown, &stop), if !stop_forwarded => None,
                event = self.events_rx.recv() => Some(
                    event.unwrap_or_else(|| SessionEvent::ConnectionClosed("event queue closed".to_owned()))
                ),
            };

            match event {
                Some(event) => pending.extend(self.machine.handle(event)),
                None => {
                    stop_forwarded = true;
                    self.forward_stop(&mut pending);
                }
            }
        }

        info!(
            was_consuming = self.machine.was_consuming(),
            should_reconnect = self.machine.should_reconnect(),
            "session closed"
        );
    }

    /// Hands a stop request to the machine. A stop during setup replaces the
    /// remaining setup step; otherwise in-flight work is finished first.
    fn forward_stop(&mut self, pending: &mut VecDeque<Command>) {
        if self.machine.is_setting_up() {
            pending.clear();
        }
        pending.extend(self.machine.handle(SessionEvent::StopRequested));
    }

    /// Performs a command and returns the event reporting its result.
    async fn execute(&mut self, command: Command) -> Option<SessionEvent> {
        let connect_timeout = self.settings.connect_timeout;
        let timeout = self.settings.operation_timeout;

        match command {
            Command::OpenConnection => {
                let sink = EventSink::new(self.events_tx.clone());
                let result = within(
                    connect_timeout,
                    "connect",
                    self.transport.connect(&self.subscription.url, sink),
                )
                .await;

                Some(match result {
                    Ok(()) => SessionEvent::ConnectionOpened,
                    Err(err) => SessionEvent::ConnectionOpenFailed(err.to_string()),
                })
            }

            Command::OpenChannel => {
                debug!("creating a new channel");
                let result = within(timeout, "open channel", self.transport.open_channel()).await;
                Some(confirm(result, SessionEvent::ChannelOpened))
            }

            Command::DeclareExchange => {
                debug!(exchange = self.topology.exchange.name, "declaring exchange");
                let result = within(
                    timeout,
                    "exchange declare",
                    self.transport.declare_exchange(&self.topology.exchange),
                )
                .await;
                Some(confirm(result, SessionEvent::ExchangeDeclared))
            }

            Command::DeclareQueue => {
                debug!("declaring queue");
                let result = within(
                    timeout,
                    "queue declare",
                    self.transport.declare_queue(&self.topology.queue),
                )
                .await;
                Some(match result {
                    Ok(name) => SessionEvent::QueueDeclared(name),
                    Err(err) => SessionEvent::ChannelClosed(err.to_string()),
                })
            }

            Command::BindQueue(queue) => {
                let binding = self.topology.binding(&queue);
                debug!(
                    exchange = binding.exchange_name,
                    queue = binding.queue_name,
                    routing_key = binding.routing_key,
                    "binding queue"
                );
                let result = within(timeout, "queue bind", self.transport.bind_queue(&binding)).await;
                Some(confirm(result, SessionEvent::QueueBound))
            }

            Command::SetQos(prefetch_count) => {
                let result = within(timeout, "basic qos", self.transport.set_qos(prefetch_count)).await;
                Some(confirm(result, SessionEvent::QosSet))
            }

            Command::StartConsuming(queue) => {
                debug!("issuing consumer related rpc commands");
                let tag = format!("{}.{}", self.subscription.consumer_id, Uuid::new_v4());
                let result = within(timeout, "basic consume", self.transport.consume(&queue, &tag)).await;
                Some(match result {
                    Ok(tag) => SessionEvent::ConsumeStarted(tag),
                    Err(err) => SessionEvent::ChannelClosed(err.to_string()),
                })
            }

            Command::Dispatch(msg) => self.dispatch(msg).await,

            Command::CancelConsumer(tag) => {
                info!(consumer_tag = tag, "sending a basic.cancel to the broker");
                let result = within(timeout, "basic cancel", self.transport.cancel(&tag)).await;
                Some(confirm(result, SessionEvent::CancelOk))
            }

            Command::CloseChannel => {
                info!("closing the channel");
                if let Err(err) = within(timeout, "channel close", self.transport.close_channel()).await {
                    warn!(error = err.to_string(), "channel did not close cleanly");
                }
                Some(SessionEvent::ChannelClosed("closed by client".to_owned()))
            }

            Command::CloseConnection => {
                if let Err(err) =
                    within(timeout, "connection close", self.transport.close_connection()).await
                {
                    warn!(error = err.to_string(), "connection did not close cleanly");
                }
                Some(SessionEvent::ConnectionClosed("closed by client".to_owned()))
            }
        }
    }

    /// Runs the handler and settles the delivery before anything else is
    /// processed. A settlement failure means the channel is gone.
    async fn dispatch(&mut self, msg: InboundMessage) -> Option<SessionEvent> {
        let tracer = global::tracer("amqp consumer");
        let disposition = consumer::consume(&tracer, &self.delivery, &msg).await;
        let timeout = self.settings.operation_timeout;

        let result = match disposition {
            Disposition::Ack => {
                debug!(delivery_tag = msg.delivery_tag, "acknowledging message");
                within(timeout, "basic ack", self.transport.ack(msg.delivery_tag)).await
            }
            Disposition::Reject { requeue } => {
                warn!(delivery_tag = msg.delivery_tag, requeue, "rejecting message");
                within(
                    timeout,
                    "basic nack",
                    self.transport.nack(msg.delivery_tag, requeue),
                )
                .await
            }
        };

        match result {
            Ok(()) => None,
            Err(err) => {
                error!(error = err.to_string(), "failure to settle message");
                Some(SessionEvent::ChannelClosed(err.to_string()))
            }
        }
    }
}

fn is_requested(shutdown: &CancellationToken, stop: &CancellationToken) -> bool {
    shutdown.is_cancelled() || stop.is_cancelled()
}

/// Resolves once either token is cancelled.
async fn requested(shutdown: &CancellationToken, stop: &CancellationToken) {
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = stop.cancelled() => {}
    }
}

/// Bounds a broker request in time; expiry counts as a failure of the request.
async fn within<T>(
    limit: Duration,
    operation: &str,
    request: impl Future<Output = Result<T, AmqpError>>,
) -> Result<T, AmqpError> {
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => {
            error!(operation, timeout_secs = limit.as_secs(), "broker request timed out");
            Err(AmqpError::Timeout(operation.to_owned()))
        }
    }
}

/// Maps a channel level request result to its confirmation; any failure on
/// the channel is handled as a channel closure.
fn confirm(result: Result<(), AmqpError>, confirmation: SessionEvent) -> SessionEvent {
    match result {
        Ok(()) => confirmation,
        Err(err) => SessionEvent::ChannelClosed(err.to_string()),
    }
}

/// Hides the password of an AMQP URI.
fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(err) => format!("<invalid url: {err}>"),
    }
}
