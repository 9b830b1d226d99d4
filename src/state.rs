// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Session State Machine
//!
//! `SessionMachine` holds the lifecycle of one consumer session and decides,
//! for every event, which broker commands to issue next. It performs no I/O:
//! the session executes the returned commands and feeds their confirmations
//! back in, so every transition can be exercised in isolation.
//!
//! Setup walks `Disconnected → Connecting → ChannelOpen → ExchangeDeclared →
//! QueueDeclared → QueueBound → QosSet → Consuming`, each step entered only on
//! the broker's confirmation of the previous one. Shutdown walks `Cancelling →
//! ChannelClosing → ConnectionClosing → Closed`, and a connection closure
//! moves any state straight to `Closed`.

use crate::{errors::AmqpError, handler::InboundMessage};
use tracing::{debug, error, info, warn};

/// At most one unacknowledged message is in flight per session.
pub const PREFETCH_COUNT: u16 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    ChannelOpen,
    ExchangeDeclared,
    QueueDeclared,
    QueueBound,
    QosSet,
    Consuming,
    Cancelling,
    ChannelClosing,
    ConnectionClosing,
    Closed,
}

/// Confirmations and notifications driving the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectionOpened,
    ConnectionOpenFailed(String),
    ChannelOpened,
    ExchangeDeclared,
    /// Carries the broker assigned queue name
    QueueDeclared(String),
    QueueBound,
    QosSet,
    /// Carries the consumer tag
    ConsumeStarted(String),
    Delivery(InboundMessage),
    CancelOk,
    /// The broker revoked the consumer
    ConsumerCancelled,
    ChannelClosed(String),
    ConnectionClosed(String),
    StopRequested,
}

/// Broker requests the session has to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    OpenConnection,
    OpenChannel,
    DeclareExchange,
    DeclareQueue,
    BindQueue(String),
    SetQos(u16),
    StartConsuming(String),
    /// Run the handler, then settle the delivery
    Dispatch(InboundMessage),
    CancelConsumer(String),
    CloseChannel,
    CloseConnection,
}

#[derive(Debug, Default)]
pub struct SessionMachine {
    state: SessionState,
    closing: bool,
    consuming: bool,
    was_consuming: bool,
    should_reconnect: bool,
    queue_name: String,
    consumer_tag: Option<String>,
}

impl SessionMachine {
    pub fn new() -> Self {
        SessionMachine::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub fn was_consuming(&self) -> bool {
        self.was_consuming
    }

    pub fn should_reconnect(&self) -> bool {
        self.should_reconnect
    }

    pub fn is_consuming(&self) -> bool {
        self.consuming
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Between opening the connection and the consume confirmation.
    pub fn is_setting_up(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connecting
                | SessionState::ChannelOpen
                | SessionState::ExchangeDeclared
                | SessionState::QueueDeclared
                | SessionState::QueueBound
                | SessionState::QosSet
        )
    }

    /// Empty until the queue declaration was confirmed.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn consumer_tag(&self) -> Option<&str> {
        self.consumer_tag.as_deref()
    }

    /// Begins the setup sequence. Only a fresh machine starts.
    pub fn start(&mut self) -> Vec<Command> {
        if self.state != SessionState::Disconnected {
            warn!(state = ?self.state, "session already started");
            return vec![];
        }

        self.state = SessionState::Connecting;
        vec![Command::OpenConnection]
    }

    /// Applies an event and returns the commands it calls for.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Command> {
        use SessionEvent as E;
        use SessionState as S;

        match (self.state, event) {
            (_, E::StopRequested) => match self.stop() {
                Ok(commands) => commands,
                Err(err) => {
                    debug!(error = err.to_string(), "ignoring stop request");
                    vec![]
                }
            },

            (_, E::ConnectionClosed(reason)) => self.on_connection_closed(&reason),

            (S::Closed, event) => {
                debug!(?event, "session closed, ignoring event");
                vec![]
            }

            (S::Connecting, E::ConnectionOpened) => {
                info!("connection opened");
                vec![Command::OpenChannel]
            }

            (S::Connecting, E::ConnectionOpenFailed(reason)) => {
                error!(error = reason, "connection open failed");
                self.should_reconnect = true;
                self.closing = true;
                self.state = S::Closed;
                vec![]
            }

            (S::Connecting, E::ChannelOpened) => {
                info!("channel opened");
                self.state = S::ChannelOpen;
                vec![Command::DeclareExchange]
            }

            (S::ChannelOpen, E::ExchangeDeclared) => {
                info!("exchange declared");
                self.state = S::ExchangeDeclared;
                vec![Command::DeclareQueue]
            }

            (S::ExchangeDeclared, E::QueueDeclared(name)) => {
                info!(queue = name, "queue declared");
                self.state = S::QueueDeclared;
                self.queue_name = name.clone();
                vec![Command::BindQueue(name)]
            }

            (S::QueueDeclared, E::QueueBound) => {
                info!(queue = self.queue_name, "queue bound");
                self.state = S::QueueBound;
                vec![Command::SetQos(PREFETCH_COUNT)]
            }

            (S::QueueBound, E::QosSet) => {
                info!(prefetch = PREFETCH_COUNT, "qos set");
                self.state = S::QosSet;
                vec![Command::StartConsuming(self.queue_name.clone())]
            }

            (S::QosSet, E::ConsumeStarted(tag)) => {
                info!(consumer_tag = tag, "consuming");
                self.state = S::Consuming;
                self.consuming = true;
                self.was_consuming = true;
                self.consumer_tag = Some(tag);
                vec![]
            }

            // the channel stays open until cancel-ok, so in-flight deliveries
            // are still processed and settled
            (S::Consuming | S::Cancelling, E::Delivery(msg)) => vec![Command::Dispatch(msg)],

            (S::Cancelling, E::CancelOk) => {
                info!(consumer_tag = ?self.consumer_tag, "broker acknowledged the consumer cancellation");
                self.consuming = false;
                self.state = S::ChannelClosing;
                vec![Command::CloseChannel]
            }

            (S::Consuming, E::ConsumerCancelled) => {
                warn!(consumer_tag = ?self.consumer_tag, "consumer was cancelled remotely, shutting down");
                self.consuming = false;
                self.state = S::ChannelClosing;
                vec![Command::CloseChannel]
            }

            (_, E::ChannelClosed(reason)) => {
                warn!(reason, "channel was closed");
                self.close_connection()
            }

            (state, event) => {
                debug!(?state, ?event, "ignoring event");
                vec![]
            }
        }
    }

    /// Gracefully ends the session.
    ///
    /// When consuming, the consumer is cancelled first and the channel and
    /// connection are closed once the broker confirmed; otherwise the
    /// connection is closed right away. A second request fails with
    /// `ShutdownInProgress` and issues nothing.
    pub fn stop(&mut self) -> Result<Vec<Command>, AmqpError> {
        if self.closing {
            return Err(AmqpError::ShutdownInProgress);
        }

        self.closing = true;
        info!(state = ?self.state, "stopping");

        let commands = match self.state {
            SessionState::Consuming => {
                self.state = SessionState::Cancelling;
                match self.consumer_tag.clone() {
                    Some(tag) => vec![Command::CancelConsumer(tag)],
                    None => vec![],
                }
            }
            SessionState::Disconnected | SessionState::Closed => {
                self.state = SessionState::Closed;
                vec![]
            }
            SessionState::ChannelClosing | SessionState::ConnectionClosing => vec![],
            _ => self.close_connection(),
        };

        Ok(commands)
    }

    fn close_connection(&mut self) -> Vec<Command> {
        self.consuming = false;

        match self.state {
            SessionState::ConnectionClosing | SessionState::Closed => {
                debug!("connection is closing or already closed");
                vec![]
            }
            _ => {
                info!("closing connection");
                self.state = SessionState::ConnectionClosing;
                vec![Command::CloseConnection]
            }
        }
    }

    fn on_connection_closed(&mut self, reason: &str) -> Vec<Command> {
        self.consuming = false;

        if self.state == SessionState::Closed {
            debug!(reason, "connection already closed");
            return vec![];
        }

        self.state = SessionState::Closed;
        if self.closing {
            info!(reason, "connection closed");
        } else {
            warn!(reason, "connection closed, reconnect necessary");
            self.should_reconnect = true;
            self.closing = true;
        }

        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(tag: u64) -> InboundMessage {
        InboundMessage {
            delivery_tag: tag,
            routing_key: "jokes.random".to_owned(),
            payload: b"sunset".to_vec(),
            ..Default::default()
        }
    }

    fn setup_events() -> Vec<SessionEvent> {
        vec![
            SessionEvent::ConnectionOpened,
            SessionEvent::ChannelOpened,
            SessionEvent::ExchangeDeclared,
            SessionEvent::QueueDeclared("amq.gen-1".to_owned()),
            SessionEvent::QueueBound,
            SessionEvent::QosSet,
            SessionEvent::ConsumeStarted("ctag-1".to_owned()),
        ]
    }

    fn consuming_machine() -> SessionMachine {
        let mut machine = SessionMachine::new();
        machine.start();
        for event in setup_events() {
            machine.handle(event);
        }
        machine
    }

    #[test]
    fn setup_walks_every_state_in_order() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.start(), vec![Command::OpenConnection]);

        let expected = [
            (SessionState::Connecting, vec![Command::OpenChannel]),
            (SessionState::ChannelOpen, vec![Command::DeclareExchange]),
            (SessionState::ExchangeDeclared, vec![Command::DeclareQueue]),
            (
                SessionState::QueueDeclared,
                vec![Command::BindQueue("amq.gen-1".to_owned())],
            ),
            (SessionState::QueueBound, vec![Command::SetQos(1)]),
            (
                SessionState::QosSet,
                vec![Command::StartConsuming("amq.gen-1".to_owned())],
            ),
            (SessionState::Consuming, vec![]),
        ];

        for (event, (state, commands)) in setup_events().into_iter().zip(expected) {
            assert!(!machine.was_consuming());
            assert_eq!(machine.handle(event), commands);
            assert_eq!(machine.state(), state);
        }

        assert!(machine.was_consuming());
        assert!(machine.is_consuming());
        assert!(!machine.should_reconnect());
        assert_eq!(machine.queue_name(), "amq.gen-1");
        assert_eq!(machine.consumer_tag(), Some("ctag-1"));
    }

    #[test]
    fn setting_up_ends_with_the_consume_confirmation() {
        let mut machine = SessionMachine::new();
        assert!(!machine.is_setting_up());

        machine.start();
        for event in setup_events() {
            assert!(machine.is_setting_up());
            machine.handle(event);
        }

        assert!(!machine.is_setting_up());
    }

    #[test]
    fn stop_during_setup_closes_the_connection() {
        let mut machine = SessionMachine::new();
        machine.start();
        machine.handle(SessionEvent::ConnectionOpened);
        machine.handle(SessionEvent::ChannelOpened);

        assert_eq!(
            machine.handle(SessionEvent::StopRequested),
            vec![Command::CloseConnection]
        );
        machine.handle(SessionEvent::ConnectionClosed("closed by client".to_owned()));

        assert!(machine.is_closed());
        assert!(!machine.should_reconnect());
        assert!(!machine.was_consuming());
    }

    #[test]
    fn start_only_once() {
        let mut machine = consuming_machine();
        assert!(machine.start().is_empty());
        assert_eq!(machine.state(), SessionState::Consuming);
    }

    #[test]
    fn out_of_order_confirmation_is_ignored() {
        let mut machine = SessionMachine::new();
        machine.start();

        assert!(machine.handle(SessionEvent::QueueBound).is_empty());
        assert_eq!(machine.state(), SessionState::Connecting);
    }

    #[test]
    fn connection_open_failure_requests_reconnect() {
        let mut machine = SessionMachine::new();
        machine.start();

        let commands = machine.handle(SessionEvent::ConnectionOpenFailed("refused".to_owned()));

        assert!(commands.is_empty());
        assert!(machine.is_closed());
        assert!(machine.should_reconnect());
        assert!(!machine.was_consuming());
    }

    #[test]
    fn every_failure_before_consuming_requests_reconnect() {
        let events = setup_events();

        for failing_step in 0..events.len() {
            let mut machine = SessionMachine::new();
            machine.start();
            for event in events.iter().take(failing_step).cloned() {
                machine.handle(event);
            }

            let commands = machine.handle(SessionEvent::ChannelClosed("406".to_owned()));
            assert_eq!(commands, vec![Command::CloseConnection]);
            assert_eq!(machine.state(), SessionState::ConnectionClosing);

            machine.handle(SessionEvent::ConnectionClosed("closed by client".to_owned()));
            assert!(machine.is_closed());
            assert!(machine.should_reconnect(), "step {failing_step}");
            assert!(!machine.was_consuming(), "step {failing_step}");
        }
    }

    #[test]
    fn deliveries_are_dispatched_while_consuming() {
        let mut machine = consuming_machine();

        assert_eq!(
            machine.handle(SessionEvent::Delivery(message(7))),
            vec![Command::Dispatch(message(7))]
        );
    }

    #[test]
    fn unexpected_channel_close_while_consuming() {
        let mut machine = consuming_machine();

        assert_eq!(
            machine.handle(SessionEvent::ChannelClosed("504".to_owned())),
            vec![Command::CloseConnection]
        );
        assert!(machine.handle(SessionEvent::Delivery(message(1))).is_empty());

        machine.handle(SessionEvent::ConnectionClosed("closed by client".to_owned()));
        assert!(machine.should_reconnect());
        assert!(machine.was_consuming());
    }

    #[test]
    fn remote_cancel_closes_channel_then_connection() {
        let mut machine = consuming_machine();

        assert_eq!(
            machine.handle(SessionEvent::ConsumerCancelled),
            vec![Command::CloseChannel]
        );
        assert_eq!(
            machine.handle(SessionEvent::ChannelClosed("closed by client".to_owned())),
            vec![Command::CloseConnection]
        );
        machine.handle(SessionEvent::ConnectionClosed("closed by client".to_owned()));

        assert!(machine.should_reconnect());
        assert!(machine.was_consuming());
    }

    #[test]
    fn unexpected_connection_close_from_any_state() {
        let mut machine = consuming_machine();

        assert!(machine
            .handle(SessionEvent::ConnectionClosed("heartbeat timeout".to_owned()))
            .is_empty());
        assert!(machine.is_closed());
        assert!(machine.should_reconnect());
    }

    #[test]
    fn graceful_stop_while_consuming() {
        let mut machine = consuming_machine();

        assert_eq!(
            machine.handle(SessionEvent::StopRequested),
            vec![Command::CancelConsumer("ctag-1".to_owned())]
        );
        assert_eq!(machine.state(), SessionState::Cancelling);

        // deliveries racing the cancellation are still handled
        assert_eq!(
            machine.handle(SessionEvent::Delivery(message(3))),
            vec![Command::Dispatch(message(3))]
        );
        // the consumer stream ending after our own cancel is not a remote cancel
        assert!(machine.handle(SessionEvent::ConsumerCancelled).is_empty());

        assert_eq!(machine.handle(SessionEvent::CancelOk), vec![Command::CloseChannel]);
        assert_eq!(
            machine.handle(SessionEvent::ChannelClosed("closed by client".to_owned())),
            vec![Command::CloseConnection]
        );
        machine.handle(SessionEvent::ConnectionClosed("closed by client".to_owned()));

        assert!(machine.is_closed());
        assert!(!machine.should_reconnect());
        assert!(machine.was_consuming());
    }

    #[test]
    fn stop_twice_issues_nothing_more() {
        let mut machine = consuming_machine();

        assert_eq!(machine.handle(SessionEvent::StopRequested).len(), 1);
        assert!(machine.handle(SessionEvent::StopRequested).is_empty());
        assert_eq!(machine.stop(), Err(AmqpError::ShutdownInProgress));
        assert_eq!(machine.state(), SessionState::Cancelling);
    }

    #[test]
    fn stop_before_consuming_closes_connection() {
        let mut machine = SessionMachine::new();
        machine.start();
        machine.handle(SessionEvent::ConnectionOpened);
        machine.handle(SessionEvent::ChannelOpened);

        assert_eq!(
            machine.handle(SessionEvent::StopRequested),
            vec![Command::CloseConnection]
        );
        machine.handle(SessionEvent::ConnectionClosed("closed by client".to_owned()));

        assert!(machine.is_closed());
        assert!(!machine.should_reconnect());
    }

    #[test]
    fn stop_before_start_closes_immediately() {
        let mut machine = SessionMachine::new();

        assert_eq!(machine.stop(), Ok(vec![]));
        assert!(machine.is_closed());
        assert!(machine.start().is_empty());
    }

    #[test]
    fn stop_after_failure_is_noop() {
        let mut machine = SessionMachine::new();
        machine.start();
        machine.handle(SessionEvent::ConnectionOpenFailed("refused".to_owned()));

        assert_eq!(machine.stop(), Err(AmqpError::ShutdownInProgress));
        assert!(machine.should_reconnect());
    }
}
