// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport
//!
//! `Transport` is the seam between a session and the broker. Each method is
//! one AMQP request that resolves once the broker confirmed it. Notifications
//! the broker sends on its own (deliveries, channel and connection closures,
//! consumer cancellation) are pushed into the `EventSink` handed over when
//! the connection is opened.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    handler::InboundMessage,
    queue::{QueueBinding, QueueDefinition},
    state::SessionEvent,
};
use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Sender side of a session event queue, restricted to broker notifications.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: UnboundedSender<SessionEvent>,
}

impl EventSink {
    pub(crate) fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        EventSink { tx }
    }

    pub fn delivery(&self, msg: InboundMessage) {
        self.send(SessionEvent::Delivery(msg));
    }

    pub fn consumer_cancelled(&self) {
        self.send(SessionEvent::ConsumerCancelled);
    }

    pub fn channel_closed(&self, reason: impl Into<String>) {
        self.send(SessionEvent::ChannelClosed(reason.into()));
    }

    pub fn connection_closed(&self, reason: impl Into<String>) {
        self.send(SessionEvent::ConnectionClosed(reason.into()));
    }

    fn send(&self, event: SessionEvent) {
        if self.tx.send(event).is_err() {
            debug!("session already finished, dropping broker notification");
        }
    }
}

/// One connection with one channel to the broker.
#[async_trait]
pub trait Transport: Send {
    /// Opens the connection; asynchronous notifications go to `events`.
    async fn connect(&mut self, url: &str, events: EventSink) -> Result<(), AmqpError>;

    async fn open_channel(&mut self) -> Result<(), AmqpError>;

    async fn declare_exchange(&mut self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    /// Returns the queue name, which the broker generates for unnamed queues.
    async fn declare_queue(&mut self, def: &QueueDefinition) -> Result<String, AmqpError>;

    async fn bind_queue(&mut self, binding: &QueueBinding<'_>) -> Result<(), AmqpError>;

    async fn set_qos(&mut self, prefetch_count: u16) -> Result<(), AmqpError>;

    /// Starts a consumer and returns its tag. Deliveries go to the event sink.
    async fn consume(&mut self, queue: &str, consumer_tag: &str) -> Result<String, AmqpError>;

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn cancel(&mut self, consumer_tag: &str) -> Result<(), AmqpError>;

    async fn close_channel(&mut self) -> Result<(), AmqpError>;

    async fn close_connection(&mut self) -> Result<(), AmqpError>;
}

/// Creates a fresh transport for every session attempt.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn Transport>;
}
