// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Topic Consumer
//!
//! This module provides the error types used across the crate. `AmqpError`
//! covers every broker-layer failure a session, publisher or dispatcher can
//! run into, while `HandlerError` is what an injected message handler returns
//! when it could not process a delivery.
//!
//! Broker errors never leave a running session: the session turns them into
//! state-machine events and lets the supervisor decide whether to reconnect.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error creating or using a channel from an established connection
    #[error("channel failure `{0}`")]
    ChannelError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("failure to declare consumer `{0}`")]
    ConsumerDeclarationError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// A broker operation did not complete in time
    #[error("operation timed out `{0}`")]
    Timeout(String),

    /// The session is already shutting down
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// The requested topic is not part of the catalog
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),

    /// Configuration could not be loaded
    #[error("failure to load configs `{0}`")]
    ConfigError(String),
}

/// Error returned by a message handler that failed to process a delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("handler failure: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        HandlerError(reason.into())
    }
}
