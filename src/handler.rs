// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handling
//!
//! The consumer core does not know what a message means. Whatever processes
//! it (an LLM agent, a logger, a test double) implements `MessageHandler` and
//! is injected into the dispatcher when a subscription starts.

use crate::errors::HandlerError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

/// A message delivered by the broker.
///
/// It only lives until the handler has finished and the delivery has been
/// settled; nothing is retained afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Broker assigned sequence number, only used to settle the delivery
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    /// String valued headers, used for trace propagation
    pub headers: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

/// Processes the messages of a subscription.
///
/// The session waits for `handle` to return before settling the delivery and
/// accepting the next one, so at most one call is in flight per subscription.
///
/// # Parameters
/// * `consumer_id` - Identity of the subscription, e.g. `joking_agent`
/// * `topic` - Topic label of the subscription, e.g. `jokes`
/// * `payload` - Message body
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, consumer_id: &str, topic: &str, payload: &[u8]) -> Result<(), HandlerError>;
}

/// Handler that logs every message it receives.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, consumer_id: &str, topic: &str, payload: &[u8]) -> Result<(), HandlerError> {
        let body = std::str::from_utf8(payload)
            .map_err(|_| HandlerError::new("payload is not valid utf-8"))?;

        info!(consumer = consumer_id, topic, body, "message received");
        Ok(())
    }
}
