// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Agent Exchange
//!
//! Agents talk through a single topic exchange. Publishers address a topic
//! with routing keys such as `jokes.random`; subscriptions bind their queue
//! with a pattern such as `jokes.*`.

/// Name of the exchange every agent publishes to and consumes from.
pub const AGENT_EXCHANGE: &str = "agent_exchange";

/// A transient topic exchange: not durable, never auto-deleted.
///
/// Redeclaring it with the same kind is a no-op on the broker, so every
/// session and every publisher declares it again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
}

impl ExchangeDefinition {
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn kind(&self) -> lapin::ExchangeKind {
        lapin::ExchangeKind::Topic
    }

    pub(crate) fn options(&self) -> lapin::options::ExchangeDeclareOptions {
        lapin::options::ExchangeDeclareOptions::default()
    }
}
