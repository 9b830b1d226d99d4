// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription Parameters
//!
//! A `Subscription` is the immutable description of what one consumer wants
//! to receive: which broker, which exchange, which binding pattern, and the
//! identity handed to the message handler. The supervisor passes the same
//! subscription to every session it creates.

use crate::{
    errors::AmqpError,
    exchange::AGENT_EXCHANGE,
    topics::{self, TopicDefinition},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) url: String,
    pub(crate) exchange: String,
    pub(crate) consumer_id: String,
    pub(crate) binding_key: String,
    pub(crate) topic: String,
}

impl Subscription {
    /// Creates a subscription on the agent exchange.
    ///
    /// # Parameters
    /// * `url` - AMQP URI of the broker
    /// * `consumer_id` - Identity passed to the handler with every message
    /// * `binding_key` - Topic pattern, e.g. `jokes.*`
    /// * `topic` - Topic label passed to the handler, e.g. `jokes`
    pub fn new(url: &str, consumer_id: &str, binding_key: &str, topic: &str) -> Subscription {
        Subscription {
            url: url.to_owned(),
            exchange: AGENT_EXCHANGE.to_owned(),
            consumer_id: consumer_id.to_owned(),
            binding_key: binding_key.to_owned(),
            topic: topic.to_owned(),
        }
    }

    /// Creates a subscription for a topic of the catalog.
    pub fn for_topic(url: &str, consumer_id: &str, topic: &str) -> Result<Subscription, AmqpError> {
        let def: &TopicDefinition = topics::find(topic)?;

        Ok(Subscription::new(url, consumer_id, def.binding_key, def.name))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn exchange_name(&self) -> &str {
        &self.exchange
    }

    pub fn consumer_id(&self) -> &str {
        &self.consumer_id
    }

    pub fn binding_key(&self) -> &str {
        &self.binding_key
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}
