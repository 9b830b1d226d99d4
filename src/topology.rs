// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription Topology
//!
//! The topology of a subscription is a single triple: the topic exchange, an
//! exclusive broker-named queue, and the binding between them. The queue name
//! is only known once the broker has answered the queue declaration, so the
//! binding is produced on demand from that name.

use crate::{
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
    subscription::Subscription,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub(crate) exchange: ExchangeDefinition,
    pub(crate) queue: QueueDefinition,
    pub(crate) binding_key: String,
}

impl Topology {
    /// Builds the exchange/queue/binding triple of a subscription.
    pub fn for_subscription(sub: &Subscription) -> Topology {
        Topology {
            exchange: ExchangeDefinition::new(&sub.exchange),
            queue: QueueDefinition::server_named().exclusive(),
            binding_key: sub.binding_key.clone(),
        }
    }

    pub fn exchange(&self) -> &ExchangeDefinition {
        &self.exchange
    }

    pub fn queue(&self) -> &QueueDefinition {
        &self.queue
    }

    /// Binding of the declared queue to the exchange with the subscription pattern.
    ///
    /// # Parameters
    /// * `queue_name` - The name the broker assigned to the queue
    pub fn binding<'a>(&'a self, queue_name: &'a str) -> QueueBinding<'a> {
        QueueBinding::new(queue_name)
            .exchange(&self.exchange.name)
            .routing_key(&self.binding_key)
    }
}
