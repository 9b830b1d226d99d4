// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription Queue
//!
//! Each session declares its own queue and binds it to the agent exchange.
//! The queue lives exactly as long as the connection that declared it.

/// A queue to declare. An empty name asks the broker to generate one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) exclusive: bool,
}

impl QueueDefinition {
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            exclusive: false,
        }
    }

    /// A queue named by the broker, e.g. `amq.gen-JzTY20BRgKO-HjmUJj0wLg`.
    pub fn server_named() -> QueueDefinition {
        QueueDefinition::new("")
    }

    /// Restricts the queue to the declaring connection; the broker deletes
    /// it when that connection closes.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub(crate) fn options(&self) -> lapin::options::QueueDeclareOptions {
        lapin::options::QueueDeclareOptions {
            exclusive: self.exclusive,
            ..Default::default()
        }
    }
}

/// Routes messages of `exchange_name` matching `routing_key` into `queue_name`.
///
/// On a topic exchange the key is a pattern: `*` matches exactly one word and
/// `#` matches zero or more words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding<'qeb> {
    pub(crate) queue_name: &'qeb str,
    pub(crate) exchange_name: &'qeb str,
    pub(crate) routing_key: &'qeb str,
}

impl<'qeb> QueueBinding<'qeb> {
    pub fn new(queue: &'qeb str) -> QueueBinding<'qeb> {
        QueueBinding {
            queue_name: queue,
            exchange_name: "",
            routing_key: "",
        }
    }

    pub fn exchange(mut self, exchange: &'qeb str) -> Self {
        self.exchange_name = exchange;
        self
    }

    pub fn routing_key(mut self, key: &'qeb str) -> Self {
        self.routing_key = key;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_named_exclusive_queue() {
        let def = QueueDefinition::server_named().exclusive();
        let opts = def.options();

        assert_eq!(def.name(), "");
        assert!(opts.exclusive);
        assert!(!opts.durable && !opts.auto_delete && !opts.passive && !opts.nowait);
    }

    #[test]
    fn binding_builder() {
        let binding = QueueBinding::new("amq.gen-1")
            .exchange("agent_exchange")
            .routing_key("jokes.*");

        assert_eq!(binding.queue_name, "amq.gen-1");
        assert_eq!(binding.exchange_name, "agent_exchange");
        assert_eq!(binding.routing_key, "jokes.*");
    }
}
