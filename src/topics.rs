// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Catalog of the topics agents can subscribe to.

use crate::errors::AmqpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub binding_key: &'static str,
}

pub const AVAILABLE_TOPICS: [TopicDefinition; 3] = [
    TopicDefinition {
        name: "jokes",
        description: "A topic for receiving and generating jokes",
        binding_key: "jokes.*",
    },
    TopicDefinition {
        name: "poems",
        description: "A topic for receiving and generating poems",
        binding_key: "poems.*",
    },
    TopicDefinition {
        name: "limericks",
        description: "A topic for receiving and generating limericks",
        binding_key: "limericks.*",
    },
];

pub fn find(name: &str) -> Result<&'static TopicDefinition, AmqpError> {
    AVAILABLE_TOPICS
        .iter()
        .find(|t| t.name == name)
        .ok_or_else(|| AmqpError::UnknownTopic(name.to_owned()))
}

/// One `name: description` line per topic.
pub fn list() -> String {
    AVAILABLE_TOPICS
        .iter()
        .map(|t| format!("{}: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n")
}
