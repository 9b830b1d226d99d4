// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Application, broker and consumer settings loaded from the environment.
//! Every key has a default, so an empty environment yields a configuration
//! pointing at a local RabbitMQ with the `guest` account.
//!
//! Keys use the `TOPIC_CONSUMER` prefix and `__` as section separator:
//!
//! ```text
//! TOPIC_CONSUMER__APP__ENV=production
//! TOPIC_CONSUMER__RABBITMQ__HOST=rabbitmq.internal
//! TOPIC_CONSUMER__CONSUMER__HANDLER_TIMEOUT_SECS=120
//! ```

use crate::{errors::AmqpError, session::SessionSettings};
use config::{Config, Environment};
use url::form_urlencoded;
use serde::Deserialize;
use std::{fmt, time::Duration};

/// Environment prefix for every configuration key
pub const ENV_PREFIX: &str = "TOPIC_CONSUMER";

#[derive(Debug, Clone, Deserialize)]
pub struct Configs {
    pub app: AppConfigs,
    pub rabbitmq: RabbitMQConfigs,
    pub consumer: ConsumerConfigs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfigs {
    /// Used as the AMQP connection name
    pub name: String,
    /// `development` selects human readable logs, anything else JSON
    pub env: String,
}

#[derive(Clone, Deserialize)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl fmt::Debug for RabbitMQConfigs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RabbitMQConfigs")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***REDACTED***")
            .field("vhost", &self.vhost)
            .finish()
    }
}

impl RabbitMQConfigs {
    /// Builds the AMQP URI for these settings.
    ///
    /// User, password and vhost are percent-encoded, so the default vhost `/`
    /// becomes `%2F`.
    pub fn uri(&self) -> String {
        let vhost = match self.vhost.as_str() {
            "/" => "/",
            vhost => vhost.trim_start_matches('/'),
        };

        format!(
            "amqp://{}:{}@{}:{}/{}",
            encode(&self.user),
            encode(&self.password),
            self.host,
            self.port,
            encode(vhost)
        )
    }
}

fn encode(component: &str) -> String {
    form_urlencoded::byte_serialize(component.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfigs {
    pub connect_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub handler_timeout_secs: Option<u64>,
    pub requeue_on_handler_failure: bool,
    pub max_reconnect_delay_secs: u64,
}

impl From<&ConsumerConfigs> for SessionSettings {
    fn from(cfg: &ConsumerConfigs) -> Self {
        SessionSettings {
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            operation_timeout: Duration::from_secs(cfg.operation_timeout_secs),
            handler_timeout: cfg.handler_timeout_secs.map(Duration::from_secs),
            requeue_on_handler_failure: cfg.requeue_on_handler_failure,
        }
    }
}

/// Loads the configuration from the process environment.
pub fn load() -> Result<Configs, AmqpError> {
    load_from(Environment::with_prefix(ENV_PREFIX))
}

fn load_from(env: Environment) -> Result<Configs, AmqpError> {
    let builder = Config::builder()
        .set_default("app.name", "topic-consumer")
        .and_then(|b| b.set_default("app.env", "development"))
        .and_then(|b| b.set_default("rabbitmq.host", "localhost"))
        .and_then(|b| b.set_default("rabbitmq.port", 5672_i64))
        .and_then(|b| b.set_default("rabbitmq.user", "guest"))
        .and_then(|b| b.set_default("rabbitmq.password", "guest"))
        .and_then(|b| b.set_default("rabbitmq.vhost", "/"))
        .and_then(|b| b.set_default("consumer.connect_timeout_secs", 10_i64))
        .and_then(|b| b.set_default("consumer.operation_timeout_secs", 30_i64))
        .and_then(|b| b.set_default("consumer.requeue_on_handler_failure", false))
        .and_then(|b| b.set_default("consumer.max_reconnect_delay_secs", 30_i64))
        .map_err(|err| AmqpError::ConfigError(err.to_string()))?;

    builder
        .add_source(env.prefix_separator("__").separator("__").try_parsing(true))
        .build()
        .and_then(|cfg| cfg.try_deserialize::<Configs>())
        .map_err(|err| AmqpError::ConfigError(err.to_string()))
}
