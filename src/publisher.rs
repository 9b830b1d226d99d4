// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topic Publisher
//!
//! Fire-and-forget publishing to the agent exchange. The current
//! OpenTelemetry context travels in the message headers so consumers can
//! continue the trace.

use crate::{
    channel::{new_amqp_channel, new_amqp_connection, REPLY_SUCCESS},
    errors::AmqpError,
    exchange::{ExchangeDefinition, AGENT_EXCHANGE},
    otel::AmqpHeaderInjector,
};
use lapin::{
    options::BasicPublishOptions,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties, Channel, Connection,
};
use opentelemetry::{global, Context};
use std::collections::BTreeMap;
use tracing::{debug, error};
use uuid::Uuid;

/// Content type of published messages
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

pub struct TopicPublisher {
    connection: Connection,
    channel: Channel,
    exchange: ExchangeDefinition,
}

impl TopicPublisher {
    /// Connects to the broker and declares the agent exchange.
    ///
    /// # Parameters
    /// * `uri` - AMQP URI of the broker
    /// * `connection_name` - Name shown for the connection in the broker
    pub async fn connect(uri: &str, connection_name: &str) -> Result<TopicPublisher, AmqpError> {
        let connection = new_amqp_connection(uri, connection_name).await?;
        let channel = new_amqp_channel(&connection).await?;
        let exchange = ExchangeDefinition::new(AGENT_EXCHANGE);

        if let Err(err) = channel
            .exchange_declare(
                exchange.name(),
                exchange.kind(),
                exchange.options(),
                FieldTable::default(),
            )
            .await
        {
            error!(error = err.to_string(), "error to declare the exchange");
            return Err(AmqpError::DeclareExchangeError(exchange.name().to_owned()));
        }

        Ok(TopicPublisher {
            connection,
            channel,
            exchange,
        })
    }

    /// Publishes `payload` with `routing_key`, e.g. `jokes.random`.
    ///
    /// Resolves once the message was handed to the broker; there is no
    /// publisher confirmation.
    pub async fn publish(&self, routing_key: &str, payload: &[u8]) -> Result<(), AmqpError> {
        let properties = message_properties(&Context::current());

        match self
            .channel
            .basic_publish(
                self.exchange.name(),
                routing_key,
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), routing_key, "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => {
                debug!(routing_key, "message published");
                Ok(())
            }
        }
    }

    /// Closes the channel, then the connection.
    pub async fn close(self) -> Result<(), AmqpError> {
        self.channel
            .close(REPLY_SUCCESS, "bye")
            .await
            .map_err(|err| AmqpError::ChannelError(err.to_string()))?;

        self.connection
            .close(REPLY_SUCCESS, "bye")
            .await
            .map_err(|err| AmqpError::ConnectionError(err.to_string()))
    }
}

fn message_properties(ctx: &Context) -> BasicProperties {
    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();

    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut AmqpHeaderInjector::new(&mut headers))
    });

    BasicProperties::default()
        .with_content_type(ShortString::from(TEXT_CONTENT_TYPE))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(FieldTable::from(headers))
}
