// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! This module handles the creation of AMQP connections and channels and
//! provides `LapinTransport`, the `Transport` a session uses to talk to a real
//! RabbitMQ server. Broker-initiated closures are reported through lapin's
//! error callbacks and the consumer stream is forwarded delivery by delivery.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    handler::InboundMessage,
    queue::{QueueBinding, QueueDefinition},
    transport::{EventSink, Transport, TransportFactory},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicQosOptions, QueueBindOptions,
    },
    types::{AMQPValue, FieldTable, LongString},
    Channel, Connection, ConnectionProperties,
};
use std::collections::BTreeMap;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Reply code sent with a client initiated close
pub const REPLY_SUCCESS: u16 = 200;

/// Opens an AMQP connection.
///
/// # Parameters
/// * `uri` - AMQP URI of the broker
/// * `connection_name` - Name shown for the connection in the broker
pub async fn new_amqp_connection(uri: &str, connection_name: &str) -> Result<Connection, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(connection_name.to_owned()));

    match Connection::connect(uri, options).await {
        Ok(c) => {
            debug!("amqp connected");
            Ok(c)
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }
}

/// Creates a new AMQP channel on an established connection.
pub async fn new_amqp_channel(conn: &Connection) -> Result<Channel, AmqpError> {
    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!("channel created");
            Ok(c)
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError(err.to_string()))
        }
    }
}

impl From<Delivery> for InboundMessage {
    fn from(delivery: Delivery) -> Self {
        InboundMessage {
            delivery_tag: delivery.delivery_tag,
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            headers: string_headers(delivery.properties.headers()),
            payload: delivery.data,
        }
    }
}

/// Keeps the string valued headers, which is what trace propagation uses.
fn string_headers(headers: &Option<FieldTable>) -> BTreeMap<String, String> {
    let Some(table) = headers else {
        return BTreeMap::default();
    };

    table
        .inner()
        .iter()
        .filter_map(|(key, value)| match value {
            AMQPValue::LongString(v) => Some((
                key.to_string(),
                String::from_utf8_lossy(v.as_bytes()).into_owned(),
            )),
            AMQPValue::ShortString(v) => Some((key.to_string(), v.to_string())),
            _ => None,
        })
        .collect()
}

/// Transport backed by a lapin connection with a single channel.
pub struct LapinTransport {
    connection_name: String,
    connection: Option<Connection>,
    channel: Option<Channel>,
    events: Option<EventSink>,
    forwarder: Option<JoinHandle<()>>,
}

impl LapinTransport {
    pub fn new(connection_name: &str) -> Self {
        LapinTransport {
            connection_name: connection_name.to_owned(),
            connection: None,
            channel: None,
            events: None,
            forwarder: None,
        }
    }

    fn channel(&self) -> Result<&Channel, AmqpError> {
        self.channel
            .as_ref()
            .ok_or_else(|| AmqpError::ChannelError("channel is not open".to_owned()))
    }
}

impl Drop for LapinTransport {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

#[async_trait]
impl Transport for LapinTransport {
    async fn connect(&mut self, url: &str, events: EventSink) -> Result<(), AmqpError> {
        let conn = new_amqp_connection(url, &self.connection_name).await?;

        let sink = events.clone();
        conn.on_error(move |err| {
            error!(error = err.to_string(), "amqp connection error");
            sink.connection_closed(err.to_string());
        });

        self.connection = Some(conn);
        self.events = Some(events);
        Ok(())
    }

    async fn open_channel(&mut self) -> Result<(), AmqpError> {
        let conn = self
            .connection
            .as_ref()
            .ok_or_else(|| AmqpError::ConnectionError("connection is not open".to_owned()))?;
        let channel = new_amqp_channel(conn).await?;

        if let Some(events) = self.events.clone() {
            channel.on_error(move |err| {
                error!(error = err.to_string(), "amqp channel error");
                events.channel_closed(err.to_string());
            });
        }

        self.channel = Some(channel);
        Ok(())
    }

    async fn declare_exchange(&mut self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        match self
            .channel()?
            .exchange_declare(
                &def.name,
                def.kind(),
                def.options(),
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn declare_queue(&mut self, def: &QueueDefinition) -> Result<String, AmqpError> {
        debug!("creating queue: {:?}", def.name);

        match self
            .channel()?
            .queue_declare(&def.name, def.options(), FieldTable::default())
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "failure to declare queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            Ok(queue) => Ok(queue.name().to_string()),
        }
    }

    async fn bind_queue(&mut self, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel()?
            .queue_bind(
                binding.queue_name,
                binding.exchange_name,
                binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.to_owned(),
                    binding.queue_name.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn set_qos(&mut self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.channel()?
            .basic_qos(prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn consume(&mut self, queue: &str, consumer_tag: &str) -> Result<String, AmqpError> {
        let events = self
            .events
            .clone()
            .ok_or_else(|| AmqpError::ConnectionError("connection is not open".to_owned()))?;

        let mut consumer = match self
            .channel()?
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(err.to_string()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = consumer.tag().to_string();

        self.forwarder = Some(tokio::spawn(async move {
            while let Some(result) = consumer.next().await {
                match result {
                    Ok(delivery) => events.delivery(InboundMessage::from(delivery)),
                    Err(err) => {
                        error!(error = err.to_string(), "errors consume msg");
                        events.channel_closed(err.to_string());
                        return;
                    }
                }
            }

            // the stream ends on basic.cancel, sent by us or by the broker
            events.consumer_cancelled();
        }));

        Ok(tag)
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.channel()?
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.channel()?
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn cancel(&mut self, consumer_tag: &str) -> Result<(), AmqpError> {
        debug!("sending a basic.cancel for consumer: {}", consumer_tag);

        self.channel()?
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to cancel the consumer");
                AmqpError::CancelConsumerError(err.to_string())
            })
    }

    async fn close_channel(&mut self) -> Result<(), AmqpError> {
        let Some(channel) = self.channel.take() else {
            return Ok(());
        };

        debug!("closing channel");
        channel.close(REPLY_SUCCESS, "Bye").await.map_err(|err| {
            error!(error = err.to_string(), "error to close the channel");
            AmqpError::ChannelError(err.to_string())
        })
    }

    async fn close_connection(&mut self) -> Result<(), AmqpError> {
        self.channel = None;
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }

        let Some(conn) = self.connection.take() else {
            return Ok(());
        };

        if !conn.status().connected() {
            debug!("connection is closing or already closed");
            return Ok(());
        }

        debug!("closing connection");
        conn.close(REPLY_SUCCESS, "Bye").await.map_err(|err| {
            error!(error = err.to_string(), "error to close the connection");
            AmqpError::ConnectionError(err.to_string())
        })
    }
}

/// Creates a `LapinTransport` for every session attempt.
#[derive(Debug, Clone)]
pub struct LapinConnector {
    connection_name: String,
}

impl LapinConnector {
    /// # Parameters
    /// * `connection_name` - Name shown for each connection in the broker
    pub fn new(connection_name: &str) -> Self {
        LapinConnector {
            connection_name: connection_name.to_owned(),
        }
    }
}

impl TransportFactory for LapinConnector {
    fn create(&self) -> Box<dyn Transport> {
        Box::new(LapinTransport::new(&self.connection_name))
    }
}
