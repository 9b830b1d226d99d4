// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Scripted broker used by the session, supervisor and dispatcher tests.
//!
//! A `BrokerScript` confirms every request unless told to fail or hang at a
//! step, records each request it receives, and pushes the scripted
//! notifications right after the consumer started.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    handler::InboundMessage,
    queue::{QueueBinding, QueueDefinition},
    transport::{EventSink, Transport, TransportFactory},
};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub(crate) const QUEUE_NAME: &str = "amq.gen-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Connect(String),
    OpenChannel,
    DeclareExchange(String),
    DeclareQueue { exclusive: bool },
    BindQueue {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    SetQos(u16),
    Consume(String),
    Ack(u64),
    Nack(u64, bool),
    Cancel(String),
    CloseChannel,
    CloseConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Connect,
    OpenChannel,
    DeclareExchange,
    DeclareQueue,
    BindQueue,
    SetQos,
    Consume,
}

#[derive(Debug, Clone)]
enum Notification {
    Deliver(InboundMessage),
    CloseChannel(String),
    CancelConsumer,
    CloseConnection(String),
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<Call>,
    fail_at: Option<Step>,
    hang_at: Option<Step>,
    after_consume: Vec<Notification>,
    next_tag: u64,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct BrokerScript {
    inner: Arc<Mutex<Script>>,
}

impl BrokerScript {
    pub(crate) fn new() -> Self {
        BrokerScript::default()
    }

    pub(crate) fn fail_at(self, step: Step) -> Self {
        self.inner.lock().unwrap().fail_at = Some(step);
        self
    }

    pub(crate) fn hang_at(self, step: Step) -> Self {
        self.inner.lock().unwrap().hang_at = Some(step);
        self
    }

    pub(crate) fn deliver(self, routing_key: &str, payload: &[u8]) -> Self {
        {
            let mut script = self.inner.lock().unwrap();
            script.next_tag += 1;
            let msg = InboundMessage {
                delivery_tag: script.next_tag,
                exchange: "agent_exchange".to_owned(),
                routing_key: routing_key.to_owned(),
                payload: payload.to_vec(),
                ..Default::default()
            };
            script.after_consume.push(Notification::Deliver(msg));
        }
        self
    }

    pub(crate) fn then_close_channel(self, reason: &str) -> Self {
        self.push(Notification::CloseChannel(reason.to_owned()))
    }

    pub(crate) fn then_cancel_consumer(self) -> Self {
        self.push(Notification::CancelConsumer)
    }

    pub(crate) fn then_close_connection(self, reason: &str) -> Self {
        self.push(Notification::CloseConnection(reason.to_owned()))
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub(crate) fn transport(&self) -> Box<dyn Transport> {
        Box::new(ScriptedTransport {
            script: self.clone(),
            events: None,
        })
    }

    fn push(self, notification: Notification) -> Self {
        self.inner.lock().unwrap().after_consume.push(notification);
        self
    }

    /// Records the call and resolves the step as scripted.
    async fn step(&self, step: Step, call: Call) -> Result<(), AmqpError> {
        let (fail, hang) = {
            let mut script = self.inner.lock().unwrap();
            script.calls.push(call);
            (script.fail_at == Some(step), script.hang_at == Some(step))
        };

        if hang {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(AmqpError::ChannelError(format!("scripted failure at {step:?}")));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

struct ScriptedTransport {
    script: BrokerScript,
    events: Option<EventSink>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&mut self, url: &str, events: EventSink) -> Result<(), AmqpError> {
        self.script
            .step(Step::Connect, Call::Connect(url.to_owned()))
            .await
            .map_err(|_| AmqpError::ConnectionError("connection refused".to_owned()))?;
        self.events = Some(events);
        Ok(())
    }

    async fn open_channel(&mut self) -> Result<(), AmqpError> {
        self.script.step(Step::OpenChannel, Call::OpenChannel).await
    }

    async fn declare_exchange(&mut self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        self.script
            .step(Step::DeclareExchange, Call::DeclareExchange(def.name().to_owned()))
            .await
    }

    async fn declare_queue(&mut self, def: &QueueDefinition) -> Result<String, AmqpError> {
        self.script
            .step(
                Step::DeclareQueue,
                Call::DeclareQueue {
                    exclusive: def.is_exclusive(),
                },
            )
            .await?;
        Ok(QUEUE_NAME.to_owned())
    }

    async fn bind_queue(&mut self, binding: &QueueBinding<'_>) -> Result<(), AmqpError> {
        self.script
            .step(
                Step::BindQueue,
                Call::BindQueue {
                    queue: binding.queue_name.to_owned(),
                    exchange: binding.exchange_name.to_owned(),
                    routing_key: binding.routing_key.to_owned(),
                },
            )
            .await
    }

    async fn set_qos(&mut self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.script.step(Step::SetQos, Call::SetQos(prefetch_count)).await
    }

    async fn consume(&mut self, queue: &str, consumer_tag: &str) -> Result<String, AmqpError> {
        self.script
            .step(Step::Consume, Call::Consume(queue.to_owned()))
            .await?;

        let notifications = self.script.inner.lock().unwrap().after_consume.clone();
        if let Some(events) = &self.events {
            for notification in notifications {
                match notification {
                    Notification::Deliver(msg) => events.delivery(msg),
                    Notification::CloseChannel(reason) => events.channel_closed(reason),
                    Notification::CancelConsumer => events.consumer_cancelled(),
                    Notification::CloseConnection(reason) => events.connection_closed(reason),
                }
            }
        }

        Ok(consumer_tag.to_owned())
    }

    async fn ack(&mut self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.script.record(Call::Ack(delivery_tag));
        Ok(())
    }

    async fn nack(&mut self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.script.record(Call::Nack(delivery_tag, requeue));
        Ok(())
    }

    async fn cancel(&mut self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.script.record(Call::Cancel(consumer_tag.to_owned()));
        // like lapin, the consumer stream ends once the cancel went through
        if let Some(events) = &self.events {
            events.consumer_cancelled();
        }
        Ok(())
    }

    async fn close_channel(&mut self) -> Result<(), AmqpError> {
        self.script.record(Call::CloseChannel);
        Ok(())
    }

    async fn close_connection(&mut self) -> Result<(), AmqpError> {
        self.script.record(Call::CloseConnection);
        Ok(())
    }
}

/// Hands out one script per session attempt and records when each attempt
/// started. Once the scripts run out, every attempt fails to connect.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    scripts: Mutex<VecDeque<BrokerScript>>,
    attempts: Mutex<Vec<Instant>>,
    stop_at: Mutex<Option<(usize, CancellationToken)>>,
}

impl ScriptedConnector {
    pub(crate) fn new(scripts: Vec<BrokerScript>) -> Self {
        ScriptedConnector {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    /// Cancels `token` when attempt number `attempt` (1-based) is created.
    pub(crate) fn stop_on_attempt(self, attempt: usize, token: CancellationToken) -> Self {
        *self.stop_at.lock().unwrap() = Some((attempt, token));
        self
    }

    pub(crate) fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    /// Seconds elapsed between consecutive attempts.
    pub(crate) fn delays(&self) -> Vec<u64> {
        self.attempts()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_secs())
            .collect()
    }
}

impl TransportFactory for ScriptedConnector {
    fn create(&self) -> Box<dyn Transport> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            attempts.push(Instant::now());
            attempts.len()
        };

        if let Some((at, token)) = self.stop_at.lock().unwrap().as_ref() {
            if *at == attempt {
                token.cancel();
            }
        }

        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| BrokerScript::new().fail_at(Step::Connect))
            .transport()
    }
}
