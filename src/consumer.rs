// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! This module runs the injected handler for one delivery and decides how the
//! delivery is settled. The handler runs on its own task so a slow or
//! panicking handler cannot take the session down with it; the session awaits
//! the outcome before settling, which keeps at most one message in flight.

use crate::{handler::InboundMessage, handler::MessageHandler, otel};
use opentelemetry::{
    global::BoxedTracer,
    trace::{FutureExt, Status, TraceContextExt},
};
use std::{borrow::Cow, sync::Arc, time::Duration};
use tracing::{debug, error, warn};

/// How a processed delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Reject { requeue: bool },
}

/// Identity and failure policy of the subscription processing deliveries.
#[derive(Clone)]
pub(crate) struct DeliveryContext {
    pub(crate) consumer_id: String,
    pub(crate) topic: String,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) handler_timeout: Option<Duration>,
    pub(crate) requeue_on_failure: bool,
}

/// Runs the handler for a delivery and returns its settlement.
///
/// Handler success is acknowledged. A handler error, panic or timeout is
/// rejected, requeued only when the subscription asks for it; a timed out
/// handler task is aborted.
///
/// # Parameters
/// * `tracer` - OpenTelemetry tracer for the consumer span
/// * `ctx` - Subscription identity, handler and failure policy
/// * `msg` - The delivery
pub(crate) async fn consume(
    tracer: &BoxedTracer,
    ctx: &DeliveryContext,
    msg: &InboundMessage,
) -> Disposition {
    let (otel_ctx, span) = otel::new_span(&msg.headers, tracer, &msg.routing_key);
    let cx = otel_ctx.with_span(span);

    debug!(
        delivery_tag = msg.delivery_tag,
        routing_key = msg.routing_key,
        redelivered = msg.redelivered,
        "received message"
    );

    let handler = ctx.handler.clone();
    let consumer_id = ctx.consumer_id.clone();
    let topic = ctx.topic.clone();
    let payload = msg.payload.clone();

    // the consumer span is the active span while the handler runs
    let mut task = tokio::spawn(
        async move { handler.handle(&consumer_id, &topic, &payload).await }.with_context(cx.clone()),
    );

    let joined = match ctx.handler_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                warn!(
                    delivery_tag = msg.delivery_tag,
                    timeout_secs = limit.as_secs(),
                    "handler did not complete in time"
                );
                cx.span().set_status(Status::Error {
                    description: Cow::from("handler timed out"),
                });
                return reject(ctx);
            }
        },
        None => task.await,
    };

    match joined {
        Ok(Ok(())) => {
            debug!(delivery_tag = msg.delivery_tag, "message successfully processed");
            cx.span().set_status(Status::Ok);
            Disposition::Ack
        }
        Ok(Err(err)) => {
            error!(
                error = err.to_string(),
                delivery_tag = msg.delivery_tag,
                "handler failed"
            );
            cx.span().record_error(&err);
            cx.span().set_status(Status::Error {
                description: Cow::from("handler failed"),
            });
            reject(ctx)
        }
        Err(err) => {
            error!(
                error = err.to_string(),
                delivery_tag = msg.delivery_tag,
                "handler task panicked"
            );
            cx.span().set_status(Status::Error {
                description: Cow::from("handler panicked"),
            });
            reject(ctx)
        }
    }
}

fn reject(ctx: &DeliveryContext) -> Disposition {
    Disposition::Reject {
        requeue: ctx.requeue_on_failure,
    }
}
