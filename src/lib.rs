// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

#[cfg(test)]
mod testing;

pub mod backoff;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod logging;
pub mod publisher;
pub mod queue;
pub mod session;
pub mod state;
pub mod subscription;
pub mod supervisor;
pub mod topics;
pub mod topology;
pub mod transport;
