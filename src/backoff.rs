// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use std::time::Duration;

/// Upper bound of the reconnect delay in seconds.
pub const MAX_RECONNECT_DELAY_SECS: u64 = 30;

/// Capped linear reconnect delay.
///
/// Every session that never reached `Consuming` adds one second to the delay.
/// A session that did consume resets it, so a broker that dropped a healthy
/// connection is retried right away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    delay_secs: u64,
    max_secs: u64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        ReconnectBackoff::new(MAX_RECONNECT_DELAY_SECS)
    }
}

impl ReconnectBackoff {
    pub fn new(max_secs: u64) -> Self {
        ReconnectBackoff {
            delay_secs: 0,
            max_secs,
        }
    }

    /// Computes the delay before the next session, given how the last one went.
    pub fn next(&mut self, was_consuming: bool) -> Duration {
        self.delay_secs = if was_consuming {
            0
        } else {
            (self.delay_secs + 1).min(self.max_secs)
        };

        Duration::from_secs(self.delay_secs)
    }

    pub fn current(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}
