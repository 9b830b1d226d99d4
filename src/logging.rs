// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Tracing subscriber setup shared by the binaries.

use crate::config::AppConfigs;
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` drives the filter (default `info`). In the `development`
/// environment logs are human readable with targets and line numbers,
/// everywhere else they are emitted as JSON including the current span.
pub fn init(app: &AppConfigs) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    if app.env == "development" {
        builder.with_target(true).with_line_number(true).init();
    } else {
        builder.json().with_current_span(true).with_span_list(true).init();
    }
}
