// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Subscribes agents to topics and logs every message they receive.
//!
//! ```bash
//! receiver joking_agent:jokes poetry_agent:poems
//! receiver --list
//! ```

use clap::Parser;
use std::sync::Arc;
use topic_consumer::{
    config,
    dispatcher::{self, TopicDispatcher},
    errors::AmqpError,
    handler::LoggingHandler,
    logging,
    subscription::Subscription,
    topics,
};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
struct AgentTopic {
    consumer_id: String,
    topic: String,
}

fn parse_agent_topic(value: &str) -> Result<AgentTopic, String> {
    match value.split_once(':') {
        Some((consumer_id, topic)) if !consumer_id.is_empty() && !topic.is_empty() => {
            Ok(AgentTopic {
                consumer_id: consumer_id.to_owned(),
                topic: topic.to_owned(),
            })
        }
        _ => Err(format!("expected CONSUMER:TOPIC, got `{value}`")),
    }
}

#[derive(Parser)]
#[command(name = "receiver", about = "Consume topic messages until interrupted")]
struct Args {
    /// Subscriptions as CONSUMER:TOPIC pairs
    #[arg(
        value_name = "CONSUMER:TOPIC",
        value_parser = parse_agent_topic,
        default_values = ["joking_agent:jokes", "poetry_agent:poems"]
    )]
    subscriptions: Vec<AgentTopic>,

    /// Print the available topics and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> Result<(), AmqpError> {
    let args = Args::parse();

    if args.list {
        println!("{}", topics::list());
        return Ok(());
    }

    let cfg = config::load()?;
    logging::init(&cfg.app);

    let uri = cfg.rabbitmq.uri();
    let dispatcher = TopicDispatcher::from_configs(&cfg);
    let handler = Arc::new(LoggingHandler);

    let mut handles = vec![];
    for sub in &args.subscriptions {
        let subscription = Subscription::for_topic(&uri, &sub.consumer_id, &sub.topic)?;
        handles.push(dispatcher.start(subscription, handler.clone()));
    }

    info!(subscriptions = handles.len(), "waiting for messages, press Ctrl+C to exit");

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = err.to_string(), "failure to listen for the interrupt signal");
    }

    info!("shutting down");
    dispatcher::stop_all(handles).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_consumer_topic_pairs() {
        assert_eq!(
            parse_agent_topic("joking_agent:jokes"),
            Ok(AgentTopic {
                consumer_id: "joking_agent".to_owned(),
                topic: "jokes".to_owned(),
            })
        );
        assert!(parse_agent_topic("joking_agent").is_err());
        assert!(parse_agent_topic(":jokes").is_err());
    }

    #[test]
    fn defaults_to_jokes_and_poems() {
        let args = Args::parse_from(["receiver"]);

        let topics: Vec<&str> = args.subscriptions.iter().map(|s| s.topic.as_str()).collect();
        assert_eq!(topics, vec!["jokes", "poems"]);
        assert!(!args.list);
    }
}
