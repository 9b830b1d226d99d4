// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Publishes a random word to every topic, drawn separately for each one.

use clap::Parser;
use rand::{seq::SliceRandom, Rng};
use topic_consumer::{config, errors::AmqpError, logging, publisher::TopicPublisher};
use tracing::info;

const WORDS: [&str; 5] = ["sunset", "moonlight", "whisper", "breeze", "dream"];
const ROUTING_KEYS: [&str; 3] = ["jokes.random", "poems.random", "limericks.random"];

#[derive(Parser)]
#[command(name = "sender", about = "Publish a random word to each topic")]
struct Args {
    /// Word to publish instead of a random one
    #[arg(long)]
    word: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), AmqpError> {
    let args = Args::parse();
    let cfg = config::load()?;
    logging::init(&cfg.app);

    let publisher = TopicPublisher::connect(&cfg.rabbitmq.uri(), &cfg.app.name).await?;
    let mut rng = rand::thread_rng();

    for routing_key in ROUTING_KEYS {
        let word = pick_word(args.word.as_deref(), &mut rng);
        publisher.publish(routing_key, word.as_bytes()).await?;
        info!(routing_key, word, "sent");
    }

    publisher.close().await
}

/// Returns `fixed` when given, a random entry of `WORDS` otherwise.
fn pick_word<'w, R: Rng>(fixed: Option<&'w str>, rng: &mut R) -> &'w str {
    match fixed {
        Some(word) => word,
        None => WORDS.choose(rng).copied().unwrap_or(WORDS[0]),
    }
}
