use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

pub use topic_api::TopicConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "topic-server", about = "In-process fan-out topic log runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the configured topics and run producers and consumers against them
    Run(RunArgs),
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Path to the TOML config file
    #[arg(long, default_value = "topics.toml", env = "CONFIG_PATH")]
    pub config: String,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub topics: Vec<TopicConfig>,
    #[serde(default)]
    pub producers: Vec<ProducerConfig>,
    #[serde(default)]
    pub consumers: Vec<ConsumerConfig>,
    /// How long tasks get to stop after Ctrl+C before they are aborted.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

/// Publishes `count` messages built from `payload` into `topic`.
#[derive(Debug, Deserialize)]
pub struct ProducerConfig {
    pub id: String,
    pub topic: String,
    /// Message destination; defaults to the topic name.
    pub destination: Option<String>,
    pub count: u64,
    #[serde(default)]
    pub interval_ms: u64,
    /// Payload template. A table gets the sequence number injected as `seq`.
    #[serde(default = "default_payload")]
    pub payload: toml::Value,
}

fn default_payload() -> toml::Value {
    toml::Value::Table(toml::Table::new())
}

impl ProducerConfig {
    pub fn destination(&self) -> &str {
        self.destination.as_deref().unwrap_or(&self.topic)
    }
}

/// What a consumer does when its next offset has been evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Seek to the oldest retained offset and keep going, logging the loss.
    SkipToStart,
    /// Stop the consumer with an error.
    Fail,
}

fn default_on_evicted() -> EvictionPolicy {
    EvictionPolicy::SkipToStart
}

#[derive(Debug, Deserialize)]
pub struct ConsumerConfig {
    pub id: String,
    pub topic: String,
    #[serde(default = "default_on_evicted")]
    pub on_evicted: EvictionPolicy,
    /// Stop after this many messages.
    pub limit: Option<u64>,
}

impl RunConfig {
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| ServerError::Config {
            context: "read",
            detail: format!("'{path}': {e}"),
        })?;
        Self::parse(&content).map_err(|e| ServerError::Config {
            context: "parse",
            detail: format!("'{path}': {e}"),
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}
