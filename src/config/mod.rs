use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, fs, path::Path};

use crate::core::retry::RetryPolicy;
use crate::provider::{QueueRef, QueueSet, ReceiveOptions};

pub const DEFAULT_CONFIG_PATH: &str = "queueboard.toml";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_owned(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Memory,
    Sqs,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub region: String,
    pub endpoint_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::Memory,
            region: "us-east-1".to_owned(),
            endpoint_url: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct QueuesConfig {
    pub standard: String,
    pub fifo: String,
    pub standard_dlq: Option<String>,
    pub fifo_dlq: Option<String>,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            standard: "queueboard-standard".to_owned(),
            fifo: "queueboard-orders.fifo".to_owned(),
            standard_dlq: Some("queueboard-standard-dlq".to_owned()),
            fifo_dlq: Some("queueboard-orders-dlq.fifo".to_owned()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ConsumerConfig {
    pub visibility_timeout_secs: i32,
    pub wait_time_secs: i32,
    pub standard_max_messages: i32,
    pub fifo_max_messages: i32,
    pub error_backoff_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 30,
            wait_time_secs: 10,
            standard_max_messages: 10,
            fifo_max_messages: 1,
            error_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LifecycleConfig {
    pub processing_delay_ms: u64,
    pub done_delay_ms: u64,
    pub dlq_delay_ms: u64,
    pub backoff_unit_ms: u64,
    pub max_attempts: u32,
    /// Seed for the failure draw; random when absent.
    pub seed: Option<u64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            processing_delay_ms: 1_000,
            done_delay_ms: 3_000,
            dlq_delay_ms: 2_000,
            backoff_unit_ms: 1_000,
            max_attempts: 3,
            seed: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    pub dedup_window_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: 300,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub queues: QueuesConfig,
    pub consumer: ConsumerConfig,
    pub lifecycle: LifecycleConfig,
    pub memory: MemoryConfig,
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        let l = &self.lifecycle;
        RetryPolicy {
            max_attempts: l.max_attempts.max(1),
            backoff_unit: Duration::from_millis(l.backoff_unit_ms),
            processing_delay: Duration::from_millis(l.processing_delay_ms),
            done_delay: Duration::from_millis(l.done_delay_ms),
            dlq_delay: Duration::from_millis(l.dlq_delay_ms),
        }
    }

    pub fn queue_set(&self) -> QueueSet {
        let q = &self.queues;
        QueueSet::new(q.standard.as_str(), q.fifo.as_str()).with_dead_letters(
            q.standard_dlq.clone().map(QueueRef::from),
            q.fifo_dlq.clone().map(QueueRef::from),
        )
    }

    pub fn receive_options(&self, max_messages: i32) -> ReceiveOptions {
        ReceiveOptions {
            max_messages: max_messages.clamp(1, 10),
            visibility_timeout_secs: self.consumer.visibility_timeout_secs,
            wait_time_secs: self.consumer.wait_time_secs,
            ..ReceiveOptions::default()
        }
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.consumer.error_backoff_secs)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.memory.dedup_window_secs)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Applies overrides from any key lookup; blank values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("STANDARD_QUEUE_URL") {
            self.queues.standard = v;
        }
        if let Some(v) = get("FIFO_QUEUE_URL") {
            self.queues.fifo = v;
        }
        if let Some(v) = get("STANDARD_DLQ_URL") {
            self.queues.standard_dlq = Some(v);
        }
        if let Some(v) = get("FIFO_DLQ_URL") {
            self.queues.fifo_dlq = Some(v);
        }
        if let Some(v) = get("AWS_REGION") {
            self.provider.region = v;
        }
        if let Some(port) = get("PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
            let host = self
                .server
                .bind_addr
                .rsplit_once(':')
                .map_or("0.0.0.0", |(h, _)| h)
                .to_owned();
            self.server.bind_addr = format!("{host}:{port}");
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.receive_options(10), ReceiveOptions::default());
        assert!(config.queue_set().fifo.is_fifo());
    }

    #[test]
    fn partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [provider]
            kind = "sqs"

            [lifecycle]
            max_attempts = 5
            seed = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Sqs);
        assert_eq!(config.provider.region, "us-east-1");
        assert_eq!(config.lifecycle.max_attempts, 5);
        assert_eq!(config.lifecycle.seed, Some(42));
        assert_eq!(config.lifecycle.done_delay_ms, 3_000);
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FIFO_QUEUE_URL", "https://sqs.local/1/orders.fifo"),
            ("FIFO_DLQ_URL", "https://sqs.local/1/orders-dlq.fifo"),
            ("STANDARD_QUEUE_URL", "  "),
            ("PORT", "8080"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.queues.fifo, "https://sqs.local/1/orders.fifo");
        assert_eq!(config.queues.standard, QueuesConfig::default().standard);
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(
            config.queue_set().dead_letter(crate::core::message::Discipline::Fifo).map(|q| q.as_str()),
            Some("https://sqs.local/1/orders-dlq.fifo")
        );
    }

    #[test]
    fn prints_back_as_toml() {
        let text = toml::to_string(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back, Config::default());
    }
}
