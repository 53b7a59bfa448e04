//! Wiring of the running service: provider, engine, both consumer loops and
//! the producer.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, ProviderKind};
use crate::core::consumer::Consumer;
use crate::core::engine::{Engine, EngineConfig, EngineHandle};
use crate::core::message::Discipline;
use crate::core::publisher::Producer;
use crate::provider::{MemoryProvider, QueueProvider};

/// Builds the provider selected in `[provider]`.
pub async fn build_provider(config: &Config) -> anyhow::Result<Arc<dyn QueueProvider>> {
    match config.provider.kind {
        ProviderKind::Memory => Ok(Arc::new(MemoryProvider::new(config.dedup_window()))),
        #[cfg(feature = "sqs")]
        ProviderKind::Sqs => {
            let provider = crate::provider::SqsProvider::connect(
                &config.provider.region,
                config.provider.endpoint_url.as_deref(),
            )
            .await;
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "sqs"))]
        ProviderKind::Sqs => anyhow::bail!("provider kind `sqs` requires the `sqs` cargo feature"),
    }
}

/// A running instance.
pub struct App {
    pub engine: EngineHandle,
    pub producer: Producer,
    engine_task: JoinHandle<()>,
    consumers: Vec<JoinHandle<()>>,
}

impl App {
    /// Spawns the engine and one consumer loop per discipline.
    pub fn start(config: &Config, provider: Arc<dyn QueueProvider>) -> Self {
        let queues = config.queue_set();
        let (engine, engine_task) = Engine::spawn(
            EngineConfig {
                policy: config.retry_policy(),
                queues: queues.clone(),
                seed: config.lifecycle.seed,
            },
            Arc::clone(&provider),
        );

        let consumers = Discipline::ALL
            .iter()
            .map(|&discipline| {
                let max_messages = match discipline {
                    Discipline::Standard => config.consumer.standard_max_messages,
                    Discipline::Fifo => config.consumer.fifo_max_messages,
                };
                let consumer = Consumer::new(
                    discipline,
                    queues.source(discipline).clone(),
                    Arc::clone(&provider),
                    engine.clone(),
                )
                .with_options(config.receive_options(max_messages))
                .with_error_backoff(config.error_backoff());
                tokio::spawn(consumer.run())
            })
            .collect();

        info!(
            target: "queueboard::app",
            standard = %queues.standard,
            fifo = %queues.fifo,
            "Queueboard started"
        );
        Self {
            producer: Producer::new(provider, queues),
            engine,
            engine_task,
            consumers,
        }
    }

    /// Stops polling, lets pending transitions run out, then returns.
    pub async fn shutdown(self) {
        for consumer in &self.consumers {
            consumer.abort();
        }
        for consumer in self.consumers {
            let _ = consumer.await;
        }
        drop(self.engine);
        drop(self.producer);
        let _ = self.engine_task.await;
        info!(target: "queueboard::app", "Queueboard stopped");
    }
}
