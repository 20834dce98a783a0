//! Kafka topic metadata via rdkafka
//!
//! librdkafka calls block, so each lookup runs on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use tracing::debug;

use crate::error::{ControllerError, Result};
use crate::offsets::{OffsetMarker, TopicMetadata};

pub struct KafkaTopicMetadata {
    consumer: Arc<BaseConsumer>,
    timeout: Duration,
}

impl KafkaTopicMetadata {
    pub fn new(bootstrap_servers: &str, timeout: Duration) -> Result<Self> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", bootstrap_servers)
            .set("client.id", "downsampler-controller")
            .set("group.id", "downsampler-controller-metadata")
            .set("enable.auto.commit", "false")
            .create()?;

        Ok(Self {
            consumer: Arc::new(consumer),
            timeout,
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&BaseConsumer, Duration) -> Result<T> + Send + 'static,
    {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || f(&consumer, timeout))
            .await
            .map_err(|e| ControllerError::Other(anyhow::anyhow!("metadata task failed: {}", e)))?
    }
}

#[async_trait]
impl TopicMetadata for KafkaTopicMetadata {
    async fn partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let topic = topic.to_string();
        self.blocking(move |consumer, timeout| {
            let metadata = consumer.fetch_metadata(Some(&topic), timeout)?;
            let partitions: Vec<i32> = metadata
                .topics()
                .iter()
                .filter(|t| t.name() == topic)
                .flat_map(|t| t.partitions().iter().map(|p| p.id()))
                .collect();
            debug!(topic = %topic, count = partitions.len(), "Fetched partitions");
            Ok(partitions)
        })
        .await
    }

    async fn offset_at(&self, topic: &str, partition: i32, marker: OffsetMarker) -> Result<i64> {
        let topic = topic.to_string();
        self.blocking(move |consumer, timeout| {
            let (low, high) = consumer.fetch_watermarks(&topic, partition, timeout)?;
            Ok(match marker {
                OffsetMarker::Oldest => low,
                OffsetMarker::Newest => high,
            })
        })
        .await
    }
}
