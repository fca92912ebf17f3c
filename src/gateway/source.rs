//! Message source abstraction
//!
//! This module defines the `MessageSource` trait that hides the Kafka client
//! library from the rest of the gateway. By separating broker I/O from the
//! delivery and lifecycle machinery, we achieve:
//! 1. Testability - the consumer loop and the server run against scripted
//!    sources in tests, no broker required
//! 2. Clean separation of concerns - only this module touches rdkafka types
//!
//! `KafkaSource` is the production implementation backed by rdkafka's
//! `StreamConsumer`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer as _, StreamConsumer};
use rdkafka::{Offset, TopicPartitionList};

use crate::config::Config;

use super::error::{GatewayError, Result};
use super::messages::Message;

/// Abstract interface to one subscribed Kafka consumer.
///
/// A source is created already subscribed to its topic set; the gateway only
/// ever polls it and commits offsets through it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Wait up to `deadline` for the next event.
    ///
    /// `Ok(None)` means the deadline passed without an event. Errors are
    /// classified by the caller via `GatewayError::is_fatal_source()`.
    async fn poll(&self, deadline: Duration) -> Result<Option<Message>>;

    /// Synchronously commit `next_offset` as the group's position for the
    /// topic-partition. The caller has already applied the `+ 1` convention.
    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()>;
}

/// Production source: an rdkafka `StreamConsumer` subscribed at creation.
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
}

impl KafkaSource {
    /// Create the underlying Kafka consumer and subscribe it.
    ///
    /// Creation does not contact the broker; connection and group join
    /// happen lazily on the first poll.
    pub fn connect(config: &Config, group_id: &str, topics: &[String]) -> Result<Self> {
        let consumer: StreamConsumer = config.client_config(group_id).create()?;

        let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&topic_refs)?;

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn poll(&self, deadline: Duration) -> Result<Option<Message>> {
        match tokio::time::timeout(deadline, self.consumer.recv()).await {
            Err(_elapsed) => Ok(None),
            Ok(Ok(borrowed)) => Ok(Some(Message::from(&borrowed))),
            Ok(Err(e)) => Err(GatewayError::from(e)),
        }
    }

    async fn commit(&self, topic: &str, partition: i32, next_offset: i64) -> Result<()> {
        // rdkafka's synchronous commit blocks the calling thread, so it runs
        // on the blocking pool.
        let consumer = Arc::clone(&self.consumer);
        let topic = topic.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tpl = TopicPartitionList::new();
            tpl.add_partition_offset(&topic, partition, Offset::Offset(next_offset))?;
            consumer.commit(&tpl, CommitMode::Sync)?;
            Ok(())
        })
        .await
        .map_err(|e| GatewayError::Internal(format!("commit task failed: {e}")))?
    }
}
