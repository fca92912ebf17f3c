//! Per-connection client state
//!
//! A `Client` tracks one TCP connection's identity and the consumers it has
//! created. It is owned by the connection handler and never shared, so none
//! of its state needs locking; consumers themselves live in the manager and
//! are addressed here only by id.

use std::collections::HashMap;
use std::sync::Arc;

use super::consumer::{Consumer, ConsumerId};
use super::error::{GatewayError, Result};
use super::manager::ConsumerManager;
use super::parsers::fingerprint;

pub struct Client {
    /// Current identity: the remote endpoint until CLIENT SETNAME
    id: String,
    /// Unique per-connection serial, for same-client detection in the
    /// server client table
    serial: u64,
    /// Whether a permanent id has been assigned
    named: bool,
    /// Topic-set fingerprint → the consumer created for it
    consumers: HashMap<String, (ConsumerId, Vec<String>)>,
    manager: Arc<ConsumerManager>,
}

impl Client {
    pub fn new(temp_id: String, serial: u64, manager: Arc<ConsumerManager>) -> Self {
        Self {
            id: temp_id,
            serial,
            named: false,
            consumers: HashMap::new(),
            manager,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// The consumer for a topic set, created through the manager on first
    /// use. Idempotent for a given topic set regardless of argument order.
    pub fn consumer(&mut self, topics: &[String]) -> Result<Arc<Consumer>> {
        let fp = fingerprint(topics);

        if let Some((id, _)) = self.consumers.get(&fp) {
            if let Some(consumer) = self.manager.lookup(id) {
                return Ok(consumer);
            }
            // Reaped out from under us; fall through and recreate.
        }

        let consumer = self.manager.get(&self.id, topics)?;
        self.consumers
            .insert(fp, (consumer.id().clone(), topics.to_vec()));
        Ok(consumer)
    }

    /// The consumer whose subscription contains `topic`; fails when this
    /// client never created one for it.
    pub fn consumer_by_topic(&self, topic: &str) -> Result<Arc<Consumer>> {
        let id = self
            .consumers
            .values()
            .find(|(_, topics)| topics.iter().any(|t| t == topic))
            .map(|(id, _)| id);

        id.and_then(|id| self.manager.lookup(id))
            .ok_or_else(|| GatewayError::no_consumer(topic))
    }

    /// Assign the permanent id, replacing the temporary one. Returns the
    /// replaced id so the caller can clean up the client table.
    pub fn set_id(&mut self, id: &str) -> Result<String> {
        if id.is_empty() {
            return Err(GatewayError::EmptyClientId);
        }
        if self.named {
            return Err(GatewayError::AlreadyNamed {
                id: self.id.clone(),
            });
        }

        let old = std::mem::replace(&mut self.id, id.to_string());
        self.named = true;
        Ok(old)
    }

    /// Ids of every consumer this client created; used at teardown.
    pub fn consumer_ids(&self) -> Vec<ConsumerId> {
        self.consumers.values().map(|(id, _)| id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::error::Result as GwResult;
    use crate::gateway::messages::Message;
    use crate::gateway::server::ClientTable;
    use crate::gateway::source::MessageSource;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct IdleSource;

    #[async_trait]
    impl MessageSource for IdleSource {
        async fn poll(&self, deadline: Duration) -> GwResult<Option<Message>> {
            tokio::time::sleep(deadline).await;
            Ok(None)
        }

        async fn commit(&self, _: &str, _: i32, _: i64) -> GwResult<()> {
            Ok(())
        }
    }

    fn test_manager() -> Arc<ConsumerManager> {
        Arc::new(ConsumerManager::new(
            Arc::new(Config::default()),
            Arc::new(ClientTable::new()),
            CancellationToken::new(),
            Arc::new(|_, _| Ok(Arc::new(IdleSource) as Arc<dyn MessageSource>)),
        ))
    }

    fn topics(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_reused_for_same_topic_set() {
        let manager = test_manager();
        let mut client = Client::new("127.0.0.1:5000".into(), 1, manager.clone());

        let a = client.consumer(&topics(&["x", "y"])).unwrap();
        let b = client.consumer(&topics(&["y", "x"])).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.pool_size(), 1);

        manager.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_by_topic() {
        let manager = test_manager();
        let mut client = Client::new("127.0.0.1:5000".into(), 1, manager.clone());

        client.consumer(&topics(&["x", "y"])).unwrap();

        assert!(client.consumer_by_topic("x").is_ok());
        assert!(client.consumer_by_topic("y").is_ok());

        let err = client.consumer_by_topic("z").unwrap_err();
        assert!(err.reply_string().contains("no consumer"));

        manager.shutdown_all().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_id_replaces_temporary_once() {
        let manager = test_manager();
        let mut client = Client::new("127.0.0.1:5000".into(), 1, manager);

        let old = client.set_id("c1").unwrap();
        assert_eq!(old, "127.0.0.1:5000");
        assert_eq!(client.id(), "c1");

        let err = client.set_id("c2").unwrap_err();
        assert!(matches!(err, GatewayError::AlreadyNamed { .. }));
        assert_eq!(client.id(), "c1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_id_rejects_empty() {
        let manager = test_manager();
        let mut client = Client::new("127.0.0.1:5000".into(), 1, manager);

        assert!(matches!(
            client.set_id("").unwrap_err(),
            GatewayError::EmptyClientId
        ));
        // Still renameable after the failed attempt.
        assert!(client.set_id("c1").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_ids_lists_created_consumers() {
        let manager = test_manager();
        let mut client = Client::new("c".into(), 1, manager.clone());

        client.consumer(&topics(&["a"])).unwrap();
        client.consumer(&topics(&["b"])).unwrap();
        assert_eq!(client.consumer_ids().len(), 2);

        manager.shutdown_all().await;
    }
}
