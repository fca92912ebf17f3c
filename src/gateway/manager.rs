//! Consumer Manager
//!
//! Owns every live consumer. Clients hold only `ConsumerId` handles; the
//! pool here is the single strong reference path to a consumer that can
//! outlive its client (a reconnect under the same name picks the stream
//! back up).
//!
//! # Lifecycle
//!
//! Consumers are created lazily on the first BLPOP naming a topic set,
//! cancelled individually when their client disconnects, reaped when their
//! owning client id vanishes from the client table, and torn down together
//! on global cancellation. All pool mutations take one mutex, so creation
//! never races the reaper.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;

use super::consumer::{Consumer, ConsumerId};
use super::error::Result;
use super::parsers::fingerprint;
use super::server::ClientTable;
use super::source::{KafkaSource, MessageSource};

/// Builds a subscribed `MessageSource` for a new consumer. Swapped out in
/// tests for scripted sources.
pub type SourceFactory =
    Arc<dyn Fn(&str, &[String]) -> Result<Arc<dyn MessageSource>> + Send + Sync>;

struct PoolEntry {
    consumer: Arc<Consumer>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    /// Client id this consumer was created for; the reaper's liveness key
    owner: String,
}

/// Maps `ConsumerId` to its pooled consumer; spawns on demand, reaps stale
/// entries, and coordinates global shutdown.
pub struct ConsumerManager {
    pool: Mutex<HashMap<ConsumerId, PoolEntry>>,
    clients: Arc<ClientTable>,
    config: Arc<Config>,
    factory: SourceFactory,
    cancel: CancellationToken,
}

impl ConsumerManager {
    pub fn new(
        config: Arc<Config>,
        clients: Arc<ClientTable>,
        cancel: CancellationToken,
        factory: SourceFactory,
    ) -> Self {
        Self {
            pool: Mutex::new(HashMap::new()),
            clients,
            config,
            factory,
            cancel,
        }
    }

    /// Manager wired to real Kafka consumers.
    pub fn with_kafka(
        config: Arc<Config>,
        clients: Arc<ClientTable>,
        cancel: CancellationToken,
    ) -> Self {
        let factory: SourceFactory = {
            let config = config.clone();
            Arc::new(move |group_id, topics| {
                let source = KafkaSource::connect(&config, group_id, topics)?;
                Ok(Arc::new(source) as Arc<dyn MessageSource>)
            })
        };
        Self::new(config, clients, cancel, factory)
    }

    /// Return the consumer for `owner`'s topic set, constructing and
    /// starting one if absent. Construction, pool insertion, and poll-loop
    /// spawn all happen under the pool mutex, so no two callers can both
    /// observe absence and construct.
    pub fn get(&self, owner: &str, topics: &[String]) -> Result<Arc<Consumer>> {
        let id = ConsumerId::new(owner, &fingerprint(topics));

        let mut pool = self.pool.lock();
        if let Some(entry) = pool.get(&id) {
            return Ok(entry.consumer.clone());
        }

        let group_id = self.config.group_id(owner);
        let source = (self.factory)(&group_id, topics)?;
        let consumer = Arc::new(Consumer::new(
            id.clone(),
            topics.to_vec(),
            source,
            self.config.channel_capacity,
            self.config.poll_interval,
        ));

        info!(id = %id, group = %group_id, "spawning consumer");
        let cancel = self.cancel.child_token();
        let join = tokio::spawn({
            let consumer = consumer.clone();
            let cancel = cancel.clone();
            async move { consumer.run(cancel).await }
        });

        pool.insert(
            id,
            PoolEntry {
                consumer: consumer.clone(),
                cancel,
                join,
                owner: owner.to_string(),
            },
        );

        Ok(consumer)
    }

    /// Look up a pooled consumer without creating one.
    pub fn lookup(&self, id: &ConsumerId) -> Option<Arc<Consumer>> {
        self.pool.lock().get(id).map(|e| e.consumer.clone())
    }

    /// Cancel the named consumer, wait for its poll loop, and drop it from
    /// the pool. Idempotent: a second call finds nothing to do.
    pub async fn shutdown_consumer(&self, id: &ConsumerId) {
        let entry = self.pool.lock().remove(id);
        let Some(entry) = entry else { return };

        info!(id = %id, "terminating consumer");
        entry.cancel.cancel();
        if let Err(e) = entry.join.await {
            warn!(id = %id, error = %e, "consumer poll loop panicked");
        }
    }

    /// Re-point ownership after a client renames itself via SETNAME, so
    /// consumers created under the temporary id are not reaped while their
    /// client lives on under the permanent one.
    pub fn rename_owner(&self, old: &str, new: &str) {
        let mut pool = self.pool.lock();
        for entry in pool.values_mut() {
            if entry.owner == old {
                entry.owner = new.to_string();
            }
        }
    }

    /// Drop every consumer whose owning client id is no longer present in
    /// the server client table.
    pub async fn reap_stale(&self) {
        let stale: Vec<ConsumerId> = {
            let pool = self.pool.lock();
            pool.iter()
                .filter(|(_, entry)| !self.clients.contains(&entry.owner))
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in stale {
            info!(id = %id, "reaping stale consumer");
            self.shutdown_consumer(&id).await;
        }
    }

    /// Cancel every consumer and wait for every poll loop. Idempotent.
    pub async fn shutdown_all(&self) {
        let entries: Vec<(ConsumerId, PoolEntry)> = self.pool.lock().drain().collect();
        if entries.is_empty() {
            return;
        }

        for (id, entry) in &entries {
            info!(id = %id, "terminating consumer");
            entry.cancel.cancel();
        }

        info!("waiting for all consumers to finish");
        for (id, entry) in entries {
            if let Err(e) = entry.join.await {
                warn!(id = %id, error = %e, "consumer poll loop panicked");
            }
        }
        info!("all consumers shut down");
    }

    /// Reaper loop: ticks until global cancellation, then tears everything
    /// down.
    pub async fn run(&self) {
        let mut ticker = tokio::time::interval(self.config.reap_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("manager shutting down");
                    self.shutdown_all().await;
                    return;
                }
                _ = ticker.tick() => self.reap_stale().await,
            }
        }
    }

    /// Number of live consumers; observability and test hook.
    pub fn pool_size(&self) -> usize {
        self.pool.lock().len()
    }
}
