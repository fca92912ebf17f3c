//! Consumer: one Kafka group member bridged to a delivery channel
//!
//! A `Consumer` owns a `MessageSource` and runs a poll loop that forwards
//! messages into a bounded channel. The channel is the only path between the
//! poll loop and the connection handler: the loop is its sole writer, and
//! the loop's lifetime strictly covers the channel's.
//!
//! Backpressure is deliberate: the channel is small, so a slow client blocks
//! the loop in `send`, which in turn lets Kafka's own fetch buffering absorb
//! the backlog.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::{GatewayError, Result};
use super::messages::Message;
use super::source::MessageSource;

/// Identity of one pooled consumer: the owning client id plus the canonical
/// topic-set fingerprint, so one client can hold consumers for several topic
/// sets without collisions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsumerId(String);

impl ConsumerId {
    pub fn new(client_id: &str, fingerprint: &str) -> Self {
        Self(format!("{client_id}|{fingerprint}"))
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Poll-loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// Constructed; no poll has completed yet
    Starting,
    /// At least one poll completed
    Running,
    /// Loop observed cancellation or a fatal error and is winding down
    Draining,
    /// Loop exited; the delivery channel is sealed
    Terminated,
}

/// One long-lived Kafka consumer and its delivery channel.
pub struct Consumer {
    id: ConsumerId,
    topics: Vec<String>,
    source: Arc<dyn MessageSource>,
    poll_interval: Duration,
    /// Send side, taken exactly once by `run`
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    /// Receive side; locked by whichever handler currently services the
    /// owning client (a reconnect under the same name resumes the stream)
    out: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    state: Mutex<ConsumerState>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("topics", &self.topics)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Consumer {
    /// Construct without starting; `run` drives the poll loop.
    pub fn new(
        id: ConsumerId,
        topics: Vec<String>,
        source: Arc<dyn MessageSource>,
        channel_capacity: usize,
        poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(channel_capacity);
        Self {
            id,
            topics,
            source,
            poll_interval,
            tx: Mutex::new(Some(tx)),
            out: tokio::sync::Mutex::new(rx),
            state: Mutex::new(ConsumerState::Starting),
        }
    }

    pub fn id(&self) -> &ConsumerId {
        &self.id
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    pub fn subscribes_to(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock()
    }

    /// Poll loop. Runs until cancelled or a fatal source error occurs; on
    /// exit the delivery channel is sealed.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(tx) = self.tx.lock().take() else {
            warn!(id = %self.id, "poll loop started twice, ignoring");
            return;
        };

        info!(id = %self.id, topics = ?self.topics, "consumer started");

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                polled = self.source.poll(self.poll_interval) => polled,
            };

            match polled {
                Ok(Some(msg)) => {
                    self.mark_running();
                    // The send itself honours cancellation so a full
                    // channel cannot pin shutdown.
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        sent = tx.send(msg) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
                Ok(None) => self.mark_running(),
                Err(e) if e.is_fatal_source() => {
                    error!(id = %self.id, error = %e, "fatal consumer error, stopping");
                    break;
                }
                Err(e) => {
                    warn!(id = %self.id, error = %e, "transient consumer error");
                }
            }
        }

        *self.state.lock() = ConsumerState::Draining;
        drop(tx);
        *self.state.lock() = ConsumerState::Terminated;
        info!(id = %self.id, "consumer stopped");
    }

    fn mark_running(&self) {
        let mut state = self.state.lock();
        if *state == ConsumerState::Starting {
            *state = ConsumerState::Running;
        }
    }

    /// Receive the next delivered message. `None` once the poll loop has
    /// exited and drained messages were consumed.
    pub async fn next_message(&self) -> Option<Message> {
        self.out.lock().await.recv().await
    }

    /// Commit an acknowledged offset. Per Kafka convention the committed
    /// position is `offset + 1`, the next offset to read.
    pub async fn commit_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        if !self.subscribes_to(topic) {
            return Err(GatewayError::NotSubscribed {
                topic: topic.to_string(),
            });
        }
        self.source.commit(topic, partition, offset + 1).await
    }
}
