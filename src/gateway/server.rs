//! TCP server and RESP command dispatcher
//!
//! One task per accepted connection. Each handler owns its socket, reads
//! commands until a hard error or end of stream, and answers:
//!
//! - `PING` → bulk `PONG`
//! - `BLPOP topics:<t1>,<t2>,... [timeout]` → next message, nil on timeout
//! - `RPUSH acks <topic>:<partition>:<offset>` → synchronous offset commit
//! - `CLIENT SETNAME <id>` / `CLIENT GETNAME` → identity management
//!
//! Shutdown: the root cancellation token stops the accept loop, interrupts
//! every blocked BLPOP (error reply `SERVER SHUTDOWN`), unparks idle
//! readers, and the server then waits for all in-flight handlers before
//! asking the manager to tear down the consumers.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;

use super::client::Client;
use super::constants::{ERR_ACKS_ONLY, ERR_NOT_SUPPORTED, ERR_SHUTDOWN, ERR_SYNTAX};
use super::error::{GatewayError, Result};
use super::manager::ConsumerManager;
use super::parsers::{parse_ack, parse_topics};
use super::protocol::{Command, CommandReader, ReplyWriter};

/// Outcome of a compare-and-insert on the client table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The id was free and is now ours
    Inserted,
    /// We already held the id
    AlreadyOwner,
    /// A different connection holds the id
    Taken,
}

/// Live client identities: id → connection serial.
///
/// Used for duplicate-name detection (SETNAME is a test-and-set on this
/// map) and as the reaper's liveness reference. Point operations only.
#[derive(Default)]
pub struct ClientTable {
    inner: DashMap<String, u64>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unconditional insert; used for the endpoint-derived temporary id at
    /// accept time.
    pub fn insert(&self, id: &str, serial: u64) {
        self.inner.insert(id.to_string(), serial);
    }

    /// Compare-and-insert. Linearizable with respect to concurrent claims
    /// on the same id: exactly one of two racing connections gets
    /// `Inserted`.
    pub fn try_claim(&self, id: &str, serial: u64) -> ClaimOutcome {
        match self.inner.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                if *occupied.get() == serial {
                    ClaimOutcome::AlreadyOwner
                } else {
                    ClaimOutcome::Taken
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(serial);
                ClaimOutcome::Inserted
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }

    /// Remove `id` only if this connection owns it; a name stolen by the
    /// table's rightful holder is never clobbered during teardown.
    pub fn remove_if_owner(&self, id: &str, serial: u64) {
        self.inner.remove_if(id, |_, held| *held == serial);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Turn the configured listen string into a bindable address; a bare
/// `:port` means all interfaces.
fn bind_addr(addr: &str) -> String {
    match addr.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => addr.to_string(),
    }
}

/// The gateway's TCP front end.
pub struct Server {
    config: Arc<Config>,
    manager: Arc<ConsumerManager>,
    clients: Arc<ClientTable>,
    cancel: CancellationToken,
    next_serial: AtomicU64,
}

impl Server {
    pub fn new(
        config: Arc<Config>,
        manager: Arc<ConsumerManager>,
        clients: Arc<ClientTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            manager,
            clients,
            cancel,
            next_serial: AtomicU64::new(1),
        }
    }

    /// Bind and serve. The only globally fatal error is a bind failure.
    pub async fn listen_and_serve(&self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr(addr)).await?;
        info!(addr = %bind_addr(addr), "listening");
        self.serve(listener).await
    }

    /// Accept loop over an already-bound listener. Returns once the root
    /// token is cancelled, every in-flight handler has finished, and the
    /// manager has torn down all consumers.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("shutting down, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((socket, addr)) => {
                        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
                        let config = self.config.clone();
                        let manager = self.manager.clone();
                        let clients = self.clients.clone();
                        let cancel = self.cancel.clone();
                        handlers.spawn(async move {
                            handle_conn(socket, addr, serial, config, manager, clients, cancel)
                                .await;
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }

        drop(listener);
        info!("waiting for in-flight connections");
        while handlers.join_next().await.is_some() {}
        info!("all connections closed");

        self.manager.shutdown_all().await;
        Ok(())
    }
}

async fn handle_conn(
    socket: TcpStream,
    addr: SocketAddr,
    serial: u64,
    config: Arc<Config>,
    manager: Arc<ConsumerManager>,
    clients: Arc<ClientTable>,
    cancel: CancellationToken,
) {
    let temp_id = addr.to_string();
    let client = Client::new(temp_id.clone(), serial, manager.clone());
    clients.insert(&temp_id, serial);
    debug!(client = %temp_id, "connection established");

    let (read_half, write_half) = socket.into_split();
    let mut session = Session {
        client,
        commands: CommandReader::new(read_half),
        replies: ReplyWriter::new(write_half),
        config,
        manager,
        clients,
        cancel,
    };

    session.run().await;

    let Session {
        client, clients, manager, ..
    } = session;
    close_client(&client, &clients, &manager).await;
}

/// Teardown for one connection: drop the table entry and request shutdown
/// of every consumer the client created. Safe to reach from any exit path.
async fn close_client(client: &Client, clients: &ClientTable, manager: &ConsumerManager) {
    clients.remove_if_owner(client.id(), client.serial());
    for id in client.consumer_ids() {
        manager.shutdown_consumer(&id).await;
    }
    debug!(client = %client.id(), "connection closed");
}

struct Session<R, W> {
    client: Client,
    commands: CommandReader<R>,
    replies: ReplyWriter<W>,
    config: Arc<Config>,
    manager: Arc<ConsumerManager>,
    clients: Arc<ClientTable>,
    cancel: CancellationToken,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Session<R, W> {
    async fn run(&mut self) {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = self.commands.read_command() => command,
            };

            let command = match command {
                Ok(Some(command)) => command,
                Ok(None) => break,
                Err(e) if !e.is_session_fatal() => {
                    // Framing violation: the decoder already resynced, so
                    // reply and keep the session alive.
                    self.replies.write_error(&e.reply_string());
                    if self.replies.flush().await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    debug!(client = %self.client.id(), error = %e, "closing connection");
                    break;
                }
            };

            let outcome = self.dispatch(&command).await;

            // Pipelining: flush only once the batch is exhausted.
            if command.is_last() {
                if let Err(e) = self.replies.flush().await {
                    warn!(client = %self.client.id(), error = %e, "write failed");
                    break;
                }
            }

            if let Err(e) = outcome {
                debug!(client = %self.client.id(), error = %e, "session ended");
                // The final reply must reach the client even mid-batch.
                let _ = self.replies.flush().await;
                break;
            }
        }
    }

    /// Route one command. `Err` means the session must end; recoverable
    /// failures have already been written as error replies.
    async fn dispatch(&mut self, command: &Command) -> Result<()> {
        match command.name().as_str() {
            "PING" => {
                self.replies.write_bulk_string("PONG");
                Ok(())
            }
            "BLPOP" => self.blpop(command).await,
            "RPUSH" => self.rpush(command).await,
            "CLIENT" => self.client_command(command),
            _ => {
                self.replies.write_error(ERR_NOT_SUPPORTED);
                Ok(())
            }
        }
    }

    async fn blpop(&mut self, command: &Command) -> Result<()> {
        let key = command.arg_str(1);
        let topics = match parse_topics(&key) {
            Ok(topics) => topics,
            Err(e) => {
                self.replies.write_error(&e.reply_string());
                return Ok(());
            }
        };

        let consumer = match self.client.consumer(&topics) {
            Ok(consumer) => consumer,
            Err(e) => {
                self.replies.write_error(&e.reply_string());
                return Ok(());
            }
        };

        // A trailing non-negative integer overrides the configured default.
        // `0` waits zero seconds; it is not the Redis "block forever".
        let mut timeout = self.config.blpop_timeout;
        let last_arg = command.arg_str(command.arg_count().saturating_sub(1));
        if let Ok(secs) = last_arg.parse::<u64>() {
            timeout = Duration::from_secs(secs);
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.replies.write_error(ERR_SHUTDOWN);
                Err(GatewayError::ServerShutdown)
            }
            msg = consumer.next_message() => {
                match msg {
                    Some(msg) => self.replies.write_message(&msg),
                    // Poll loop died (fatal Kafka error): report, keep session.
                    None => self
                        .replies
                        .write_error(&GatewayError::ConsumerTerminated.reply_string()),
                }
                Ok(())
            }
            _ = tokio::time::sleep(timeout) => {
                self.replies.write_nil_bulk();
                Ok(())
            }
        }
    }

    async fn rpush(&mut self, command: &Command) -> Result<()> {
        let key = command.arg_str(1);
        if !key.eq_ignore_ascii_case("acks") {
            self.replies.write_error(ERR_ACKS_ONLY);
            return Ok(());
        }

        let raw = command.arg_str(2);
        let ack = match parse_ack(&raw) {
            Ok(ack) => ack,
            Err(e) => {
                self.replies.write_error(&e.reply_string());
                return Ok(());
            }
        };

        let consumer = match self.client.consumer_by_topic(&ack.topic) {
            Ok(consumer) => consumer,
            Err(e) => {
                self.replies.write_error(&e.reply_string());
                return Ok(());
            }
        };

        // Synchronous from the client's perspective: the reply follows the
        // commit acknowledgement. Commit failures keep the session alive.
        match consumer
            .commit_offset(&ack.topic, ack.partition, ack.offset)
            .await
        {
            Ok(()) => self.replies.write_bulk_string("OK"),
            Err(e) => self.replies.write_error(&e.reply_string()),
        }
        Ok(())
    }

    fn client_command(&mut self, command: &Command) -> Result<()> {
        match command.arg_str(1).to_ascii_uppercase().as_str() {
            "SETNAME" => self.setname(&command.arg_str(2)),
            "GETNAME" => {
                self.replies.write_bulk_string(self.client.id());
                Ok(())
            }
            _ => {
                self.replies.write_error(ERR_SYNTAX);
                Ok(())
            }
        }
    }

    /// Test-and-set of a permanent client id. The claim on the table, the
    /// identity change, and the temporary-id removal appear atomic to
    /// concurrent SETNAME callers racing on the same id because the claim
    /// decides the race before any state changes.
    fn setname(&mut self, id: &str) -> Result<()> {
        let claim = self.clients.try_claim(id, self.client.serial());
        if claim == ClaimOutcome::Taken {
            let e = GatewayError::IdTaken { id: id.to_string() };
            self.replies.write_error(&e.reply_string());
            return Ok(());
        }

        match self.client.set_id(id) {
            Ok(old_id) => {
                self.clients.remove_if_owner(&old_id, self.client.serial());
                self.manager.rename_owner(&old_id, id);
                self.replies.write_bulk_string("OK");
            }
            Err(e) => {
                if claim == ClaimOutcome::Inserted {
                    self.clients.remove_if_owner(id, self.client.serial());
                }
                self.replies.write_error(&e.reply_string());
            }
        }
        Ok(())
    }
}
