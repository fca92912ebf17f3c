// RESP-to-Kafka gateway
//
// This module contains the whole gateway:
// - RESP2 command parsing/encoding (protocol/)
// - Key and ack-token parsers (parsers)
// - The MessageSource seam hiding the Kafka client (source)
// - Consumer poll loops with bounded delivery channels (consumer)
// - The consumer pool with lazy creation and stale reaping (manager)
// - Per-connection state (client) and the TCP dispatcher (server)
//
// Architecture overview:
// =====================
//
// One task per accepted connection reads RESP commands in a loop. BLPOP
// resolves (or lazily creates) a per-client consumer and waits on one of
// {message, timeout, server shutdown}. RPUSH to `acks` parses an offset
// token and forwards a synchronous commit to the matching consumer. A
// background reaper removes consumers whose client is gone. One root
// cancellation token drives every task to a clean exit.

pub mod client;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod manager;
pub mod messages;
pub mod parsers;
pub mod protocol;
pub mod server;
pub mod source;

// Re-export commonly used types for convenience
pub use client::Client;
pub use consumer::{Consumer, ConsumerId, ConsumerState};
pub use error::{GatewayError, Result};
pub use manager::{ConsumerManager, SourceFactory};
pub use messages::{AckRequest, Message};
pub use server::{ClientTable, Server};
pub use source::{KafkaSource, MessageSource};
