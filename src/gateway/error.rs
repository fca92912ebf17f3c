//! Gateway error types
//!
//! This module defines a single error type for the whole gateway, following
//! the same conventions throughout:
//! - Typed variants with semantic meaning
//! - A direct mapping from every variant to the RESP error string clients see
//! - Classifiers that drive the session policy (reply-and-continue vs close)
//!
//! The reply wordings are load-bearing: clients of the original gateway match
//! on them, so `reply_string()` must reproduce them byte for byte.

use thiserror::Error;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use super::constants::{ERR_ACKS_ONLY, ERR_NOT_SUPPORTED, ERR_SHUTDOWN, ERR_SYNTAX};

/// Errors raised anywhere in the gateway.
///
/// Most variants are client-induced and reply as a RESP error while the
/// session continues; see `is_session_fatal()` for the ones that end it.
#[derive(Error, Debug)]
pub enum GatewayError {
    // ===== Command parse errors =====
    /// BLPOP key did not match `topics:<t1>,<t2>,...`
    #[error("Cannot parse topics: '{raw}'")]
    TopicParse { raw: String },

    /// BLPOP key matched the `topics:` prefix but named no topics
    #[error("Not enough topics")]
    NotEnoughTopics,

    /// RPUSH value did not match `<topic>:<partition>:<offset>`
    #[error("Cannot parse ack: '{raw}'")]
    AckParse { raw: String },

    /// RPUSH targeted a key other than `acks`
    #[error("{}", ERR_ACKS_ONLY)]
    AcksKeyOnly,

    /// Malformed command shape (e.g. unknown CLIENT subcommand)
    #[error("{}", ERR_SYNTAX)]
    Syntax,

    /// Command outside the supported subset
    #[error("{}", ERR_NOT_SUPPORTED)]
    UnsupportedCommand,

    // ===== Identity errors =====
    /// CLIENT SETNAME raced another connection and lost
    #[error("id {id} is already taken")]
    IdTaken { id: String },

    /// CLIENT SETNAME with an empty id
    #[error("client id cannot be empty")]
    EmptyClientId,

    /// CLIENT SETNAME on a client that already holds a permanent id
    #[error("client is already named '{id}'")]
    AlreadyNamed { id: String },

    // ===== Consumer errors =====
    /// Ack for a topic the client never subscribed to via BLPOP
    #[error("no consumer for topic '{topic}'")]
    NoConsumerForTopic { topic: String },

    /// Commit routed to a consumer whose subscription lacks the topic
    #[error("consumer is not subscribed to topic '{topic}'")]
    NotSubscribed { topic: String },

    /// The consumer's poll loop ended and sealed its delivery channel
    #[error("consumer terminated")]
    ConsumerTerminated,

    // ===== Lifecycle =====
    /// Server-wide cancellation observed mid-command
    #[error("{}", ERR_SHUTDOWN)]
    ServerShutdown,

    // ===== Transport =====
    /// RESP framing violation; replied to the client, session continues
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Error from the Kafka client library
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    /// Socket-level failure; terminates the session
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all internal error (prefer specific variants)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The exact string written into a RESP error reply for this error.
    ///
    /// Kafka errors reply the underlying library's own message so commit
    /// failures surface broker detail unchanged.
    pub fn reply_string(&self) -> String {
        match self {
            GatewayError::Kafka(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    /// Returns true when the session cannot usefully continue after this
    /// error. Everything else is replied to the client and the command loop
    /// keeps reading.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            GatewayError::Io(_) | GatewayError::ServerShutdown | GatewayError::Internal(_)
        )
    }

    /// Returns true when this error, observed inside a consumer poll loop,
    /// should terminate the loop rather than be logged and skipped.
    pub fn is_fatal_source(&self) -> bool {
        match self {
            GatewayError::Kafka(KafkaError::MessageConsumption(code)) => matches!(
                code,
                RDKafkaErrorCode::Authentication
                    | RDKafkaErrorCode::AllBrokersDown
                    | RDKafkaErrorCode::Fatal
            ),
            GatewayError::Internal(_) => true,
            _ => false,
        }
    }

    /// Create a topic-key parse error, preserving the raw key for the reply.
    pub fn topic_parse(raw: impl Into<String>) -> Self {
        GatewayError::TopicParse { raw: raw.into() }
    }

    /// Create an ack-token parse error, preserving the raw token.
    pub fn ack_parse(raw: impl Into<String>) -> Self {
        GatewayError::AckParse { raw: raw.into() }
    }

    /// Create a RESP protocol error with context.
    pub fn protocol(message: impl Into<String>) -> Self {
        GatewayError::Protocol {
            message: message.into(),
        }
    }

    /// Create a no-consumer error for an unacknowledged topic.
    pub fn no_consumer(topic: impl Into<String>) -> Self {
        GatewayError::NoConsumerForTopic {
            topic: topic.into(),
        }
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
