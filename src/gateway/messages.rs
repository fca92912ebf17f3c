//! Message and acknowledgement data types
//!
//! These are the internal representations passed between the consumer poll
//! loops and the connection handlers. Conversion from the Kafka client's
//! message type happens here so the rest of the gateway never touches
//! rdkafka accessors directly.

use rdkafka::message::Message as _;
use rdkafka::message::{BorrowedMessage, OwnedMessage};

/// A message delivered from Kafka, as sent over a consumer's delivery channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was read from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Broker-assigned offset
    pub offset: i64,
    /// Message payload (empty when the record had a null value)
    pub value: Vec<u8>,
}

impl Message {
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64, value: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            value,
        }
    }
}

impl From<&BorrowedMessage<'_>> for Message {
    fn from(msg: &BorrowedMessage<'_>) -> Self {
        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            value: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

impl From<&OwnedMessage> for Message {
    fn from(msg: &OwnedMessage) -> Self {
        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            value: msg.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        }
    }
}

/// An offset acknowledgement submitted by a client via `RPUSH acks`.
///
/// `offset` is the offset of the processed message; the broker commit is for
/// `offset + 1` (the next offset to read), per Kafka convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequest {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}
