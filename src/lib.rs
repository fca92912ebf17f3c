//! respgate: a RESP-to-Kafka consumer gateway.
//!
//! Clients speak a small subset of the Redis protocol: `BLPOP` on a
//! `topics:...` pseudo-list pulls the next Kafka message, `RPUSH acks`
//! commits a processed offset, and `CLIENT SETNAME` pins the consumer group
//! identity. The gateway owns the Kafka consumers and their lifecycles.

pub mod config;
pub mod gateway;

pub use config::Config;
