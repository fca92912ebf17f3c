// RESP2 wire codec
//
// This module contains the byte-level protocol code:
// - decoding.rs: incremental command parser (arrays of bulk strings)
// - encoding.rs: buffered reply writer
//
// The command surface of the gateway is tiny, but the framing is ordinary
// RESP2, so any Redis client library can drive it. Replies are buffered and
// flushed explicitly by the dispatcher to keep pipelined commands cheap.

pub mod decoding;
pub mod encoding;

pub use decoding::{Command, CommandReader};
pub use encoding::ReplyWriter;
