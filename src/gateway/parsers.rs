// Key and token parsers for the two pseudo-list commands
//
// BLPOP keys look like `topics:t1,t2,...` and name the topic set to consume.
// RPUSH values look like `topic:partition:offset` and acknowledge one
// processed message. Both parsers reply fixed wordings on failure.

use super::error::{GatewayError, Result};
use super::messages::AckRequest;

/// Parse a BLPOP key of the form `topics:<t1>,<t2>,...`.
///
/// Empty segments (`topics:a,,b`) are discarded; a key that names no
/// non-empty topic is rejected with `Not enough topics`.
pub fn parse_topics(key: &str) -> Result<Vec<String>> {
    let (prefix, rest) = key
        .split_once(':')
        .ok_or_else(|| GatewayError::topic_parse(key))?;

    if prefix != "topics" {
        return Err(GatewayError::topic_parse(key));
    }

    let topics: Vec<String> = rest
        .split(',')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    if topics.is_empty() {
        return Err(GatewayError::NotEnoughTopics);
    }

    Ok(topics)
}

/// Parse an ack token of the form `<topic>:<partition>:<offset>` with a
/// 32-bit partition and a 64-bit offset.
///
/// Every malformed token replies `Cannot parse ack: '<raw>'`; broker error
/// text never leaks into parse failures.
pub fn parse_ack(raw: &str) -> Result<AckRequest> {
    let mut parts = raw.splitn(3, ':');

    let topic = parts.next().filter(|t| !t.is_empty());
    let partition = parts.next().and_then(|p| p.parse::<i32>().ok());
    let offset = parts.next().and_then(|o| o.parse::<i64>().ok());

    match (topic, partition, offset) {
        (Some(topic), Some(partition), Some(offset)) => Ok(AckRequest {
            topic: topic.to_string(),
            partition,
            offset,
        }),
        _ => Err(GatewayError::ack_parse(raw)),
    }
}

/// Canonical representation of a topic set: sorted, de-duplicated and
/// comma-joined. Used as the per-client consumer map key, so `a,b` and
/// `b,a` resolve to the same consumer.
pub fn fingerprint(topics: &[String]) -> String {
    let mut sorted: Vec<&str> = topics.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(",")
}
