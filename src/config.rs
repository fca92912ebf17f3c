//! Process configuration
//!
//! All tunables come from `RESPGATE_*` environment variables with defaults
//! from `gateway::constants`. Unparseable values fall back to the default
//! rather than aborting startup; the gateway is deployed alongside tooling
//! that treats a missing variable and a blank one the same way.

use std::time::Duration;

use rdkafka::config::ClientConfig;

use crate::gateway::constants::{
    DEFAULT_AUTO_OFFSET_RESET, DEFAULT_BLPOP_TIMEOUT_SECS, DEFAULT_BOOTSTRAP_SERVERS,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_GROUP_PREFIX, DEFAULT_LISTEN_ADDR,
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_REAP_INTERVAL_SECS, DEFAULT_SESSION_TIMEOUT_MS,
};

/// Gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP listen address; a bare `:port` binds all interfaces
    pub listen_addr: String,
    /// Default BLPOP wait when the command carries no timeout argument
    pub blpop_timeout: Duration,
    /// Kafka bootstrap servers
    pub bootstrap_servers: String,
    /// Consumer group prefix; the group id is `<prefix>-<client id>`
    pub group_prefix: String,
    /// `auto.offset.reset` for new groups
    pub auto_offset_reset: String,
    /// Kafka `session.timeout.ms`
    pub session_timeout_ms: u64,
    /// Delivery channel capacity per consumer
    pub channel_capacity: usize,
    /// Deadline of one poll against the Kafka consumer
    pub poll_interval: Duration,
    /// Period of the stale-consumer reaper
    pub reap_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            blpop_timeout: Duration::from_secs(DEFAULT_BLPOP_TIMEOUT_SECS),
            bootstrap_servers: DEFAULT_BOOTSTRAP_SERVERS.to_string(),
            group_prefix: DEFAULT_GROUP_PREFIX.to_string(),
            auto_offset_reset: DEFAULT_AUTO_OFFSET_RESET.to_string(),
            session_timeout_ms: DEFAULT_SESSION_TIMEOUT_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            reap_interval: Duration::from_secs(DEFAULT_REAP_INTERVAL_SECS),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; the seam tests use to inject an
    /// environment without mutating the real one.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            listen_addr: lookup("RESPGATE_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            blpop_timeout: parse_or(
                lookup("RESPGATE_BLPOP_TIMEOUT_SECS"),
                DEFAULT_BLPOP_TIMEOUT_SECS,
                Duration::from_secs,
            ),
            bootstrap_servers: lookup("RESPGATE_BOOTSTRAP_SERVERS")
                .unwrap_or(defaults.bootstrap_servers),
            group_prefix: lookup("RESPGATE_GROUP_PREFIX").unwrap_or(defaults.group_prefix),
            auto_offset_reset: lookup("RESPGATE_AUTO_OFFSET_RESET")
                .unwrap_or(defaults.auto_offset_reset),
            session_timeout_ms: parse_or(
                lookup("RESPGATE_SESSION_TIMEOUT_MS"),
                DEFAULT_SESSION_TIMEOUT_MS,
                |v| v,
            ),
            channel_capacity: parse_or(
                lookup("RESPGATE_CHANNEL_CAPACITY"),
                DEFAULT_CHANNEL_CAPACITY,
                |v| v,
            ),
            poll_interval: parse_or(
                lookup("RESPGATE_POLL_INTERVAL_MS"),
                DEFAULT_POLL_INTERVAL_MS,
                Duration::from_millis,
            ),
            reap_interval: parse_or(
                lookup("RESPGATE_REAP_INTERVAL_SECS"),
                DEFAULT_REAP_INTERVAL_SECS,
                Duration::from_secs,
            ),
        }
    }

    /// Consumer group id for a client identity.
    pub fn group_id(&self, client_id: &str) -> String {
        format!("{}-{}", self.group_prefix, client_id)
    }

    /// Assemble the rdkafka client configuration for one consumer.
    ///
    /// Auto-commit is off: the broker position only moves when a client
    /// pushes an ack.
    pub fn client_config(&self, group_id: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.bootstrap_servers)
            .set("group.id", group_id)
            .set("auto.offset.reset", &self.auto_offset_reset)
            .set("session.timeout.ms", self.session_timeout_ms.to_string())
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");
        config
    }
}

fn parse_or<T: std::str::FromStr, U>(
    value: Option<String>,
    default: T,
    wrap: impl Fn(T) -> U,
) -> U {
    wrap(value.and_then(|v| v.parse().ok()).unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.listen_addr, ":6380");
        assert_eq!(config.blpop_timeout, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert_eq!(config.reap_interval, Duration::from_secs(10));
        assert_eq!(config.channel_capacity, 8);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("RESPGATE_LISTEN_ADDR", ":7000"),
            ("RESPGATE_BLPOP_TIMEOUT_SECS", "30"),
            ("RESPGATE_BOOTSTRAP_SERVERS", "kafka1:9092,kafka2:9092"),
            ("RESPGATE_GROUP_PREFIX", "edge"),
        ]));

        assert_eq!(config.listen_addr, ":7000");
        assert_eq!(config.blpop_timeout, Duration::from_secs(30));
        assert_eq!(config.bootstrap_servers, "kafka1:9092,kafka2:9092");
        assert_eq!(config.group_prefix, "edge");
        // Untouched keys keep their defaults.
        assert_eq!(config.auto_offset_reset, "earliest");
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup_from(&[
            ("RESPGATE_BLPOP_TIMEOUT_SECS", "soon"),
            ("RESPGATE_CHANNEL_CAPACITY", "-3"),
        ]));
        assert_eq!(config.blpop_timeout, Duration::from_secs(5));
        assert_eq!(config.channel_capacity, 8);
    }

    #[test]
    fn test_group_id_format() {
        let config = Config::default();
        assert_eq!(config.group_id("c1"), "respgate-c1");
    }

    #[test]
    fn test_client_config_settings() {
        let config = Config::default();
        let client = config.client_config("respgate-c1");
        assert_eq!(client.get("group.id"), Some("respgate-c1"));
        assert_eq!(client.get("enable.auto.commit"), Some("false"));
        assert_eq!(client.get("bootstrap.servers"), Some("localhost:9092"));
    }
}
