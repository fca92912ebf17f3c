// Protocol and runtime constants for the gateway
//
// The reply strings below are part of the wire contract: existing clients
// match on them, so the wording must not drift.

/// Default listen address. A bare `:port` string binds all interfaces.
pub const DEFAULT_LISTEN_ADDR: &str = ":6380";

/// Default BLPOP wait when the client does not supply a timeout argument.
pub const DEFAULT_BLPOP_TIMEOUT_SECS: u64 = 5;

/// Default Kafka bootstrap servers.
pub const DEFAULT_BOOTSTRAP_SERVERS: &str = "localhost:9092";

/// Prefix for consumer group ids; the full group id is `<prefix>-<client id>`.
pub const DEFAULT_GROUP_PREFIX: &str = "respgate";

/// Default `auto.offset.reset` for new consumer groups.
pub const DEFAULT_AUTO_OFFSET_RESET: &str = "earliest";

/// Default Kafka `session.timeout.ms`.
pub const DEFAULT_SESSION_TIMEOUT_MS: u64 = 6000;

/// Capacity of each consumer's delivery channel. Kept small so a slow
/// client backs up into Kafka's own fetch buffering.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 8;

/// Deadline for a single poll of the underlying Kafka consumer.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Period of the stale-consumer reaper.
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 10;

/// Upper bound on RESP command arguments per command.
pub const MAX_COMMAND_ARGS: usize = 64;

/// Upper bound on a single RESP bulk-string argument.
pub const MAX_BULK_LEN: usize = 512 * 1024;

// ===== Fixed reply strings =====

/// RPUSH to any key other than `acks`.
pub const ERR_ACKS_ONLY: &str = "ERR You can only push to the 'acks' key";

/// Unknown CLIENT subcommand (and other malformed command shapes).
pub const ERR_SYNTAX: &str = "ERR syntax error";

/// Any command outside the supported subset.
pub const ERR_NOT_SUPPORTED: &str = "Command not supported";

/// BLPOP interrupted by server-wide cancellation.
pub const ERR_SHUTDOWN: &str = "SERVER SHUTDOWN";
