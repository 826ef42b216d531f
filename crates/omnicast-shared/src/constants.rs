/// Magnet link `xt` parameter identifying a unified identity.
pub const MAGNET_XT: &str = "urn:identity:v1";

/// Maximum UTF-8 content size of a chat message (64 KiB)
pub const MAX_CONTENT_BYTES: usize = 64 * 1024;

/// Prefix of an acknowledgment's content, followed by the acked uuid.
/// Stable so it can be used as a fallback correlator.
pub const ACK_CONTENT_PREFIX: &str = "ACK: ";

/// Default Nostr relays
pub const DEFAULT_NOSTR_RELAYS: [&str; 3] = [
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
];

/// Default public MQTT brokers
pub const DEFAULT_MQTT_BROKERS: [&str; 3] = [
    "mqtt://broker.hivemq.com:1883",
    "mqtt://broker.emqx.io:1883",
    "mqtt://test.mosquitto.org:1883",
];

/// ALPN for the direct iroh DM stream protocol
pub const IROH_DM_ALPN: &[u8] = b"broadcast/dm/0";

/// Bytes written back on a received iroh stream
pub const IROH_STREAM_ACK: &[u8] = b"ACK: Received";

/// Read cap on an inbound iroh stream (1 MiB)
pub const IROH_MAX_PAYLOAD: usize = 1024 * 1024;

/// Per-broker MQTT connect timeout in seconds
pub const MQTT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// MQTT broker reconnect period in seconds
pub const MQTT_RECONNECT_SECS: u64 = 5;

/// Nostr relay reconnect period in seconds
pub const NOSTR_RECONNECT_SECS: u64 = 5;

/// Capacity of the seen-uuid dedup window
pub const SEEN_WINDOW_CAPACITY: usize = 100_000;

/// Evidence store busy timeout in milliseconds
pub const STORE_BUSY_TIMEOUT_MS: u64 = 10_000;

/// Shutdown grace for in-flight pipeline work, in seconds
pub const SHUTDOWN_GRACE_SECS: u64 = 5;
