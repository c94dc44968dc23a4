//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-connection limits and timers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Outbound queue depth. Payloads beyond this are dropped for that client.
    pub send_queue_capacity: usize,
    /// Deadline for a single write to the connection.
    pub write_wait: Duration,
    /// Close the connection after this long without any inbound frame.
    pub pong_wait: Duration,
    /// Keepalive ping interval. Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest accepted inbound payload, in bytes.
    pub max_message_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            send_queue_capacity: 256,
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 512,
        }
    }
}

/// Configuration for the chat server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind (default `"0.0.0.0:8080"`; port `0` auto-assigns).
    pub addr: String,
    /// Number of stored messages replayed to a newly joined client.
    pub history_limit: usize,
    /// Depth of the hub's command channel.
    pub hub_capacity: usize,
    pub client: ClientConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".into(),
            history_limit: 50,
            hub_capacity: 1024,
            client: ClientConfig::default(),
        }
    }
}
