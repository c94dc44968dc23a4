pub mod client;
pub mod config;
pub mod health;
pub mod hub;
pub mod server;
pub mod transport;

pub use client::{Client, ConnectionId, Payload, PumpExit};
pub use config::{ClientConfig, ServerConfig};
pub use health::HealthResponse;
pub use hub::{Hub, HubHandle, HubPort};
pub use server::{build_router, start, ServerHandle};
pub use transport::{Frame, MemoryPeer, Transport, TransportError};
