//! Stream Road: a signaling broker for peer-to-peer streams.
//!
//! Producers register streams on one broker instance, consumers join them on
//! another, and the two instances are linked by a bridge that mirrors session
//! existence and carries handshake and data messages between them. A small
//! GPS feed rides along on its own pair of ports.

pub mod bridge;
pub mod broker;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod gps;
pub mod handlers;
pub mod metrics;
pub mod mirror;
pub mod protocol;
pub mod relay;
pub mod routes;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod websocket;

pub use bridge::{BridgeLink, LocalBridge};
pub use broker::BrokerInstance;
pub use config::ServerConfig;
pub use connection::ConnectionId;
pub use error::BrokerError;
pub use protocol::{ClientMessage, ServerMessage};
pub use server::Server;
