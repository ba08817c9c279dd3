//! # parity-gateway
//!
//! Mock gateway: a WebSocket broker that authenticates clients against one
//! shared token, answers status queries, and fans inbound events out to every
//! other registered connection.

pub mod broker;
pub mod connection;
pub mod registry;
pub mod server;

pub use broker::{Broker, Flow, AUTH_FAILURE_CLOSE_CODE, PLACEHOLDER_CLIENT};
pub use registry::{ClientRegistry, Connection, Outbound};
pub use server::{start, serve, GatewayConfig, GatewayHandle};
