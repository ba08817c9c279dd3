//! # parity-harness
//!
//! Client side of the parity run: a WebSocket client that speaks the gateway
//! envelope protocol, response correlation, the multi-decision collector, the
//! scenario dispatcher, the readiness poller and the three roles built on them.

pub mod client;
pub mod collector;
pub mod correlation;
pub mod readiness;
pub mod reader;
pub mod roles;
pub mod scenario;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{connect_request, GatewayClient, WsGatewayClient};
pub use collector::{DecisionCollector, Observation, DEFAULT_GRACE};
pub use correlation::wait_for_response;
pub use readiness::ReadinessPoller;
pub use reader::FrameReader;
pub use roles::{run_assertor, run_healthcheck, run_producer};
pub use scenario::{dispatch, load_scenario, parse_scenario, ScenarioAction};
