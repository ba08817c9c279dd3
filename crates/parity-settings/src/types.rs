//! Settings structures. Every struct deserializes with `default`, so a
//! partial settings file only needs the keys it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParitySettings {
    pub gateway: GatewaySettings,
    pub client: ClientSettings,
    pub timeouts: TimeoutSettings,
    pub telemetry: TelemetrySettings,
}

/// Mock gateway listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Bind address.
    pub host: String,
    pub port: u16,
    /// Shared connect token. Empty disables authentication.
    pub token: String,
    /// WebSocket keepalive ping interval in seconds.
    pub ping_interval_secs: u64,
    /// Per-connection outbound queue depth.
    pub send_queue: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8765,
            token: String::new(),
            ping_interval_secs: 20,
            send_queue: 256,
        }
    }
}

impl GatewaySettings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings shared by the producer, assertor and healthcheck roles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Token presented in `connect`.
    pub token: String,
    /// Request id for the default single-action scenario.
    pub action_id: String,
    /// Expected verdict for the default single expectation.
    pub expect_action: String,
    /// Raw JSON array overriding the single expectation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expectations_json: Option<String>,
    /// Raw JSON array overriding the single-action scenario.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scenario_json: Option<String>,
    /// Client names that must be registered before the producer dispatches.
    pub wait_for_clients: Vec<String>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://gateway:8765/ws".to_string(),
            token: String::new(),
            action_id: "parity-action-1".to_string(),
            expect_action: "block".to_string(),
            expectations_json: None,
            scenario_json: None,
            wait_for_clients: vec![
                "openclaw-agent-rs".to_string(),
                "parity-assertor".to_string(),
            ],
        }
    }
}

/// Deadlines and delays, all in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeoutSettings {
    /// WebSocket open handshake.
    pub open_ms: u64,
    /// Waiting for the `connect` response.
    pub connect_response_ms: u64,
    /// Overall deadline for the decision collector.
    pub assert_ms: u64,
    /// Overall deadline for the readiness poller.
    pub ready_ms: u64,
    /// Per-call timeout for each readiness poll.
    pub poll_call_ms: u64,
    pub poll_interval_ms: u64,
    /// Duplicate-check window after every expectation is met.
    pub grace_ms: u64,
    /// Spacing between scenario events.
    pub scenario_delay_ms: u64,
    /// Producer linger after dispatch; zero means the short default linger.
    pub tail_ms: u64,
    /// Healthcheck open and first-frame timeout.
    pub healthcheck_ms: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            open_ms: 10_000,
            connect_response_ms: 10_000,
            assert_ms: 45_000,
            ready_ms: 45_000,
            poll_call_ms: 5_000,
            poll_interval_ms: 500,
            grace_ms: 350,
            scenario_delay_ms: 150,
            tail_ms: 0,
            healthcheck_ms: 3_000,
        }
    }
}

/// Linger used when no explicit tail is configured.
pub const DEFAULT_TAIL: Duration = Duration::from_millis(250);

impl TimeoutSettings {
    pub fn open(&self) -> Duration {
        Duration::from_millis(self.open_ms)
    }

    pub fn connect_response(&self) -> Duration {
        Duration::from_millis(self.connect_response_ms)
    }

    pub fn assert(&self) -> Duration {
        Duration::from_millis(self.assert_ms)
    }

    pub fn ready(&self) -> Duration {
        Duration::from_millis(self.ready_ms)
    }

    pub fn poll_call(&self) -> Duration {
        Duration::from_millis(self.poll_call_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn scenario_delay(&self) -> Duration {
        Duration::from_millis(self.scenario_delay_ms)
    }

    pub fn tail(&self) -> Duration {
        if self.tail_ms == 0 {
            DEFAULT_TAIL
        } else {
            Duration::from_millis(self.tail_ms)
        }
    }

    pub fn healthcheck(&self) -> Duration {
        Duration::from_millis(self.healthcheck_ms)
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    pub log_level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}
