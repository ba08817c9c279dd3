//! Decision verdicts and the `security.decision` event shape.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::{id_string, Envelope};
use crate::errors::ParityError;

/// Event name carrying a verdict from the engine under test.
pub const DECISION_EVENT: &str = "security.decision";

/// A verdict tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Review,
    Block,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Review => "review",
            Self::Block => "block",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ParityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "review" => Ok(Self::Review),
            "block" => Ok(Self::Block),
            other => Err(ParityError::config(format!(
                "unknown action {other:?}; expected allow, review or block"
            ))),
        }
    }
}

/// One verdict the assertor waits for.
///
/// `expected` stays a raw string until the collector validates it, so a bad
/// expectation list surfaces as a configuration error at collection time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionExpectation {
    pub request_id: String,
    pub expected: String,
}

impl DecisionExpectation {
    pub fn new(request_id: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            expected: expected.into(),
        }
    }

    /// Parse a JSON array of `{requestId|id, action|expect}` objects.
    pub fn list_from_json(value: &Value) -> Result<Vec<Self>, ParityError> {
        let Some(items) = value.as_array() else {
            return Err(ParityError::config("expectations must be a JSON array"));
        };
        items
            .iter()
            .enumerate()
            .map(|(idx, item)| {
                let object = item.as_object().ok_or_else(|| {
                    ParityError::config(format!("expectations[{idx}] must be an object"))
                })?;
                let request_id = ["requestId", "id"]
                    .iter()
                    .filter_map(|k| object.get(*k).and_then(id_string))
                    .map(|s| s.trim().to_string())
                    .find(|s| !s.is_empty())
                    .ok_or_else(|| {
                        ParityError::config(format!("expectations[{idx}] missing requestId"))
                    })?;
                let expected = ["action", "expect"]
                    .iter()
                    .find_map(|k| object.get(*k).and_then(Value::as_str))
                    .unwrap_or_default();
                Ok(Self::new(request_id, expected))
            })
            .collect()
    }
}

/// A well-formed decision event as seen on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedDecision {
    pub request_id: String,
    pub action: Action,
    pub risk_score: Option<f64>,
}

impl ObservedDecision {
    /// Recognise a decision event. Anything else (other event names, missing
    /// payload or decision, unknown action, blank request id) yields `None`.
    pub fn from_envelope(envelope: &Envelope) -> Option<Self> {
        let event = envelope.as_event()?;
        if event.name != DECISION_EVENT {
            return None;
        }
        let payload = event.payload.as_object()?;
        let request_id = payload.get("requestId").and_then(id_string)?;
        let request_id = request_id.trim();
        if request_id.is_empty() {
            return None;
        }
        let decision = payload.get("decision")?.as_object()?;
        let action = decision.get("action")?.as_str()?.parse().ok()?;
        Some(Self {
            request_id: request_id.to_string(),
            action,
            risk_score: decision.get("risk_score").and_then(Value::as_f64),
        })
    }
}
