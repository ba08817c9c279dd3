//! Multi-expectation decision matching with duplicate detection.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::time::Duration;

use futures::Stream;
use parity_core::{Action, DecisionExpectation, ObservedDecision, ParityError};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::reader::FrameReader;

/// Duplicate-check window after the last expectation is met.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(350);

/// What [`DecisionCollector::observe`] did with one decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    Matched,
    /// The request id was never expected.
    Ignored,
}

/// Tracks outstanding expectations (pending) and satisfied ones (seen).
///
/// A request id is in at most one of the two maps and moves from pending to
/// seen at most once.
#[derive(Debug)]
pub struct DecisionCollector {
    pending: HashMap<String, Action>,
    seen: BTreeMap<String, Action>,
    grace: Duration,
}

impl DecisionCollector {
    /// Validate `expectations` and build the pending set.
    pub fn new(expectations: &[DecisionExpectation]) -> Result<Self, ParityError> {
        if expectations.is_empty() {
            return Err(ParityError::config("no decision expectations configured"));
        }

        let mut pending = HashMap::with_capacity(expectations.len());
        for expectation in expectations {
            let request_id = expectation.request_id.trim();
            if request_id.is_empty() {
                return Err(ParityError::config("expectation with blank requestId"));
            }
            let action: Action = expectation.expected.parse().map_err(|_| {
                ParityError::config(format!(
                    "invalid expected action for {request_id}: {:?}",
                    expectation.expected
                ))
            })?;
            if pending.insert(request_id.to_string(), action).is_some() {
                return Err(ParityError::config(format!(
                    "duplicate expectation for {request_id}"
                )));
            }
        }

        Ok(Self {
            pending,
            seen: BTreeMap::new(),
            grace: DEFAULT_GRACE,
        })
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Still-unmatched request ids, sorted.
    pub fn missing(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn seen(&self) -> &BTreeMap<String, Action> {
        &self.seen
    }

    /// Apply one observed decision.
    pub fn observe(&mut self, decision: &ObservedDecision) -> Result<Observation, ParityError> {
        let request_id = decision.request_id.as_str();

        if self.seen.contains_key(request_id) {
            return Err(ParityError::DuplicateDecision {
                request_id: request_id.to_string(),
                action: decision.action,
            });
        }

        let Some(&expected) = self.pending.get(request_id) else {
            tracing::debug!(request_id, action = %decision.action, "ignoring unexpected request id");
            return Ok(Observation::Ignored);
        };

        if decision.action != expected {
            return Err(ParityError::UnexpectedAction {
                request_id: request_id.to_string(),
                expected,
                actual: decision.action,
            });
        }

        self.pending.remove(request_id);
        self.seen.insert(request_id.to_string(), decision.action);
        match decision.risk_score {
            Some(score) => tracing::info!(request_id, action = %decision.action, score, "decision matched"),
            None => tracing::info!(request_id, action = %decision.action, "decision matched"),
        }
        Ok(Observation::Matched)
    }

    /// Read decisions until every expectation is met or `timeout` elapses,
    /// then hold the grace window open to catch late duplicates.
    pub async fn collect<S, E>(
        mut self,
        reader: &mut FrameReader<S>,
        timeout: Duration,
    ) -> Result<BTreeMap<String, Action>, ParityError>
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let deadline = Instant::now() + timeout;
        while !self.is_complete() {
            let Some(envelope) = reader.next_until(deadline).await? else {
                return Err(ParityError::timeout(
                    format!("decisions: {}", self.missing().join(", ")),
                    timeout,
                ));
            };
            if let Some(decision) = ObservedDecision::from_envelope(&envelope) {
                self.observe(&decision)?;
            }
        }

        let grace_deadline = Instant::now() + self.grace;
        loop {
            let Some(envelope) = reader.next_until(grace_deadline).await? else {
                break;
            };
            if let Some(decision) = ObservedDecision::from_envelope(&envelope) {
                if self.seen.contains_key(&decision.request_id) {
                    return Err(ParityError::DuplicateDecision {
                        request_id: decision.request_id,
                        action: decision.action,
                    });
                }
            }
        }

        Ok(self.seen)
    }
}
