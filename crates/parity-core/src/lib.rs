//! # parity-core
//!
//! Shared protocol types for the parity harness: the envelope codec,
//! decision verdicts, connection handles and the error taxonomy.

pub mod codec;
pub mod decision;
pub mod errors;
pub mod handle;

pub use codec::{decode, Envelope, ErrorBody, Event, FrameError, Request, Response};
pub use decision::{Action, DecisionExpectation, ObservedDecision, DECISION_EVENT};
pub use errors::ParityError;
pub use handle::{ConnectionHandle, HandleAllocator};
