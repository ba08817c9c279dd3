//! # parity-bundle
//!
//! Signs policy bundles with HMAC-SHA256 over canonical JSON and writes the
//! staged artifacts for a key rotation.

pub mod errors;
pub mod rotation;
pub mod signing;

pub use errors::{BundleError, Result};
pub use rotation::{
    rotate, rotate_at, RolloutStage, RotationManifest, RotationOutcome, RotationRequest,
    SigningKey, NEW_KEY_ENV, PREVIOUS_KEY_ENV,
};
pub use signing::{
    canonicalize, load_unsigned_bundle, resolve_key, sign_bundle, signature_hex, verify_bundle,
};
