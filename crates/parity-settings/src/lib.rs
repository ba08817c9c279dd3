//! # parity-settings
//!
//! Configuration for the mock gateway and the harness roles.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ParitySettings::default()`]
//! 2. **Settings file**: `$PARITY_SETTINGS_PATH` (deep-merged over defaults)
//! 3. **Environment variables**: `PARITY_*` overrides (highest priority)
//!
//! The loaded value is built once at process start and passed by reference;
//! there is no global settings singleton.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
