//! # livebridge-settings
//!
//! Layered configuration for the bridge service.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`LiveBridgeSettings::default()`]
//! 2. **Settings file**: `~/.livebridge/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `LIVEBRIDGE_*` / `GEMINI_API_KEY` overrides

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
