//! # pulse-settings
//!
//! Configuration management with layered sources for the Pulse client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** - [`PulseSettings::default()`]
//! 2. **User file** - `~/.pulse/settings.json` (merged over defaults)
//! 3. **Environment variables** - `PULSE_*` overrides (highest priority)
//!
//! There is no process-wide instance: callers load settings once and pass
//! them down.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{load_settings, load_settings_from_path, settings_path};
pub use types::*;
