//! Settings loading with layered sources.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If `~/.pulse/settings.json` exists, merge its values over the defaults
//! 3. Apply `PULSE_*` environment overrides (highest priority)
//!
//! Nested keys use a double underscore: `PULSE_CONNECTION__RECONNECT__MAX_ATTEMPTS=8`.
//! `PULSE_API_URL` is accepted as shorthand for `PULSE_API__BASE_URL`.

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::Result;
use crate::types::PulseSettings;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "PULSE_";

/// Shorthand variable for the backend base address.
pub const API_URL_ENV: &str = "PULSE_API_URL";

/// Resolve the path to the settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON, mistyped values, or values
/// rejected by [`PulseSettings::validate`] return an error.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    let settings: PulseSettings = figment(path).extract()?;
    settings.validate()?;
    Ok(settings)
}

/// The layered provider chain used by [`load_settings_from_path`].
pub fn figment(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(PulseSettings::default()))
        .merge(Json::file(path))
        .merge(
            Env::prefixed(ENV_PREFIX)
                .ignore(&["API_URL"])
                .split("__"),
        )
        .merge(
            Env::raw()
                .only(&[API_URL_ENV])
                .map(|_| "api.base_url".into()),
        )
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
