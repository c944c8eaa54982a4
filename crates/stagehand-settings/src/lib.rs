//! # stagehand-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`StagehandSettings::default()`]
//! 2. **User file**: `~/.stagehand/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `STAGEHAND_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path, stagehand_dir};
pub use types::*;
