//! # accolade-settings
//!
//! Configuration with layered sources for the Accolade relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`AccoladeSettings::default()`]
//! 2. **User file**: `~/.accolade/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `ACCOLADE_*` and `SUPABASE_*` overrides
//!
//! # Usage
//!
//! ```no_run
//! use accolade_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("relay port: {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
