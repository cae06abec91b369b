//! # pushwire-settings
//!
//! Provider configuration for pushwire.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ProviderSettings::default()`]
//! 2. **Providers file**: `~/.pushwire/providers.json` (or `PUSHWIRE_CONFIG`),
//!    whose `defaults` object is deep-merged under each entry of `providers`
//! 3. **Environment variables**: `PUSHWIRE_*` overrides (highest priority)
//!
//! ```json
//! {
//!   "defaults": { "environment": "sandbox" },
//!   "providers": {
//!     "ios": { "cert_bundle_path": "/etc/pushwire/ios.pem" }
//!   }
//! }
//! ```

#![deny(unsafe_code)]

pub mod credentials;
pub mod errors;
pub mod loader;
pub mod types;

pub use credentials::load_credentials;
pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_env_overrides_from, deep_merge, load_settings,
    load_settings_from_path, parse_settings, settings_path, settings_path_from,
};
pub use types::{CredentialPaths, Environment, ProviderSettings, PushwireSettings};
