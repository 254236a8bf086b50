//! TOML-based settings for GameLens.
//!
//! Settings are loaded from `<data dir>/gamelens/settings.toml` with
//! environment variable interpolation support. Backend identity can also be
//! supplied purely through `GAMELENS_ENDPOINT`, `GAMELENS_GAME_ID` and
//! `GAMELENS_PROJECT_ID`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use gamelens_lib::settings::SettingsManager;
//!
//! let manager = SettingsManager::new().await?;
//! let settings = manager.get().await;
//! settings.validate()?;
//! ```

pub mod loader;
pub mod schema;

pub use loader::{get_with_env_fallback, settings_path, SettingsManager};
pub use schema::{BackendSettings, CaptureSettings, GameLensSettings, StorageSettings, UploadSettings};
