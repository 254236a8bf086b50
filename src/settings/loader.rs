//! Settings loading, saving, and environment variable interpolation.
//!
//! The `SettingsManager` handles:
//! - Loading settings from `<data dir>/gamelens/settings.toml`
//! - Resolving `$VAR` and `${VAR}` environment variable references
//! - Filling empty backend values from `GAMELENS_*` variables
//! - Atomic file writes with temp file + rename
//! - First-run template generation

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::sync::RwLock;

use super::schema::GameLensSettings;

/// Embedded template for first-run generation.
const TEMPLATE: &str = include_str!("template.toml");

pub const ENDPOINT_ENV: &str = "GAMELENS_ENDPOINT";
pub const GAME_ID_ENV: &str = "GAMELENS_GAME_ID";
pub const PROJECT_ID_ENV: &str = "GAMELENS_PROJECT_ID";

/// Get the path to the default settings file.
pub fn settings_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gamelens")
        .join("settings.toml")
}

/// Manages settings loading, interpolation, and persistence.
pub struct SettingsManager {
    /// Cached settings (with env vars resolved)
    settings: RwLock<GameLensSettings>,

    /// Path to the settings file
    path: PathBuf,
}

impl SettingsManager {
    /// Create a manager for the default path, loading from disk if available.
    pub async fn new() -> Result<Self> {
        Self::with_path(settings_path()).await
    }

    /// Create a manager for a specific settings file.
    pub async fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let settings = Self::load_from_path(&path).await?;

        Ok(Self {
            settings: RwLock::new(settings),
            path,
        })
    }

    async fn load_from_path(path: &Path) -> Result<GameLensSettings> {
        let mut settings = if path.exists() {
            let contents = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read settings file {}", path.display()))?;
            let settings: GameLensSettings =
                toml::from_str(&contents).context("Failed to deserialize settings")?;
            tracing::info!("[gamelens] Loaded settings from {:?}", path);
            settings
        } else {
            tracing::debug!("[gamelens] Settings file not found at {:?}, using defaults", path);
            GameLensSettings::default()
        };

        resolve_env_vars(&mut settings);
        Ok(settings)
    }

    /// Get the current settings (read-only).
    pub async fn get(&self) -> GameLensSettings {
        self.settings.read().await.clone()
    }

    /// Update settings and persist to disk.
    pub async fn update(&self, new_settings: GameLensSettings) -> Result<()> {
        new_settings
            .validate()
            .context("Refusing to save invalid settings")?;

        *self.settings.write().await = new_settings.clone();

        let toml_string =
            toml::to_string_pretty(&new_settings).context("Failed to serialize settings")?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("toml.tmp");
        tokio::fs::write(&temp_path, &toml_string).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        tracing::info!("[gamelens] Saved settings to {:?}", self.path);
        Ok(())
    }

    /// Reset to defaults and persist.
    pub async fn reset(&self) -> Result<()> {
        self.update(GameLensSettings::default()).await
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ensure settings file exists, creating from template if needed.
    ///
    /// Returns `true` if a new file was created.
    pub async fn ensure_settings_file(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&self.path, TEMPLATE).await?;
        tracing::info!("[gamelens] Generated settings template at {:?}", self.path);
        Ok(true)
    }

    /// Reload settings from disk.
    pub async fn reload(&self) -> Result<()> {
        let settings = Self::load_from_path(&self.path).await?;
        *self.settings.write().await = settings;
        Ok(())
    }
}

/// Resolve `$VAR` references, then fill empty backend values from the
/// `GAMELENS_*` variables.
fn resolve_env_vars(settings: &mut GameLensSettings) {
    fn resolve_opt(value: &mut Option<String>) {
        if let Some(v) = value {
            if let Some(resolved) = resolve_env_ref(v) {
                *v = resolved;
            }
        }
    }

    resolve_opt(&mut settings.data_dir);
    resolve_opt(&mut settings.backend.endpoint);
    resolve_opt(&mut settings.backend.game_id);
    resolve_opt(&mut settings.backend.project_id);

    let backend = &mut settings.backend;
    backend.endpoint = get_with_env_fallback(&backend.endpoint, &[ENDPOINT_ENV], None);
    backend.game_id = get_with_env_fallback(&backend.game_id, &[GAME_ID_ENV], None);
    backend.project_id = get_with_env_fallback(&backend.project_id, &[PROJECT_ID_ENV], None);
}

/// Resolve a $ENV_VAR or ${ENV_VAR} reference.
///
/// Returns `Some(resolved)` if the value starts with `$` and the env var exists.
/// Returns `None` if no env var reference or env var not set.
fn resolve_env_ref(value: &str) -> Option<String> {
    let trimmed = value.trim();
    let reference = trimmed.strip_prefix('$')?;
    let var_name = reference
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .unwrap_or(reference);

    std::env::var(var_name).ok()
}

/// Get a setting value with environment variable fallback.
///
/// Priority order:
/// 1. Settings value (if set and non-empty)
/// 2. Environment variable (first match from list)
/// 3. Default value
pub fn get_with_env_fallback(
    setting: &Option<String>,
    env_vars: &[&str],
    default: Option<String>,
) -> Option<String> {
    if let Some(v) = setting {
        if !v.is_empty() {
            return Some(v.clone());
        }
    }

    for env_var in env_vars {
        if let Ok(v) = std::env::var(env_var) {
            if !v.is_empty() {
                return Some(v);
            }
        }
    }

    default
}
