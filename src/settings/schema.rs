//! Settings schema for GameLens.
//!
//! Every section uses `#[serde(default)]` so a partial file is valid; missing
//! fields take the defaults below.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::{BackendConfig, BackoffConfig};
use crate::error::GameLensError;
use crate::store::StoreConfig;
use crate::upload::{RetryPolicy, UploadConfig};

/// Root settings structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameLensSettings {
    /// Schema version for migrations
    pub version: u32,

    /// Master switch for capture and upload
    pub enabled: bool,

    /// Root for stored captures (defaults to `<data dir>/gamelens`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    pub backend: BackendSettings,

    pub capture: CaptureSettings,

    pub storage: StorageSettings,

    pub upload: UploadSettings,
}

/// Collector endpoint and connection timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Base URL of the collector (supports $ENV_VAR syntax)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    pub connect_timeout_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponent_cap: u32,
    pub poll_interval_ms: u64,
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Minimum spacing between accepted snaps
    pub min_seconds_between_snaps: f64,
    /// Output size; 0 keeps the source dimension
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Image files kept per date partition
    pub max_files_per_partition: usize,
    pub shutdown_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub shutdown_timeout_ms: u64,
}

impl Default for GameLensSettings {
    fn default() -> Self {
        Self {
            version: 1,
            enabled: true,
            data_dir: None,
            backend: BackendSettings::default(),
            capture: CaptureSettings::default(),
            storage: StorageSettings::default(),
            upload: UploadSettings::default(),
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            game_id: None,
            project_id: None,
            connect_timeout_ms: 5000,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            exponent_cap: 5,
            poll_interval_ms: 500,
            shutdown_timeout_ms: 500,
        }
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            min_seconds_between_snaps: 0.35,
            width: 640,
            height: 360,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            max_files_per_partition: 5000,
            shutdown_timeout_ms: 500,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            shutdown_timeout_ms: 500,
        }
    }
}

impl GameLensSettings {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), GameLensError> {
        let interval = self.capture.min_seconds_between_snaps;
        if !interval.is_finite() || interval < 0.0 {
            return Err(GameLensError::Settings(format!(
                "capture.min_seconds_between_snaps must be >= 0, got {interval}"
            )));
        }
        if self.storage.max_files_per_partition == 0 {
            return Err(GameLensError::Settings(
                "storage.max_files_per_partition must be > 0".to_string(),
            ));
        }
        if self.enabled {
            if let Some(endpoint) = self.endpoint() {
                url::Url::parse(endpoint).map_err(|e| {
                    GameLensError::Settings(format!("backend.endpoint '{endpoint}': {e}"))
                })?;
            }
        }
        Ok(())
    }

    /// Configured endpoint, ignoring blank values.
    pub fn endpoint(&self) -> Option<&str> {
        non_blank(&self.backend.endpoint)
    }

    pub fn game_id(&self) -> Option<&str> {
        non_blank(&self.backend.game_id)
    }

    pub fn project_id(&self) -> Option<&str> {
        non_blank(&self.backend.project_id)
    }

    pub fn data_dir(&self) -> PathBuf {
        match non_blank(&self.data_dir) {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("gamelens"),
        }
    }

    pub fn min_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.capture.min_seconds_between_snaps).unwrap_or_default()
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root_dir: self.data_dir(),
            max_files_per_partition: self.storage.max_files_per_partition,
            shutdown_timeout: Duration::from_millis(self.storage.shutdown_timeout_ms),
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            retry: RetryPolicy {
                max_attempts: self.upload.max_attempts,
                base_delay: Duration::from_millis(self.upload.base_delay_ms),
                max_delay: Duration::from_millis(self.upload.max_delay_ms),
            },
            shutdown_timeout: Duration::from_millis(self.upload.shutdown_timeout_ms),
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            game_id: self.game_id().unwrap_or_default().to_string(),
            poll_interval: Duration::from_millis(self.backend.poll_interval_ms),
            backoff: BackoffConfig {
                base_delay: Duration::from_millis(self.backend.base_delay_ms),
                max_delay: Duration::from_millis(self.backend.max_delay_ms),
                exponent_cap: self.backend.exponent_cap,
            },
            shutdown_timeout: Duration::from_millis(self.backend.shutdown_timeout_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.connect_timeout_ms)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = GameLensSettings::default();
        assert_eq!(settings.version, 1);
        assert!(settings.enabled);
        assert_eq!(settings.capture.min_seconds_between_snaps, 0.35);
        assert_eq!((settings.capture.width, settings.capture.height), (640, 360));
        assert_eq!(settings.storage.max_files_per_partition, 5000);
        assert_eq!(settings.min_interval(), Duration::from_millis(350));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            [backend]
            endpoint = "http://localhost:4000"
            game_id = "space-game"

            [storage]
            max_files_per_partition = 10
        "#;

        let settings: GameLensSettings = toml::from_str(toml).unwrap();
        assert_eq!(settings.endpoint(), Some("http://localhost:4000"));
        assert_eq!(settings.game_id(), Some("space-game"));
        assert_eq!(settings.storage.max_files_per_partition, 10);
        // Defaults fill the rest.
        assert_eq!(settings.upload.max_attempts, 3);
        assert_eq!(settings.backend.base_delay_ms, 500);
    }

    #[test]
    fn test_serialize_settings() {
        let settings = GameLensSettings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("version = 1"));
        assert!(toml_str.contains("[capture]"));
        assert!(!toml_str.contains("endpoint"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = GameLensSettings::default();
        settings.capture.min_seconds_between_snaps = -1.0;
        assert!(settings.validate().is_err());

        let mut settings = GameLensSettings::default();
        settings.storage.max_files_per_partition = 0;
        assert!(settings.validate().is_err());

        let mut settings = GameLensSettings::default();
        settings.backend.endpoint = Some("not a url".to_string());
        assert!(settings.validate().is_err());

        // Endpoint is only checked when enabled.
        settings.enabled = false;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_blank_values_are_unset() {
        let mut settings = GameLensSettings::default();
        settings.backend.endpoint = Some("  ".to_string());
        settings.data_dir = Some(String::new());
        assert_eq!(settings.endpoint(), None);
        assert!(settings.data_dir().ends_with("gamelens"));
    }

    #[test]
    fn test_derived_configs() {
        let mut settings = GameLensSettings::default();
        settings.data_dir = Some("/srv/gamelens".to_string());
        settings.backend.game_id = Some("g1".to_string());

        let store = settings.store_config();
        assert_eq!(store.root_dir, PathBuf::from("/srv/gamelens"));
        assert_eq!(store.max_files_per_partition, 5000);

        let backend = settings.backend_config();
        assert_eq!(backend.game_id, "g1");
        assert_eq!(backend.backoff, BackoffConfig::default());

        let upload = settings.upload_config();
        assert_eq!(upload.retry, RetryPolicy::default());
    }
}
