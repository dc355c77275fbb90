use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, UpdaterError};
use crate::models::NotificationVisibility;
use crate::utils::paths::resolve_config_file;

const DEFAULT_POLL_INTERVAL_MS: u64 = 750;
const MIN_POLL_INTERVAL_MS: u64 = 500;
const MAX_POLL_INTERVAL_MS: u64 = 1000;
const DEFAULT_MAX_QUERY_MISSES: u32 = 5;
/// Android 10, first release with app-scoped storage.
pub const SCOPED_STORAGE_SDK: u32 = 29;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdaterConfig {
    pub download_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub max_query_misses: u32,
    pub allow_metered: bool,
    pub allow_roaming: bool,
    pub notification_visibility: NotificationVisibility,
    pub title: String,
    pub description: String,
    pub file_provider_authority: String,
    pub sdk_int: u32,
    pub http_timeout_seconds: u64,
    pub http_connect_timeout_seconds: u64,
    pub proxy: Option<String>,
    pub disable_system_proxy: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            download_dir: std::env::temp_dir().join("apk-updater"),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_query_misses: DEFAULT_MAX_QUERY_MISSES,
            allow_metered: true,
            allow_roaming: true,
            notification_visibility: NotificationVisibility::VisibleNotifyCompleted,
            title: "App update".to_string(),
            description: "Downloading the latest version".to_string(),
            file_provider_authority: "app.updater.fileprovider".to_string(),
            sdk_int: 34,
            http_timeout_seconds: 600,
            http_connect_timeout_seconds: 20,
            proxy: None,
            disable_system_proxy: false,
        }
    }
}

impl UpdaterConfig {
    /// Defaults, then the JSON config file (`UPDATER_CONFIG_FILE` or
    /// `updater.config.json` in the root directory), then individual
    /// `UPDATER_*` variables.
    pub fn from_env() -> Result<Self> {
        let mut config = match resolve_config_file() {
            Some(path) => Self::load(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config.normalized())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(UpdaterError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path)?;
        let config: UpdaterConfig = serde_json::from_str(&raw)?;
        Ok(config.normalized())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_string("UPDATER_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
        if let Some(value) = env_u64("UPDATER_POLL_INTERVAL_MS") {
            self.poll_interval_ms = value;
        }
        if let Some(value) = env_u64("UPDATER_MAX_QUERY_MISSES") {
            self.max_query_misses = value.min(u32::MAX as u64) as u32;
        }
        if let Some(value) = env_bool("UPDATER_ALLOW_METERED") {
            self.allow_metered = value;
        }
        if let Some(value) = env_bool("UPDATER_ALLOW_ROAMING") {
            self.allow_roaming = value;
        }
        if let Some(value) = env_string("UPDATER_FILE_PROVIDER_AUTHORITY") {
            self.file_provider_authority = value;
        }
        if let Some(value) = env_u64("UPDATER_SDK_INT") {
            self.sdk_int = value.min(u32::MAX as u64) as u32;
        }
        if let Some(value) = env_u64("UPDATER_HTTP_TIMEOUT_SECONDS") {
            self.http_timeout_seconds = value;
        }
        if let Some(value) = env_u64("UPDATER_HTTP_CONNECT_TIMEOUT_SECONDS") {
            self.http_connect_timeout_seconds = value;
        }
        if let Some(proxy) = env_string("UPDATER_PROXY") {
            self.proxy = Some(proxy);
        }
        if let Some(value) = env_bool("UPDATER_DISABLE_SYSTEM_PROXY") {
            self.disable_system_proxy = value;
        }
    }

    fn normalized(mut self) -> Self {
        self.poll_interval_ms = self
            .poll_interval_ms
            .clamp(MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS);
        self.max_query_misses = self.max_query_misses.clamp(1, 20);
        self.http_timeout_seconds = self.http_timeout_seconds.clamp(30, 7200);
        self.http_connect_timeout_seconds = self.http_connect_timeout_seconds.clamp(5, 120);
        self.proxy = self
            .proxy
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(key: &str) -> Option<u64> {
    env_string(key).and_then(|value| value.parse::<u64>().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    env_string(key).map(|value| {
        let normalized = value.to_ascii_lowercase();
        matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
    })
}
