//! Client configuration
//!
//! Settings are read from `settings.json` in the user data directory. A
//! missing or broken file falls back to defaults; environment variables
//! override the file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::output::OutputKind;

/// Overrides `apiBaseUrl` when set.
pub const API_URL_ENV: &str = "SONGLOOM_API_URL";

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_LYRIC_INTERVAL_MS: u64 = 2000;
pub const DEFAULT_MAX_POLYPHONY: usize = 32;
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to write settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode settings: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub lyric_interval_ms: u64,
    pub request_timeout_secs: Option<u64>,
    pub download_dir: Option<PathBuf>,
    pub max_polyphony: usize,
    /// Mixer rate for the clock output; a device runs at its own rate
    pub sample_rate: u32,
    pub audio_output: OutputKind,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            lyric_interval_ms: DEFAULT_LYRIC_INTERVAL_MS,
            request_timeout_secs: None,
            download_dir: None,
            max_polyphony: DEFAULT_MAX_POLYPHONY,
            sample_rate: DEFAULT_SAMPLE_RATE,
            audio_output: OutputKind::default(),
        }
    }
}

impl ClientConfig {
    /// Load settings from `path`, using defaults for anything missing.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<ClientConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Failed to parse settings, using defaults: {}", e);
                    Self::default()
                }
            },
            // Defaults if the file doesn't exist yet
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        log::info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            self.apply_api_url_override(&url);
        }
        self
    }

    fn apply_api_url_override(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() {
            self.api_base_url = url.trim_end_matches('/').to_string();
        }
    }

    pub fn lyric_interval(&self) -> Duration {
        Duration::from_millis(self.lyric_interval_ms.max(1))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}
