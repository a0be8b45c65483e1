use anyhow::Context;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::transfer::constants::CHUNK_SIZE;

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "p2p";
const APP_NAME: &str = "p2p_paste";
const CONFIG_FILE: &str = "config.json";

/// Overrides the config directory (tests, portable installs)
pub const CONFIG_DIR_ENV: &str = "P2P_PASTE_CONFIG_DIR";

/// Default data channel label, shared with browser peers
pub const DEFAULT_CHANNEL_LABEL: &str = "chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name announced to the peer with `rename`
    pub display_name: String,
    /// Raw bytes per file chunk
    pub chunk_size: usize,
    pub channel_label: String,
    /// `tracing` filter used when `RUST_LOG` is not set
    pub log_filter: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let display_name = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| "Anonymous".to_string());

        Self {
            display_name,
            chunk_size: CHUNK_SIZE,
            channel_label: DEFAULT_CHANNEL_LABEL.to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl SessionConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        get_config_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    /// Load config from disk or return default.
    ///
    /// A `.env` file is read first so `P2P_PASTE_CONFIG_DIR` can live there.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();

        let path = match Self::get_config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring corrupt config {:?}: {}", path, e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::get_config_path().context("No config directory available")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, json).with_context(|| format!("Failed to write config {:?}", path))?;
        Ok(())
    }
}

/// Get the config directory path for this app
pub fn get_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Some(PathBuf::from(dir));
    }

    ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
        .map(|dirs| dirs.config_dir().to_path_buf())
}
