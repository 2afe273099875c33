use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::ImageFormat;

const CONFIG_VERSION: &str = "1.0.0";
const STORAGE_FOLDER: &str = "Super Organized Screenshots";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the shell should do once a capture has been saved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureFeedback {
    pub play_sound: bool,
    pub show_notification: bool,
}

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub version: String,
    /// Carbon virtual key code of the capture hotkey. `None` together with
    /// `hotkey_modifiers` means the built-in default.
    #[serde(default)]
    pub hotkey_key_code: Option<u32>,
    /// Carbon modifier bitmask of the capture hotkey.
    #[serde(default)]
    pub hotkey_modifiers: Option<u32>,
    /// Copy every new capture to the clipboard.
    #[serde(default = "default_true")]
    pub copy_to_clipboard: bool,
    #[serde(default = "default_true")]
    pub play_capture_sound: bool,
    #[serde(default = "default_true")]
    pub show_notification: bool,
    #[serde(default)]
    pub image_format: ImageFormat,
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub delete_to_trash: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION.to_string(),
            hotkey_key_code: None,
            hotkey_modifiers: None,
            copy_to_clipboard: true,
            play_capture_sound: true,
            show_notification: true,
            image_format: ImageFormat::Png,
            storage_dir: None,
            delete_to_trash: true,
        }
    }
}

impl AppConfig {
    /// Both hotkey integers, or `None` when the default applies. A stored pair
    /// of zeros counts as absent.
    pub fn stored_hotkey(&self) -> Option<(u32, u32)> {
        match (self.hotkey_key_code, self.hotkey_modifiers) {
            (None, None) | (Some(0), Some(0)) | (Some(0), None) | (None, Some(0)) => None,
            (key, modifiers) => Some((key.unwrap_or(0), modifiers.unwrap_or(0))),
        }
    }

    pub fn capture_feedback(&self) -> CaptureFeedback {
        CaptureFeedback {
            play_sound: self.play_capture_sound,
            show_notification: self.show_notification,
        }
    }

    /// Where screenshots are kept: the configured folder, else a folder in
    /// the user's Pictures directory.
    pub fn storage_dir(&self) -> PathBuf {
        if let Some(dir) = &self.storage_dir {
            return dir.clone();
        }
        dirs::picture_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(STORAGE_FOLDER)
    }
}

/// Get the config file path
pub fn get_config_path() -> PathBuf {
    let config_dir = dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    config_dir.join("shotshelf").join("config.json")
}

pub fn load_config() -> AppConfig {
    load_config_from(&get_config_path())
}

/// Load configuration from file, or return default if it is missing or
/// unreadable. The default is written back so the file exists afterwards.
pub fn load_config_from(path: &Path) -> AppConfig {
    if path.exists() {
        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
                Ok(mut config) => {
                    if config.version != CONFIG_VERSION {
                        log::info!("[config] Upgrading config from {} to {}", config.version, CONFIG_VERSION);
                        config.version = CONFIG_VERSION.to_string();
                        if let Err(e) = save_config_to(&config, path) {
                            log::warn!("[config] Failed to write upgraded config: {}", e);
                        }
                    }
                    return config;
                }
                Err(e) => {
                    log::error!("[config] Failed to parse config: {}", e);
                }
            },
            Err(e) => {
                log::error!("[config] Failed to read config file: {}", e);
            }
        }
    }

    let default_config = AppConfig::default();
    if let Err(e) = save_config_to(&default_config, path) {
        log::warn!("[config] Failed to write default config: {}", e);
    }
    default_config
}

pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, &get_config_path())
}

pub fn save_config_to(config: &AppConfig, path: &Path) -> Result<(), ConfigError> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;

    log::debug!("[config] Saved to {:?}", path);
    Ok(())
}
