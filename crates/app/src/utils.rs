//! Config directory and settings file helpers.

use anyhow::{Context, Result};
use shared::settings::AppSettings;
use std::fs;
use std::path::{Path, PathBuf};

pub const DB_FILE_NAME: &str = "chat_history.db";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Per-user config directory, created if missing.
///
/// Falls back to the system temp directory when the platform reports no home.
pub fn config_dir() -> Result<PathBuf> {
    let dir = directories::ProjectDirs::from("com.example", "GPT Desk", "gptdesk")
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("gptdesk"));
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {:?}", dir))?;
    Ok(dir)
}

/// Load settings from `path`, or defaults. The flag is true when the file was read.
pub fn load_settings_or_default(path: &Path) -> (AppSettings, bool) {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => {
            tracing::info!("no settings at {:?}, using defaults", path);
            return (AppSettings::default(), false);
        }
    };
    match serde_json::from_str::<AppSettings>(&contents) {
        Ok(mut settings) => {
            let temperature = settings.temperature;
            settings.set_temperature(temperature);
            (settings, true)
        }
        Err(e) => {
            tracing::warn!("ignoring malformed settings at {:?}: {}", path, e);
            (AppSettings::default(), false)
        }
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(settings)?;
    fs::write(path, bytes).with_context(|| format!("failed to write {:?}", path))?;
    Ok(())
}
