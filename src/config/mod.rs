//! Configuration management for llm-relay
//!
//! Settings are layered:
//! 1. Config file (`~/.config/llm-relay/config.toml`, or `--config` / `LLM_RELAY_CONFIG`)
//! 2. Environment variables (`LLM_RELAY_MAX_TIMEOUT`)
//! 3. CLI parameters (highest priority)

pub mod channel;
pub mod models;
pub mod settings;

use std::path::{Path, PathBuf};

pub use self::{
    channel::{Channel, ChannelConfig, ProxyConfig, ProxyType},
    settings::{RelaySettings, Settings, VideoSettings},
};
use crate::error::Result;

/// Environment variable pointing at the config file
pub const CONFIG_PATH_ENV: &str = "LLM_RELAY_CONFIG";

/// Get the configuration directory path
#[must_use]
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llm-relay")
}

/// Resolve the config file path: explicit path, then environment, then the default location
#[must_use]
pub fn config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("config.toml"))
}

/// Load settings from the resolved config path
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read, parsed or validated
pub fn load(explicit: Option<&Path>) -> Result<Settings> {
    let path = config_path(explicit);
    tracing::debug!("loading config from {}", path.display());
    Settings::load_from_path(&path)
}
