//! Relay settings and configured channels

use std::{
    collections::HashSet,
    fs,
    path::Path,
    str::FromStr,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use super::channel::Channel;
use crate::{
    error::{RelayError, Result},
    services::registry::ChannelType,
};

/// Environment variable overriding `relay.max_timeout_secs`
pub const MAX_TIMEOUT_ENV: &str = "LLM_RELAY_MAX_TIMEOUT";

/// Top-level configuration file (`config.toml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub relay: RelaySettings,

    #[serde(default)]
    pub channels: Vec<Channel>,
}

/// Relay core settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettings {
    /// Upper bound on a single upstream HTTP exchange
    #[serde(default = "default_max_timeout")]
    pub max_timeout_secs: u64,

    /// Extra models treated as vision-capable
    #[serde(default)]
    pub vision_models: Vec<String>,

    /// Treat every model as vision-capable
    #[serde(default)]
    pub treat_all_as_vision: bool,

    #[serde(default)]
    pub video: VideoSettings,
}

fn default_max_timeout() -> u64 {
    300
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            max_timeout_secs: default_max_timeout(),
            vision_models: Vec::new(),
            treat_all_as_vision: false,
            video: VideoSettings::default(),
        }
    }
}

impl RelaySettings {
    /// HTTP timeout as a duration
    #[must_use]
    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_secs)
    }
}

/// Video job polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
}

fn default_poll_interval() -> u64 {
    2000
}

fn default_deadline() -> u64 {
    30 * 60
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            deadline_secs: default_deadline(),
        }
    }
}

impl VideoSettings {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl Settings {
    /// Load settings from a specific path, applying environment overrides
    ///
    /// A missing file yields the defaults with no channels.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| RelayError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

            toml::from_str::<Self>(&contents).map_err(|e| RelayError::ConfigParse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        } else {
            tracing::debug!("config file {} not found, using defaults", path.display());
            Self::default()
        };

        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string without environment overrides
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid TOML or fails validation
    pub fn from_toml(contents: &str) -> Result<Self> {
        let settings: Self = toml::from_str(contents)?;
        settings.validate()?;
        Ok(settings)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(MAX_TIMEOUT_ENV) {
            self.relay.max_timeout_secs = value.trim().parse().map_err(|_| {
                RelayError::ConfigValidation(format!(
                    "{MAX_TIMEOUT_ENV} must be a number of seconds, got {value:?}"
                ))
            })?;
        }
        Ok(())
    }

    /// Validate channel ids, endpoints and types
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ConfigValidation`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if self.relay.max_timeout_secs == 0 {
            return Err(RelayError::ConfigValidation(
                "relay.max_timeout_secs must be positive".to_string(),
            ));
        }
        if self.relay.video.poll_interval_ms == 0 {
            return Err(RelayError::ConfigValidation(
                "relay.video.poll_interval_ms must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.id) {
                return Err(RelayError::ConfigValidation(format!(
                    "duplicate channel id {}",
                    channel.id
                )));
            }
            if channel.endpoint.trim().is_empty() {
                return Err(RelayError::ConfigValidation(format!(
                    "channel #{} has an empty endpoint",
                    channel.id
                )));
            }
            if ChannelType::from_str(&channel.channel_type).is_err() {
                return Err(RelayError::ConfigValidation(format!(
                    "channel #{} has unknown type {}",
                    channel.id, channel.channel_type
                )));
            }
        }
        Ok(())
    }

    /// Find a channel by id
    #[must_use]
    pub fn channel(&self, id: i64) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[relay]
max_timeout_secs = 120
vision_models = ["my-vision-model"]

[relay.video]
poll_interval_ms = 500

[[channels]]
id = 1
name = "main"
type = "openai"
endpoint = "https://api.openai.com"
secret = "sk-a\nsk-b"
mapper = "gpt-4>gpt-4-0613"

[channels.proxy]
proxy_type = "socks5"
proxy = "127.0.0.1:1080"

[[channels]]
id = 2
type = "claude"
endpoint = "https://api.anthropic.com"
secret = "sk-ant"
"#;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.relay.max_timeout_secs, 300);
        assert_eq!(settings.relay.video.poll_interval_ms, 2000);
        assert_eq!(settings.relay.video.deadline_secs, 1800);
        assert!(settings.channels.is_empty());
    }

    #[test]
    fn test_parse_sample() {
        let settings = Settings::from_toml(SAMPLE).unwrap();
        assert_eq!(settings.relay.max_timeout_secs, 120);
        assert_eq!(settings.relay.vision_models, vec!["my-vision-model".to_string()]);
        assert_eq!(settings.relay.video.poll_interval_ms, 500);
        assert_eq!(settings.relay.video.deadline_secs, 1800);
        assert_eq!(settings.channels.len(), 2);

        let main = settings.channel(1).unwrap();
        assert_eq!(main.secrets(), vec!["sk-a", "sk-b"]);
        assert!(main.proxy.is_enabled());
        assert!(settings.channel(3).is_none());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let toml = r#"
[[channels]]
id = 1
type = "openai"
endpoint = "http://a"

[[channels]]
id = 1
type = "openai"
endpoint = "http://b"
"#;
        let err = Settings::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("duplicate channel id 1"));
    }

    #[test]
    fn test_unknown_type_rejected() {
        let toml = r#"
[[channels]]
id = 4
type = "bing"
endpoint = "http://a"
"#;
        let err = Settings::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("unknown type bing"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Settings::load_from_path(&temp_dir.path().join("absent.toml")).unwrap();
        assert!(settings.channels.is_empty());
    }

    #[test]
    fn test_load_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();

        let settings = Settings::load_from_path(&path).unwrap();
        assert_eq!(settings.channels[1].channel_type, "claude");
    }

    #[test]
    fn test_load_invalid_toml_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[relay\nbroken").unwrap();

        match Settings::load_from_path(&path) {
            Err(RelayError::ConfigParse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected ConfigParse, got {other:?}"),
        }
    }
}
