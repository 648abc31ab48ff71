//! Channel configuration
//!
//! A channel is one configured upstream account: its type, endpoint, credentials,
//! model remapping rules and outbound proxy. The relay core only ever reads it
//! through the [`ChannelConfig`] trait.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

/// Outbound proxy kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    #[default]
    None,
    Http,
    Https,
    Socks5,
}

/// Outbound proxy settings for a channel
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub proxy_type: ProxyType,

    /// Proxy URL (`http://host:port`) or socks5 address (`host:port`)
    #[serde(default)]
    pub proxy: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
}

impl ProxyConfig {
    /// Check if a proxy should be applied
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.proxy_type != ProxyType::None && !self.proxy.is_empty()
    }
}

/// Read-only view of a channel consumed by providers and the dispatch registry
pub trait ChannelConfig: Send + Sync {
    /// Numeric channel id
    fn id(&self) -> i64;

    /// Channel type identifier (`openai`, `claude`, ...)
    fn channel_type(&self) -> &str;

    /// Base URL of the upstream, without trailing slash
    fn endpoint(&self) -> &str;

    /// One credential picked uniformly at random
    fn random_secret(&self) -> String;

    /// A random credential split on `|` and padded to exactly `n` parts
    fn split_random_secret(&self, n: usize) -> Vec<String> {
        split_secret(&self.random_secret(), n)
    }

    /// Upstream model name for a caller-facing model name
    fn model_reflect(&self, original: &str) -> String;

    /// Outbound proxy for this channel
    fn proxy(&self) -> ProxyConfig;
}

/// A configured channel loaded from the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type")]
    pub channel_type: String,

    pub endpoint: String,

    /// Credentials, one per line
    #[serde(default)]
    pub secret: String,

    /// Model remapping rules, one `source>target` per line
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mapper: String,

    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Channel {
    /// Create a new channel without mapper or proxy
    #[must_use]
    pub fn new(
        id: i64,
        channel_type: impl Into<String>,
        endpoint: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: String::new(),
            channel_type: channel_type.into(),
            endpoint: endpoint.into(),
            secret: secret.into(),
            mapper: String::new(),
            proxy: ProxyConfig::default(),
        }
    }

    /// Set the model mapper
    #[must_use]
    pub fn with_mapper(mut self, mapper: impl Into<String>) -> Self {
        self.mapper = mapper.into();
        self
    }

    /// Set the outbound proxy
    #[must_use]
    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    /// All credentials configured on the channel
    #[must_use]
    pub fn secrets(&self) -> Vec<&str> {
        self.secret
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect()
    }
}

impl ChannelConfig for Channel {
    fn id(&self) -> i64 {
        self.id
    }

    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn endpoint(&self) -> &str {
        self.endpoint.trim_end_matches('/')
    }

    fn random_secret(&self) -> String {
        self.secrets()
            .choose(&mut rand::thread_rng())
            .map(|s| (*s).to_string())
            .unwrap_or_default()
    }

    fn model_reflect(&self, original: &str) -> String {
        reflect_model(&self.mapper, original)
    }

    fn proxy(&self) -> ProxyConfig {
        self.proxy.clone()
    }
}

/// Split a secret on `|`, padding or truncating to exactly `n` parts
#[must_use]
pub fn split_secret(secret: &str, n: usize) -> Vec<String> {
    let mut parts: Vec<String> = secret.split('|').take(n).map(str::to_string).collect();
    parts.resize(n, String::new());
    parts
}

/// Resolve a model name through mapper rules; no match returns the original
#[must_use]
pub fn reflect_model(mapper: &str, original: &str) -> String {
    for line in mapper.lines() {
        let Some((source, target)) = line.split_once('>') else {
            continue;
        };
        let source = source.trim();
        let source = source.strip_prefix('!').unwrap_or(source);
        if source == original {
            let target = target.trim();
            if !target.is_empty() {
                return target.to_string();
            }
        }
    }

    original.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_secret_pads_and_truncates() {
        assert_eq!(split_secret("key|2024-05-01", 2), vec!["key", "2024-05-01"]);
        assert_eq!(split_secret("key", 3), vec!["key", "", ""]);
        assert_eq!(split_secret("a|b|c", 1), vec!["a"]);
    }

    #[test]
    fn test_reflect_model() {
        let mapper = "gpt-4>gpt-4-0613\n!hidden>real-model\nbad line";
        assert_eq!(reflect_model(mapper, "gpt-4"), "gpt-4-0613");
        assert_eq!(reflect_model(mapper, "hidden"), "real-model");
        assert_eq!(reflect_model(mapper, "other"), "other");
        assert_eq!(reflect_model("", "gpt-4"), "gpt-4");
    }

    #[test]
    fn test_random_secret_picks_configured_value() {
        let channel = Channel::new(1, "openai", "https://api.example.com/", "sk-a\nsk-b\n");
        for _ in 0..16 {
            let secret = channel.random_secret();
            assert!(secret == "sk-a" || secret == "sk-b");
        }
        assert_eq!(channel.endpoint(), "https://api.example.com");
    }

    #[test]
    fn test_empty_secret() {
        let channel = Channel::new(1, "openai", "http://x", "");
        assert_eq!(channel.random_secret(), "");
        assert_eq!(channel.split_random_secret(2), vec!["", ""]);
    }

    #[test]
    fn test_proxy_enabled() {
        assert!(!ProxyConfig::default().is_enabled());
        let proxy = ProxyConfig {
            proxy_type: ProxyType::Socks5,
            proxy: "127.0.0.1:1080".into(),
            ..Default::default()
        };
        assert!(proxy.is_enabled());
    }
}
