//! Error types for llm-relay

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`RelayError`]
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay core
#[derive(Debug, Error)]
pub enum RelayError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parse error
    #[error("Failed to parse config at {path}: {message}")]
    ConfigParse { path: PathBuf, message: String },

    /// Configuration validation error
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    /// Transport error (connect, TLS, timeout, body read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a status >= 400; `body` is kept verbatim
    #[error("request failed with status code: {status}")]
    Status { status: u16, body: String },

    /// Error reported by the upstream in its own error envelope
    #[error("{provider} error: {message}")]
    Upstream { provider: String, message: String },

    /// Upstream returned a shape the decoder does not recognize
    #[error("{provider} error: cannot parse {message}")]
    Parse { provider: String, message: String },

    /// Upstream returned an empty body
    #[error("{provider} error: empty response")]
    EmptyResponse { provider: String },

    /// Caller input is incompatible with the selected model
    #[error("{0}")]
    Validation(String),

    /// Channel type is not registered
    #[error("unknown channel type {channel_type} (channel #{id})")]
    UnknownChannel { id: i64, channel_type: String },

    /// Optional capability missing on the resolved provider
    #[error("{capability} request not supported by channel type {channel_type} (channel #{id})")]
    Unsupported {
        capability: String,
        channel_type: String,
        id: i64,
    },

    /// Deadline elapsed
    #[error("{0} timeout")]
    Timeout(String),

    /// Operation cancelled by the caller
    #[error("Operation cancelled by caller")]
    Cancelled,

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl RelayError {
    /// Build an upstream error with the provider name prefix
    pub fn upstream(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Build a parse error for an unrecognized upstream shape
    pub fn parse(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Build an empty-response error
    pub fn empty(provider: impl Into<String>) -> Self {
        Self::EmptyResponse {
            provider: provider.into(),
        }
    }

    /// Build a user-facing validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Raw body of a failed HTTP exchange, if this error carries one
    #[must_use]
    pub fn status_body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Whether the upstream text reads as a policy/safety refusal
    #[must_use]
    pub fn is_policy_refusal(&self) -> bool {
        let text = self.to_string();
        text.contains("safety") || text.contains("inappropriate")
    }
}

impl From<String> for RelayError {
    fn from(s: String) -> Self {
        RelayError::Other(s)
    }
}

impl From<&str> for RelayError {
    fn from(s: &str) -> Self {
        RelayError::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_message_is_prefixed() {
        let err = RelayError::upstream("deepseek", "rate limited (type: quota)");
        assert_eq!(err.to_string(), "deepseek error: rate limited (type: quota)");
    }

    #[test]
    fn test_unknown_channel_names_id_and_type() {
        let err = RelayError::UnknownChannel {
            id: 7,
            channel_type: "bogus".into(),
        };
        assert_eq!(err.to_string(), "unknown channel type bogus (channel #7)");
    }

    #[test]
    fn test_policy_refusal_detection() {
        assert!(RelayError::upstream("openai", "rejected by safety system").is_policy_refusal());
        assert!(RelayError::upstream("cloudflare", "inappropriate content").is_policy_refusal());
        assert!(!RelayError::upstream("openai", "bad key").is_policy_refusal());
    }

    #[test]
    fn test_status_body_is_verbatim() {
        let err = RelayError::Status {
            status: 429,
            body: "{\"error\":{}}".into(),
        };
        assert_eq!(err.status_body(), Some("{\"error\":{}}"));
        assert_eq!(err.to_string(), "request failed with status code: 429");
    }
}
