//! OpenAI-format stream decoding
//!
//! Decodes legacy-framed `data:` payloads from OpenAI-compatible upstreams
//! (OpenAI, Azure, Moonshot, Groq, DeepSeek) into chunks.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::Decoded;
use crate::{
    error::{RelayError, Result},
    messages::{Chunk, FunctionCall, ToolCall},
};

static CONTENT_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""content":"(.*?)""#).expect("content field regex"));

/// OpenAI stream event (chunk)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStreamResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<StreamChoice>,
}

/// OpenAI choice in stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub delta: StreamDelta,
    pub finish_reason: Option<String>,
}

/// OpenAI delta content
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDelta {
    pub role: Option<String>,
    pub content: Option<String>,
    pub reasoning_content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub function_call: Option<FunctionCall>,
}

/// Legacy completion stream event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub text: String,
}

/// `{"error": {"message", "type"}}` envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
}

impl ErrorEnvelope {
    /// Parse an error envelope from a payload
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }

    /// Check if the envelope carries nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.error.message.is_empty() && self.error.error_type.is_empty()
    }

    /// Convert to an upstream error with the provider prefix
    #[must_use]
    pub fn into_error(self, provider: &str) -> RelayError {
        RelayError::upstream(
            provider,
            format!("{} (type: {})", self.error.message, self.error.error_type),
        )
    }
}

/// Map a failed-status body to the upstream's own error when it carries an envelope
#[must_use]
pub fn status_error(provider: &str, status: u16, body: String) -> RelayError {
    match ErrorEnvelope::parse(&body) {
        Some(envelope) if !envelope.is_empty() => envelope.into_error(provider),
        _ => RelayError::Status { status, body },
    }
}

/// Chunk for the first choice's delta
#[must_use]
pub fn delta_chunk(form: &ChatStreamResponse) -> Chunk {
    let Some(choice) = form.choices.first() else {
        return Chunk::default();
    };
    let delta = &choice.delta;
    Chunk {
        content: delta.content.clone().unwrap_or_default(),
        tool_call: delta.tool_calls.clone(),
        function_call: delta.function_call.clone(),
    }
}

/// Decode one chat completion stream payload
///
/// # Errors
///
/// Returns an upstream error when the payload is an error envelope
pub fn decode_chat_line(provider: &str, data: &str) -> Result<Decoded> {
    if let Ok(form) = serde_json::from_str::<ChatStreamResponse>(data) {
        return Ok(Decoded::chunk(delta_chunk(&form)));
    }

    decode_fallback(provider, data)
}

/// Decode one legacy completion stream payload
///
/// # Errors
///
/// Returns an upstream error when the payload is an error envelope
pub fn decode_completion_line(provider: &str, data: &str) -> Result<Decoded> {
    if let Ok(form) = serde_json::from_str::<CompletionResponse>(data) {
        let text = form.choices.first().map(|c| c.text.as_str()).unwrap_or("");
        return Ok(Decoded::text(text));
    }

    decode_fallback(provider, data)
}

fn decode_fallback(provider: &str, data: &str) -> Result<Decoded> {
    if let Some(envelope) = ErrorEnvelope::parse(data) {
        return Err(envelope.into_error(provider));
    }

    if let Some(content) = robustness_content(data) {
        return Ok(Decoded::text(content));
    }

    Ok(Decoded::Dropped)
}

/// Pull `"content":"..."` out of a payload that is not valid JSON
#[must_use]
pub fn robustness_content(data: &str) -> Option<String> {
    CONTENT_FIELD
        .captures(data)
        .and_then(|caps| caps.get(1))
        .map(|m| unescape(m.as_str()))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
