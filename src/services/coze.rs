//! Coze v3 chat adapter
//!
//! Coze streams full SSE events (`event:` + `data:`), where the event name
//! carries the meaning and `data` is the message object, sometimes wrapped in
//! a JSON string.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    streaming::{Decoded, EventScanner, SseEvent},
    transport::{bearer, HttpTransport},
    ChatFactory, ChatProps, Hook, RelayContext,
};
use crate::{
    config::ChannelConfig,
    error::{RelayError, Result},
    messages::{Message, Role},
};

const PROVIDER: &str = "coze";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnterMessage {
    pub role: Role,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub message_type: Option<&'static str>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    pub content_type: &'static str,
}

impl From<&Message> for EnterMessage {
    fn from(message: &Message) -> Self {
        let message_type = match message.role {
            Role::User => Some("question"),
            Role::Assistant => Some("answer"),
            _ => None,
        };
        Self {
            role: message.role,
            message_type,
            content: message.content.clone(),
            content_type: "text",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub bot_id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub additional_messages: Vec<EnterMessage>,
    pub stream: bool,
    pub auto_save_history: bool,
}

/// `code`/`msg` pair Coze uses for failures
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CozeStatus {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

impl CozeStatus {
    fn is_failure(&self) -> bool {
        self.code != 0 && !self.msg.is_empty()
    }

    fn into_error(self) -> RelayError {
        RelayError::upstream(PROVIDER, format!("{} (code: {})", self.msg, self.code))
    }
}

/// Message object carried by stream events
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamData {
    #[serde(default)]
    pub role: String,
    #[serde(rename = "type", default)]
    pub message_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub last_error: Option<CozeStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct WrappedStatus {
    #[serde(default)]
    data: CozeStatus,
}

/// A `user_id` unique enough for one conversation; Coze requires one
#[must_use]
pub fn generated_user_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("user_{nanos}")
}

/// Strip one level of JSON string quoting from event data
#[must_use]
pub fn unquote(data: &str) -> String {
    let trimmed = data.trim();
    if trimmed.len() > 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        if let Ok(inner) = serde_json::from_str::<String>(trimmed) {
            return inner;
        }
    }
    trimmed.to_string()
}

/// Decode one Coze event
///
/// # Errors
///
/// Returns an upstream error for failed conversations and error payloads
pub fn decode_event(event: &SseEvent) -> Result<Decoded> {
    let data = unquote(&event.data);
    if event.kind().is_empty() || data.is_empty() {
        return Ok(Decoded::Ignored);
    }

    let parsed = serde_json::from_str::<StreamData>(&data).ok();

    match event.kind() {
        "conversation.message.delta" => {
            return Ok(match parsed {
                Some(d) if d.message_type == "answer" && d.role == "assistant" => {
                    Decoded::text(d.content)
                }
                _ => Decoded::Ignored,
            });
        }
        "conversation.message.completed" => return Ok(Decoded::Ignored),
        "conversation.chat.completed" | "done" => return Ok(Decoded::Done),
        "conversation.chat.failed" => {
            let status = parsed.and_then(|d| {
                let top = CozeStatus {
                    code: d.code,
                    msg: d.msg,
                };
                if top.is_failure() {
                    Some(top)
                } else {
                    d.last_error.filter(CozeStatus::is_failure)
                }
            });
            return Err(status.map_or_else(
                || RelayError::upstream(PROVIDER, "conversation failed"),
                CozeStatus::into_error,
            ));
        }
        _ => {}
    }

    if let Ok(wrapped) = serde_json::from_str::<WrappedStatus>(&data) {
        if wrapped.data.code != 0 {
            return Err(wrapped.data.into_error());
        }
    }

    if let Some(d) = parsed {
        if d.code != 0 && !d.msg.is_empty() {
            return Err(CozeStatus {
                code: d.code,
                msg: d.msg,
            }
            .into_error());
        }
        if let Some(last) = d.last_error.filter(CozeStatus::is_failure) {
            return Err(last.into_error());
        }
    }

    debug!("[coze] ignored event: {}", event.kind());
    Ok(Decoded::Ignored)
}

/// Map a failed-status body to a Coze error
#[must_use]
pub fn status_error(status: u16, body: String) -> RelayError {
    if !body.contains("\"code\":") {
        return RelayError::Status { status, body };
    }

    if let Ok(wrapped) = serde_json::from_str::<WrappedStatus>(&body) {
        if wrapped.data.code != 0 {
            return wrapped.data.into_error();
        }
    }
    if let Ok(top) = serde_json::from_str::<CozeStatus>(&body) {
        if top.code != 0 {
            return top.into_error();
        }
    }
    match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(value) => RelayError::upstream(PROVIDER, value.to_string()),
        Err(_) => RelayError::Status { status, body },
    }
}

/// Coze chat instance
pub struct CozeInstance {
    endpoint: String,
    api_key: String,
    ctx: RelayContext,
}

impl CozeInstance {
    /// Create a new Coze instance from a channel
    #[must_use]
    pub fn new(conf: &dyn ChannelConfig, ctx: &RelayContext) -> Self {
        Self {
            endpoint: conf.endpoint().to_string(),
            api_key: conf.random_secret(),
            ctx: ctx.clone(),
        }
    }

    fn chat_body(props: &ChatProps) -> ChatRequest {
        ChatRequest {
            bot_id: props.model.clone(),
            user_id: generated_user_id(),
            additional_messages: props.messages.iter().map(EnterMessage::from).collect(),
            stream: true,
            auto_save_history: false,
        }
    }
}

#[async_trait]
impl ChatFactory for CozeInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;
        let response = transport
            .open_stream(
                &format!("{}/v3/chat", self.endpoint),
                &bearer(&self.api_key),
                &Self::chat_body(props),
                props.cancel(),
            )
            .await?;

        match EventScanner::full(PROVIDER)
            .scan(response, props.cancel(), decode_event, hook)
            .await
        {
            Ok(_) => Ok(()),
            Err(RelayError::Status { status, body }) => Err(status_error(status, body)),
            Err(e) => Err(e),
        }
    }
}
