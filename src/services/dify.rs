//! Dify chat-messages adapter
//!
//! Dify uses legacy `data:` framing but puts the event name inside the JSON
//! payload. Only the first user message is sent as the query; Dify keeps the
//! conversation history itself.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    coze::generated_user_id,
    streaming::{Decoded, EventScanner, SseEvent},
    transport::{bearer, HttpTransport},
    ChatFactory, ChatProps, Hook, RelayContext,
};
use crate::{
    config::ChannelConfig,
    error::{RelayError, Result},
    messages::{Message, Role},
};

const PROVIDER: &str = "dify";

/// Progress events of workflow apps; nothing to deliver
const PROGRESS_EVENTS: &[&str] = &[
    "workflow_started",
    "node_started",
    "node_finished",
    "workflow_finished",
    "iteration_started",
    "iteration_next",
    "iteration_finished",
    "iteration_completed",
    "parallel_branch_started",
    "parallel_branch_finished",
    "ping",
];

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub inputs: HashMap<String, serde_json::Value>,
    pub query: String,
    pub response_mode: &'static str,
    pub user: String,
    pub auto_generate_name: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamResponse {
    #[serde(default)]
    pub event: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl StreamResponse {
    fn has_error_fields(&self) -> bool {
        self.code.as_deref().is_some_and(|c| !c.is_empty())
            || self.message.as_deref().is_some_and(|m| !m.is_empty())
    }

    fn into_error(self) -> RelayError {
        RelayError::upstream(
            PROVIDER,
            format!(
                "{} (code: {})",
                self.message.unwrap_or_default(),
                self.code.unwrap_or_default()
            ),
        )
    }
}

/// Content of the first user message, or empty
#[must_use]
pub fn first_user_query(messages: &[Message]) -> &str {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map_or("", |m| m.content.as_str())
}

/// Decode one Dify payload
///
/// # Errors
///
/// Returns an upstream error for `error` events and unknown events carrying error fields
pub fn decode_line(data: &str) -> Result<Decoded> {
    let Ok(form) = serde_json::from_str::<StreamResponse>(data) else {
        return Ok(Decoded::Dropped);
    };

    match form.event.as_str() {
        "message" | "agent_message" => Ok(Decoded::text(form.answer)),
        "message_end" => Ok(Decoded::Done),
        "error" => {
            let complete = form.code.as_deref().is_some_and(|c| !c.is_empty())
                && form.message.as_deref().is_some_and(|m| !m.is_empty());
            if complete {
                Err(form.into_error())
            } else {
                Err(RelayError::upstream(PROVIDER, "conversation failed"))
            }
        }
        kind if PROGRESS_EVENTS.contains(&kind) => Ok(Decoded::Ignored),
        _ if form.has_error_fields() => Err(form.into_error()),
        kind => {
            debug!("[dify] ignored event: {kind}");
            Ok(Decoded::Ignored)
        }
    }
}

/// Map a failed-status body to a Dify error
#[must_use]
pub fn status_error(status: u16, body: String) -> RelayError {
    if !body.contains("\"code\":") {
        return RelayError::Status { status, body };
    }
    match serde_json::from_str::<StreamResponse>(&body) {
        Ok(form) if form.has_error_fields() => form.into_error(),
        _ => match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) => RelayError::upstream(PROVIDER, value.to_string()),
            Err(_) => RelayError::Status { status, body },
        },
    }
}

/// Dify chat instance
pub struct DifyInstance {
    endpoint: String,
    api_key: String,
    ctx: RelayContext,
}

impl DifyInstance {
    /// Create a new Dify instance from a channel
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
            inputs: HashMap::new(),
            query: first_user_query(&props.messages).to_string(),
            response_mode: "streaming",
            user: generated_user_id(),
            auto_generate_name: true,
        }
    }
}

#[async_trait]
impl ChatFactory for DifyInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;
        let response = transport
            .open_stream(
                &format!("{}/chat-messages", self.endpoint),
                &bearer(&self.api_key),
                &Self::chat_body(props),
                props.cancel(),
            )
            .await?;

        let scanned = EventScanner::legacy(PROVIDER)
            .scan(
                response,
                props.cancel(),
                |event: &SseEvent| decode_line(&event.data),
                hook,
            )
            .await;

        match scanned {
            Ok(_) => Ok(()),
            Err(RelayError::Status { status, body }) => Err(status_error(status, body)),
            Err(e) => Err(e),
        }
    }
}
