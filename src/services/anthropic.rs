//! Anthropic Claude Messages API adapter
//!
//! System messages move to the top-level `system` field. Claude rejects two
//! consecutive turns from the same role and a conversation that opens with an
//! assistant turn, so the history is repaired before sending.

use async_trait::async_trait;
use serde::Serialize;

use super::{
    codec::{coerce_first_user, merge_adjacent_roles},
    streaming::{
        anthropic_stream::{ClaudeStreamDecoder, ErrorEnvelope},
        EventScanner, SseEvent,
    },
    transport::{Headers, HttpTransport},
    ChatFactory, ChatProps, Hook, RelayContext,
};
use crate::{
    config::ChannelConfig,
    error::{RelayError, Result},
    messages::{FunctionTool, Message, Role},
};

const PROVIDER: &str = "claude";

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Used when the caller sets no positive limit
pub const DEFAULT_MAX_TOKENS: i32 = 4096;

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<AnthropicTool>>,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessage {
    pub role: &'static str,
    pub content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: serde_json::Value,
}

impl From<&FunctionTool> for AnthropicTool {
    fn from(tool: &FunctionTool) -> Self {
        Self {
            name: tool.function.name.clone(),
            description: tool.function.description.clone(),
            input_schema: tool.function.parameters.clone(),
        }
    }
}

/// Effective `max_tokens`
#[must_use]
pub fn max_tokens(requested: Option<i32>) -> i32 {
    requested.filter(|t| *t > 0).unwrap_or(DEFAULT_MAX_TOKENS)
}

/// System prompt assembled from every system message
#[must_use]
pub fn system_prompt(messages: &[Message]) -> Option<String> {
    let parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System && !m.content.is_empty())
        .map(|m| m.content.as_str())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n\n"))
}

fn convert_message(message: Message) -> AnthropicMessage {
    match message.role {
        Role::Tool => AnthropicMessage {
            role: "user",
            content: vec![AnthropicContentBlock::ToolResult {
                tool_use_id: message.tool_call_id.unwrap_or_default(),
                content: message.content,
            }],
        },
        Role::Assistant => {
            let mut content = Vec::new();
            if !message.content.is_empty() {
                content.push(AnthropicContentBlock::Text {
                    text: message.content,
                });
            }
            for call in message.tool_calls.unwrap_or_default() {
                content.push(AnthropicContentBlock::ToolUse {
                    id: call.id,
                    name: call.function.name,
                    input: serde_json::from_str(&call.function.arguments)
                        .unwrap_or_else(|_| serde_json::json!({})),
                });
            }
            AnthropicMessage {
                role: "assistant",
                content,
            }
        }
        _ => AnthropicMessage {
            role: "user",
            content: vec![AnthropicContentBlock::Text {
                text: message.content,
            }],
        },
    }
}

/// Convert the non-system history into strictly alternating Claude turns
#[must_use]
pub fn claude_messages(messages: &[Message]) -> Vec<AnthropicMessage> {
    let history: Vec<Message> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();
    let mut merged = merge_adjacent_roles(&history, "\n\n");
    coerce_first_user(&mut merged);

    // tool results become user turns and may now sit next to a user turn
    let mut result: Vec<AnthropicMessage> = Vec::with_capacity(merged.len());
    for message in merged.into_iter().map(convert_message) {
        match result.last_mut() {
            Some(prev) if prev.role == message.role => prev.content.extend(message.content),
            _ => result.push(message),
        }
    }
    result
}

/// Map a failed-status body to a Claude error
#[must_use]
pub fn status_error(status: u16, body: String) -> RelayError {
    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) if !envelope.error.message.is_empty() => envelope.error.into_error(),
        _ => RelayError::Status { status, body },
    }
}

/// Claude chat instance
pub struct ClaudeInstance {
    endpoint: String,
    api_key: String,
    ctx: RelayContext,
}

impl ClaudeInstance {
    /// Create a new Claude instance from a channel
    #[must_use]
    pub fn new(conf: &dyn ChannelConfig, ctx: &RelayContext) -> Self {
        Self {
            endpoint: conf.endpoint().to_string(),
            api_key: conf.random_secret(),
            ctx: ctx.clone(),
        }
    }

    fn headers(&self) -> Headers {
        vec![
            ("x-api-key", self.api_key.clone()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ]
    }

    fn chat_body(props: &ChatProps) -> AnthropicRequest {
        AnthropicRequest {
            model: props.model.clone(),
            messages: claude_messages(&props.messages),
            system: system_prompt(&props.messages),
            max_tokens: max_tokens(props.max_tokens),
            temperature: props.temperature,
            top_p: props.top_p,
            top_k: props.top_k,
            tools: props
                .tools
                .as_ref()
                .filter(|tools| !tools.is_empty())
                .map(|tools| tools.iter().map(AnthropicTool::from).collect()),
            stream: true,
        }
    }
}

#[async_trait]
impl ChatFactory for ClaudeInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;
        let response = transport
            .open_stream(
                &format!("{}/v1/messages", self.endpoint),
                &self.headers(),
                &Self::chat_body(props),
                props.cancel(),
            )
            .await?;

        let mut decoder = ClaudeStreamDecoder::new();
        let scanned = EventScanner::full(PROVIDER)
            .scan(
                response,
                props.cancel(),
                |event: &SseEvent| decoder.decode(event),
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
