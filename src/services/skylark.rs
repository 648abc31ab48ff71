//! Volcengine Ark (Skylark / Doubao) adapter
//!
//! Ark speaks an OpenAI-compatible streaming API but requires strictly
//! alternating roles, and reports calls as a single `function_call` delta.

use async_trait::async_trait;
use serde::Serialize;

use super::{
    codec::{coerce_first_user, merge_adjacent_roles},
    streaming::{
        openai_stream::{ChatStreamResponse, ErrorEnvelope},
        Decoded, EventScanner, SseEvent,
    },
    transport::{bearer, HttpTransport},
    ChatFactory, ChatProps, Hook, RelayContext,
};
use crate::{
    config::ChannelConfig,
    error::{RelayError, Result},
    messages::{Chunk, FunctionCall, FunctionTool, Message, Role, ToolCall, ToolCallFunction},
};

const PROVIDER: &str = "skylark";

/// Used when the caller sets no limit or a negative one
pub const DEFAULT_MAX_TOKENS: i32 = 4096;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkylarkMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl From<Message> for SkylarkMessage {
    fn from(message: Message) -> Self {
        let function_call = message.tool_calls.as_ref().and_then(|calls| {
            calls.first().map(|call| FunctionCall {
                name: call.function.name.clone(),
                arguments: call.function.arguments.clone(),
            })
        });
        Self {
            role: message.role,
            content: message.content,
            function_call,
            reasoning_content: message.reasoning_content,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<SkylarkMessage>,
    pub max_tokens: i32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FunctionTool>>,
}

/// Effective `max_tokens`
#[must_use]
pub fn max_tokens(requested: Option<i32>) -> i32 {
    match requested {
        Some(tokens) if tokens >= 0 => tokens,
        _ => DEFAULT_MAX_TOKENS,
    }
}

/// Repair the role sequence: make the first turn a user turn, then merge adjacent roles
///
/// A coerced opening turn folds into the user turn after it.
#[must_use]
pub fn skylark_messages(messages: &[Message]) -> Vec<SkylarkMessage> {
    let mut coerced = messages.to_vec();
    coerce_first_user(&mut coerced);
    merge_adjacent_roles(&coerced, "")
        .into_iter()
        .map(SkylarkMessage::from)
        .collect()
}

/// Decode one stream payload
///
/// # Errors
///
/// Returns an upstream error when the payload is an error envelope
pub fn decode_line(data: &str) -> Result<Decoded> {
    if let Ok(form) = serde_json::from_str::<ChatStreamResponse>(data) {
        let Some(choice) = form.choices.first() else {
            return Ok(Decoded::Ignored);
        };
        let delta = &choice.delta;

        let tool_call = delta.function_call.as_ref().map(|call| {
            vec![ToolCall {
                index: None,
                id: format!("{}-{}", call.name, form.id),
                call_type: "function".to_string(),
                function: ToolCallFunction {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            }]
        });

        return Ok(Decoded::chunk(Chunk {
            content: delta.content.clone().unwrap_or_default(),
            tool_call,
            function_call: None,
        }));
    }

    if let Some(envelope) = ErrorEnvelope::parse(data) {
        return Err(envelope.into_error(PROVIDER));
    }

    Ok(Decoded::Dropped)
}

/// Skylark chat instance
pub struct SkylarkInstance {
    endpoint: String,
    api_key: String,
    ctx: RelayContext,
}

impl SkylarkInstance {
    /// Create a new Skylark instance from a channel
    #[must_use]
    pub fn new(conf: &dyn ChannelConfig, ctx: &RelayContext) -> Self {
        let api_key = conf.split_random_secret(1).into_iter().next().unwrap_or_default();
        Self {
            endpoint: conf.endpoint().to_string(),
            api_key,
            ctx: ctx.clone(),
        }
    }

    fn chat_body(props: &ChatProps) -> ChatRequest {
        ChatRequest {
            model: props.model.clone(),
            messages: skylark_messages(&props.messages),
            max_tokens: max_tokens(props.max_tokens),
            stream: true,
            temperature: props.temperature,
            top_p: props.top_p,
            presence_penalty: props.presence_penalty,
            frequency_penalty: props.frequency_penalty,
            repetition_penalty: props.repetition_penalty,
            tools: props.tools.clone(),
        }
    }
}

#[async_trait]
impl ChatFactory for SkylarkInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;
        let response = transport
            .open_stream(
                &format!("{}/chat/completions", self.endpoint),
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
            Err(RelayError::Status { status, body }) => match ErrorEnvelope::parse(&body) {
                Some(envelope) if !envelope.is_empty() => Err(envelope.into_error(PROVIDER)),
                _ => Err(RelayError::Status { status, body }),
            },
            Err(e) => Err(e),
        }
    }
}
