//! OpenAI chat and legacy completion streaming

use serde::Serialize;
use tracing::info;

use super::OpenAIInstance;
use crate::{
    config::models,
    error::{RelayError, Result},
    messages::{FunctionCall, FunctionTool, Message, Role, ToolCall},
    services::{
        images::{extract_images, ImageRef},
        streaming::{
            openai_stream::{decode_chat_line, decode_completion_line, status_error},
            EventScanner, SseEvent,
        },
        transport::HttpTransport,
        ChatProps, Hook,
    },
};

/// Image reference in a structured content part
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One part of a structured message content array
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageContent {
    #[serde(rename = "type")]
    pub content_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<ImageUrl>,
}

impl MessageContent {
    fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text",
            text: Some(text.into()),
            image_url: None,
        }
    }

    fn image(url: impl Into<String>) -> Self {
        Self {
            content_type: "image_url",
            text: None,
            image_url: Some(ImageUrl { url: url.into() }),
        }
    }
}

/// Message with structured content, sent to vision models
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisionMessage {
    pub role: Role,
    pub content: Vec<MessageContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

/// Message list in either plain or structured form
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChatMessages {
    Plain(Vec<Message>),
    Vision(Vec<VisionMessage>),
}

/// Request body for `/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: ChatMessages,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<i32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FunctionTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
}

/// Request body for the legacy `/completions` endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    pub stream: bool,
}

impl OpenAIInstance {
    /// Convert messages to the structured form when the model accepts images
    pub(crate) fn format_messages(&self, props: &ChatProps) -> ChatMessages {
        if !self.ctx.is_vision_model(&props.model) {
            return ChatMessages::Plain(props.messages.clone());
        }

        let messages = props
            .messages
            .iter()
            .map(|message| {
                let content = if message.role == Role::User {
                    let (text, urls) = extract_images(&message.content);
                    let mut parts = vec![MessageContent::text(text)];
                    for url in urls {
                        match ImageRef::parse(&url) {
                            Ok(image) => props.record_image(&image),
                            Err(e) => info!("cannot process image: {e}"),
                        }
                        parts.push(MessageContent::image(url));
                    }
                    parts
                } else {
                    vec![MessageContent::text(message.content.clone())]
                };

                VisionMessage {
                    role: message.role,
                    content,
                    name: message.name.clone(),
                    function_call: message.function_call.clone(),
                    tool_calls: message.tool_calls.clone(),
                    tool_call_id: message.tool_call_id.clone(),
                }
            })
            .collect();

        ChatMessages::Vision(messages)
    }

    pub(crate) fn chat_body(&self, props: &ChatProps, stream: bool) -> ChatRequest {
        let (max_tokens, max_completion_tokens) = if models::uses_max_completion_tokens(&props.model)
        {
            (None, props.max_tokens)
        } else {
            (props.max_tokens, None)
        };

        ChatRequest {
            model: props.model.clone(),
            messages: self.format_messages(props),
            max_tokens,
            max_completion_tokens,
            stream,
            presence_penalty: props.presence_penalty,
            frequency_penalty: props.frequency_penalty,
            temperature: props.temperature,
            top_p: props.top_p,
            tools: props.tools.clone(),
            tool_choice: props.tool_choice.clone(),
        }
    }

    pub(crate) fn completion_body(props: &ChatProps, stream: bool) -> CompletionRequest {
        let prompt = props
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        CompletionRequest {
            model: props.model.clone(),
            prompt,
            max_tokens: props.max_tokens,
            stream,
        }
    }

    /// Stream a chat or legacy completion request
    pub(crate) async fn stream_chat(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
        hook: &mut Hook<'_>,
    ) -> Result<()> {
        let provider = self.provider();
        let completion = models::is_completion_model(&props.model);

        let response = if completion {
            let body = Self::completion_body(props, true);
            transport
                .open_stream(&self.url(&props.model, "completions"), &self.headers(), &body, props.cancel())
                .await?
        } else {
            let body = self.chat_body(props, true);
            transport
                .open_stream(
                    &self.url(&props.model, "chat/completions"),
                    &self.headers(),
                    &body,
                    props.cancel(),
                )
                .await?
        };

        match EventScanner::legacy(provider)
            .scan(
                response,
                props.cancel(),
                |event: &SseEvent| {
                    if completion {
                        decode_completion_line(provider, &event.data)
                    } else {
                        decode_chat_line(provider, &event.data)
                    }
                },
                hook,
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(RelayError::Status { status, body }) => Err(status_error(provider, status, body)),
            Err(e) => Err(e),
        }
    }
}
