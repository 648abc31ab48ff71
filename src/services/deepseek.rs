//! DeepSeek adapter
//!
//! OpenAI-shaped API whose reasoning models stream `reasoning_content` before
//! the answer. Reasoning is rendered as a markdown quote ahead of the answer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    images::markdown_code,
    streaming::{
        openai_stream::{ChatStreamResponse, ErrorEnvelope},
        Decoded, EventScanner, ReasoningSplitter, SseEvent,
    },
    transport::{bearer, HttpTransport},
    ChatFactory, ChatProps, Hook, RelayContext,
};
use crate::{
    config::ChannelConfig,
    error::{RelayError, Result},
    messages::Message,
};

const PROVIDER: &str = "deepseek";

/// Request body for `/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i32>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseChoice {
    pub message: Message,
}

/// Buffered chat response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
}

/// Per-call stream decoder
#[derive(Debug, Default)]
pub struct DeepSeekStreamDecoder {
    splitter: ReasoningSplitter,
}

impl DeepSeekStreamDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one stream payload
    ///
    /// # Errors
    ///
    /// Returns an upstream error for error envelopes carrying a message
    pub fn decode(&mut self, data: &str) -> Result<Decoded> {
        if let Ok(form) = serde_json::from_str::<ChatStreamResponse>(data) {
            let Some(choice) = form.choices.first() else {
                return Ok(Decoded::Ignored);
            };
            let delta = &choice.delta;
            let content = delta.content.as_deref().unwrap_or("");

            if !content.is_empty() {
                return Ok(Decoded::text(self.splitter.answer(content)));
            }
            return Ok(match delta.reasoning_content.as_deref() {
                Some(reasoning) if !reasoning.is_empty() => {
                    Decoded::text(self.splitter.reasoning(reasoning))
                }
                _ => Decoded::Ignored,
            });
        }

        if let Some(envelope) = ErrorEnvelope::parse(data) {
            if !envelope.error.message.is_empty() {
                return Err(RelayError::upstream(PROVIDER, envelope.error.message));
            }
        }

        Ok(Decoded::Dropped)
    }
}

/// Map a failed-status body to a DeepSeek error
#[must_use]
pub fn status_error(status: u16, body: String) -> RelayError {
    match ErrorEnvelope::parse(&body) {
        Some(envelope) if envelope.is_empty() => RelayError::Other(markdown_code("json", &body)),
        Some(envelope) => envelope.into_error(PROVIDER),
        None => RelayError::Status { status, body },
    }
}

/// DeepSeek chat instance
pub struct DeepSeekInstance {
    endpoint: String,
    api_key: String,
    ctx: RelayContext,
}

impl DeepSeekInstance {
    /// Create a new DeepSeek instance from a channel
    #[must_use]
    pub fn new(conf: &dyn ChannelConfig, ctx: &RelayContext) -> Self {
        Self {
            endpoint: conf.endpoint().to_string(),
            api_key: conf.random_secret(),
            ctx: ctx.clone(),
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }

    fn chat_body<'a>(props: &'a ChatProps, stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &props.model,
            messages: &props.messages,
            max_tokens: props.max_tokens,
            stream,
            temperature: props.temperature,
            top_p: props.top_p,
            presence_penalty: props.presence_penalty,
            frequency_penalty: props.frequency_penalty,
        }
    }

    /// Run a buffered request and render reasoning ahead of the answer
    ///
    /// # Errors
    ///
    /// Returns transport, status, and parse errors
    pub async fn create_chat_request(&self, props: &ChatProps) -> Result<String> {
        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;
        let response = transport
            .post_json(
                &self.chat_url(),
                &bearer(&self.api_key),
                &Self::chat_body(props, false),
                props.cancel(),
            )
            .await?;

        if !response.is_success() {
            return Err(status_error(response.status, response.text()));
        }

        let data: ChatResponse = response
            .json()
            .map_err(|_| RelayError::parse(PROVIDER, "response"))?;
        let message = data
            .choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| RelayError::upstream(PROVIDER, "no choices"))?;

        Ok(ReasoningSplitter::render_complete(
            message.reasoning_content.as_deref(),
            &message.content,
        ))
    }
}

#[async_trait]
impl ChatFactory for DeepSeekInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;
        let response = transport
            .open_stream(
                &self.chat_url(),
                &bearer(&self.api_key),
                &Self::chat_body(props, true),
                props.cancel(),
            )
            .await?;

        let mut decoder = DeepSeekStreamDecoder::new();
        let scanned = EventScanner::legacy(PROVIDER)
            .scan(
                response,
                props.cancel(),
                |event: &SseEvent| decoder.decode(&event.data),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Channel,
        services::test_support::{collector, context, joined, legacy_sse},
    };
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn instance(server: &MockServer) -> DeepSeekInstance {
        let channel = Channel::new(5, "deepseek", server.uri(), "ds-key");
        DeepSeekInstance::new(&channel, &context())
    }

    #[test]
    fn test_decoder_splits_reasoning_and_answer() {
        let mut decoder = DeepSeekStreamDecoder::new();
        let lines = [
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":"","reasoning_content":""}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":null,"reasoning_content":"Let me"}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":null,"reasoning_content":" think\n\nok"}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":"Answer","reasoning_content":null}}]}"#,
            r#"{"choices":[{"index":0,"delta":{"content":" here","reasoning_content":null}}]}"#,
        ];

        let out: String = lines
            .iter()
            .filter_map(|line| match decoder.decode(line).unwrap() {
                Decoded::Chunk(chunk) => Some(chunk.content),
                _ => None,
            })
            .collect();

        assert_eq!(out, ">Let me think\nok\n\nAnswer here");
    }

    #[test]
    fn test_status_error_mapping() {
        let err = status_error(
            400,
            r#"{"error":{"message":"bad model","type":"invalid_request_error"}}"#.into(),
        );
        assert_eq!(
            err.to_string(),
            "deepseek error: bad model (type: invalid_request_error)"
        );

        let err = status_error(500, r#"{"error":{}}"#.into());
        assert_eq!(err.to_string(), "```json\n{\"error\":{}}\n```");

        let err = status_error(502, "bad gateway".into());
        assert!(matches!(err, RelayError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_stream_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer ds-key"))
            .and(body_partial_json(json!({"model": "deepseek-reasoner", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(legacy_sse(&[
                        r#"{"choices":[{"index":0,"delta":{"reasoning_content":"hmm"}}]}"#,
                        r#"{"choices":[{"index":0,"delta":{"content":"42"}}]}"#,
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let props = ChatProps::new("deepseek-reasoner", vec![Message::user("?")]);
        instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), ">hmm\n\n42");
    }

    #[tokio::test]
    async fn test_buffered_request_renders_reasoning() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "x",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "42", "reasoning_content": "thought"},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let props = ChatProps::new("deepseek-reasoner", vec![Message::user("?")]);
        let content = instance(&server).create_chat_request(&props).await.unwrap();

        assert_eq!(content, ">thought\n\n42");
    }
}
