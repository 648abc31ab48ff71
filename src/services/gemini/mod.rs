//! Google Generative Language adapter
//!
//! One channel type serves three model families:
//! - `chat-bison-001` (PaLM 2), a buffered `generateMessage` call re-chunked on spaces
//! - Gemini models, streamed from `streamGenerateContent?alt=sse`
//! - Imagen models (`imagen-*`), see [`image`]

pub mod image;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    codec::{merge_adjacent_roles, split_keep_separator},
    images::{extract_images, ImageRef},
    streaming::{Decoded, EventScanner, SseEvent},
    transport::{Headers, HttpTransport},
    ChatFactory, ChatProps, Hook, RelayContext,
};
use crate::{
    config::{models, ChannelConfig},
    error::{RelayError, Result},
    messages::{Chunk, Message, Role},
};

const GEMINI: &str = "gemini";
const PALM: &str = "palm2";

/// Inline images accepted per request
pub const GEMINI_MAX_IMAGES: usize = 16;

/// PaLM 2 message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PalmMessage {
    pub author: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PalmPrompt {
    pub messages: Vec<PalmMessage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PalmChatBody {
    pub prompt: PalmPrompt,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PalmChatResponse {
    #[serde(default)]
    pub candidates: Vec<PalmMessage>,
}

/// Inline image part
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeminiContent {
    pub role: &'static str,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiChatBody {
    pub contents: Vec<GeminiContent>,
    pub generation_config: GeminiConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiResponsePart {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiCandidateContent {
    #[serde(default)]
    pub parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: GeminiCandidateContent,
}

/// Buffered or streamed `generateContent` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeminiChatResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
}

impl GeminiChatResponse {
    /// Text of the first part of the first candidate
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoogleError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// `{"error": {"code", "message", "status"}}`
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleErrorEnvelope {
    pub error: GoogleError,
}

impl GoogleErrorEnvelope {
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        serde_json::from_str(data).ok()
    }

    #[must_use]
    pub fn into_error(self) -> RelayError {
        RelayError::upstream(
            GEMINI,
            format!(
                "{} (code: {}, status: {})",
                self.error.message, self.error.code, self.error.status
            ),
        )
    }
}

/// Decode one Gemini stream payload
///
/// # Errors
///
/// Returns an upstream error when the payload is an error envelope
pub fn decode_gemini_line(data: &str) -> Result<Decoded> {
    if let Some(envelope) = GoogleErrorEnvelope::parse(data) {
        return Err(envelope.into_error());
    }
    match serde_json::from_str::<GeminiChatResponse>(data) {
        Ok(form) => Ok(form.text().map_or(Decoded::Ignored, Decoded::text)),
        Err(_) => Ok(Decoded::Dropped),
    }
}

/// Merge consecutive PaLM messages by author, skipping empty and tool messages
#[must_use]
pub fn palm_messages(messages: &[Message]) -> Vec<PalmMessage> {
    let mut result: Vec<PalmMessage> = Vec::new();

    for message in messages {
        if message.content.is_empty() || message.role == Role::Tool {
            continue;
        }

        match result.last_mut() {
            Some(prev) if prev.author == message.role.as_str() => {
                prev.content.push(' ');
                prev.content.push_str(&message.content);
            }
            _ => result.push(PalmMessage {
                author: message.role.as_str().to_string(),
                content: message.content.clone(),
            }),
        }
    }

    result
}

/// Gemini chat instance
pub struct GeminiInstance {
    endpoint: String,
    api_key: String,
    ctx: RelayContext,
}

impl GeminiInstance {
    /// Create a new Gemini instance from a channel
    #[must_use]
    pub fn new(conf: &dyn ChannelConfig, ctx: &RelayContext) -> Self {
        Self {
            endpoint: conf.endpoint().to_string(),
            api_key: conf.random_secret(),
            ctx: ctx.clone(),
        }
    }

    fn chat_url(&self, model: &str, stream: bool) -> String {
        if model == models::CHAT_BISON_001 {
            return format!(
                "{}/v1beta2/models/{model}:generateMessage?key={}",
                self.endpoint, self.api_key
            );
        }
        if stream {
            return format!(
                "{}/v1beta/models/{model}:streamGenerateContent?alt=sse&key={}",
                self.endpoint, self.api_key
            );
        }
        format!(
            "{}/v1beta/models/{model}:generateContent?key={}",
            self.endpoint, self.api_key
        )
    }

    /// Build Gemini contents: roles user/model, adjacent turns merged, images inlined
    async fn contents(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
    ) -> Result<Vec<GeminiContent>> {
        let normalized: Vec<Message> = props
            .messages
            .iter()
            .map(|m| {
                let role = if m.role == Role::Assistant {
                    Role::Assistant
                } else {
                    Role::User
                };
                Message::new(role, m.content.clone())
            })
            .collect();

        let mut remaining = GEMINI_MAX_IMAGES;
        let mut contents = Vec::new();

        for message in merge_adjacent_roles(&normalized, "\n\n") {
            if message.role == Role::Assistant {
                contents.push(GeminiContent {
                    role: "model",
                    parts: vec![GeminiPart {
                        text: Some(message.content),
                        inline_data: None,
                    }],
                });
                continue;
            }

            let (text, urls) = extract_images(&message.content);
            let mut parts = vec![GeminiPart {
                text: Some(text),
                inline_data: None,
            }];

            for url in urls {
                if remaining == 0 {
                    info!("gemini image limit reached, skipping remaining images");
                    break;
                }
                let image = match ImageRef::parse(&url) {
                    Ok(image) => image,
                    Err(e) => {
                        info!("cannot process image: {e}");
                        continue;
                    }
                };
                props.record_image(&image);
                let (mime_type, data) = image.resolve(transport, props.cancel()).await?;
                parts.push(GeminiPart {
                    text: None,
                    inline_data: Some(InlineData { mime_type, data }),
                });
                remaining -= 1;
            }

            contents.push(GeminiContent { role: "user", parts });
        }

        Ok(contents)
    }

    async fn gemini_body(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
    ) -> Result<GeminiChatBody> {
        Ok(GeminiChatBody {
            contents: self.contents(transport, props).await?,
            generation_config: GeminiConfig {
                temperature: props.temperature,
                max_output_tokens: props.max_tokens,
                top_p: props.top_p,
                top_k: props.top_k,
            },
        })
    }

    async fn palm_chat(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
        hook: &mut Hook<'_>,
    ) -> Result<()> {
        let body = PalmChatBody {
            prompt: PalmPrompt {
                messages: palm_messages(&props.messages),
            },
        };
        let response = transport
            .post_json(
                &self.chat_url(&props.model, false),
                &Headers::new(),
                &body,
                props.cancel(),
            )
            .await?;

        if !response.is_success() {
            if let Ok(envelope) = response.json::<GoogleErrorEnvelope>() {
                return Err(RelayError::upstream(PALM, envelope.error.message));
            }
            return Err(RelayError::Status {
                status: response.status,
                body: response.text(),
            });
        }

        let form: PalmChatResponse = response
            .json()
            .map_err(|_| RelayError::parse(PALM, "response"))?;
        let Some(candidate) = form.candidates.into_iter().next() else {
            return Err(RelayError::upstream(
                PALM,
                "the content violates content policy",
            ));
        };

        for item in split_keep_separator(&candidate.content, " ") {
            hook(Chunk::text(item))?;
        }
        Ok(())
    }

    /// Buffered `generateContent` call used when streaming is unavailable
    async fn gemini_complete(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
        body: &GeminiChatBody,
    ) -> Result<String> {
        let response = transport
            .post_json(
                &self.chat_url(&props.model, false),
                &Headers::new(),
                body,
                props.cancel(),
            )
            .await?;

        if let Ok(form) = response.json::<GeminiChatResponse>() {
            if let Some(text) = form.text() {
                return Ok(text.to_string());
            }
        }
        if let Ok(envelope) = response.json::<GoogleErrorEnvelope>() {
            return Err(envelope.into_error());
        }
        Err(RelayError::parse(GEMINI, "response"))
    }

    async fn gemini_stream(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
        hook: &mut Hook<'_>,
    ) -> Result<()> {
        let body = self.gemini_body(transport, props).await?;
        let response = transport
            .open_stream(
                &self.chat_url(&props.model, true),
                &Headers::new(),
                &body,
                props.cancel(),
            )
            .await?;

        let scanned = EventScanner::legacy(GEMINI)
            .scan(
                response,
                props.cancel(),
                |event: &SseEvent| decode_gemini_line(&event.data),
                &mut *hook,
            )
            .await;

        match scanned {
            Ok(summary) if summary.events == 0 => Err(RelayError::from("no response")),
            Ok(_) => Ok(()),
            Err(RelayError::Status { status: 404, .. }) => {
                debug!("gemini stream endpoint not found, downgrading to generateContent");
                let text = self.gemini_complete(transport, props, &body).await?;
                hook(Chunk::text(text))
            }
            Err(RelayError::Status { status, body: text }) => {
                if let Some(envelope) = GoogleErrorEnvelope::parse(&text) {
                    return Err(envelope.into_error());
                }
                if text.is_empty() {
                    return Err(RelayError::Status { status, body: text });
                }
                Err(RelayError::upstream(GEMINI, text))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl ChatFactory for GeminiInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;

        if models::is_imagen_model(&props.model) {
            return self.create_image(&transport, props, hook).await;
        }

        if props.model == models::CHAT_BISON_001 {
            return self.palm_chat(&transport, props, hook).await;
        }

        self.gemini_stream(&transport, props, hook).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Channel,
        services::test_support::{collector, context, joined, legacy_sse},
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn instance(server: &MockServer) -> GeminiInstance {
        let channel = Channel::new(4, "palm", server.uri(), "g-key");
        GeminiInstance::new(&channel, &context())
    }

    fn sse(body: String) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body)
    }

    #[test]
    fn test_palm_messages_merge_and_skip() {
        let mut tool = Message::new(Role::Tool, "result");
        tool.tool_call_id = Some("t1".into());
        let messages = vec![
            Message::user("hello"),
            Message::user("there"),
            Message::assistant(""),
            tool,
            Message::assistant("hi"),
        ];

        assert_eq!(
            palm_messages(&messages),
            vec![
                PalmMessage {
                    author: "user".into(),
                    content: "hello there".into()
                },
                PalmMessage {
                    author: "assistant".into(),
                    content: "hi".into()
                },
            ]
        );
    }

    #[test]
    fn test_decode_gemini_line() {
        let data = r#"{"candidates":[{"content":{"parts":[{"text":"Hi"}],"role":"model"}}]}"#;
        assert_eq!(decode_gemini_line(data).unwrap(), Decoded::text("Hi"));
        assert_eq!(decode_gemini_line(r#"{"candidates":[]}"#).unwrap(), Decoded::Ignored);

        let err = decode_gemini_line(
            r#"{"error":{"code":400,"message":"bad key","status":"INVALID_ARGUMENT"}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "gemini error: bad key (code: 400, status: INVALID_ARGUMENT)"
        );
    }

    #[tokio::test]
    async fn test_gemini_stream_merges_roles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-pro:streamGenerateContent"))
            .and(query_param("alt", "sse"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(json!({
                "contents": [
                    {"role": "user", "parts": [{"text": "be nice\n\nhello"}]},
                    {"role": "model", "parts": [{"text": "hi"}]},
                    {"role": "user", "parts": [{"text": "again"}]}
                ],
                "generationConfig": {"temperature": 0.5}
            })))
            .respond_with(sse(legacy_sse(&[
                r#"{"candidates":[{"content":{"parts":[{"text":"Hel"}]}}]}"#,
                r#"{"candidates":[{"content":{"parts":[{"text":"lo"}]}}]}"#,
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let mut props = ChatProps::new(
            "gemini-1.5-pro",
            vec![
                Message::system("be nice"),
                Message::user("hello"),
                Message::assistant("hi"),
                Message::user("again"),
            ],
        );
        props.temperature = Some(0.5);

        instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "Hello");
    }

    #[tokio::test]
    async fn test_gemini_404_downgrades_to_generate_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-pro:streamGenerateContent"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-pro:generateContent"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "buffered answer"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let props = ChatProps::new("gemini-pro", vec![Message::user("hi")]);

        instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "buffered answer");
        assert_eq!(chunks.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_gemini_empty_stream_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(sse(String::new()))
            .mount(&server)
            .await;

        let (_chunks, mut hook) = collector();
        let props = ChatProps::new("gemini-pro", vec![Message::user("hi")]);

        let err = instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no response");
    }

    #[tokio::test]
    async fn test_gemini_status_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
            })))
            .mount(&server)
            .await;

        let (_chunks, mut hook) = collector();
        let props = ChatProps::new("gemini-pro", vec![Message::user("hi")]);

        let err = instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "gemini error: API key not valid (code: 400, status: INVALID_ARGUMENT)"
        );
    }

    #[tokio::test]
    async fn test_palm_response_is_split_on_spaces() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta2/models/chat-bison-001:generateMessage"))
            .and(query_param("key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"author": "1", "content": "one two three"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let props = ChatProps::new("chat-bison-001", vec![Message::user("count")]);

        instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap();

        let contents: Vec<String> = chunks.lock().iter().map(|c| c.content.clone()).collect();
        assert_eq!(contents, vec!["one ", "two ", "three"]);
    }

    #[tokio::test]
    async fn test_palm_empty_candidates_is_policy_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let (_chunks, mut hook) = collector();
        let props = ChatProps::new("chat-bison-001", vec![Message::user("x")]);

        let err = instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "palm2 error: the content violates content policy"
        );
    }
}
