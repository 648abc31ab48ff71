//! Service layer for upstream LLM providers
//!
//! This module provides the provider adapters and the shared request model:
//! - OpenAI (and the Moonshot/Groq aliases), Azure OpenAI
//! - Anthropic Claude
//! - Google PaLM / Gemini / Imagen
//! - DeepSeek, Volcengine Skylark, Coze, Dify
//! - Cloudflare Workers AI and SiliconFlow image generation

pub mod anthropic;
pub mod azure;
pub mod cloudflare;
pub mod codec;
pub mod coze;
pub mod deepseek;
pub mod dify;
pub mod gemini;
pub mod images;
pub mod openai;
pub mod registry;
pub mod siliconflow;
pub mod skylark;
pub mod streaming;
pub mod transport;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub use self::registry::{create_chat_request, create_video_request, ChannelType};
use self::images::ImageRef;
use crate::{
    config::{models, ProxyConfig, RelaySettings},
    error::Result,
    messages::{Chunk, FunctionTool, Message},
};

/// Sequential consumer of normalized chunks.
///
/// Returning an error aborts the request and the error is propagated unchanged.
/// The hook may borrow caller state for `'a`.
pub type Hook<'a> = dyn FnMut(Chunk) -> Result<()> + Send + 'a;

/// Relay-wide runtime knobs shared by every provider instance
#[derive(Debug, Clone)]
pub struct RelayContext {
    pub timeout: Duration,
    pub vision_models: Vec<String>,
    pub treat_all_as_vision: bool,
    pub video_poll_interval: Duration,
    pub video_deadline: Duration,
}

impl Default for RelayContext {
    fn default() -> Self {
        Self::from(&RelaySettings::default())
    }
}

impl From<&RelaySettings> for RelayContext {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            timeout: settings.max_timeout(),
            vision_models: settings.vision_models.clone(),
            treat_all_as_vision: settings.treat_all_as_vision,
            video_poll_interval: settings.video.poll_interval(),
            video_deadline: settings.video.deadline(),
        }
    }
}

impl RelayContext {
    /// Check if a model should receive structured image content
    #[must_use]
    pub fn is_vision_model(&self, model: &str) -> bool {
        self.treat_all_as_vision || models::is_vision_model(model, &self.vision_models)
    }
}

/// Properties shared by every request kind
#[derive(Debug, Clone, Default)]
pub struct RequestProps {
    pub max_retries: Option<u32>,
    pub current: u32,
    pub group: String,
    /// Resolved from the channel by the registry
    pub proxy: ProxyConfig,
    pub cancel: CancellationToken,
}

/// A normalized chat request
#[derive(Debug, Clone, Default)]
pub struct ChatProps {
    pub request: RequestProps,

    /// Upstream model name, resolved by the registry
    pub model: String,
    /// Caller-facing model name
    pub original_model: String,

    pub messages: Vec<Message>,
    pub max_tokens: Option<i32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub repetition_penalty: Option<f32>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    pub tools: Option<Vec<FunctionTool>>,
    pub tool_choice: Option<serde_json::Value>,
    pub buffer: Option<Arc<UsageBuffer>>,
    pub user: Option<serde_json::Value>,
    pub ip: String,
}

impl ChatProps {
    /// Create chat props for a model and message list
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        let model = model.into();
        Self {
            original_model: model.clone(),
            model,
            messages,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn cancel(&self) -> &CancellationToken {
        &self.request.cancel
    }

    #[must_use]
    pub fn proxy(&self) -> &ProxyConfig {
        &self.request.proxy
    }

    /// Record a resolved image on the usage buffer, if one is attached
    pub fn record_image(&self, image: &ImageRef) {
        if let Some(buffer) = &self.buffer {
            buffer.add_image(image.clone());
        }
    }
}

/// A normalized video generation request
#[derive(Debug, Clone, Default)]
pub struct VideoProps {
    pub request: RequestProps,

    pub model: String,
    pub original_model: String,

    pub prompt: String,
    pub seconds: Option<String>,
    pub size: Option<String>,
    pub input_reference: Option<String>,

    pub user: String,
}

impl VideoProps {
    /// Create video props for a model and prompt
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            original_model: model.clone(),
            model,
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Passive recipient of resolved image attachments, used for usage accounting
#[derive(Debug, Default)]
pub struct UsageBuffer {
    images: Mutex<Vec<ImageRef>>,
}

impl UsageBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_image(&self, image: ImageRef) {
        self.images.lock().push(image);
    }

    /// Snapshot of the recorded images
    #[must_use]
    pub fn images(&self) -> Vec<ImageRef> {
        self.images.lock().clone()
    }
}

/// A provider chat instance.
///
/// Instances are immutable and built fresh for every request; all per-call parse
/// state lives inside the call.
#[async_trait]
pub trait ChatFactory: Send + Sync {
    /// Run a chat request, delivering chunks to `hook` in order
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()>;

    /// Video capability, if the provider has one
    fn as_video(&self) -> Option<&dyn VideoFactory> {
        None
    }
}

/// Optional video generation capability
#[async_trait]
pub trait VideoFactory: Send + Sync {
    /// Submit a video job and deliver its final descriptor to `hook`
    async fn create_video_request(&self, props: &VideoProps, hook: &mut Hook<'_>) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Helpers shared by provider tests

    use super::*;

    /// Collects chunks into a vector
    pub fn collector() -> (Arc<Mutex<Vec<Chunk>>>, Box<Hook<'static>>) {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&chunks);
        let hook: Box<Hook<'static>> = Box::new(move |chunk: Chunk| -> Result<()> {
            sink.lock().push(chunk);
            Ok(())
        });
        (chunks, hook)
    }

    /// Concatenated content of collected chunks
    pub fn joined(chunks: &Arc<Mutex<Vec<Chunk>>>) -> String {
        chunks.lock().iter().map(|c| c.content.as_str()).collect()
    }

    /// SSE body of `data:` lines followed by `[DONE]`
    pub fn legacy_sse(payloads: &[&str]) -> String {
        let mut body = String::new();
        for payload in payloads {
            body.push_str("data: ");
            body.push_str(payload);
            body.push_str("\n\n");
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    pub fn context() -> RelayContext {
        RelayContext {
            timeout: Duration::from_secs(10),
            vision_models: Vec::new(),
            treat_all_as_vision: false,
            video_poll_interval: Duration::from_millis(20),
            video_deadline: Duration::from_secs(5),
        }
    }
}
