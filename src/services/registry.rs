//! Channel dispatch
//!
//! Maps a channel's type identifier to a provider and runs one request through
//! a freshly built instance. Model remapping and proxy resolution happen here,
//! once per request, before the provider sees the props.

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::{debug, info};

use super::{
    anthropic::ClaudeInstance, azure, cloudflare::CloudflareInstance, coze::CozeInstance,
    deepseek::DeepSeekInstance, dify::DifyInstance, gemini::GeminiInstance,
    openai::OpenAIInstance, siliconflow::SiliconFlowInstance, skylark::SkylarkInstance,
    ChatFactory, ChatProps, Hook, RelayContext, VideoProps,
};
use crate::{
    config::ChannelConfig,
    error::{RelayError, Result},
};

/// Closed set of supported channel types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    OpenAi,
    Moonshot,
    Groq,
    Azure,
    Claude,
    Palm,
    DeepSeek,
    Skylark,
    Coze,
    Dify,
    Cloudflare,
    SiliconFlow,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel type {0}")]
pub struct UnknownChannelType(pub String);

impl ChannelType {
    pub const ALL: [Self; 12] = [
        Self::OpenAi,
        Self::Moonshot,
        Self::Groq,
        Self::Azure,
        Self::Claude,
        Self::Palm,
        Self::DeepSeek,
        Self::Skylark,
        Self::Coze,
        Self::Dify,
        Self::Cloudflare,
        Self::SiliconFlow,
    ];

    /// Type identifier as written in channel configs
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Moonshot => "moonshot",
            Self::Groq => "groq",
            Self::Azure => "azure",
            Self::Claude => "claude",
            Self::Palm => "palm",
            Self::DeepSeek => "deepseek",
            Self::Skylark => "skylark",
            Self::Coze => "coze",
            Self::Dify => "dify",
            Self::Cloudflare => "cloudflare",
            Self::SiliconFlow => "siliconflow",
        }
    }

    /// Resolve the type of a channel
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownChannel`] naming the channel
    pub fn of(conf: &dyn ChannelConfig) -> Result<Self> {
        conf.channel_type()
            .parse()
            .map_err(|UnknownChannelType(channel_type)| RelayError::UnknownChannel {
                id: conf.id(),
                channel_type,
            })
    }

    /// Build a fresh provider instance for a channel of this type
    #[must_use]
    pub fn instance(self, conf: &dyn ChannelConfig, ctx: &RelayContext) -> Box<dyn ChatFactory> {
        match self {
            Self::OpenAi | Self::Moonshot | Self::Groq => Box::new(OpenAIInstance::new(conf, ctx)),
            Self::Azure => Box::new(azure::new_instance(conf, ctx)),
            Self::Claude => Box::new(ClaudeInstance::new(conf, ctx)),
            Self::Palm => Box::new(GeminiInstance::new(conf, ctx)),
            Self::DeepSeek => Box::new(DeepSeekInstance::new(conf, ctx)),
            Self::Skylark => Box::new(SkylarkInstance::new(conf, ctx)),
            Self::Coze => Box::new(CozeInstance::new(conf, ctx)),
            Self::Dify => Box::new(DifyInstance::new(conf, ctx)),
            Self::Cloudflare => Box::new(CloudflareInstance::new(conf, ctx)),
            Self::SiliconFlow => Box::new(SiliconFlowInstance::new(conf, ctx)),
        }
    }
}

impl FromStr for ChannelType {
    type Err = UnknownChannelType;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownChannelType(s.to_string()))
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run a chat request on a channel
///
/// # Errors
///
/// Returns [`RelayError::UnknownChannel`] for unregistered types, otherwise the
/// provider's own error
pub async fn create_chat_request(
    ctx: &RelayContext,
    conf: &dyn ChannelConfig,
    props: &mut ChatProps,
    hook: &mut Hook<'_>,
) -> Result<()> {
    let channel_type = ChannelType::of(conf)?;
    props.model = conf.model_reflect(&props.original_model);
    props.request.proxy = conf.proxy();

    info!(
        channel = conf.id(),
        channel_type = %channel_type,
        model = %props.model,
        "dispatching chat request"
    );
    channel_type
        .instance(conf, ctx)
        .create_stream_chat_request(props, hook)
        .await
}

/// Run a video request on a channel whose provider has the video capability
///
/// # Errors
///
/// Returns [`RelayError::UnknownChannel`] for unregistered types,
/// [`RelayError::Unsupported`] when the provider cannot generate video, otherwise
/// the provider's own error
pub async fn create_video_request(
    ctx: &RelayContext,
    conf: &dyn ChannelConfig,
    props: &mut VideoProps,
    hook: &mut Hook<'_>,
) -> Result<()> {
    let channel_type = ChannelType::of(conf)?;
    props.model = conf.model_reflect(&props.original_model);
    props.request.proxy = conf.proxy();

    let instance = channel_type.instance(conf, ctx);
    let Some(video) = instance.as_video() else {
        debug!(channel = conf.id(), "video capability missing on {channel_type}");
        return Err(RelayError::Unsupported {
            capability: "video".to_string(),
            channel_type: channel_type.to_string(),
            id: conf.id(),
        });
    };

    info!(
        channel = conf.id(),
        channel_type = %channel_type,
        model = %props.model,
        "dispatching video request"
    );
    video.create_video_request(props, hook).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Channel,
        messages::Message,
        services::test_support::{collector, context, joined, legacy_sse},
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[test]
    fn test_channel_type_round_trip() {
        for channel_type in ChannelType::ALL {
            assert_eq!(channel_type.as_str().parse::<ChannelType>(), Ok(channel_type));
        }
        assert_eq!(
            "bing".parse::<ChannelType>(),
            Err(UnknownChannelType("bing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unknown_channel_type() {
        let channel = Channel::new(42, "slack", "http://localhost", "key");
        let (chunks, mut hook) = collector();
        let mut props = ChatProps::new("gpt-4", vec![Message::user("hi")]);

        let err = create_chat_request(&context(), &channel, &mut props, hook.as_mut())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "unknown channel type slack (channel #42)");
        assert!(chunks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_video_unsupported_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let channel = Channel::new(7, "claude", server.uri(), "sk-ant");
        let (chunks, mut hook) = collector();
        let mut props = VideoProps::new("sora-2", "a wave");

        let err = create_video_request(&context(), &channel, &mut props, hook.as_mut())
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "video request not supported by channel type claude (channel #7)"
        );
        assert!(chunks.lock().is_empty());
    }

    #[tokio::test]
    async fn test_mapper_is_applied_before_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(legacy_sse(&[
                        r#"{"choices":[{"index":0,"delta":{"content":"mapped"}}]}"#,
                    ])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let channel =
            Channel::new(1, "moonshot", server.uri(), "sk").with_mapper("cheap>gpt-4o-mini");
        let (chunks, mut hook) = collector();
        let mut props = ChatProps::new("cheap", vec![Message::user("hi")]);

        tokio_test::assert_ok!(
            create_chat_request(&context(), &channel, &mut props, hook.as_mut()).await
        );

        assert_eq!(props.model, "gpt-4o-mini");
        assert_eq!(props.original_model, "cheap");
        assert_eq!(joined(&chunks), "mapped");
    }
}
