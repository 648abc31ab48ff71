//! OpenAI API adapter
//!
//! Supports:
//! - OpenAI official API (chat, legacy completions, image generation, video jobs)
//! - OpenAI-compatible endpoints registered under other channel types (Moonshot, Groq)
//! - Azure OpenAI deployments, which share the wire format but not the URLs or auth

pub mod chat;
pub mod image;
pub mod video;

use async_trait::async_trait;

use super::{
    azure,
    transport::{bearer, Headers, HttpTransport},
    ChatFactory, ChatProps, Hook, RelayContext, VideoFactory,
};
use crate::{
    config::{models, ChannelConfig},
    error::Result,
};

/// Which OpenAI-shaped upstream an instance talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flavor {
    /// `https://api.openai.com` and compatible hosts, Bearer auth
    OpenAi,
    /// Azure deployments, `api-key` header and an API version query
    Azure { api_version: String },
}

/// OpenAI chat instance
pub struct OpenAIInstance {
    endpoint: String,
    api_key: String,
    flavor: Flavor,
    ctx: RelayContext,
}

impl OpenAIInstance {
    /// Create a new OpenAI instance from a channel
    #[must_use]
    pub fn new(conf: &dyn ChannelConfig, ctx: &RelayContext) -> Self {
        Self::with_flavor(conf.endpoint(), conf.random_secret(), Flavor::OpenAi, ctx)
    }

    /// Create an instance for an explicit flavor
    #[must_use]
    pub fn with_flavor(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        flavor: Flavor,
        ctx: &RelayContext,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            flavor,
            ctx: ctx.clone(),
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Provider name used in error messages and metrics
    #[must_use]
    pub const fn provider(&self) -> &'static str {
        match self.flavor {
            Flavor::OpenAi => "openai",
            Flavor::Azure { .. } => "azure",
        }
    }

    pub(crate) fn headers(&self) -> Headers {
        match self.flavor {
            Flavor::OpenAi => bearer(&self.api_key),
            Flavor::Azure { .. } => vec![("api-key", self.api_key.clone())],
        }
    }

    /// URL for an operation path such as `chat/completions`
    pub(crate) fn url(&self, model: &str, operation: &str) -> String {
        match &self.flavor {
            Flavor::OpenAi => format!("{}/v1/{operation}", self.endpoint),
            Flavor::Azure { api_version } => {
                azure::deployment_url(&self.endpoint, model, operation, api_version)
            }
        }
    }

    pub(crate) fn transport(&self, props: &ChatProps) -> Result<HttpTransport> {
        HttpTransport::new(props.proxy(), self.ctx.timeout)
    }
}

#[async_trait]
impl ChatFactory for OpenAIInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        let transport = self.transport(props)?;

        if models::is_openai_image_model(&props.model) {
            return self.create_image(&transport, props, hook).await;
        }

        self.stream_chat(&transport, props, hook).await
    }

    fn as_video(&self) -> Option<&dyn VideoFactory> {
        match self.flavor {
            Flavor::OpenAi => Some(self),
            Flavor::Azure { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Channel, services::test_support::context};

    #[test]
    fn test_openai_urls_and_headers() {
        let channel = Channel::new(1, "openai", "https://api.openai.com/", "sk-test");
        let instance = OpenAIInstance::new(&channel, &context());

        assert_eq!(
            instance.url("gpt-4o", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            instance.headers(),
            vec![("Authorization", "Bearer sk-test".to_string())]
        );
        assert!(instance.as_video().is_some());
    }
}
