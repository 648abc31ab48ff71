//! OpenAI image generation (`dall-e-2`, `dall-e-3`, `gpt-image-1`)

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::OpenAIInstance;
use crate::{
    config::models::{DALLE_3, GPT_IMAGE_1},
    error::{RelayError, Result},
    messages::Chunk,
    services::{
        codec::latest_user_prompt,
        images::{base64_image_markdown, image_markdown},
        transport::HttpTransport,
        ChatProps, Hook,
    },
};

/// Request body for `/images/generations`
#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub size: &'static str,
    pub n: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub b64_json: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageError {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub data: Vec<ImageData>,
    #[serde(default)]
    pub error: Option<ImageError>,
}

/// A generated image, either hosted or inline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedImage {
    Url(String),
    Base64(String),
}

impl GeneratedImage {
    #[must_use]
    pub fn markdown(&self) -> String {
        match self {
            Self::Url(url) => image_markdown(url),
            Self::Base64(data) => base64_image_markdown(data),
        }
    }
}

/// Output size accepted by the model
#[must_use]
pub fn image_size(model: &str) -> &'static str {
    if model == DALLE_3 || model == GPT_IMAGE_1 {
        "1024x1024"
    } else {
        "512x512"
    }
}

impl OpenAIInstance {
    async fn request_image(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
    ) -> Result<GeneratedImage> {
        let provider = self.provider();
        let body = ImageRequest {
            model: props.model.clone(),
            prompt: latest_user_prompt(&props.messages).to_string(),
            size: image_size(&props.model),
            n: 1,
        };

        let response = transport
            .post_json(
                &self.url(&props.model, "images/generations"),
                &self.headers(),
                &body,
                props.cancel(),
            )
            .await?;

        let Ok(data) = response.json::<ImageResponse>() else {
            if !response.is_success() {
                return Err(RelayError::Status {
                    status: response.status,
                    body: response.text(),
                });
            }
            return Err(RelayError::parse(provider, "response"));
        };

        if let Some(error) = data.error.filter(|e| !e.message.is_empty()) {
            return Err(RelayError::upstream(provider, error.message));
        }

        let first = data
            .data
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::empty(provider))?;

        if props.model == GPT_IMAGE_1 && !first.b64_json.is_empty() {
            return Ok(GeneratedImage::Base64(first.b64_json));
        }
        if first.url.is_empty() && !first.b64_json.is_empty() {
            return Ok(GeneratedImage::Base64(first.b64_json));
        }
        Ok(GeneratedImage::Url(first.url))
    }

    /// Generate an image and deliver it as one markdown chunk.
    ///
    /// Safety refusals are delivered as content instead of failing the request.
    pub(crate) async fn create_image(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
        hook: &mut Hook<'_>,
    ) -> Result<()> {
        match self.request_image(transport, props).await {
            Ok(image) => hook(Chunk::text(image.markdown())),
            Err(err) if err.is_policy_refusal() => {
                debug!("image request refused: {err}");
                hook(Chunk::text(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Channel,
        messages::Message,
        services::{
            test_support::{collector, context, joined},
            ChatFactory,
        },
    };
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn instance(server: &MockServer) -> OpenAIInstance {
        let channel = Channel::new(1, "openai", server.uri(), "sk-test");
        OpenAIInstance::new(&channel, &context())
    }

    #[tokio::test]
    async fn test_dalle3_returns_markdown_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .and(body_partial_json(
                json!({"model": "dall-e-3", "prompt": "a red fox", "size": "1024x1024", "n": 1}),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"data": [{"url": "https://img.example/fox.png"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let props = ChatProps::new("dall-e-3", vec![Message::user("a red fox")]);
        instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "![image](https://img.example/fox.png)");
    }

    #[tokio::test]
    async fn test_gpt_image_prefers_base64() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"data": [{"url": "https://img.example/x.png", "b64_json": "aGVsbG8="}]}),
            ))
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let props = ChatProps::new("gpt-image-1", vec![Message::user("hello")]);
        instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "![image](data:image/png;base64,aGVsbG8=)");
    }

    #[tokio::test]
    async fn test_safety_refusal_becomes_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images/generations"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"message": "Your request was rejected by our safety system"}
            })))
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let props = ChatProps::new("dall-e-2", vec![Message::user("something")]);
        instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap();

        assert!(joined(&chunks).contains("safety system"));
    }

    #[test]
    fn test_image_size() {
        assert_eq!(image_size("dall-e-3"), "1024x1024");
        assert_eq!(image_size("gpt-image-1"), "1024x1024");
        assert_eq!(image_size("dall-e-2"), "512x512");
    }
}
