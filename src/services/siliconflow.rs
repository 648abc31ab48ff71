//! SiliconFlow image generation adapter
//!
//! `/images/generations` answers with short-lived image URLs; the first one is
//! downloaded and inlined as a data URI so the result outlives the upstream link.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    codec::latest_user_prompt,
    images::{extract_images, image_markdown, ImageRef},
    transport::{bearer, HttpTransport, RawResponse},
    ChatFactory, ChatProps, Hook, RelayContext,
};
use crate::{
    config::{models, models::SiliconFlowImageDefaults, ChannelConfig},
    error::{RelayError, Result},
    messages::Chunk,
};

const PROVIDER: &str = "siliconflow";

#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
    pub image_size: String,
    pub batch_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg: Option<f32>,
    /// Input image as a data URI, for edit models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_ip: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageUrl {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub images: Vec<ImageUrl>,
    /// OpenAI-style alias some deployments return
    #[serde(default)]
    pub data: Vec<ImageUrl>,
}

impl ImageResponse {
    fn first_url(self) -> Option<String> {
        self.images
            .into_iter()
            .chain(self.data)
            .map(|image| image.url)
            .find(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: Option<ErrorBody>,
    #[serde(default)]
    message: String,
}

impl ErrorEnvelope {
    fn message(self) -> Option<String> {
        self.error
            .map(|e| e.message)
            .filter(|m| !m.is_empty())
            .or_else(|| Some(self.message).filter(|m| !m.is_empty()))
    }
}

/// Pick the generated image URL out of a response
///
/// # Errors
///
/// Returns upstream errors for error envelopes and responses without images
pub fn decode_image_response(response: &RawResponse) -> Result<String> {
    if response.body.is_empty() {
        return Err(RelayError::empty(PROVIDER));
    }

    if !response.is_success() {
        if let Some(message) = response
            .json::<ErrorEnvelope>()
            .ok()
            .and_then(ErrorEnvelope::message)
        {
            return Err(RelayError::upstream(PROVIDER, message));
        }
        return Err(RelayError::Status {
            status: response.status,
            body: response.text(),
        });
    }

    let data: ImageResponse = response
        .json()
        .map_err(|_| RelayError::parse(PROVIDER, "response"))?;
    data.first_url()
        .ok_or_else(|| RelayError::upstream(PROVIDER, "no image generated"))
}

/// SiliconFlow image instance
pub struct SiliconFlowInstance {
    endpoint: String,
    token: String,
    ctx: RelayContext,
}

impl SiliconFlowInstance {
    /// Create a new SiliconFlow instance from a channel
    #[must_use]
    pub fn new(conf: &dyn ChannelConfig, ctx: &RelayContext) -> Self {
        Self {
            endpoint: conf.endpoint().to_string(),
            token: conf.random_secret(),
            ctx: ctx.clone(),
        }
    }

    async fn image_body(&self, transport: &HttpTransport, props: &ChatProps) -> Result<ImageRequest> {
        let model = props.model.as_str();
        let raw_prompt = latest_user_prompt(&props.messages);
        if raw_prompt.is_empty() {
            return Err(RelayError::validation("empty prompt"));
        }

        let (content, images) = extract_images(raw_prompt);
        let prompt = content.trim().to_string();
        let edit = models::is_siliconflow_img2img_model(model);

        let image = match images.first() {
            Some(source) if edit => Some(
                ImageRef::parse(source)?
                    .data_uri(transport, props.cancel())
                    .await?,
            ),
            Some(_) => {
                return Err(RelayError::validation(format!(
                    "model {model} does not accept image input, only text-to-image is supported"
                )))
            }
            None if edit => {
                return Err(RelayError::validation(format!(
                    "image editing model {model} requires an input image, attach one to the message"
                )))
            }
            None => None,
        };

        let defaults = SiliconFlowImageDefaults::resolve(model, &prompt);
        Ok(ImageRequest {
            model: model.to_string(),
            prompt,
            image_size: defaults.image_size,
            batch_size: defaults.batch_size,
            seed: None,
            num_inference_steps: defaults.num_inference_steps,
            guidance_scale: defaults.guidance_scale,
            cfg: defaults.cfg,
            image,
            user: props.user.clone(),
            user_ip: props.ip.clone(),
        })
    }

    async fn create_image(&self, transport: &HttpTransport, props: &ChatProps) -> Result<String> {
        let body = self.image_body(transport, props).await?;
        let response = transport
            .post_json(
                &format!("{}/images/generations", self.endpoint),
                &bearer(&self.token),
                &body,
                props.cancel(),
            )
            .await?;

        let url = decode_image_response(&response)?;
        let inline = ImageRef::Remote(url)
            .data_uri(transport, props.cancel())
            .await?;
        Ok(image_markdown(&inline))
    }
}

#[async_trait]
impl ChatFactory for SiliconFlowInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        if !models::is_siliconflow_image_model(&props.model) {
            return Err(RelayError::validation(format!(
                "model {} is not supported for image generation",
                props.model
            )));
        }

        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;
        match self.create_image(&transport, props).await {
            Ok(content) => hook(Chunk::text(content)),
            Err(err) if err.is_policy_refusal() => hook(Chunk::text(err.to_string())),
            Err(err) => Err(err),
        }
    }
}
