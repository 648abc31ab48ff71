//! Cloudflare Workers AI image adapter
//!
//! Only image models are served. Input images for img2img and inpainting
//! models come from the latest user turn (image first, then mask). Depending
//! on the model the upstream answers with JSON or with raw image bytes.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    codec::latest_user_prompt,
    images::{base64_image_markdown, extract_images, image_markdown, ImageRef},
    transport::{bearer, HttpTransport, RawResponse},
    ChatFactory, ChatProps, Hook, RelayContext,
};
use crate::{
    config::{models, models::CloudflareImageDefaults, ChannelConfig},
    error::{RelayError, Result},
    messages::Chunk,
};

const PROVIDER: &str = "cloudflare";

/// Text-to-image and img2img request
#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub guidance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub height: u32,
    pub width: u32,
    pub num_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_b64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_ip: String,
}

/// Inpainting request; image and mask are always sent as raw base64
#[derive(Debug, Clone, Serialize)]
pub struct InpaintingRequest {
    pub prompt: String,
    pub guidance: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub height: u32,
    pub width: u32,
    pub num_steps: u32,
    pub image_b64: String,
    pub mask_image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_ip: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ImageBody {
    Standard(ImageRequest),
    Inpainting(InpaintingRequest),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageResult {
    #[serde(default)]
    pub image: String,
}

/// JSON response envelope
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub result: Option<ImageResult>,
    #[serde(default)]
    pub errors: Vec<ApiError>,
}

/// What the prompt and its attachments resolve to
enum Prepared {
    Generate(ImageBody),
    /// Inpainting without a mask; the client has to draw one
    Canvas(String),
}

/// Fragment asking the client to draw an inpainting mask over `image`
#[must_use]
pub fn canvas_trigger(image: &str, model: &str, prompt: &str) -> String {
    let escape = |s: &str| s.replace('&', "&amp;").replace('"', "&quot;");
    format!(
        "Mark the area to repaint with the brush tool:\n\n{}\n\n<div class=\"inpainting-trigger\" data-image=\"{}\" data-model=\"{}\" data-prompt=\"{}\">\nClick to start marking\n</div>",
        image_markdown(&format!("data:image/png;base64,{image}")),
        escape(image),
        escape(model),
        escape(prompt),
    )
}

/// Extract the image payload from a response body
///
/// # Errors
///
/// Returns upstream errors from the JSON envelope, or an empty-response error
pub fn decode_image_response(response: &RawResponse) -> Result<String> {
    if response.body.is_empty() {
        return Err(RelayError::empty(PROVIDER));
    }

    if !response.is_json_object() {
        if !response.is_success() {
            return Err(RelayError::Status {
                status: response.status,
                body: response.text(),
            });
        }
        debug!("[cloudflare] binary image response, {} bytes", response.body.len());
        return Ok(STANDARD.encode(&response.body));
    }

    if let Ok(data) = response.json::<ImageResponse>() {
        if data.success {
            if let Some(result) = data.result.filter(|r| !r.image.is_empty()) {
                return Ok(result.image);
            }
        } else if let Some(error) = data.errors.into_iter().next() {
            return Err(RelayError::upstream(PROVIDER, error.message));
        }
    }

    Err(RelayError::upstream(PROVIDER, "unexpected JSON response format"))
}

/// Cloudflare Workers AI instance
pub struct CloudflareInstance {
    endpoint: String,
    token: String,
    ctx: RelayContext,
}

impl CloudflareInstance {
    /// Create a new Cloudflare instance from a channel
    #[must_use]
    pub fn new(conf: &dyn ChannelConfig, ctx: &RelayContext) -> Self {
        Self {
            endpoint: conf.endpoint().to_string(),
            token: conf.random_secret(),
            ctx: ctx.clone(),
        }
    }

    fn image_url(&self, model: &str) -> String {
        format!("{}/{model}", self.endpoint)
    }

    async fn prepare(&self, transport: &HttpTransport, props: &ChatProps) -> Result<Prepared> {
        let model = props.model.as_str();
        let raw_prompt = latest_user_prompt(&props.messages);
        if raw_prompt.is_empty() {
            return Err(RelayError::validation("empty prompt"));
        }

        let (content, images) = extract_images(raw_prompt);
        let prompt = content.trim().to_string();
        let inpainting = models::is_inpainting_model(model);
        let img2img = models::is_cloudflare_img2img_model(model);

        let mut input_image = None;
        let mut mask_image = None;

        if let Some(first) = images.first() {
            if !img2img {
                return Err(RelayError::validation(format!(
                    "model {model} does not accept image input, use an image-to-image model such as @cf/runwayml/stable-diffusion-v1-5-img2img"
                )));
            }

            let image = ImageRef::parse(first)?
                .raw_base64(transport, props.cancel())
                .await?;

            if inpainting {
                match images.get(1).filter(|second| *second != first) {
                    Some(second) => {
                        let mask = ImageRef::parse(second)?
                            .raw_base64(transport, props.cancel())
                            .await?;
                        mask_image = Some(mask);
                    }
                    None => {
                        debug!("[cloudflare] single image for inpainting, requesting a mask");
                        return Ok(Prepared::Canvas(canvas_trigger(&image, model, &prompt)));
                    }
                }
            }
            input_image = Some(image);
        } else if inpainting && img2img {
            return Err(RelayError::validation(format!(
                "inpainting model {model} requires an input image and mask, attach them to the message"
            )));
        } else if img2img {
            return Err(RelayError::validation(format!(
                "image-to-image model {model} requires an input image, attach one to the message"
            )));
        }

        let defaults = CloudflareImageDefaults::resolve(model, &prompt, input_image.is_some());
        let user_ip = props.ip.clone();

        let body = match (input_image, mask_image) {
            (Some(image_b64), Some(mask_image)) if inpainting => {
                ImageBody::Inpainting(InpaintingRequest {
                    prompt,
                    guidance: defaults.guidance,
                    seed: None,
                    height: defaults.height,
                    width: defaults.width,
                    num_steps: defaults.num_steps,
                    image_b64,
                    mask_image,
                    user: props.user.clone(),
                    user_ip,
                })
            }
            (image_b64, _) => ImageBody::Standard(ImageRequest {
                prompt,
                guidance: defaults.guidance,
                seed: None,
                height: defaults.height,
                width: defaults.width,
                num_steps: defaults.num_steps,
                image_b64,
                strength: defaults.strength,
                user: props.user.clone(),
                user_ip,
            }),
        };

        Ok(Prepared::Generate(body))
    }

    async fn create_image(&self, transport: &HttpTransport, props: &ChatProps) -> Result<String> {
        let body = match self.prepare(transport, props).await? {
            Prepared::Generate(body) => body,
            Prepared::Canvas(fragment) => return Ok(fragment),
        };

        let response = transport
            .post_json(
                &self.image_url(&props.model),
                &bearer(&self.token),
                &body,
                props.cancel(),
            )
            .await?;

        let data = decode_image_response(&response)?;
        if data.is_empty() {
            return Err(RelayError::upstream(PROVIDER, "no image generated"));
        }
        Ok(base64_image_markdown(&data))
    }
}

#[async_trait]
impl ChatFactory for CloudflareInstance {
    async fn create_stream_chat_request(&self, props: &ChatProps, hook: &mut Hook<'_>) -> Result<()> {
        if !models::is_cloudflare_image_model(&props.model) {
            return Err(RelayError::validation(
                "text chat is not supported by Cloudflare adapter yet, only image generation models are supported",
            ));
        }

        let transport = HttpTransport::new(props.proxy(), self.ctx.timeout)?;
        match self.create_image(&transport, props).await {
            Ok(content) => hook(Chunk::text(content)),
            Err(err) if err.is_policy_refusal() => hook(Chunk::text(err.to_string())),
            Err(err) => Err(err),
        }
    }
}
