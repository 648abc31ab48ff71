//! Model family tables
//!
//! Every "is this model an X" decision the providers make is answered here, from
//! exact-name lists and prefix patterns.

/// OpenAI legacy completion models served from `/v1/completions`
pub const COMPLETION_MODELS: &[&str] = &["gpt-3.5-turbo-instruct", "davinci-002", "babbage-002"];

/// OpenAI image generation models
pub const DALLE_2: &str = "dall-e-2";
pub const DALLE_3: &str = "dall-e-3";
pub const GPT_IMAGE_1: &str = "gpt-image-1";

/// Google PaLM chat model
pub const CHAT_BISON_001: &str = "chat-bison-001";

/// Default video model
pub const SORA_2: &str = "sora-2";

/// Built-in vision model prefixes
const VISION_MODEL_PREFIXES: &[&str] = &[
    "gpt-4o",
    "gpt-4-turbo",
    "gpt-4-vision",
    "gpt-4.1",
    "gpt-4.5",
    "gpt-5",
    "chatgpt-4o",
    "o1",
    "o3",
    "o4-mini",
    "claude-3",
    "claude-sonnet-4",
    "claude-opus-4",
    "gemini-1.5",
    "gemini-2",
    "gemini-pro-vision",
    "qwen-vl",
    "glm-4v",
];

/// Cloudflare Workers AI text-to-image models
pub const CLOUDFLARE_IMAGE_MODELS: &[&str] = &[
    "@cf/black-forest-labs/flux-1-schnell",
    "@cf/bytedance/stable-diffusion-xl-lightning",
    "@cf/lykon/dreamshaper-8-lcm",
    "@cf/stabilityai/stable-diffusion-xl-base-1.0",
    "@cf/leonardo/phoenix-1.0",
    "@cf/leonardo/lucid-origin",
    "@cf/runwayml/stable-diffusion-v1-5-img2img",
    "@cf/runwayml/stable-diffusion-v1-5-inpainting",
];

/// Cloudflare models that take an input image
pub const CLOUDFLARE_IMG2IMG_MODELS: &[&str] = &[
    "@cf/runwayml/stable-diffusion-v1-5-img2img",
    "@cf/runwayml/stable-diffusion-v1-5-inpainting",
];

/// SiliconFlow image generation models
pub const SILICONFLOW_IMAGE_MODELS: &[&str] = &[
    "Kwai-Kolors/Kolors",
    "Qwen/Qwen-Image",
    "Qwen/Qwen-Image-Edit",
    "Qwen/Qwen-Image-Edit-2509",
    "black-forest-labs/FLUX.1-schnell",
    "black-forest-labs/FLUX.1-dev",
    "stabilityai/stable-diffusion-3-5-large",
];

/// SiliconFlow models that edit an input image
pub const SILICONFLOW_IMG2IMG_MODELS: &[&str] = &["Qwen/Qwen-Image-Edit", "Qwen/Qwen-Image-Edit-2509"];

/// Check if a model uses the legacy completion endpoint
#[must_use]
pub fn is_completion_model(model: &str) -> bool {
    COMPLETION_MODELS.contains(&model)
}

/// Check if a model is an OpenAI image generation model
#[must_use]
pub fn is_openai_image_model(model: &str) -> bool {
    matches!(model, DALLE_2 | DALLE_3 | GPT_IMAGE_1)
}

/// Check if a model accepts images, including operator-configured extras
#[must_use]
pub fn is_vision_model(model: &str, extra: &[String]) -> bool {
    extra.iter().any(|m| m == model)
        || VISION_MODEL_PREFIXES
            .iter()
            .any(|prefix| model.starts_with(prefix))
}

/// Check if a model is a Google Imagen model
#[must_use]
pub fn is_imagen_model(model: &str) -> bool {
    model.starts_with("imagen-")
}

/// Check if a model is served by Cloudflare image generation
#[must_use]
pub fn is_cloudflare_image_model(model: &str) -> bool {
    CLOUDFLARE_IMAGE_MODELS.contains(&model)
}

/// Check if a Cloudflare model requires an input image
#[must_use]
pub fn is_cloudflare_img2img_model(model: &str) -> bool {
    CLOUDFLARE_IMG2IMG_MODELS.contains(&model)
}

/// Check if a model is an inpainting model
#[must_use]
pub fn is_inpainting_model(model: &str) -> bool {
    model.to_lowercase().contains("inpainting")
}

/// Check if a model is served by SiliconFlow image generation
#[must_use]
pub fn is_siliconflow_image_model(model: &str) -> bool {
    SILICONFLOW_IMAGE_MODELS.contains(&model)
}

/// Check if a SiliconFlow model requires an input image
#[must_use]
pub fn is_siliconflow_img2img_model(model: &str) -> bool {
    SILICONFLOW_IMG2IMG_MODELS.contains(&model)
}

/// Check if a model takes `max_completion_tokens` instead of `max_tokens`
#[must_use]
pub fn uses_max_completion_tokens(model: &str) -> bool {
    ["o1", "o3", "o4", "gpt-5"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
}

/// Aspect hint found in a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeHint {
    Default,
    Larger,
    Landscape,
    Portrait,
}

const LARGER_HINTS: &[&str] = &["放大", "大图", "larger", "bigger"];
const LANDSCAPE_HINTS: &[&str] = &["宽屏", "横向", "landscape"];
const PORTRAIT_HINTS: &[&str] = &["竖屏", "纵向", "portrait"];
const QUALITY_HINTS: &[&str] = &["高质量", "细节"];

impl SizeHint {
    /// Detect the size hint in a prompt; later hints win over earlier ones
    #[must_use]
    pub fn detect(prompt: &str) -> Self {
        let lower = prompt.to_lowercase();
        let has = |hints: &[&str]| hints.iter().any(|h| lower.contains(h));

        if has(PORTRAIT_HINTS) {
            Self::Portrait
        } else if has(LANDSCAPE_HINTS) {
            Self::Landscape
        } else if has(LARGER_HINTS) {
            Self::Larger
        } else {
            Self::Default
        }
    }
}

/// Check if a prompt asks for extra quality or detail
#[must_use]
pub fn wants_quality(prompt: &str) -> bool {
    let lower = prompt.to_lowercase();
    QUALITY_HINTS.iter().any(|h| lower.contains(h))
}

/// Image generation parameters derived for one Cloudflare request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudflareImageDefaults {
    pub guidance: f32,
    pub num_steps: u32,
    pub height: u32,
    pub width: u32,
    /// `None` when the model does not take a strength
    pub strength: Option<f32>,
}

impl CloudflareImageDefaults {
    /// Derive parameters from the model family, the prompt and whether an input image is present
    #[must_use]
    pub fn resolve(model: &str, prompt: &str, has_image: bool) -> Self {
        let (height, width) = match SizeHint::detect(prompt) {
            SizeHint::Default => (1024, 1024),
            SizeHint::Larger => (1536, 1536),
            SizeHint::Landscape => (1024, 1536),
            SizeHint::Portrait => (1536, 1024),
        };

        let (mut guidance, mut num_steps) = (4.5, 20);
        if model.contains("flux") {
            guidance = 3.5;
            num_steps = 28;
        }
        if model.contains("dreamshaper") || model.contains("lcm") {
            guidance = 7.5;
            num_steps = 8;
        }

        let supports_strength = !(model.contains("flux")
            || model.contains("phoenix")
            || model.contains("lucid-origin"));
        let strength = if is_cloudflare_img2img_model(model) && is_inpainting_model(model) {
            0.85
        } else {
            0.75
        };
        let strength = (supports_strength && has_image).then_some(strength);

        Self {
            guidance,
            num_steps,
            height,
            width,
            strength,
        }
    }
}

/// Image generation parameters derived for one SiliconFlow request
#[derive(Debug, Clone, PartialEq)]
pub struct SiliconFlowImageDefaults {
    pub image_size: String,
    pub batch_size: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub cfg: Option<f32>,
}

impl SiliconFlowImageDefaults {
    /// Derive parameters from the model family and the prompt
    #[must_use]
    pub fn resolve(model: &str, prompt: &str) -> Self {
        let lower_model = model.to_lowercase();
        let quality = wants_quality(prompt);

        let cfg = lower_model.contains("qwen").then(|| {
            match (lower_model.contains("edit"), quality) {
                (true, false) => 4.0,
                (true, true) => 6.0,
                (false, false) => 7.5,
                (false, true) => 9.0,
            }
        });

        let (guidance_scale, num_inference_steps) = if lower_model.contains("kolors") {
            (5.0, 25)
        } else {
            (7.5, 20)
        };

        let image_size = match SizeHint::detect(prompt) {
            SizeHint::Landscape => "1280x960",
            SizeHint::Portrait => "960x1280",
            SizeHint::Default | SizeHint::Larger => "1024x1024",
        };

        Self {
            image_size: image_size.to_string(),
            batch_size: 1,
            num_inference_steps,
            guidance_scale,
            cfg,
        }
    }
}
