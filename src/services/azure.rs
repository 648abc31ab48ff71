//! Azure OpenAI adapter
//!
//! Azure serves the OpenAI wire format from per-deployment URLs. The channel
//! secret is `key|api-version`; the deployment name is the model name with
//! dots removed (`gpt-3.5-turbo` -> `gpt-35-turbo`).

use super::{
    openai::{Flavor, OpenAIInstance},
    RelayContext,
};
use crate::config::ChannelConfig;

/// API version used when the secret does not name one
pub const DEFAULT_API_VERSION: &str = "2024-02-01";

/// Deployment name for a model
#[must_use]
pub fn deployment_name(model: &str) -> String {
    model.replace('.', "")
}

/// URL of an operation on a model's deployment
#[must_use]
pub fn deployment_url(endpoint: &str, model: &str, operation: &str, api_version: &str) -> String {
    format!(
        "{endpoint}/openai/deployments/{}/{operation}?api-version={api_version}",
        deployment_name(model)
    )
}

/// Create an Azure instance from a channel
#[must_use]
pub fn new_instance(conf: &dyn ChannelConfig, ctx: &RelayContext) -> OpenAIInstance {
    let mut parts = conf.split_random_secret(2).into_iter();
    let api_key = parts.next().unwrap_or_default();
    let api_version = parts
        .next()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_API_VERSION.to_string());

    OpenAIInstance::with_flavor(conf.endpoint(), api_key, Flavor::Azure { api_version }, ctx)
}
