//! Imagen image generation through `:predict`

use serde::{Deserialize, Serialize};

use super::{GeminiInstance, GoogleErrorEnvelope, GEMINI};
use crate::{
    error::{RelayError, Result},
    messages::Chunk,
    services::{
        codec::last_message_content,
        images::base64_image_markdown,
        transport::{Headers, HttpTransport},
        ChatProps, Hook,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct ImageInstance {
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageParameters {
    pub sample_count: u32,
    pub aspect_ratio: &'static str,
    pub person_generation: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageRequest {
    pub instances: Vec<ImageInstance>,
    pub parameters: ImageParameters,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImagePrediction {
    #[serde(default)]
    pub bytes_base64_encoded: String,
    #[serde(default)]
    pub mime_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImageResponse {
    #[serde(default)]
    pub predictions: Vec<ImagePrediction>,
}

impl GeminiInstance {
    fn image_url(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:predict?key={}",
            self.endpoint, self.api_key
        )
    }

    async fn request_image(&self, transport: &HttpTransport, props: &ChatProps) -> Result<String> {
        let body = ImageRequest {
            instances: vec![ImageInstance {
                prompt: last_message_content(&props.messages).to_string(),
            }],
            parameters: ImageParameters {
                sample_count: 1,
                aspect_ratio: "1:1",
                person_generation: "allow_adult",
            },
        };

        let response = transport
            .post_json(&self.image_url(&props.model), &Headers::new(), &body, props.cancel())
            .await?;

        if !response.is_success() {
            if let Ok(envelope) = response.json::<GoogleErrorEnvelope>() {
                return Err(RelayError::upstream(GEMINI, envelope.error.message));
            }
            return Err(RelayError::Status {
                status: response.status,
                body: response.text(),
            });
        }

        let data: ImageResponse = response
            .json()
            .map_err(|_| RelayError::parse(GEMINI, "response"))?;

        data.predictions
            .into_iter()
            .next()
            .map(|p| p.bytes_base64_encoded)
            .filter(|b64| !b64.is_empty())
            .ok_or_else(|| RelayError::upstream(GEMINI, "no image generated"))
    }

    /// Generate an image and deliver it as one markdown chunk
    pub(crate) async fn create_image(
        &self,
        transport: &HttpTransport,
        props: &ChatProps,
        hook: &mut Hook<'_>,
    ) -> Result<()> {
        match self.request_image(transport, props).await {
            Ok(data) => hook(Chunk::text(base64_image_markdown(&data))),
            Err(err) if err.is_policy_refusal() => hook(Chunk::text(err.to_string())),
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
        matchers::{body_json, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn instance(server: &MockServer) -> GeminiInstance {
        let channel = Channel::new(4, "palm", server.uri(), "g-key");
        GeminiInstance::new(&channel, &context())
    }

    #[tokio::test]
    async fn test_imagen_predict() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/imagen-3.0-generate-002:predict"))
            .and(query_param("key", "g-key"))
            .and(body_json(json!({
                "instances": [{"prompt": "a lighthouse"}],
                "parameters": {"sampleCount": 1, "aspectRatio": "1:1", "personGeneration": "allow_adult"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "predictions": [{"bytesBase64Encoded": "aW1n", "mimeType": "image/png"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let props = ChatProps::new("imagen-3.0-generate-002", vec![Message::user("a lighthouse")]);

        instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap();

        assert_eq!(joined(&chunks), "![image](data:image/png;base64,aW1n)");
    }

    #[tokio::test]
    async fn test_imagen_no_predictions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let (chunks, mut hook) = collector();
        let props = ChatProps::new("imagen-3.0-generate-002", vec![Message::user("x")]);

        let err = instance(&server)
            .create_stream_chat_request(&props, hook.as_mut())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "gemini error: no image generated");
        assert!(chunks.lock().is_empty());
    }
}
