//! OpenAI video jobs (`/v1/videos`)
//!
//! A job is submitted once, then polled until it completes, fails, or the
//! configured deadline passes. The final job descriptor is delivered to the
//! hook as a single JSON chunk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info};

use super::OpenAIInstance;
use crate::{
    error::{RelayError, Result},
    messages::Chunk,
    services::{transport::HttpTransport, Hook, VideoFactory, VideoProps},
};

const PROVIDER: &str = "openai video";

/// Request body for job submission
#[derive(Debug, Clone, Serialize)]
pub struct VideoRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_reference: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoJobError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Job descriptor returned by submission and polling
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoJob {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub seconds: String,
    #[serde(default)]
    pub size: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remixed_from_video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VideoJobError>,
}

impl VideoJob {
    fn error_message(&self) -> Option<&str> {
        self.error
            .as_ref()
            .map(|e| e.message.as_str())
            .filter(|m| !m.is_empty())
    }
}

fn deliver(job: &VideoJob, hook: &mut Hook<'_>) -> Result<()> {
    hook(Chunk::text(serde_json::to_string(job)?))
}

impl OpenAIInstance {
    async fn submit_video(&self, transport: &HttpTransport, props: &VideoProps) -> Result<VideoJob> {
        let body = VideoRequest {
            prompt: props.prompt.clone(),
            model: props.model.clone(),
            seconds: props.seconds.clone(),
            size: props.size.clone(),
            input_reference: props.input_reference.clone(),
        };

        let response = transport
            .post_json(
                &format!("{}/v1/videos", self.endpoint),
                &self.headers(),
                &body,
                &props.request.cancel,
            )
            .await
            .map_err(|e| match e {
                RelayError::Cancelled => e,
                other => RelayError::upstream(PROVIDER, other.to_string()),
            })?;

        if response.body.is_empty() {
            return Err(RelayError::upstream(PROVIDER, "empty response"));
        }

        let job: VideoJob = response
            .json()
            .map_err(|_| RelayError::upstream(PROVIDER, "cannot parse response"))?;

        if let Some(message) = job.error_message() {
            return Err(RelayError::upstream(PROVIDER, message));
        }
        if !response.is_success() {
            return Err(RelayError::Status {
                status: response.status,
                body: response.text(),
            });
        }

        info!("submitted video job {} ({})", job.id, job.status);
        Ok(job)
    }

    async fn fetch_video(
        &self,
        transport: &HttpTransport,
        id: &str,
        props: &VideoProps,
    ) -> Result<Option<VideoJob>> {
        let response = transport
            .get(
                &format!("{}/v1/videos/{id}", self.endpoint),
                &self.headers(),
                &props.request.cancel,
            )
            .await?;

        if !response.is_success() {
            debug!("video job {id} poll returned status {}", response.status);
            return Ok(None);
        }
        Ok(response.json().ok())
    }
}

#[async_trait]
impl VideoFactory for OpenAIInstance {
    async fn create_video_request(&self, props: &VideoProps, hook: &mut Hook<'_>) -> Result<()> {
        let transport = HttpTransport::new(&props.request.proxy, self.ctx.timeout)?;
        let cancel = &props.request.cancel;

        let mut job = self.submit_video(&transport, props).await?;

        let deadline = sleep(self.ctx.video_deadline);
        tokio::pin!(deadline);

        let mut ticker = interval(self.ctx.video_poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            match job.status.as_str() {
                "completed" => return deliver(&job, hook),
                "failed" => {
                    return Err(match job.error_message() {
                        Some(message) => {
                            RelayError::Other(format!("openai video job failed: {message}"))
                        }
                        None => RelayError::from("openai video job failed"),
                    });
                }
                _ => {}
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(RelayError::Cancelled),
                () = &mut deadline => return Err(RelayError::Timeout("openai video job".to_string())),
                _ = ticker.tick() => {
                    if job.id.is_empty() {
                        return deliver(&job, hook);
                    }
                    match self.fetch_video(&transport, &job.id, props).await {
                        Ok(Some(next)) => job = next,
                        Ok(None) => {}
                        Err(RelayError::Cancelled) => return Err(RelayError::Cancelled),
                        Err(e) => debug!("video job {} poll failed: {e}", job.id),
                    }
                }
            }
        }
    }
}
