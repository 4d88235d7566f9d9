//! REST API client for the serverless inference endpoint.
//!
//! Wraps the job submission (`POST /run`) and status (`GET /status/{id}`)
//! endpoints using [`reqwest`].

use crate::client::InferenceClient;
use crate::config::RunPodConfig;
use crate::messages::{self, InferenceInput, JobStatusResponse, RunRequest, SubmitResponse};

/// HTTP client for a single serverless endpoint.
pub struct RunPodApi {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

/// Errors from the inference REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum RunPodApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The endpoint returned a non-2xx status code.
    #[error("Inference API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The body was not a recognizable status document.
    #[error("Malformed inference API response: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl RunPodApi {
    /// Create a client from [`RunPodConfig`], applying its request timeout.
    pub fn new(config: &RunPodConfig) -> Result<Self, RunPodApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(
            client,
            config.api_url.clone(),
            config.api_key.clone(),
        ))
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`RunPodApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, RunPodApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(RunPodApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RunPodApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl InferenceClient for RunPodApi {
    async fn submit(&self, input: &InferenceInput) -> Result<SubmitResponse, RunPodApiError> {
        let response = self
            .client
            .post(format!("{}/run", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&RunRequest { input })
            .send()
            .await?;

        let submitted: SubmitResponse = Self::parse_response(response).await?;
        tracing::debug!(
            job_id = %submitted.id,
            input = %input.s3_input_file_path,
            "Inference job submitted",
        );
        Ok(submitted)
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatusResponse, RunPodApiError> {
        let response = self
            .client
            .get(format!("{}/status/{}", self.api_url, job_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let text = Self::ensure_success(response).await?.text().await?;
        Ok(messages::parse_status(&text)?)
    }
}
