use crate::api::RunPodApiError;
use crate::messages::{InferenceInput, JobStatusResponse, SubmitResponse};

/// Submits analysis jobs and reports their state.
///
/// The pipeline holds this as `Arc<dyn InferenceClient>` so tests can
/// script job outcomes without a network.
#[async_trait::async_trait]
pub trait InferenceClient: Send + Sync {
    /// Queue a job and return its provider-assigned handle.
    async fn submit(&self, input: &InferenceInput) -> Result<SubmitResponse, RunPodApiError>;

    /// Fetch the current state of a job.
    async fn poll(&self, job_id: &str) -> Result<JobStatusResponse, RunPodApiError>;
}
