//! Inference provider request and response payloads.
//!
//! Status responses have the shape `{"id": "...", "status": "<STATE>", ...}`
//! where the remaining fields depend on the state. [`JobState`] is tagged by
//! `status` so each variant carries only the fields that state reports.

use serde::{Deserialize, Serialize};

/// Ray count the segmentation model is run with.
pub const DEFAULT_N_RAYS: u32 = 32;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Parameters for one analysis job.
///
/// All paths are object keys; the worker reads the input from the input
/// bucket and writes every output to the output bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceInput {
    pub s3_input_bucket_name: String,
    pub s3_input_file_path: String,
    pub s3_output_bucket_name: String,
    pub s3_output_mask_file_path: String,
    pub s3_output_results_file_path: String,
    pub s3_output_table_file_path: String,
    pub n_rays: u32,
    pub microns_per_pixel: f64,
}

/// Envelope the provider expects around job input.
#[derive(Debug, Serialize)]
pub(crate) struct RunRequest<'a> {
    pub input: &'a InferenceInput,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Response to a job submission.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Provider-assigned job handle.
    pub id: String,
}

/// Provider-reported job state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, waiting for a worker.
    InQueue,

    /// Running on a worker.
    InProgress {
        #[serde(rename = "delayTime", default)]
        delay_time: Option<i64>,
        #[serde(rename = "workerId", default)]
        worker_id: Option<String>,
    },

    /// Finished successfully. `execution_time` is in milliseconds.
    Completed {
        #[serde(rename = "delayTime", default)]
        delay_time: Option<i64>,
        #[serde(rename = "executionTime", default)]
        execution_time: Option<u64>,
        #[serde(rename = "workerId", default)]
        worker_id: Option<String>,
    },

    /// The job failed on the provider side.
    Failed {
        #[serde(default)]
        error: Option<serde_json::Value>,
    },

    /// Any other status (`CANCELLED`, `TIMED_OUT`, ...).
    #[serde(other)]
    Unrecognized,
}

/// Completion data for a successfully finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub execution_time_millis: u64,
}

impl JobState {
    /// Completion data, present only for `COMPLETED` responses that carry
    /// an execution time.
    pub fn completion(&self) -> Option<Completion> {
        match self {
            Self::Completed {
                execution_time: Some(ms),
                ..
            } => Some(Completion {
                execution_time_millis: *ms,
            }),
            _ => None,
        }
    }
}

/// Parsed status response.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusResponse {
    pub id: String,
    /// The `status` string exactly as reported, kept for logging.
    pub raw_status: String,
    pub state: JobState,
}

#[derive(Deserialize)]
struct StatusEnvelope {
    #[serde(default)]
    id: String,
    status: String,
}

/// Parse a status response body.
///
/// Returns `Err` for malformed JSON or a missing `status` field. Unknown
/// status values parse successfully as [`JobState::Unrecognized`].
pub fn parse_status(text: &str) -> Result<JobStatusResponse, serde_json::Error> {
    let envelope: StatusEnvelope = serde_json::from_str(text)?;
    let state: JobState = serde_json::from_str(text)?;
    Ok(JobStatusResponse {
        id: envelope.id,
        raw_status: envelope.status,
        state,
    })
}
