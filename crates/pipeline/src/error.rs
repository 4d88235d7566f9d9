use std::time::Duration;

use micrograph_core::error::CoreError;
use micrograph_core::types::GroupId;
use micrograph_runpod::RunPodApiError;
use micrograph_storage::StorageError;

/// Errors surfaced to the caller of a submission. Nothing is persisted when
/// any of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    /// The request was rejected before any upload.
    #[error(transparent)]
    Invalid(#[from] CoreError),

    #[error("Failed to upload input {key}: {source}")]
    Upload { key: String, source: StorageError },

    #[error("Failed to submit analysis job for file {file_id}: {source}")]
    Submit {
        file_id: String,
        source: RunPodApiError,
    },

    #[error("Failed to persist experiment group: {0}")]
    Persist(#[from] sqlx::Error),
}

/// Failures that abort archive assembly. Missing artifacts are not errors.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Not a single expected artifact could be fetched.
    #[error("No artifacts available for experiment group {group_id}")]
    Empty { group_id: GroupId },

    #[error("Archive write failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive write failed: {0}")]
    Io(#[from] std::io::Error),

    /// Uploading or publishing the archive object failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Artifact fetch task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Artifact fetch limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),

    #[error("Archive assembly for experiment group {group_id} exceeded {timeout:?}")]
    Timeout { group_id: GroupId, timeout: Duration },
}

/// Errors from owner-facing reads.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Experiment group {0} not found")]
    NotFound(GroupId),

    /// The group exists but its archive has not been published yet.
    #[error("Archive for experiment group {0} is not ready yet")]
    NotReady(GroupId),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
