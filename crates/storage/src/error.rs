/// Errors from the object store layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested object does not exist.
    #[error("Object not found: s3://{bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// The request failed (network, credentials, service error).
    #[error("Object store request failed for s3://{bucket}/{key}: {message}")]
    Request {
        bucket: String,
        key: String,
        message: String,
    },

    /// The service answered but the response is unusable.
    #[error("Invalid object store response: {0}")]
    InvalidResponse(String),

    /// Building a presigned link failed.
    #[error("Failed to presign URL: {0}")]
    Presign(String),
}

impl StorageError {
    /// True when the failure means the object is absent rather than unreachable.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn request(bucket: &str, key: &str, message: impl Into<String>) -> Self {
        Self::Request {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message: message.into(),
        }
    }
}
