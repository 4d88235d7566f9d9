use std::time::Duration;

use crate::error::StorageError;

/// S3 rejects non-final multipart parts smaller than 5 MiB.
pub const MIN_MULTIPART_PART_BYTES: usize = 5 * 1024 * 1024;

/// Receipt for one uploaded multipart part, needed to complete the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based part number.
    pub part_number: i32,
    pub e_tag: String,
}

/// Byte-blob storage addressed by bucket and key.
///
/// Implementations must be safe to call concurrently from many tasks; the
/// archive assembler issues up to its concurrency limit of `get` calls at
/// once against a single shared handle.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing object.
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Fetch a whole object. Absent objects yield [`StorageError::NotFound`].
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Begin a multipart upload and return its upload ID.
    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StorageError>;

    /// Upload one part. Part numbers start at 1 and must be increasing.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        bytes: Vec<u8>,
    ) -> Result<UploadedPart, StorageError>;

    /// Stitch all uploaded parts into a single object.
    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), StorageError>;

    /// Discard an unfinished multipart upload and its parts.
    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError>;

    /// Produce a time-limited GET link for an existing object.
    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError>;
}
