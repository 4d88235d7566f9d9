//! [`ObjectStore`] implementation backed by the AWS S3 SDK.

use std::time::Duration;

use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_types::byte_stream::ByteStream;

use crate::config::S3Config;
use crate::error::StorageError;
use crate::store::{ObjectStore, UploadedPart};

/// S3 (or S3-compatible) object store.
///
/// Cheap to clone; the underlying SDK client pools connections and is safe
/// to share across tasks.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// Build a client from [`S3Config`].
    ///
    /// Uses static credentials when configured, otherwise the default AWS
    /// provider chain. A custom endpoint switches to path-style addressing,
    /// which most S3-compatible servers require.
    pub async fn connect(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));

        if let Some((id, secret)) = config.static_credentials() {
            loader = loader.credentials_provider(Credentials::new(
                id,
                secret,
                None,
                None,
                "micrograph-static",
            ));
        }

        let sdk_config = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        tracing::info!(
            region = %config.region,
            endpoint = config.endpoint_url.as_deref().unwrap_or("aws"),
            "S3 object store configured",
        );

        Self::with_client(aws_sdk_s3::Client::from_conf(builder.build()))
    }

    /// Wrap an existing SDK client.
    pub fn with_client(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let size = bytes.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::request(bucket, key, DisplayErrorContext(e).to_string()))?;

        tracing::debug!(bucket, key, size, "Object uploaded");
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) => {
                let no_such_key = e
                    .as_service_error()
                    .is_some_and(|service| service.is_no_such_key())
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                if no_such_key {
                    return Err(StorageError::NotFound {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    });
                }
                return Err(StorageError::request(
                    bucket,
                    key,
                    DisplayErrorContext(e).to_string(),
                ));
            }
        };

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::request(bucket, key, e.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<String, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_content_type(content_type.map(str::to_string))
            .send()
            .await
            .map_err(|e| StorageError::request(bucket, key, DisplayErrorContext(e).to_string()))?;

        let upload_id = output.upload_id().ok_or_else(|| {
            StorageError::InvalidResponse(format!("no upload ID returned for s3://{bucket}/{key}"))
        })?;

        tracing::debug!(bucket, key, upload_id, "Multipart upload started");
        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        bytes: Vec<u8>,
    ) -> Result<UploadedPart, StorageError> {
        let size = bytes.len();
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::request(bucket, key, DisplayErrorContext(e).to_string()))?;

        let e_tag = output.e_tag().ok_or_else(|| {
            StorageError::InvalidResponse(format!(
                "no ETag returned for part {part_number} of s3://{bucket}/{key}"
            ))
        })?;

        tracing::debug!(bucket, key, part_number, size, "Multipart part uploaded");
        Ok(UploadedPart {
            part_number,
            e_tag: e_tag.to_string(),
        })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<(), StorageError> {
        let part_count = parts.len();
        let completed: Vec<CompletedPart> = parts
            .into_iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(p.e_tag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| StorageError::request(bucket, key, DisplayErrorContext(e).to_string()))?;

        tracing::debug!(bucket, key, part_count, "Multipart upload completed");
        Ok(())
    }

    async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| StorageError::request(bucket, key, DisplayErrorContext(e).to_string()))?;
        Ok(())
    }

    async fn presigned_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, StorageError> {
        let presign_config =
            PresigningConfig::expires_in(ttl).map_err(|e| StorageError::Presign(e.to_string()))?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presign_config)
            .await
            .map_err(|e| StorageError::Presign(DisplayErrorContext(e).to_string()))?;

        Ok(request.uri().to_string())
    }
}
