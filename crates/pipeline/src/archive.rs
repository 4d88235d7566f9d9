//! Packaging a finished group's outputs into one downloadable zip.
//!
//! Artifacts are fetched concurrently (bounded by a semaphore) and written
//! into a streaming zip as they arrive. Whenever the buffered output
//! reaches the chunk threshold it is shipped as the next multipart part, so
//! memory stays bounded for large groups. Small archives go up in a single
//! put.

use std::io::Write;
use std::sync::{Arc, PoisonError};

use micrograph_core::artifacts::{ExpectedArtifact, StorageLayout};
use micrograph_core::experiment::ExperimentGroup;
use micrograph_storage::{ObjectStore, StorageError, UploadedPart};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use zip::write::{SimpleFileOptions, StreamWriter};
use zip::{CompressionMethod, ZipWriter};

use crate::config::ArchiveSettings;
use crate::error::ArchiveError;

const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Result of a successful assembly.
#[derive(Debug, Clone)]
pub struct PublishedArchive {
    /// Object key of the archive in the output bucket.
    pub key: String,
    /// Time-limited download link.
    pub url: String,
    /// Entry names written, in completion order.
    pub included: Vec<String>,
    /// Keys of expected artifacts that could not be fetched.
    pub missing: Vec<String>,
}

/// Fetches a group's artifacts and publishes them as a zip.
#[derive(Clone)]
pub struct ArchiveAssembler {
    objects: Arc<dyn ObjectStore>,
    bucket: String,
    layout: StorageLayout,
    settings: ArchiveSettings,
}

impl ArchiveAssembler {
    /// `bucket` holds both the artifacts and the published archive.
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        bucket: String,
        layout: StorageLayout,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            objects,
            bucket,
            layout,
            settings,
        }
    }

    /// Build, upload, and link the archive for `group`.
    ///
    /// Missing artifacts are skipped. Fails if nothing at all could be
    /// fetched, if writing or uploading the archive fails, or if the whole
    /// assembly exceeds the configured timeout. On failure any started
    /// multipart upload is aborted and no link is produced.
    pub async fn assemble(&self, group: &ExperimentGroup) -> Result<PublishedArchive, ArchiveError> {
        let key = self.layout.archive_key(group.id);
        let sink = Arc::new(Mutex::new(ArchiveSink::new(self.bucket.clone(), key.clone())));

        let outcome = match tokio::time::timeout(
            self.settings.timeout,
            self.build(group, Arc::clone(&sink)),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ArchiveError::Timeout {
                group_id: group.id,
                timeout: self.settings.timeout,
            }),
        };

        let (included, missing) = match outcome {
            Ok(lists) => lists,
            Err(e) => {
                sink.lock().await.abort(self.objects.as_ref()).await;
                return Err(e);
            }
        };

        let url = self
            .objects
            .presigned_get(&self.bucket, &key, self.settings.link_ttl)
            .await?;

        tracing::info!(
            group_id = %group.id,
            key = %key,
            included = included.len(),
            missing = missing.len(),
            "Archive published",
        );

        Ok(PublishedArchive {
            key,
            url,
            included,
            missing,
        })
    }

    /// Fetch everything into `sink` and store the finished object.
    async fn build(
        &self,
        group: &ExperimentGroup,
        sink: Arc<Mutex<ArchiveSink>>,
    ) -> Result<(Vec<String>, Vec<String>), ArchiveError> {
        let expected: Vec<ExpectedArtifact> = group
            .members
            .iter()
            .flat_map(|m| self.layout.expected_artifacts(&m.file_id))
            .collect();

        tracing::debug!(
            group_id = %group.id,
            artifacts = expected.len(),
            concurrency = self.settings.fetch_concurrency,
            "Assembling archive",
        );

        let limiter = Arc::new(Semaphore::new(self.settings.fetch_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for artifact in expected {
            let objects = Arc::clone(&self.objects);
            let limiter = Arc::clone(&limiter);
            let sink = Arc::clone(&sink);
            let bucket = self.bucket.clone();
            let chunk_bytes = self.settings.chunk_bytes;
            let group_id = group.id;

            tasks.spawn(async move {
                let fetched = {
                    let _permit = limiter.acquire_owned().await?;
                    objects.get(&bucket, &artifact.key).await
                };

                let mut sink = sink.lock().await;
                match fetched {
                    Ok(bytes) => {
                        sink.add_entry(&artifact.entry_name, &bytes)?;
                        sink.ship_full_chunk(&objects, chunk_bytes).await?;
                    }
                    Err(e) => {
                        if e.is_not_found() {
                            tracing::warn!(
                                group_id = %group_id,
                                key = %artifact.key,
                                "Artifact missing, omitting from archive",
                            );
                        } else {
                            tracing::warn!(
                                group_id = %group_id,
                                key = %artifact.key,
                                error = %e,
                                "Artifact fetch failed, omitting from archive",
                            );
                        }
                        sink.missing.push(artifact.key);
                    }
                }
                Ok::<(), ArchiveError>(())
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(ArchiveError::from).and_then(|r| r);
            if let Err(e) = result {
                if first_error.is_none() {
                    tasks.abort_all();
                    first_error = Some(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut sink = sink.lock().await;
        if sink.included.is_empty() {
            return Err(ArchiveError::Empty { group_id: group.id });
        }
        sink.finish(&self.objects).await?;

        Ok((sink.included.clone(), sink.missing.clone()))
    }
}

// ---------------------------------------------------------------------------
// Archive sink
// ---------------------------------------------------------------------------

/// Byte buffer the zip writer appends to and the sink drains.
#[derive(Clone, Default)]
struct ChunkBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl ChunkBuffer {
    fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn take(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Write for ChunkBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct MultipartUpload {
    upload_id: String,
    parts: Vec<UploadedPart>,
}

/// State shared by all fetch tasks of one assembly. Always accessed under
/// the assembly's mutex.
struct ArchiveSink {
    bucket: String,
    key: String,
    writer: Option<ZipWriter<StreamWriter<ChunkBuffer>>>,
    buffer: ChunkBuffer,
    included: Vec<String>,
    missing: Vec<String>,
    upload: Option<MultipartUpload>,
    /// Multipart creation in flight. Runs as its own task so an interrupted
    /// assembly still learns the upload ID and can abort it.
    creating: Option<JoinHandle<Result<String, StorageError>>>,
}

impl ArchiveSink {
    fn new(bucket: String, key: String) -> Self {
        let buffer = ChunkBuffer::default();
        Self {
            bucket,
            key,
            writer: Some(ZipWriter::new_stream(buffer.clone())),
            buffer,
            included: Vec::new(),
            missing: Vec::new(),
            upload: None,
            creating: None,
        }
    }

    fn add_entry(&mut self, name: &str, bytes: &[u8]) -> Result<(), ArchiveError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            std::io::Error::other(format!("archive {} already finalized", self.key))
        })?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(name, options)?;
        writer.write_all(bytes)?;
        self.included.push(name.to_string());
        Ok(())
    }

    /// Upload the buffered bytes as the next part once they reach
    /// `chunk_bytes`.
    async fn ship_full_chunk(
        &mut self,
        objects: &Arc<dyn ObjectStore>,
        chunk_bytes: usize,
    ) -> Result<(), ArchiveError> {
        if self.buffer.len() < chunk_bytes {
            return Ok(());
        }
        let chunk = self.buffer.take();
        self.upload_part(objects, chunk).await
    }

    async fn upload_part(
        &mut self,
        objects: &Arc<dyn ObjectStore>,
        bytes: Vec<u8>,
    ) -> Result<(), ArchiveError> {
        if self.upload.is_none() {
            if self.creating.is_none() {
                let objects = Arc::clone(objects);
                let bucket = self.bucket.clone();
                let key = self.key.clone();
                self.creating = Some(tokio::spawn(async move {
                    objects
                        .create_multipart(&bucket, &key, Some(ZIP_CONTENT_TYPE))
                        .await
                }));
            }
            if let Some(handle) = self.creating.as_mut() {
                let created = handle.await;
                self.creating = None;
                let upload_id = created??;
                tracing::debug!(key = %self.key, upload_id = %upload_id, "Archive multipart upload started");
                self.upload = Some(MultipartUpload {
                    upload_id,
                    parts: Vec::new(),
                });
            }
        }

        if let Some(upload) = self.upload.as_mut() {
            let part_number = upload.parts.len() as i32 + 1;
            let part = objects
                .upload_part(&self.bucket, &self.key, &upload.upload_id, part_number, bytes)
                .await?;
            upload.parts.push(part);
        }
        Ok(())
    }

    /// Close the zip and store the object: complete the multipart upload if
    /// one was started, otherwise a single put.
    async fn finish(&mut self, objects: &Arc<dyn ObjectStore>) -> Result<(), ArchiveError> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        let remainder = self.buffer.take();

        if self.upload.is_some() {
            if !remainder.is_empty() {
                self.upload_part(objects, remainder).await?;
            }
            if let Some(upload) = &self.upload {
                objects
                    .complete_multipart(
                        &self.bucket,
                        &self.key,
                        &upload.upload_id,
                        upload.parts.clone(),
                    )
                    .await?;
            }
            self.upload = None;
        } else {
            objects
                .put(&self.bucket, &self.key, remainder, Some(ZIP_CONTENT_TYPE))
                .await?;
        }
        Ok(())
    }

    /// Discard an unfinished multipart upload, waiting out a creation that
    /// was interrupted. Best effort.
    async fn abort(&mut self, objects: &dyn ObjectStore) {
        if let Some(handle) = self.creating.take() {
            if let Ok(Ok(upload_id)) = handle.await {
                self.upload = Some(MultipartUpload {
                    upload_id,
                    parts: Vec::new(),
                });
            }
        }
        let Some(upload) = self.upload.take() else {
            return;
        };
        if let Err(e) = objects
            .abort_multipart(&self.bucket, &self.key, &upload.upload_id)
            .await
        {
            tracing::warn!(
                key = %self.key,
                upload_id = %upload.upload_id,
                error = %e,
                "Failed to abort archive multipart upload",
            );
        }
    }
}
