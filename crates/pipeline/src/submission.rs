//! Accepting a new batch of images for analysis.

use std::sync::Arc;

use micrograph_core::experiment::{ExperimentGroup, SubExperiment};
use micrograph_core::submission::{
    validate_files, validate_microns_per_pixel, validate_name, UploadFile,
};
use micrograph_core::types::UserId;
use micrograph_db::ExperimentGroupStore;
use micrograph_runpod::InferenceClient;
use micrograph_storage::ObjectStore;

use crate::error::SubmissionError;
use crate::jobs::JobTemplate;

/// A validated-on-submit request from one user.
#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub owner_id: UserId,
    pub name: String,
    pub microns_per_pixel: f64,
    /// Input images; member order follows this order.
    pub files: Vec<UploadFile>,
}

/// Uploads inputs, submits one job per input, then persists the group.
pub struct SubmissionPath {
    objects: Arc<dyn ObjectStore>,
    inference: Arc<dyn InferenceClient>,
    groups: Arc<dyn ExperimentGroupStore>,
    jobs: JobTemplate,
    max_upload_bytes: u64,
}

impl SubmissionPath {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        inference: Arc<dyn InferenceClient>,
        groups: Arc<dyn ExperimentGroupStore>,
        jobs: JobTemplate,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            objects,
            inference,
            groups,
            jobs,
            max_upload_bytes,
        }
    }

    /// Run a submission end to end and return the persisted group.
    ///
    /// Every input is uploaded before the first job is submitted. Any
    /// failure returns early and nothing is written to the repository.
    /// Objects and jobs created before the failure are not cleaned up.
    pub async fn submit(&self, request: NewSubmission) -> Result<ExperimentGroup, SubmissionError> {
        let name = validate_name(&request.name)?;
        validate_microns_per_pixel(request.microns_per_pixel)?;
        let extensions = validate_files(&request.files, self.max_upload_bytes)?;

        // --- Upload inputs ---
        let mut staged = Vec::with_capacity(request.files.len());
        for (file, extension) in request.files.into_iter().zip(extensions) {
            let file_id = uuid::Uuid::new_v4().to_string();
            let key = self.jobs.layout().input_key(&file_id, &extension);

            self.objects
                .put(
                    self.jobs.input_bucket(),
                    &key,
                    file.content,
                    content_type_for(&extension),
                )
                .await
                .map_err(|source| SubmissionError::Upload {
                    key: key.clone(),
                    source,
                })?;

            tracing::debug!(file_id = %file_id, key = %key, "Input uploaded");
            staged.push((file_id, extension));
        }

        // --- Submit jobs ---
        let mut members = Vec::with_capacity(staged.len());
        for (file_id, extension) in staged {
            let input = self
                .jobs
                .input_for(&file_id, &extension, request.microns_per_pixel);

            let submitted = self.inference.submit(&input).await.map_err(|source| {
                SubmissionError::Submit {
                    file_id: file_id.clone(),
                    source,
                }
            })?;

            tracing::debug!(file_id = %file_id, job_id = %submitted.id, "Analysis job submitted");
            members.push(SubExperiment::submitted(
                file_id,
                extension,
                submitted.id,
                request.microns_per_pixel,
            ));
        }

        // --- Persist ---
        let group = ExperimentGroup::new(request.owner_id, name, members);
        self.groups.insert(&group).await?;

        tracing::info!(
            group_id = %group.id,
            owner_id = group.owner_id,
            members = group.members.len(),
            "Experiment group submitted",
        );

        Ok(group)
    }
}

/// MIME type for common microscopy image extensions.
fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        ".png" => Some("image/png"),
        ".jpg" | ".jpeg" => Some("image/jpeg"),
        ".tif" | ".tiff" => Some("image/tiff"),
        _ => None,
    }
}
