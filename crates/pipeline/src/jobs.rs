use micrograph_core::artifacts::StorageLayout;
use micrograph_core::experiment::SubExperiment;
use micrograph_runpod::messages::DEFAULT_N_RAYS;
use micrograph_runpod::InferenceInput;

/// Builds inference job parameters from a member's `file_id`.
///
/// Submission and resubmission both go through here, so a retried job
/// reads and writes exactly the same keys as the original.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    input_bucket: String,
    output_bucket: String,
    layout: StorageLayout,
}

impl JobTemplate {
    pub fn new(input_bucket: String, output_bucket: String, layout: StorageLayout) -> Self {
        Self {
            input_bucket,
            output_bucket,
            layout,
        }
    }

    pub fn input_bucket(&self) -> &str {
        &self.input_bucket
    }

    pub fn output_bucket(&self) -> &str {
        &self.output_bucket
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    pub fn input_for(
        &self,
        file_id: &str,
        file_extension: &str,
        microns_per_pixel: f64,
    ) -> InferenceInput {
        InferenceInput {
            s3_input_bucket_name: self.input_bucket.clone(),
            s3_input_file_path: self.layout.input_key(file_id, file_extension),
            s3_output_bucket_name: self.output_bucket.clone(),
            s3_output_mask_file_path: self.layout.mask_output_key(file_id),
            s3_output_results_file_path: self.layout.results_key(file_id),
            s3_output_table_file_path: self.layout.table_output_key(file_id),
            n_rays: DEFAULT_N_RAYS,
            microns_per_pixel,
        }
    }

    pub fn for_member(&self, member: &SubExperiment) -> InferenceInput {
        self.input_for(
            &member.file_id,
            &member.file_extension,
            member.microns_per_pixel,
        )
    }
}
