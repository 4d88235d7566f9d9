use std::time::Duration;

use micrograph_core::artifacts::{StorageLayout, DEFAULT_KEY_PREFIX};
use micrograph_core::submission::DEFAULT_MAX_UPLOAD_BYTES;
use micrograph_core::usage::{UsageCost, DEFAULT_FLAT_TOKENS};
use micrograph_storage::MIN_MULTIPART_PART_BYTES;

use crate::jobs::JobTemplate;

/// Default number of artifact fetches in flight per archive.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 10;

/// Default buffered archive size that triggers a multipart part upload.
pub const DEFAULT_CHUNK_BYTES: usize = 8 * 1024 * 1024;

/// Tuning for the archive assembler.
#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    /// Maximum simultaneous artifact fetches.
    pub fetch_concurrency: usize,
    /// Buffered bytes that trigger uploading the next multipart part.
    pub chunk_bytes: usize,
    /// Wall-clock bound on one whole assembly.
    pub timeout: Duration,
    /// Lifetime of the published download link.
    pub link_ttl: Duration,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            timeout: Duration::from_secs(600),
            link_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Pipeline configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bucket receiving uploaded inputs.
    pub input_bucket: String,
    /// Bucket the provider writes outputs to; archives are published here.
    pub output_bucket: String,
    pub layout: StorageLayout,
    /// Time between reconciliation scans (default: 15 s).
    pub reconcile_interval: Duration,
    /// Time after a scan starts past which no new archive assembly begins
    /// (default: 900 s). Must exceed `archive.timeout`.
    pub scan_timeout: Duration,
    pub archive: ArchiveSettings,
    /// Combined size cap for one submission (default: 1 GiB).
    pub max_upload_bytes: u64,
    pub usage_cost: UsageCost,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default      |
    /// |-------------------------------|--------------|
    /// | `S3_INPUT_BUCKET_NAME`        | required     |
    /// | `S3_OUTPUT_BUCKET_NAME`       | required     |
    /// | `STORAGE_KEY_PREFIX`          | `innocent`   |
    /// | `RECONCILE_INTERVAL_SECS`     | `15`         |
    /// | `RECONCILE_SCAN_TIMEOUT_SECS` | `900`        |
    /// | `ARCHIVE_FETCH_CONCURRENCY`   | `10`         |
    /// | `ARCHIVE_CHUNK_BYTES`         | `8388608`    |
    /// | `ARCHIVE_TIMEOUT_SECS`        | `600`        |
    /// | `DOWNLOAD_LINK_TTL_SECS`      | `86400`      |
    /// | `MAX_UPLOAD_BYTES`            | `1073741824` |
    /// | `USAGE_COST_POLICY`           | `flat`       |
    /// | `USAGE_COST_TOKENS`           | `16`         |
    ///
    /// # Panics
    ///
    /// Panics if a required variable is missing, a value does not parse, or
    /// the archive timeout is not shorter than the scan timeout.
    pub fn from_env() -> Self {
        let input_bucket =
            std::env::var("S3_INPUT_BUCKET_NAME").expect("S3_INPUT_BUCKET_NAME must be set");
        let output_bucket =
            std::env::var("S3_OUTPUT_BUCKET_NAME").expect("S3_OUTPUT_BUCKET_NAME must be set");
        let prefix =
            std::env::var("STORAGE_KEY_PREFIX").unwrap_or_else(|_| DEFAULT_KEY_PREFIX.into());

        let reconcile_interval_secs: u64 = std::env::var("RECONCILE_INTERVAL_SECS")
            .unwrap_or_else(|_| "15".into())
            .parse()
            .expect("RECONCILE_INTERVAL_SECS must be a valid u64");

        let scan_timeout_secs: u64 = std::env::var("RECONCILE_SCAN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "900".into())
            .parse()
            .expect("RECONCILE_SCAN_TIMEOUT_SECS must be a valid u64");

        let fetch_concurrency: usize = std::env::var("ARCHIVE_FETCH_CONCURRENCY")
            .unwrap_or_else(|_| DEFAULT_FETCH_CONCURRENCY.to_string())
            .parse()
            .expect("ARCHIVE_FETCH_CONCURRENCY must be a valid usize");

        let chunk_bytes: usize = std::env::var("ARCHIVE_CHUNK_BYTES")
            .unwrap_or_else(|_| DEFAULT_CHUNK_BYTES.to_string())
            .parse()
            .expect("ARCHIVE_CHUNK_BYTES must be a valid usize");

        let archive_timeout_secs: u64 = std::env::var("ARCHIVE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "600".into())
            .parse()
            .expect("ARCHIVE_TIMEOUT_SECS must be a valid u64");

        let link_ttl_secs: u64 = std::env::var("DOWNLOAD_LINK_TTL_SECS")
            .unwrap_or_else(|_| "86400".into())
            .parse()
            .expect("DOWNLOAD_LINK_TTL_SECS must be a valid u64");

        let max_upload_bytes: u64 = std::env::var("MAX_UPLOAD_BYTES")
            .unwrap_or_else(|_| DEFAULT_MAX_UPLOAD_BYTES.to_string())
            .parse()
            .expect("MAX_UPLOAD_BYTES must be a valid u64");

        let policy = std::env::var("USAGE_COST_POLICY").unwrap_or_else(|_| "flat".into());
        let tokens: i64 = std::env::var("USAGE_COST_TOKENS")
            .unwrap_or_else(|_| DEFAULT_FLAT_TOKENS.to_string())
            .parse()
            .expect("USAGE_COST_TOKENS must be a valid i64");
        let usage_cost = UsageCost::from_name(policy.trim(), tokens)
            .unwrap_or_else(|e| panic!("Invalid usage cost configuration: {e}"));

        let scan_timeout = Duration::from_secs(scan_timeout_secs.max(1));
        let archive_timeout = Duration::from_secs(archive_timeout_secs.max(1));
        if let Err(e) = check_timeouts(scan_timeout, archive_timeout) {
            panic!("Invalid reconciliation timeouts: {e}");
        }

        Self {
            input_bucket,
            output_bucket,
            layout: StorageLayout::new(&prefix),
            reconcile_interval: Duration::from_secs(reconcile_interval_secs.max(1)),
            scan_timeout,
            archive: ArchiveSettings {
                fetch_concurrency: fetch_concurrency.max(1),
                chunk_bytes: clamp_chunk_bytes(chunk_bytes),
                timeout: archive_timeout,
                link_ttl: Duration::from_secs(link_ttl_secs.max(1)),
            },
            max_upload_bytes,
            usage_cost,
        }
    }

    /// Job parameters shared by submission and resubmission.
    pub fn job_template(&self) -> JobTemplate {
        JobTemplate::new(
            self.input_bucket.clone(),
            self.output_bucket.clone(),
            self.layout.clone(),
        )
    }
}

/// An assembly started just inside the scan budget must be able to time out
/// on its own before the next budget check.
pub fn check_timeouts(scan_timeout: Duration, archive_timeout: Duration) -> Result<(), String> {
    if archive_timeout >= scan_timeout {
        return Err(format!(
            "ARCHIVE_TIMEOUT_SECS ({}) must be shorter than RECONCILE_SCAN_TIMEOUT_SECS ({})",
            archive_timeout.as_secs(),
            scan_timeout.as_secs(),
        ));
    }
    Ok(())
}

/// Multipart parts other than the last must meet the store's minimum size.
pub fn clamp_chunk_bytes(requested: usize) -> usize {
    requested.max(MIN_MULTIPART_PART_BYTES)
}
