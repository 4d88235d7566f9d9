//! Experiment lifecycle orchestration.
//!
//! - [`submission::SubmissionPath`] uploads inputs, submits one inference
//!   job per file, and persists the group.
//! - [`reconcile::ReconciliationLoop`] polls in-flight jobs on a fixed
//!   interval, applies the retry budget, charges usage, and triggers
//!   archiving.
//! - [`archive::ArchiveAssembler`] fetches every expected artifact with
//!   bounded concurrency and publishes a zip with a time-limited link.
//! - [`service::ExperimentService`] answers owner-scoped reads.
//!
//! All collaborators are injected as trait objects.

pub mod archive;
pub mod config;
pub mod error;
pub mod jobs;
pub mod reconcile;
pub mod service;
pub mod submission;

pub use archive::{ArchiveAssembler, PublishedArchive};
pub use config::{ArchiveSettings, PipelineConfig};
pub use error::{ArchiveError, ServiceError, SubmissionError};
pub use jobs::JobTemplate;
pub use reconcile::{ReconciliationLoop, ScanSummary};
pub use service::ExperimentService;
pub use submission::{NewSubmission, SubmissionPath};
