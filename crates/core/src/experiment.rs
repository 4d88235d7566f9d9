//! Experiment groups, their members, and the member status machine.
//!
//! A group is the unit of persistence: one document per user submission
//! holding an ordered list of [`SubExperiment`]s. Member order is stable and
//! is the only link between an input file and its result, so nothing here
//! ever reorders `members`.

use serde::{Deserialize, Serialize};

use crate::types::{GroupId, Timestamp, UserId};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of automatic resubmissions allowed per member.
pub const MAX_RETRIES: u32 = 3;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a single sub-experiment.
///
/// Stored as the provider-style upper-case strings so existing documents
/// stay readable (`IN_QUEUE`, `IN_PROGRESS`, `COMPLETED`, `FAILED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    InQueue,
    InProgress,
    Completed,
    Failed,
}

impl ExperimentStatus {
    /// Wire / storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InQueue => "IN_QUEUE",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SubExperiment
// ---------------------------------------------------------------------------

/// One externally executed job and the artifacts it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubExperiment {
    /// Correlates this member with its stored input and output objects.
    pub file_id: String,
    /// Original input extension including the leading dot (e.g. `.tif`).
    pub file_extension: String,
    /// Opaque handle returned by the inference provider.
    pub external_job_id: String,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_millis: Option<u64>,
    pub microns_per_pixel: f64,
    /// Set on completion until the owner's usage charge has been recorded.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub charge_pending: bool,
}

impl SubExperiment {
    /// A freshly submitted member: `IN_PROGRESS`, no retries spent.
    pub fn submitted(
        file_id: String,
        file_extension: String,
        external_job_id: String,
        microns_per_pixel: f64,
    ) -> Self {
        Self {
            file_id,
            file_extension,
            external_job_id,
            status: ExperimentStatus::InProgress,
            retry_count: 0,
            execution_time_millis: None,
            microns_per_pixel,
            charge_pending: false,
        }
    }

    /// Whether the reconciliation loop should poll this member.
    pub fn is_in_flight(&self) -> bool {
        self.status == ExperimentStatus::InProgress
    }

    /// Whether another automatic resubmission is allowed.
    pub fn has_retry_budget(&self) -> bool {
        self.retry_count < MAX_RETRIES
    }

    /// Record a successful completion reported by the provider. The usage
    /// charge stays pending until [`settle_charge`](Self::settle_charge).
    pub fn mark_completed(&mut self, execution_time_millis: u64) {
        self.status = ExperimentStatus::Completed;
        self.execution_time_millis = Some(execution_time_millis);
        self.charge_pending = true;
    }

    /// The usage charge for this completion is on the ledger.
    pub fn settle_charge(&mut self) {
        self.charge_pending = false;
    }

    /// Record a successful resubmission under a new provider handle.
    ///
    /// Callers must check [`has_retry_budget`](Self::has_retry_budget) first;
    /// the count saturates at [`MAX_RETRIES`].
    pub fn mark_resubmitted(&mut self, external_job_id: String) {
        self.status = ExperimentStatus::InProgress;
        self.external_job_id = external_job_id;
        self.retry_count = (self.retry_count + 1).min(MAX_RETRIES);
    }

    /// Pin the member to `FAILED`. It is never polled again.
    pub fn mark_failed(&mut self) {
        self.status = ExperimentStatus::Failed;
    }
}

// ---------------------------------------------------------------------------
// ExperimentGroup
// ---------------------------------------------------------------------------

/// A user-submitted batch of sub-experiments, archived as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentGroup {
    pub id: GroupId,
    pub owner_id: UserId,
    pub name: String,
    pub members: Vec<SubExperiment>,
    pub created_at: Timestamp,
    /// Set once, when the archive is published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

impl ExperimentGroup {
    /// Build a new group with a fresh time-ordered ID.
    pub fn new(owner_id: UserId, name: String, members: Vec<SubExperiment>) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            owner_id,
            name,
            members,
            created_at: chrono::Utc::now(),
            download_url: None,
        }
    }

    /// True when every member finished successfully.
    ///
    /// An empty group is never considered complete.
    pub fn all_completed(&self) -> bool {
        !self.members.is_empty()
            && self
                .members
                .iter()
                .all(|m| m.status == ExperimentStatus::Completed)
    }

    /// True when the archive should be generated on this scan.
    pub fn needs_archive(&self) -> bool {
        self.all_completed() && self.download_url.as_deref().map_or(true, str::is_empty)
    }

    /// True when at least one member can no longer succeed.
    pub fn has_permanent_failure(&self) -> bool {
        self.members
            .iter()
            .any(|m| m.status == ExperimentStatus::Failed)
    }

    /// Number of members still waiting on the provider.
    pub fn in_flight_count(&self) -> usize {
        self.members.iter().filter(|m| m.is_in_flight()).count()
    }

    /// True when some completed member has not been charged yet.
    pub fn has_pending_charge(&self) -> bool {
        self.members.iter().any(|m| m.charge_pending)
    }

    /// Whether a reconciliation scan has work to do for this group: a member
    /// to poll, an unrecorded usage charge, or a finished group whose archive
    /// was never published.
    pub fn needs_reconciliation(&self) -> bool {
        self.in_flight_count() > 0 || self.has_pending_charge() || self.needs_archive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
