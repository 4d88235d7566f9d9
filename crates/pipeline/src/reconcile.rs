//! Periodic reconciliation of in-flight experiments.
//!
//! Each scan runs in two passes over the groups with work left. The first
//! polls the provider for each `IN_PROGRESS` member in stored order, applies
//! the retry budget, charges usage for completions, and persists the group.
//! The second publishes archives for fully completed groups, oldest first
//! but behind groups whose assembly has not failed before, until the scan's
//! time budget runs out.
//!
//! Errors never escape a scan: they are logged and the affected member or
//! group is left for the next tick.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use micrograph_core::experiment::{ExperimentGroup, SubExperiment};
use micrograph_core::types::{GroupId, UserId};
use micrograph_core::usage::UsageCost;
use micrograph_db::{BalanceLedger, ExperimentGroupStore};
use micrograph_runpod::{InferenceClient, JobState};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::archive::ArchiveAssembler;
use crate::jobs::JobTemplate;

/// Counters for one scan, logged at the end of every tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub groups: usize,
    pub polled: usize,
    pub completed: usize,
    pub resubmitted: usize,
    pub failed: usize,
    pub archived: usize,
    /// Archives left for the next scan because the time budget ran out.
    pub deferred: usize,
    pub errors: usize,
}

/// Background driver that advances experiments towards a terminal state.
pub struct ReconciliationLoop {
    inference: Arc<dyn InferenceClient>,
    groups: Arc<dyn ExperimentGroupStore>,
    ledger: Arc<dyn BalanceLedger>,
    assembler: ArchiveAssembler,
    jobs: JobTemplate,
    usage_cost: UsageCost,
    interval: Duration,
    scan_timeout: Duration,
    /// Consecutive failed assemblies per group, used to order the archive pass.
    archive_failures: Mutex<HashMap<GroupId, u32>>,
}

impl ReconciliationLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        groups: Arc<dyn ExperimentGroupStore>,
        ledger: Arc<dyn BalanceLedger>,
        assembler: ArchiveAssembler,
        jobs: JobTemplate,
        usage_cost: UsageCost,
        interval: Duration,
        scan_timeout: Duration,
    ) -> Self {
        Self {
            inference,
            groups,
            ledger,
            assembler,
            jobs,
            usage_cost,
            interval,
            scan_timeout,
            archive_failures: Mutex::default(),
        }
    }

    /// Run scans on a fixed interval until `cancel` fires.
    ///
    /// The first scan starts immediately. A scan in progress is allowed to
    /// finish; cancellation is observed between ticks. Scans that overrun
    /// the interval delay the next tick rather than bursting.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            scan_timeout_secs = self.scan_timeout.as_secs(),
            "Reconciliation loop started",
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciliation loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    let summary = self.reconcile_once().await;
                    if summary.groups > 0 {
                        tracing::info!(
                            groups = summary.groups,
                            polled = summary.polled,
                            completed = summary.completed,
                            resubmitted = summary.resubmitted,
                            failed = summary.failed,
                            archived = summary.archived,
                            deferred = summary.deferred,
                            errors = summary.errors,
                            "Reconciliation scan finished",
                        );
                    } else {
                        tracing::debug!("Reconciliation scan: nothing in flight");
                    }
                }
            }
        }
    }

    /// Run exactly one scan over every group with outstanding work.
    pub async fn reconcile_once(&self) -> ScanSummary {
        let started = Instant::now();
        let mut summary = ScanSummary::default();

        let groups = match self.groups.list_in_progress().await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load in-progress experiment groups");
                summary.errors += 1;
                return summary;
            }
        };

        let mut ready = Vec::new();
        for mut group in groups {
            summary.groups += 1;
            if self.advance_group(&mut group, &mut summary).await && group.needs_archive() {
                ready.push(group);
            }
        }

        self.publish_archives(ready, started, &mut summary).await;
        summary
    }

    /// Poll the group's in-flight members, settle outstanding usage charges,
    /// and persist any change. Returns whether the stored group now matches
    /// the in-memory one.
    async fn advance_group(&self, group: &mut ExperimentGroup, summary: &mut ScanSummary) -> bool {
        let group_id = group.id;
        let owner_id = group.owner_id;
        let mut changed = false;

        for member in group.members.iter_mut() {
            if member.is_in_flight() && self.reconcile_member(group_id, member, summary).await {
                changed = true;
            }
            if member.charge_pending && self.charge_usage(group_id, owner_id, member, summary).await {
                member.settle_charge();
                changed = true;
            }
        }

        if !changed {
            return true;
        }

        match self
            .groups
            .update_progress(group_id, &group.members, None)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                summary.errors += 1;
                tracing::error!(group_id = %group_id, error = %e, "Failed to persist experiment group progress");
                false
            }
        }
    }

    /// Assemble and link archives for `ready` groups while the scan budget
    /// lasts. Groups with fewer failed attempts go first.
    async fn publish_archives(
        &self,
        mut ready: Vec<ExperimentGroup>,
        started: Instant,
        summary: &mut ScanSummary,
    ) {
        {
            let failures = self.failures();
            ready.sort_by_key(|g| failures.get(&g.id).copied().unwrap_or_default());
        }

        for group in ready {
            if started.elapsed() >= self.scan_timeout {
                summary.deferred += 1;
                tracing::info!(group_id = %group.id, "Scan budget spent, archive deferred to next scan");
                continue;
            }

            let published = match self.assembler.assemble(&group).await {
                Ok(published) => published,
                Err(e) => {
                    summary.errors += 1;
                    *self.failures().entry(group.id).or_default() += 1;
                    tracing::error!(
                        group_id = %group.id,
                        error = %e,
                        "Archive assembly failed, will retry next scan",
                    );
                    continue;
                }
            };
            self.failures().remove(&group.id);

            match self
                .groups
                .update_progress(group.id, &group.members, Some(&published.url))
                .await
            {
                Ok(()) => summary.archived += 1,
                Err(e) => {
                    summary.errors += 1;
                    tracing::error!(group_id = %group.id, error = %e, "Failed to store download link");
                }
            }
        }
    }

    fn failures(&self) -> std::sync::MutexGuard<'_, HashMap<GroupId, u32>> {
        self.archive_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Poll one in-flight member and apply the transition. Returns whether
    /// the member changed.
    async fn reconcile_member(
        &self,
        group_id: GroupId,
        member: &mut SubExperiment,
        summary: &mut ScanSummary,
    ) -> bool {
        summary.polled += 1;

        let status = match self.inference.poll(&member.external_job_id).await {
            Ok(status) => status,
            Err(e) => {
                summary.errors += 1;
                tracing::warn!(
                    group_id = %group_id,
                    file_id = %member.file_id,
                    job_id = %member.external_job_id,
                    error = %e,
                    "Failed to poll job status, will retry next scan",
                );
                return false;
            }
        };

        match &status.state {
            JobState::InQueue | JobState::InProgress { .. } => {
                tracing::debug!(
                    group_id = %group_id,
                    file_id = %member.file_id,
                    job_id = %member.external_job_id,
                    status = %status.raw_status,
                    "Job still running",
                );
                false
            }
            JobState::Completed { .. } => {
                let Some(completion) = status.state.completion() else {
                    tracing::debug!(
                        group_id = %group_id,
                        file_id = %member.file_id,
                        job_id = %member.external_job_id,
                        "Job reported completed without execution time, waiting",
                    );
                    return false;
                };

                member.mark_completed(completion.execution_time_millis);
                summary.completed += 1;
                tracing::info!(
                    group_id = %group_id,
                    file_id = %member.file_id,
                    job_id = %member.external_job_id,
                    execution_time_ms = completion.execution_time_millis,
                    "Sub-experiment completed",
                );
                true
            }
            JobState::Failed { error } => {
                tracing::warn!(
                    group_id = %group_id,
                    file_id = %member.file_id,
                    job_id = %member.external_job_id,
                    error = ?error,
                    "Job failed",
                );
                self.retry_or_fail(group_id, member, summary).await;
                true
            }
            JobState::Unrecognized => {
                tracing::warn!(
                    group_id = %group_id,
                    file_id = %member.file_id,
                    job_id = %member.external_job_id,
                    status = %status.raw_status,
                    "Job ended with unrecognized status, treating as failed",
                );
                self.retry_or_fail(group_id, member, summary).await;
                true
            }
        }
    }

    /// Resubmit with the original parameters while budget remains,
    /// otherwise pin the member to `FAILED`.
    async fn retry_or_fail(
        &self,
        group_id: GroupId,
        member: &mut SubExperiment,
        summary: &mut ScanSummary,
    ) {
        if !member.has_retry_budget() {
            member.mark_failed();
            summary.failed += 1;
            tracing::warn!(
                group_id = %group_id,
                file_id = %member.file_id,
                retry_count = member.retry_count,
                "Retry budget exhausted, sub-experiment failed",
            );
            return;
        }

        let input = self.jobs.for_member(member);
        match self.inference.submit(&input).await {
            Ok(submitted) => {
                member.mark_resubmitted(submitted.id);
                summary.resubmitted += 1;
                tracing::info!(
                    group_id = %group_id,
                    file_id = %member.file_id,
                    job_id = %member.external_job_id,
                    retry_count = member.retry_count,
                    "Sub-experiment resubmitted",
                );
            }
            Err(e) => {
                member.mark_failed();
                summary.failed += 1;
                tracing::error!(
                    group_id = %group_id,
                    file_id = %member.file_id,
                    error = %e,
                    "Resubmission failed, sub-experiment failed",
                );
            }
        }
    }

    /// Charge the owner for a completed member. Returns whether the charge
    /// is on the ledger; on failure the member stays pending and the charge
    /// is retried next scan.
    async fn charge_usage(
        &self,
        group_id: GroupId,
        owner_id: UserId,
        member: &SubExperiment,
        summary: &mut ScanSummary,
    ) -> bool {
        let tokens = self
            .usage_cost
            .tokens_for(member.execution_time_millis.unwrap_or_default());
        let usage_key = usage_key(group_id, &member.file_id);

        match self.ledger.charge_usage(owner_id, &usage_key, tokens).await {
            Ok(true) => {
                tracing::debug!(owner_id, usage_key = %usage_key, tokens, "Usage charged");
                true
            }
            Ok(false) => {
                tracing::debug!(owner_id, usage_key = %usage_key, "Usage already charged");
                true
            }
            Err(e) => {
                summary.errors += 1;
                tracing::error!(
                    owner_id,
                    usage_key = %usage_key,
                    tokens,
                    error = %e,
                    "Failed to charge usage, will retry next scan",
                );
                false
            }
        }
    }
}

/// Ledger key identifying one member's completion charge.
pub fn usage_key(group_id: GroupId, file_id: &str) -> String {
    format!("{group_id}:{file_id}")
}
