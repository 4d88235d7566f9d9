//! Persistence traits consumed by the pipeline, with PostgreSQL
//! implementations delegating to the repositories.

use micrograph_core::experiment::{ExperimentGroup, SubExperiment};
use micrograph_core::types::{GroupId, UserId};
use sqlx::PgPool;

use crate::models::experiment_group::GroupPage;
use crate::repositories::{BalanceRepo, ExperimentGroupRepo};

/// Durable storage for experiment groups.
#[async_trait::async_trait]
pub trait ExperimentGroupStore: Send + Sync {
    async fn insert(&self, group: &ExperimentGroup) -> Result<GroupId, sqlx::Error>;

    /// A page of the owner's groups, newest first.
    async fn find_by_owner(
        &self,
        owner_id: UserId,
        page: i64,
        page_size: i64,
    ) -> Result<GroupPage, sqlx::Error>;

    async fn find_one(
        &self,
        id: GroupId,
        owner_id: Option<UserId>,
    ) -> Result<Option<ExperimentGroup>, sqlx::Error>;

    /// Persist a scan's result. Never overwrites an existing download link.
    async fn update_progress(
        &self,
        id: GroupId,
        members: &[SubExperiment],
        download_url: Option<&str>,
    ) -> Result<(), sqlx::Error>;

    /// Groups with a member in flight or an archive still to publish.
    async fn list_in_progress(&self) -> Result<Vec<ExperimentGroup>, sqlx::Error>;
}

/// Debits usage against user balances.
#[async_trait::async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Charge `tokens` to `owner_id` once per `usage_key`. Returns whether
    /// this call applied the charge.
    async fn charge_usage(
        &self,
        owner_id: UserId,
        usage_key: &str,
        tokens: i64,
    ) -> Result<bool, sqlx::Error>;
}

// ---------------------------------------------------------------------------
// PostgreSQL implementations
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgExperimentGroupStore {
    pool: PgPool,
}

impl PgExperimentGroupStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ExperimentGroupStore for PgExperimentGroupStore {
    async fn insert(&self, group: &ExperimentGroup) -> Result<GroupId, sqlx::Error> {
        ExperimentGroupRepo::insert(&self.pool, group).await
    }

    async fn find_by_owner(
        &self,
        owner_id: UserId,
        page: i64,
        page_size: i64,
    ) -> Result<GroupPage, sqlx::Error> {
        ExperimentGroupRepo::find_by_owner(&self.pool, owner_id, page, page_size).await
    }

    async fn find_one(
        &self,
        id: GroupId,
        owner_id: Option<UserId>,
    ) -> Result<Option<ExperimentGroup>, sqlx::Error> {
        ExperimentGroupRepo::find_one(&self.pool, id, owner_id).await
    }

    async fn update_progress(
        &self,
        id: GroupId,
        members: &[SubExperiment],
        download_url: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        ExperimentGroupRepo::update_progress(&self.pool, id, members, download_url).await
    }

    async fn list_in_progress(&self) -> Result<Vec<ExperimentGroup>, sqlx::Error> {
        ExperimentGroupRepo::list_in_progress(&self.pool).await
    }
}

#[derive(Clone)]
pub struct PgBalanceLedger {
    pool: PgPool,
}

impl PgBalanceLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl BalanceLedger for PgBalanceLedger {
    async fn charge_usage(
        &self,
        owner_id: UserId,
        usage_key: &str,
        tokens: i64,
    ) -> Result<bool, sqlx::Error> {
        let applied = BalanceRepo::charge_usage(&self.pool, owner_id, usage_key, tokens).await?;
        if !applied {
            tracing::debug!(owner_id, usage_key, "Usage already charged, skipping");
        }
        Ok(applied)
    }
}
