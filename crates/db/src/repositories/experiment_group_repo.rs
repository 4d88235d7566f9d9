//! Repository for the `experiment_groups` table.
//!
//! Members are stored as one JSONB array per group so a scan can rewrite a
//! whole group in a single statement.

use micrograph_core::experiment::{ExperimentGroup, SubExperiment};
use micrograph_core::types::{GroupId, UserId};
use sqlx::types::Json;
use sqlx::PgPool;

use crate::models::experiment_group::{ExperimentGroupRow, GroupPage};

/// Column list for `experiment_groups` queries.
const COLUMNS: &str = "id, owner_id, name, members, download_url, created_at";

/// Maximum page size for group listing.
const MAX_PAGE_SIZE: i64 = 100;

/// Default page size for group listing.
const DEFAULT_PAGE_SIZE: i64 = 20;

/// Groups the reconciliation loop must visit: any member still running, a
/// completion whose usage charge is not recorded, or every member completed
/// with no published archive.
const NEEDS_RECONCILIATION: &str = "\
    members @> '[{\"status\": \"IN_PROGRESS\"}]'::jsonb \
    OR members @> '[{\"chargePending\": true}]'::jsonb \
    OR ( \
        (download_url IS NULL OR download_url = '') \
        AND jsonb_array_length(members) > 0 \
        AND NOT jsonb_path_exists(members, '$[*] ? (@.status != \"COMPLETED\")') \
    )";

/// Translate a 1-based page number and requested size into `(LIMIT, OFFSET)`.
///
/// Pages below 1 are treated as 1; sizes outside `1..=100` fall back to the
/// default or the cap.
pub fn page_bounds(page: i64, page_size: i64) -> (i64, i64) {
    let limit = if page_size < 1 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size.min(MAX_PAGE_SIZE)
    };
    let page = page.max(1);
    (limit, (page - 1).saturating_mul(limit))
}

/// Provides persistence for experiment groups.
pub struct ExperimentGroupRepo;

impl ExperimentGroupRepo {
    /// Insert a new group. Returns its ID.
    pub async fn insert(pool: &PgPool, group: &ExperimentGroup) -> Result<GroupId, sqlx::Error> {
        let id: (GroupId,) = sqlx::query_as(
            "INSERT INTO experiment_groups (id, owner_id, name, members, download_url, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING id",
        )
        .bind(group.id)
        .bind(group.owner_id)
        .bind(&group.name)
        .bind(Json(&group.members))
        .bind(group.download_url.as_deref())
        .bind(group.created_at)
        .fetch_one(pool)
        .await?;
        Ok(id.0)
    }

    /// List a user's groups, newest first, with the total count.
    pub async fn find_by_owner(
        pool: &PgPool,
        owner_id: UserId,
        page: i64,
        page_size: i64,
    ) -> Result<GroupPage, sqlx::Error> {
        let (limit, offset) = page_bounds(page, page_size);
        let query = format!(
            "SELECT {COLUMNS} FROM experiment_groups \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, ExperimentGroupRow>(&query)
            .bind(owner_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;

        let total: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM experiment_groups WHERE owner_id = $1")
                .bind(owner_id)
                .fetch_one(pool)
                .await?;

        Ok(GroupPage {
            items: rows.into_iter().map(ExperimentGroup::from).collect(),
            total: total.0,
        })
    }

    /// Find a group by ID, optionally scoped to its owner.
    pub async fn find_one(
        pool: &PgPool,
        id: GroupId,
        owner_id: Option<UserId>,
    ) -> Result<Option<ExperimentGroup>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM experiment_groups \
             WHERE id = $1 AND ($2::BIGINT IS NULL OR owner_id = $2)"
        );
        let row = sqlx::query_as::<_, ExperimentGroupRow>(&query)
            .bind(id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.map(ExperimentGroup::from))
    }

    /// Replace the member list and, if none is stored yet, set the download
    /// link. An existing link is never overwritten.
    ///
    /// Returns [`sqlx::Error::RowNotFound`] if the group does not exist.
    pub async fn update_progress(
        pool: &PgPool,
        id: GroupId,
        members: &[SubExperiment],
        download_url: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query(
            "UPDATE experiment_groups \
             SET members = $2, \
                 download_url = COALESCE(NULLIF(download_url, ''), $3), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(Json(members))
        .bind(download_url)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    /// All groups with reconciliation work left, oldest first.
    pub async fn list_in_progress(pool: &PgPool) -> Result<Vec<ExperimentGroup>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM experiment_groups \
             WHERE {NEEDS_RECONCILIATION} \
             ORDER BY created_at ASC"
        );
        let rows = sqlx::query_as::<_, ExperimentGroupRow>(&query)
            .fetch_all(pool)
            .await?;
        Ok(rows.into_iter().map(ExperimentGroup::from).collect())
    }
}
