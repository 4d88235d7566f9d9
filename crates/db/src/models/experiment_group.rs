//! Row mapping for the `experiment_groups` table.

use micrograph_core::experiment::{ExperimentGroup, SubExperiment};
use micrograph_core::types::{GroupId, Timestamp, UserId};
use sqlx::types::Json;
use sqlx::FromRow;

/// A row from the `experiment_groups` table.
///
/// `members` is a JSONB array in the camelCase member layout.
#[derive(Debug, Clone, FromRow)]
pub struct ExperimentGroupRow {
    pub id: GroupId,
    pub owner_id: UserId,
    pub name: String,
    pub members: Json<Vec<SubExperiment>>,
    pub download_url: Option<String>,
    pub created_at: Timestamp,
}

impl From<ExperimentGroupRow> for ExperimentGroup {
    fn from(row: ExperimentGroupRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            members: row.members.0,
            created_at: row.created_at,
            download_url: row.download_url,
        }
    }
}

/// One page of a user's groups plus the unpaged total.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPage {
    pub items: Vec<ExperimentGroup>,
    pub total: i64,
}
