//! Owner-scoped reads over experiment groups.

use std::sync::Arc;

use micrograph_core::experiment::ExperimentGroup;
use micrograph_core::types::{GroupId, UserId};
use micrograph_db::models::experiment_group::GroupPage;
use micrograph_db::ExperimentGroupStore;

use crate::error::ServiceError;

pub struct ExperimentService {
    groups: Arc<dyn ExperimentGroupStore>,
}

impl ExperimentService {
    pub fn new(groups: Arc<dyn ExperimentGroupStore>) -> Self {
        Self { groups }
    }

    /// A page of the owner's groups, newest first.
    pub async fn list(
        &self,
        owner_id: UserId,
        page: i64,
        page_size: i64,
    ) -> Result<GroupPage, ServiceError> {
        Ok(self.groups.find_by_owner(owner_id, page, page_size).await?)
    }

    /// One group, only if it belongs to `owner_id`.
    pub async fn get(&self, owner_id: UserId, id: GroupId) -> Result<ExperimentGroup, ServiceError> {
        self.groups
            .find_one(id, Some(owner_id))
            .await?
            .ok_or(ServiceError::NotFound(id))
    }

    /// The published archive link, or [`ServiceError::NotReady`] while the
    /// group is still being processed.
    pub async fn download_link(&self, owner_id: UserId, id: GroupId) -> Result<String, ServiceError> {
        let group = self.get(owner_id, id).await?;
        match group.download_url {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(ServiceError::NotReady(id)),
        }
    }
}
