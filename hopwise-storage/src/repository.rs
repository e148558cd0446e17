//! Asset persistence collaborator.

use async_trait::async_trait;
use hopwise_core::{HopStatus, HopwiseResult, Mission, MissionId, MissionStatus, Timestamp};
use std::sync::Arc;

/// Listing row: enough to pick a Mission without loading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissionSummary {
    pub id: MissionId,
    pub name: String,
    pub status: MissionStatus,
    pub hop_status: Option<HopStatus>,
    pub revision: u64,
    pub saved_at: Timestamp,
}

/// Durable home of Missions.
///
/// `save_mission` must persist the whole aggregate atomically: a later
/// `load_mission` observes either the previous save or this one.
#[async_trait]
pub trait MissionRepository: Send + Sync {
    /// Load a Mission by ID.
    async fn load_mission(&self, id: MissionId) -> HopwiseResult<Mission>;

    /// Insert or replace a Mission.
    async fn save_mission(&self, mission: &Mission) -> HopwiseResult<()>;

    /// List stored Missions, oldest first.
    async fn list_missions(&self) -> HopwiseResult<Vec<MissionSummary>>;

    /// Remove a Mission.
    async fn delete_mission(&self, id: MissionId) -> HopwiseResult<()>;
}

#[async_trait]
impl<T: MissionRepository + ?Sized> MissionRepository for Arc<T> {
    async fn load_mission(&self, id: MissionId) -> HopwiseResult<Mission> {
        (**self).load_mission(id).await
    }

    async fn save_mission(&self, mission: &Mission) -> HopwiseResult<()> {
        (**self).save_mission(mission).await
    }

    async fn list_missions(&self) -> HopwiseResult<Vec<MissionSummary>> {
        (**self).list_missions().await
    }

    async fn delete_mission(&self, id: MissionId) -> HopwiseResult<()> {
        (**self).delete_mission(id).await
    }
}
