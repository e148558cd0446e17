//! In-memory Mission repository.
//!
//! Missions are stored as serialized JSON, so every load is a deep copy
//! with its own Asset handles, exactly as if it came back from a database.

use crate::repository::{MissionRepository, MissionSummary};
use async_trait::async_trait;
use chrono::Utc;
use hopwise_core::{HopwiseError, HopwiseResult, Mission, MissionId, StorageError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredMission {
    summary: MissionSummary,
    json: String,
}

/// Mission repository backed by a shared in-process map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMissionRepository {
    missions: Arc<RwLock<HashMap<MissionId, StoredMission>>>,
}

impl InMemoryMissionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored Missions.
    pub fn len(&self) -> HopwiseResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> HopwiseResult<bool> {
        Ok(self.read()?.is_empty())
    }

    /// How many times `id` has been saved; 0 when unknown.
    pub fn revision(&self, id: MissionId) -> HopwiseResult<u64> {
        Ok(self
            .read()?
            .get(&id)
            .map(|stored| stored.summary.revision)
            .unwrap_or(0))
    }

    /// Drop every stored Mission.
    pub fn clear(&self) -> HopwiseResult<()> {
        self.write()?.clear();
        Ok(())
    }

    fn read(
        &self,
    ) -> HopwiseResult<std::sync::RwLockReadGuard<'_, HashMap<MissionId, StoredMission>>> {
        self.missions
            .read()
            .map_err(|_| HopwiseError::Storage(StorageError::LockPoisoned))
    }

    fn write(
        &self,
    ) -> HopwiseResult<std::sync::RwLockWriteGuard<'_, HashMap<MissionId, StoredMission>>> {
        self.missions
            .write()
            .map_err(|_| HopwiseError::Storage(StorageError::LockPoisoned))
    }
}

#[async_trait]
impl MissionRepository for InMemoryMissionRepository {
    async fn load_mission(&self, id: MissionId) -> HopwiseResult<Mission> {
        let json = self
            .read()?
            .get(&id)
            .map(|stored| stored.json.clone())
            .ok_or(HopwiseError::Storage(StorageError::NotFound { id }))?;

        let mission: Mission = serde_json::from_str(&json).map_err(|e| {
            HopwiseError::Storage(StorageError::Serialization {
                id,
                reason: e.to_string(),
            })
        })?;
        debug!(mission_id = %id, status = %mission.status(), "Loaded mission");
        Ok(mission)
    }

    async fn save_mission(&self, mission: &Mission) -> HopwiseResult<()> {
        // Serialize before taking the lock; this reads every Asset lock.
        let json = serde_json::to_string(mission).map_err(|e| {
            HopwiseError::Storage(StorageError::Serialization {
                id: mission.id,
                reason: e.to_string(),
            })
        })?;

        let mut missions = self.write()?;
        let revision = missions
            .get(&mission.id)
            .map(|stored| stored.summary.revision + 1)
            .unwrap_or(1);
        missions.insert(
            mission.id,
            StoredMission {
                summary: MissionSummary {
                    id: mission.id,
                    name: mission.name.clone(),
                    status: mission.status(),
                    hop_status: mission.hop_status(),
                    revision,
                    saved_at: Utc::now(),
                },
                json,
            },
        );
        debug!(
            mission_id = %mission.id,
            revision,
            status = %mission.status(),
            hop_index = mission.current_hop_index(),
            "Saved mission"
        );
        Ok(())
    }

    async fn list_missions(&self) -> HopwiseResult<Vec<MissionSummary>> {
        let mut summaries: Vec<MissionSummary> = self
            .read()?
            .values()
            .map(|stored| stored.summary.clone())
            .collect();
        summaries.sort_by_key(|summary| summary.id);
        Ok(summaries)
    }

    async fn delete_mission(&self, id: MissionId) -> HopwiseResult<()> {
        self.write()?
            .remove(&id)
            .map(|_| ())
            .ok_or(HopwiseError::Storage(StorageError::NotFound { id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hopwise_core::{
        Asset, AssetSchema, FieldPath, Hop, HopStatus, MissionStatus, ResultTarget, ToolStep, Value,
    };

    fn sample_mission() -> Mission {
        Mission::new("market scan", "find three competitors")
            .with_asset("query", Asset::input("query", AssetSchema::text()))
            .with_asset("report", Asset::output("report", AssetSchema::Any))
            .with_hop(Hop::new("search", "search the web"))
    }

    #[tokio::test]
    async fn test_save_then_load_roundtrip() {
        let repo = InMemoryMissionRepository::new();
        let mut mission = sample_mission();
        mission.provide_input("query", Value::from("vector dbs")).unwrap();
        repo.save_mission(&mission).await.unwrap();

        let loaded = repo.load_mission(mission.id).await.unwrap();
        assert_eq!(loaded.id, mission.id);
        assert_eq!(loaded.name, "market scan");
        assert_eq!(loaded.hop_status(), Some(HopStatus::PlanProposed));
        assert_eq!(
            loaded.mission_state().get("query").unwrap().value(),
            Some(&Value::from("vector dbs"))
        );
    }

    #[tokio::test]
    async fn test_result_paths_keep_their_shape() {
        let repo = InMemoryMissionRepository::new();
        let path = FieldPath::root()
            .field("meta")
            .unwrap()
            .index(0)
            .field("title")
            .unwrap();
        let mut hop = Hop::new("tag", "tag documents")
            .with_asset("doc", Asset::intermediate("doc", AssetSchema::Any));
        hop.accept_plan().unwrap();
        hop.propose_implementation(vec![ToolStep::new("tagger", "tag")
            .with_result("title", ResultTarget::asset_path("doc", path.clone()))])
            .unwrap();
        let mission = sample_mission().with_hop(hop);
        repo.save_mission(&mission).await.unwrap();

        let loaded = repo.load_mission(mission.id).await.unwrap();
        let step = &loaded.hops().last().unwrap().tool_steps()[0];
        assert_eq!(
            step.result_mapping.get("title"),
            Some(&ResultTarget::asset_path("doc", path))
        );
    }

    #[tokio::test]
    async fn test_load_returns_independent_copy() {
        let repo = InMemoryMissionRepository::new();
        let mission = sample_mission();
        repo.save_mission(&mission).await.unwrap();

        let loaded = repo.load_mission(mission.id).await.unwrap();
        loaded
            .mission_state()
            .set_value("report", Value::from("draft"))
            .unwrap();

        let reloaded = repo.load_mission(mission.id).await.unwrap();
        assert!(reloaded.mission_state().get("report").unwrap().value().is_none());
    }

    #[tokio::test]
    async fn test_revision_counts_saves() {
        let repo = InMemoryMissionRepository::new();
        let mut mission = sample_mission();
        assert_eq!(repo.revision(mission.id).unwrap(), 0);
        repo.save_mission(&mission).await.unwrap();
        mission.activate().unwrap();
        repo.save_mission(&mission).await.unwrap();
        assert_eq!(repo.revision(mission.id).unwrap(), 2);

        let summaries = repo.list_missions().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].status, MissionStatus::Active);
        assert_eq!(summaries[0].revision, 2);
    }

    #[tokio::test]
    async fn test_missing_mission_is_not_found() {
        let repo = InMemoryMissionRepository::new();
        let id = sample_mission().id;
        assert!(matches!(
            repo.load_mission(id).await,
            Err(HopwiseError::Storage(StorageError::NotFound { .. }))
        ));
        assert!(matches!(
            repo.delete_mission(id).await,
            Err(HopwiseError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let repo = InMemoryMissionRepository::new();
        let a = sample_mission();
        let b = sample_mission();
        repo.save_mission(&a).await.unwrap();
        repo.save_mission(&b).await.unwrap();
        assert_eq!(repo.len().unwrap(), 2);

        repo.delete_mission(a.id).await.unwrap();
        assert_eq!(repo.len().unwrap(), 1);

        repo.clear().unwrap();
        assert!(repo.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_id() {
        let repo = InMemoryMissionRepository::new();
        let first = sample_mission();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = sample_mission();
        repo.save_mission(&second).await.unwrap();
        repo.save_mission(&first).await.unwrap();
        let ids: Vec<_> = repo
            .list_missions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}
