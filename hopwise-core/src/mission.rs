//! Mission: the root aggregate owning the Hops and the Mission-scope Asset Store.

use crate::{
    Asset, AssetError, AssetRole, AssetStore, EntityIdType, EntityType, Hop, HopStatus,
    HopwiseResult, MissionId, StateError, StatusParseError, StorageError,
    Timestamp, Value, WritePolicy,
};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a Mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl MissionStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            MissionStatus::Pending => "pending",
            MissionStatus::Active => "active",
            MissionStatus::Completed => "completed",
            MissionStatus::Failed => "failed",
            MissionStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, StatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(MissionStatus::Pending),
            "active" | "in_progress" => Ok(MissionStatus::Active),
            "completed" | "complete" => Ok(MissionStatus::Completed),
            "failed" => Ok(MissionStatus::Failed),
            "cancelled" | "canceled" => Ok(MissionStatus::Cancelled),
            _ => Err(StatusParseError {
                kind: EntityType::Mission,
                value: s.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionStatus::Completed | MissionStatus::Failed | MissionStatus::Cancelled
        )
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for MissionStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Root aggregate: ordered Hops plus the Mission-scope Asset Store.
#[derive(Debug, Serialize, Deserialize)]
#[serde(from = "MissionRecord")]
pub struct Mission {
    pub id: MissionId,
    pub name: String,
    pub goal: String,
    pub success_criteria: Vec<String>,
    hops: Vec<Hop>,
    mission_state: AssetStore,
    current_hop_index: usize,
    status: MissionStatus,
    /// Hops replaced after failure, oldest first.
    superseded_hops: Vec<Hop>,
    pub created_at: Timestamp,
    updated_at: Timestamp,
}

/// Wire form of [`Mission`]. Converting relinks projected inputs to the
/// Mission's Asset handles so shared identity survives a reload.
#[derive(Deserialize)]
struct MissionRecord {
    id: MissionId,
    name: String,
    goal: String,
    #[serde(default)]
    success_criteria: Vec<String>,
    #[serde(default)]
    hops: Vec<Hop>,
    mission_state: AssetStore,
    #[serde(default)]
    current_hop_index: usize,
    status: MissionStatus,
    #[serde(default)]
    superseded_hops: Vec<Hop>,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl From<MissionRecord> for Mission {
    fn from(record: MissionRecord) -> Self {
        let mut mission = Mission {
            id: record.id,
            name: record.name,
            goal: record.goal,
            success_criteria: record.success_criteria,
            hops: record.hops,
            mission_state: record.mission_state,
            current_hop_index: record.current_hop_index,
            status: record.status,
            superseded_hops: record.superseded_hops,
            created_at: record.created_at,
            updated_at: record.updated_at,
        };
        mission.relink_inputs();
        mission
    }
}

impl Mission {
    /// A new Mission in `pending`.
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MissionId::now_v7(),
            name: name.into(),
            goal: goal.into(),
            success_criteria: Vec::new(),
            hops: Vec::new(),
            mission_state: AssetStore::new(),
            current_hop_index: 0,
            status: MissionStatus::Pending,
            superseded_hops: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_success_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }

    /// Declare a Mission-scope Asset.
    pub fn with_asset(mut self, key: impl Into<String>, asset: Asset) -> Self {
        self.mission_state.put(key, asset);
        self
    }

    pub fn with_hop(mut self, hop: Hop) -> Self {
        self.hops.push(hop);
        self
    }

    fn relink_inputs(&mut self) {
        let Mission {
            hops,
            superseded_hops,
            mission_state,
            ..
        } = self;
        for hop in hops.iter_mut().chain(superseded_hops.iter_mut()) {
            let links: Vec<_> = hop
                .input_mapping
                .iter()
                .filter(|(local, _)| hop.hop_state().contains(local))
                .filter_map(|(local, mission_key)| {
                    mission_state
                        .handle(mission_key)
                        .ok()
                        .map(|handle| (local.clone(), handle.clone()))
                })
                .collect();
            for (local, handle) in links {
                hop.hop_state_mut().link(local, handle);
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn invalid(&self, operation: &str) -> StateError {
        StateError::invalid(EntityType::Mission, self.id, self.status, operation)
    }

    // ========================================================================
    // READS
    // ========================================================================

    pub fn status(&self) -> MissionStatus {
        self.status
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn superseded_hops(&self) -> &[Hop] {
        &self.superseded_hops
    }

    pub fn mission_state(&self) -> &AssetStore {
        &self.mission_state
    }

    pub fn current_hop_index(&self) -> usize {
        self.current_hop_index
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    pub fn current_hop(&self) -> Option<&Hop> {
        self.hops.get(self.current_hop_index)
    }

    pub fn current_hop_mut(&mut self) -> Option<&mut Hop> {
        self.hops.get_mut(self.current_hop_index)
    }

    /// Status of the current Hop. Derived; `None` once every Hop is behind the index.
    pub fn hop_status(&self) -> Option<HopStatus> {
        self.current_hop().map(Hop::status)
    }

    fn assets_with_role(&self, role: AssetRole) -> Result<IndexMap<String, Asset>, AssetError> {
        Ok(self
            .mission_state
            .snapshot()?
            .into_iter()
            .filter(|(_, asset)| asset.role() == role)
            .collect())
    }

    /// Snapshot of the Mission's `input` Assets.
    pub fn inputs(&self) -> Result<IndexMap<String, Asset>, AssetError> {
        self.assets_with_role(AssetRole::Input)
    }

    /// Snapshot of the Mission's `output` Assets.
    pub fn outputs(&self) -> Result<IndexMap<String, Asset>, AssetError> {
        self.assets_with_role(AssetRole::Output)
    }

    /// True when every `output` Asset is `ready`.
    pub fn outputs_ready(&self) -> Result<bool, AssetError> {
        Ok(self.outputs()?.values().all(Asset::is_ready))
    }

    /// Read-only JSON view for UI collaborators.
    pub fn snapshot(&self) -> HopwiseResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| {
            StorageError::Serialization {
                id: self.id,
                reason: e.to_string(),
            }
            .into()
        })
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Apply the overwrite policy to the Mission scope and every Hop scope.
    pub fn set_write_policy(&mut self, policy: WritePolicy) {
        self.mission_state.set_policy(policy);
        for hop in self.hops.iter_mut() {
            hop.hop_state_mut().set_policy(policy);
        }
    }

    /// Append a Hop to the plan.
    pub fn append_hop(&mut self, hop: Hop) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(self.invalid("append_hop"));
        }
        self.hops.push(hop);
        self.touch();
        Ok(())
    }

    /// External input provisioning: set the value of an `input` Asset.
    pub fn provide_input(&mut self, key: &str, value: Value) -> HopwiseResult<()> {
        if self.status.is_terminal() {
            return Err(self.invalid("provide_input").into());
        }
        let role = self.mission_state.handle(key)?.read(key, Asset::role)?;
        if role != AssetRole::Input {
            return Err(AssetError::InvalidTransition {
                key: key.to_string(),
                from: self.mission_state.get(key)?.status(),
                reason: format!("{role:?} assets are not externally provided"),
            }
            .into());
        }
        self.mission_state.set_value(key, value)?;
        self.touch();
        Ok(())
    }

    /// pending → active. A no-op when already active.
    pub fn activate(&mut self) -> Result<(), StateError> {
        match self.status {
            MissionStatus::Pending => {
                self.status = MissionStatus::Active;
                self.touch();
                Ok(())
            }
            MissionStatus::Active => Ok(()),
            _ => Err(self.invalid("activate")),
        }
    }

    /// Move past a completed current Hop.
    pub fn advance(&mut self) -> Result<(), StateError> {
        if self.hop_status() != Some(HopStatus::Completed) {
            return Err(self.invalid("advance"));
        }
        self.current_hop_index += 1;
        self.touch();
        Ok(())
    }

    /// active → completed, only once every Hop is done and every output is ready.
    pub fn complete(&mut self) -> HopwiseResult<()> {
        if self.status != MissionStatus::Active || self.current_hop_index < self.hops.len() {
            return Err(self.invalid("complete").into());
        }
        if !self.outputs_ready()? {
            return Err(self.invalid("complete").into());
        }
        self.status = MissionStatus::Completed;
        self.touch();
        Ok(())
    }

    /// active → failed.
    pub fn fail(&mut self) -> Result<(), StateError> {
        if self.status != MissionStatus::Active {
            return Err(self.invalid("fail"));
        }
        self.status = MissionStatus::Failed;
        self.touch();
        Ok(())
    }

    /// Any non-terminal status → cancelled. Cancels the current Hop if it has not finished.
    pub fn cancel(&mut self) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(self.invalid("cancel"));
        }
        if let Some(hop) = self.current_hop_mut() {
            if !hop.status().is_terminal() {
                hop.cancel()?;
            }
        }
        self.status = MissionStatus::Cancelled;
        self.touch();
        Ok(())
    }

    /// Retry after failure: the failed Hop moves to the audit trail and `hop`
    /// takes its place; the Mission returns to `active`.
    pub fn replace_failed_hop(&mut self, hop: Hop) -> Result<(), StateError> {
        if self.status != MissionStatus::Failed || self.hop_status() != Some(HopStatus::Failed) {
            return Err(self.invalid("replace_failed_hop"));
        }
        let index = self.current_hop_index;
        let failed = std::mem::replace(&mut self.hops[index], hop);
        self.superseded_hops.push(failed);
        self.status = MissionStatus::Active;
        self.touch();
        Ok(())
    }

    /// Split borrow used by the orchestrator: the current Hop mutably, the Mission scope shared.
    pub fn current_hop_parts(&mut self) -> Option<(&mut Hop, &AssetStore)> {
        let hop = self.hops.get_mut(self.current_hop_index)?;
        Some((hop, &self.mission_state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssetSchema, AssetStatus, Mapping, ResultTarget, ToolStep};

    fn mission() -> Mission {
        Mission::new("compare crates", "pick an http client")
            .with_asset("topic", Asset::input("topic", AssetSchema::text()))
            .with_asset("summary", Asset::output("summary", AssetSchema::Any))
    }

    fn summarize_hop() -> Hop {
        Hop::new("summarize", "summarize topic")
            .with_input("t", "topic")
            .with_output("s", "summary")
            .with_asset("s", Asset::intermediate("s", AssetSchema::Any))
    }

    fn ready_hop(mission: &Mission) -> Hop {
        let mut hop = summarize_hop();
        hop.accept_plan().unwrap();
        hop.propose_implementation(vec![ToolStep::new("llm", "summarize")
            .with_param("text", Mapping::asset("t"))
            .with_result("summary", ResultTarget::asset("s"))])
            .unwrap();
        hop.submit_for_resolution(mission.mission_state()).unwrap();
        hop.accept_implementation(mission.mission_state()).unwrap();
        hop
    }

    #[test]
    fn test_hop_status_is_derived_from_current_hop() {
        let mut m = mission();
        assert_eq!(m.hop_status(), None);
        m.append_hop(summarize_hop()).unwrap();
        assert_eq!(m.hop_status(), Some(HopStatus::PlanProposed));
        m.current_hop_mut().unwrap().accept_plan().unwrap();
        assert_eq!(m.hop_status(), Some(HopStatus::PlanReady));
    }

    #[test]
    fn test_inputs_and_outputs_views() {
        let m = mission();
        assert_eq!(m.inputs().unwrap().keys().collect::<Vec<_>>(), vec!["topic"]);
        assert_eq!(m.outputs().unwrap().keys().collect::<Vec<_>>(), vec!["summary"]);
        assert!(!m.outputs_ready().unwrap());
    }

    #[test]
    fn test_provide_input_only_for_inputs() {
        let mut m = mission();
        m.provide_input("topic", Value::from("reqwest vs ureq")).unwrap();
        assert_eq!(m.mission_state().get("topic").unwrap().status(), AssetStatus::Ready);
        assert!(m.provide_input("summary", Value::from("x")).is_err());
        assert!(m.provide_input("missing", Value::from("x")).is_err());
        // inputs are write-once
        assert!(m.provide_input("topic", Value::from("again")).is_err());
    }

    #[test]
    fn test_complete_requires_ready_outputs() {
        let mut m = mission();
        m.activate().unwrap();
        assert!(m.complete().is_err());
        m.mission_state().set_value("summary", Value::from("done")).unwrap();
        m.complete().unwrap();
        assert_eq!(m.status(), MissionStatus::Completed);
        assert!(m.append_hop(summarize_hop()).is_err());
    }

    #[test]
    fn test_advance_requires_completed_hop() {
        let mut m = mission().with_hop(summarize_hop());
        assert!(m.advance().is_err());
        assert_eq!(m.current_hop_index(), 0);
    }

    #[test]
    fn test_replace_failed_hop_keeps_audit_trail() {
        let mut m = mission();
        m.provide_input("topic", Value::from("x")).unwrap();
        let hop = ready_hop(&m);
        let failed_id = hop.id;
        m.append_hop(hop).unwrap();
        m.activate().unwrap();
        {
            let (hop, state) = m.current_hop_parts().unwrap();
            hop.begin(state).unwrap();
            hop.fail("tool down").unwrap();
        }
        m.fail().unwrap();
        assert_eq!(m.hop_status(), Some(HopStatus::Failed));

        let replacement = summarize_hop();
        let replacement_id = replacement.id;
        m.replace_failed_hop(replacement).unwrap();
        assert_eq!(m.status(), MissionStatus::Active);
        assert_eq!(m.current_hop().unwrap().id, replacement_id);
        assert_eq!(m.superseded_hops()[0].id, failed_id);
        assert_eq!(m.hop_status(), Some(HopStatus::PlanProposed));
    }

    #[test]
    fn test_replace_requires_failed_mission() {
        let mut m = mission().with_hop(summarize_hop());
        assert!(m.replace_failed_hop(summarize_hop()).is_err());
    }

    #[test]
    fn test_cancel_cancels_current_hop() {
        let mut m = mission().with_hop(summarize_hop());
        m.cancel().unwrap();
        assert_eq!(m.status(), MissionStatus::Cancelled);
        assert_eq!(m.hop_status(), Some(HopStatus::Cancelled));
        assert!(m.cancel().is_err());
    }

    #[test]
    fn test_serde_roundtrip_relinks_projected_inputs() {
        let mut m = mission();
        m.provide_input("topic", Value::from("x")).unwrap();
        let hop = ready_hop(&m);
        m.append_hop(hop).unwrap();
        m.activate().unwrap();
        {
            let (hop, state) = m.current_hop_parts().unwrap();
            hop.begin(state).unwrap();
        }

        let json = serde_json::to_string(&m).unwrap();
        let loaded: Mission = serde_json::from_str(&json).unwrap();
        let hop = loaded.current_hop().unwrap();
        assert_eq!(hop.status(), HopStatus::Running);
        assert!(hop
            .hop_state()
            .handle("t")
            .unwrap()
            .same_asset(loaded.mission_state().handle("topic").unwrap()));
    }

    #[test]
    fn test_snapshot_is_json() {
        let m = mission().with_hop(summarize_hop());
        let snap = m.snapshot().unwrap();
        assert_eq!(snap["status"], "pending");
        assert_eq!(snap["hops"][0]["status"], "plan_proposed");
        assert_eq!(snap["mission_state"]["topic"]["status"], "pending");
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(MissionStatus::from_db_str("ACTIVE").unwrap(), MissionStatus::Active);
        assert_eq!(
            "canceled".parse::<MissionStatus>().unwrap(),
            MissionStatus::Cancelled
        );
        assert!(MissionStatus::from_db_str("paused").is_err());
    }
}
