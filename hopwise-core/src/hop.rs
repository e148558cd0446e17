//! Hop: a group of ToolSteps sharing one local Asset scope.
//!
//! The plan/implementation gates only move forward through explicit
//! acceptance calls. Execution (`begin` → waves → `finish`) is driven by
//! the engine's Hop orchestrator.

use crate::{
    Asset, AssetStore, DependencyGraph, EntityIdType, EntityType, HopId, HopwiseError,
    HopwiseResult, MappingError, StateError, StatusParseError, Timestamp, ToolStep,
    ToolStepStatus, ValidationError,
};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Local key → Mission key.
pub type ScopeMapping = IndexMap<String, String>;

/// Lifecycle status of a Hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HopStatus {
    /// A plan is awaiting acceptance
    #[default]
    PlanProposed,
    /// Plan accepted; no implementation yet
    PlanReady,
    /// A step list is awaiting submission
    ImplProposed,
    /// Implementation validated, awaiting acceptance
    ReadyToResolve,
    /// Implementation accepted; may execute
    ImplReady,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl HopStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            HopStatus::PlanProposed => "plan_proposed",
            HopStatus::PlanReady => "plan_ready",
            HopStatus::ImplProposed => "impl_proposed",
            HopStatus::ReadyToResolve => "ready_to_resolve",
            HopStatus::ImplReady => "impl_ready",
            HopStatus::Running => "running",
            HopStatus::Completed => "completed",
            HopStatus::Failed => "failed",
            HopStatus::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation. Accepts the `HOP_` prefixed form.
    pub fn from_db_str(s: &str) -> Result<Self, StatusParseError> {
        let lowered = s.to_lowercase();
        match lowered.strip_prefix("hop_").unwrap_or(&lowered) {
            "plan_proposed" => Ok(HopStatus::PlanProposed),
            "plan_ready" => Ok(HopStatus::PlanReady),
            "impl_proposed" => Ok(HopStatus::ImplProposed),
            "ready_to_resolve" => Ok(HopStatus::ReadyToResolve),
            "impl_ready" => Ok(HopStatus::ImplReady),
            "running" => Ok(HopStatus::Running),
            "completed" => Ok(HopStatus::Completed),
            "failed" => Ok(HopStatus::Failed),
            "cancelled" => Ok(HopStatus::Cancelled),
            _ => Err(StatusParseError {
                kind: EntityType::Hop,
                value: s.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HopStatus::Completed | HopStatus::Failed | HopStatus::Cancelled
        )
    }

    /// Waiting on an external acceptance action.
    pub fn awaits_approval(&self) -> bool {
        matches!(
            self,
            HopStatus::PlanProposed
                | HopStatus::PlanReady
                | HopStatus::ImplProposed
                | HopStatus::ReadyToResolve
        )
    }
}

impl fmt::Display for HopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for HopStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// An ordered group of ToolSteps sharing `hop_state`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Hop {
    pub id: HopId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub goal: String,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    #[serde(default)]
    pub input_mapping: ScopeMapping,
    #[serde(default)]
    pub output_mapping: ScopeMapping,
    tool_steps: Vec<ToolStep>,
    status: HopStatus,
    hop_state: AssetStore,
    #[serde(default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    pub created_at: Timestamp,
    started_at: Option<Timestamp>,
    completed_at: Option<Timestamp>,
}

impl Hop {
    /// A new Hop in `plan_proposed`.
    pub fn new(name: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: HopId::now_v7(),
            name: name.into(),
            description: None,
            goal: goal.into(),
            success_criteria: Vec::new(),
            input_mapping: ScopeMapping::new(),
            output_mapping: ScopeMapping::new(),
            tool_steps: Vec::new(),
            status: HopStatus::PlanProposed,
            hop_state: AssetStore::new(),
            is_final: false,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_success_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.success_criteria.push(criterion.into());
        self
    }

    /// Bind local key `local` to Mission Asset `mission_key` on the way in.
    pub fn with_input(mut self, local: impl Into<String>, mission_key: impl Into<String>) -> Self {
        self.input_mapping.insert(local.into(), mission_key.into());
        self
    }

    /// Copy local Asset `local` into Mission Asset `mission_key` on success.
    pub fn with_output(mut self, local: impl Into<String>, mission_key: impl Into<String>) -> Self {
        self.output_mapping.insert(local.into(), mission_key.into());
        self
    }

    /// Declare a Hop-local Asset (intermediate or output).
    pub fn with_asset(mut self, key: impl Into<String>, asset: Asset) -> Self {
        self.hop_state.put(key, asset);
        self
    }

    pub fn final_hop(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub fn status(&self) -> HopStatus {
        self.status
    }

    pub fn tool_steps(&self) -> &[ToolStep] {
        &self.tool_steps
    }

    pub fn hop_state(&self) -> &AssetStore {
        &self.hop_state
    }

    pub(crate) fn hop_state_mut(&mut self) -> &mut AssetStore {
        &mut self.hop_state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<Timestamp> {
        self.completed_at
    }

    fn invalid(&self, operation: &str) -> StateError {
        StateError::invalid(EntityType::Hop, self.id, self.status, operation)
    }

    fn require(&self, allowed: &[HopStatus], operation: &str) -> Result<(), StateError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    // ========================================================================
    // PLAN / IMPLEMENTATION GATES
    // ========================================================================

    /// plan_proposed → plan_ready.
    pub fn accept_plan(&mut self) -> Result<(), StateError> {
        self.require(&[HopStatus::PlanProposed], "accept_plan")?;
        self.status = HopStatus::PlanReady;
        Ok(())
    }

    /// plan_ready | impl_proposed → impl_proposed, replacing the step list.
    pub fn propose_implementation(&mut self, steps: Vec<ToolStep>) -> Result<(), StateError> {
        self.require(
            &[HopStatus::PlanReady, HopStatus::ImplProposed],
            "propose_implementation",
        )?;
        self.tool_steps = steps;
        self.status = HopStatus::ImplProposed;
        Ok(())
    }

    /// impl_proposed → ready_to_resolve once the implementation validates.
    pub fn submit_for_resolution(&mut self, mission_state: &AssetStore) -> HopwiseResult<()> {
        self.require(&[HopStatus::ImplProposed], "submit_for_resolution")?;
        self.validate(mission_state)?;
        self.status = HopStatus::ReadyToResolve;
        Ok(())
    }

    /// ready_to_resolve → impl_ready. Re-validates first.
    pub fn accept_implementation(&mut self, mission_state: &AssetStore) -> HopwiseResult<()> {
        self.require(&[HopStatus::ReadyToResolve], "accept_implementation")?;
        self.validate(mission_state)?;
        self.status = HopStatus::ImplReady;
        Ok(())
    }

    /// impl_proposed | ready_to_resolve → plan_ready.
    pub fn reject_implementation(&mut self) -> Result<(), StateError> {
        self.require(
            &[HopStatus::ImplProposed, HopStatus::ReadyToResolve],
            "reject_implementation",
        )?;
        self.status = HopStatus::PlanReady;
        Ok(())
    }

    /// Static checks over mappings and step bindings; returns the dependency graph.
    pub fn validate(&self, mission_state: &AssetStore) -> Result<DependencyGraph, ValidationError> {
        for mission_key in self.input_mapping.values().chain(self.output_mapping.values()) {
            if !mission_state.contains(mission_key) {
                return Err(ValidationError::MissingMissionAsset {
                    hop_id: self.id,
                    key: mission_key.clone(),
                });
            }
        }

        if let Some(local) = self.input_mapping.keys().find(|k| self.hop_state.contains(k)) {
            return Err(ValidationError::DuplicateScopeKey {
                hop_id: self.id,
                key: local.clone(),
            });
        }

        let in_scope = |key: &str| self.hop_state.contains(key) || self.input_mapping.contains_key(key);
        let unknown = |key: &str| ValidationError::UnknownScopeKey {
            hop_id: self.id,
            key: key.to_string(),
        };

        for local in self.output_mapping.keys() {
            if !in_scope(local) {
                return Err(unknown(local));
            }
        }

        for step in &self.tool_steps {
            let reads = step.parameter_mapping.values().filter_map(|m| m.reads());
            let writes: Vec<_> = step.result_mapping.values().filter_map(|t| t.writes()).collect();
            for asset_ref in reads.chain(writes.iter().copied()) {
                if !in_scope(asset_ref.key) {
                    return Err(unknown(asset_ref.key));
                }
            }
            for write in writes {
                let Some(path) = write.path else { continue };
                let schema = self.local_schema(write.key, mission_state);
                if schema.is_some_and(|schema| schema.at_path(path).is_none()) {
                    return Err(ValidationError::InvalidPath {
                        step_id: step.id,
                        key: write.key.to_string(),
                        path: path.to_string(),
                    });
                }
            }
        }

        DependencyGraph::build(self.id, &self.tool_steps)
    }

    fn local_schema(&self, key: &str, mission_state: &AssetStore) -> Option<crate::AssetSchema> {
        let (store, store_key) = match self.input_mapping.get(key) {
            Some(mission_key) => (mission_state, mission_key.as_str()),
            None => (&self.hop_state, key),
        };
        store
            .handle(store_key)
            .ok()
            .and_then(|h| h.read(store_key, |asset| asset.schema().clone()).ok())
    }

    // ========================================================================
    // EXECUTION
    // ========================================================================

    /// impl_ready → running: project inputs, then build the dependency graph.
    ///
    /// Every input is checked before any is linked, so a refusal leaves both
    /// the status and `hop_state` unchanged.
    pub fn begin(&mut self, mission_state: &AssetStore) -> HopwiseResult<DependencyGraph> {
        self.require(&[HopStatus::ImplReady], "begin")?;

        let mut projected = Vec::with_capacity(self.input_mapping.len());
        for (local, mission_key) in &self.input_mapping {
            let handle = mission_state
                .handle(mission_key)
                .map_err(|_| MappingError::UnresolvedAsset {
                    key: mission_key.clone(),
                })?;
            let status = handle.read(mission_key, |asset| asset.status())?;
            if status != crate::AssetStatus::Ready {
                return Err(MappingError::AssetNotReady {
                    key: mission_key.clone(),
                    status,
                }
                .into());
            }
            projected.push((local.clone(), handle.clone()));
        }

        let graph = self.validate(mission_state)?;

        for (local, handle) in projected {
            self.hop_state.link(local, handle);
        }
        self.status = HopStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(graph)
    }

    /// Split borrow used to run a wave: the steps mutably, the scope shared.
    pub fn execution_parts(&mut self) -> (&mut [ToolStep], &AssetStore) {
        (&mut self.tool_steps, &self.hop_state)
    }

    /// running → completed: copy every output-mapped local value into the Mission.
    pub fn finish(&mut self, mission_state: &AssetStore) -> HopwiseResult<()> {
        self.require(&[HopStatus::Running], "finish")?;
        if let Some(step) = self
            .tool_steps
            .iter()
            .find(|s| s.status() != ToolStepStatus::Completed)
        {
            return Err(HopwiseError::HopFailed {
                hop_id: self.id,
                reason: format!("step {} is {}", step.id, step.status()),
            });
        }

        for (local, mission_key) in &self.output_mapping {
            let asset = self.hop_state.get(local)?;
            let Some(value) = asset.value() else {
                return Err(MappingError::AssetNotReady {
                    key: local.clone(),
                    status: asset.status(),
                }
                .into());
            };
            let target = mission_state.handle(mission_key)?;
            if target.same_asset(self.hop_state.handle(local)?) {
                continue;
            }
            mission_state.set_value(mission_key, value.clone())?;
        }

        self.status = HopStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// running → failed.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        self.require(&[HopStatus::Running], "fail")?;
        self.status = HopStatus::Failed;
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Any non-terminal status → cancelled.
    pub fn cancel(&mut self) -> Result<(), StateError> {
        if self.status.is_terminal() {
            return Err(self.invalid("cancel"));
        }
        self.status = HopStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AssetRole, AssetSchema, FieldPath, Mapping, ResultTarget, StepFailure, Value};

    fn mission_state() -> AssetStore {
        let mut store = AssetStore::new();
        store.put("topic", Asset::input("topic", AssetSchema::text()));
        store.put("report", Asset::output("report", AssetSchema::Any));
        store
    }

    fn research_hop() -> Hop {
        Hop::new("research", "collect sources")
            .with_input("q", "topic")
            .with_output("draft", "report")
            .with_asset("draft", Asset::intermediate("draft", AssetSchema::Any))
    }

    fn steps() -> Vec<ToolStep> {
        vec![ToolStep::new("search", "search")
            .with_param("query", Mapping::asset("q"))
            .with_result("hits", ResultTarget::asset("draft"))]
    }

    fn accepted(mission: &AssetStore) -> Hop {
        let mut hop = research_hop();
        hop.accept_plan().unwrap();
        hop.propose_implementation(steps()).unwrap();
        hop.submit_for_resolution(mission).unwrap();
        hop.accept_implementation(mission).unwrap();
        hop
    }

    #[test]
    fn test_gate_sequence() {
        let mission = mission_state();
        let hop = accepted(&mission);
        assert_eq!(hop.status(), HopStatus::ImplReady);
    }

    #[test]
    fn test_gates_cannot_be_skipped() {
        let mission = mission_state();
        let mut hop = research_hop();
        assert!(hop.propose_implementation(steps()).is_err());
        assert!(matches!(
            hop.accept_implementation(&mission),
            Err(HopwiseError::State(_))
        ));
        assert!(hop.begin(&mission).is_err());
        assert_eq!(hop.status(), HopStatus::PlanProposed);
    }

    #[test]
    fn test_reject_returns_to_plan_ready() {
        let mission = mission_state();
        let mut hop = research_hop();
        hop.accept_plan().unwrap();
        hop.propose_implementation(steps()).unwrap();
        hop.submit_for_resolution(&mission).unwrap();
        hop.reject_implementation().unwrap();
        assert_eq!(hop.status(), HopStatus::PlanReady);
    }

    #[test]
    fn test_cycle_blocks_submission() {
        let mission = mission_state();
        let mut hop = research_hop()
            .with_asset("x", Asset::intermediate("x", AssetSchema::Any))
            .with_asset("y", Asset::intermediate("y", AssetSchema::Any));
        hop.accept_plan().unwrap();
        hop.propose_implementation(vec![
            ToolStep::new("a", "a")
                .with_param("in", Mapping::asset("y"))
                .with_result("out", ResultTarget::asset("x")),
            ToolStep::new("b", "b")
                .with_param("in", Mapping::asset("x"))
                .with_result("out", ResultTarget::asset("y")),
        ])
        .unwrap();
        let err = hop.submit_for_resolution(&mission).unwrap_err();
        assert!(matches!(
            err,
            HopwiseError::Validation(ValidationError::CycleDetected { .. })
        ));
        assert_eq!(hop.status(), HopStatus::ImplProposed);
    }

    #[test]
    fn test_validation_rejects_unknown_keys() {
        let mission = mission_state();
        let hop = Hop::new("h", "g").with_input("q", "nope");
        assert!(matches!(
            hop.validate(&mission),
            Err(ValidationError::MissingMissionAsset { .. })
        ));

        let mut hop = research_hop();
        hop.tool_steps = vec![ToolStep::new("t", "t").with_param("p", Mapping::asset("ghost"))];
        assert!(matches!(
            hop.validate(&mission),
            Err(ValidationError::UnknownScopeKey { .. })
        ));
    }

    #[test]
    fn test_input_key_colliding_with_local_asset_is_rejected() {
        let mission = mission_state();
        let mut hop = research_hop().with_asset("q", Asset::intermediate("q", AssetSchema::Any));
        assert!(matches!(
            hop.validate(&mission),
            Err(ValidationError::DuplicateScopeKey { ref key, .. }) if key == "q"
        ));

        hop.accept_plan().unwrap();
        hop.propose_implementation(steps()).unwrap();
        let err = hop.submit_for_resolution(&mission).unwrap_err();
        assert!(matches!(
            err,
            HopwiseError::Validation(ValidationError::DuplicateScopeKey { .. })
        ));
        assert_eq!(hop.status(), HopStatus::ImplProposed);
    }

    #[test]
    fn test_validation_rejects_path_into_text_schema() {
        let mission = mission_state();
        let mut hop = research_hop()
            .with_asset("title", Asset::intermediate("title", AssetSchema::text()));
        hop.tool_steps = vec![ToolStep::new("t", "t").with_result(
            "out",
            ResultTarget::asset_path("title", FieldPath::parse("inner").unwrap()),
        )];
        assert!(matches!(
            hop.validate(&mission),
            Err(ValidationError::InvalidPath { .. })
        ));
    }

    #[test]
    fn test_begin_refuses_pending_input() {
        let mission = mission_state();
        let mut hop = accepted(&mission);
        let err = hop.begin(&mission).unwrap_err();
        assert!(matches!(
            err,
            HopwiseError::Mapping(MappingError::AssetNotReady { .. })
        ));
        assert_eq!(hop.status(), HopStatus::ImplReady);
        assert!(!hop.hop_state().contains("q"));
    }

    #[test]
    fn test_begin_links_inputs_by_identity() {
        let mission = mission_state();
        mission.set_value("topic", Value::from("rust")).unwrap();
        let mut hop = accepted(&mission);
        let graph = hop.begin(&mission).unwrap();
        assert_eq!(graph.wave_count(), 1);
        assert_eq!(hop.status(), HopStatus::Running);
        assert!(hop
            .hop_state()
            .handle("q")
            .unwrap()
            .same_asset(mission.handle("topic").unwrap()));
    }

    #[test]
    fn test_finish_projects_outputs() {
        let mission = mission_state();
        mission.set_value("topic", Value::from("rust")).unwrap();
        let mut hop = accepted(&mission);
        hop.begin(&mission).unwrap();
        {
            let (steps, scope) = hop.execution_parts();
            steps[0].begin();
            scope.set_value("draft", Value::from("notes")).unwrap();
            steps[0].complete();
        }
        hop.finish(&mission).unwrap();
        assert_eq!(hop.status(), HopStatus::Completed);
        let report = mission.get("report").unwrap();
        assert_eq!(report.value(), Some(&Value::from("notes")));
        assert_eq!(report.role(), AssetRole::Output);
    }

    #[test]
    fn test_finish_requires_every_step_completed() {
        let mission = mission_state();
        mission.set_value("topic", Value::from("rust")).unwrap();
        let mut hop = accepted(&mission);
        hop.begin(&mission).unwrap();
        {
            let (steps, _) = hop.execution_parts();
            steps[0].begin();
            steps[0].fail(StepFailure::Cancelled);
        }
        assert!(matches!(
            hop.finish(&mission),
            Err(HopwiseError::HopFailed { .. })
        ));
        hop.fail("search failed").unwrap();
        assert_eq!(hop.status(), HopStatus::Failed);
        assert_eq!(hop.error(), Some("search failed"));
        assert!(hop.cancel().is_err());
    }

    #[test]
    fn test_status_parsing_accepts_prefixed_form() {
        assert_eq!(
            HopStatus::from_db_str("HOP_IMPL_READY").unwrap(),
            HopStatus::ImplReady
        );
        assert_eq!("running".parse::<HopStatus>().unwrap(), HopStatus::Running);
        assert!(HopStatus::from_db_str("HOP_DONE").is_err());
    }
}
