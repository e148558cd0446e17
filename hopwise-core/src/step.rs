//! ToolStep: one invocation of an external tool with declared bindings.

use crate::{
    EntityIdType, EntityType, Mapping, ParameterMapping, ResultMapping, ResultTarget,
    StatusParseError, StepFailure, Timestamp, ToolStepId,
};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque per-tool configuration blobs, keyed by config name.
pub type ResourceConfigs = IndexMap<String, serde_json::Value>;

/// Lifecycle status of a ToolStep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolStepStatus {
    #[default]
    Pending,
    Executing,
    Completed,
    Failed,
}

impl ToolStepStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ToolStepStatus::Pending => "pending",
            ToolStepStatus::Executing => "executing",
            ToolStepStatus::Completed => "completed",
            ToolStepStatus::Failed => "failed",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, StatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ToolStepStatus::Pending),
            "executing" => Ok(ToolStepStatus::Executing),
            "completed" => Ok(ToolStepStatus::Completed),
            "failed" => Ok(ToolStepStatus::Failed),
            _ => Err(StatusParseError {
                kind: EntityType::ToolStep,
                value: s.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ToolStepStatus::Completed | ToolStepStatus::Failed)
    }
}

impl fmt::Display for ToolStepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for ToolStepStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// A single tool invocation inside a Hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStep {
    pub id: ToolStepId,
    pub tool_id: String,
    pub description: String,
    pub parameter_mapping: ParameterMapping,
    pub result_mapping: ResultMapping,
    #[serde(default)]
    pub resource_configs: ResourceConfigs,
    status: ToolStepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<StepFailure>,
    /// Step this one replaces after a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<ToolStepId>,
    pub created_at: Timestamp,
    started_at: Option<Timestamp>,
    completed_at: Option<Timestamp>,
}

impl ToolStep {
    pub fn new(tool_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: ToolStepId::now_v7(),
            tool_id: tool_id.into(),
            description: description.into(),
            parameter_mapping: ParameterMapping::new(),
            result_mapping: ResultMapping::new(),
            resource_configs: ResourceConfigs::new(),
            status: ToolStepStatus::Pending,
            failure: None,
            retry_of: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, mapping: Mapping) -> Self {
        self.parameter_mapping.insert(name.into(), mapping);
        self
    }

    pub fn with_result(mut self, name: impl Into<String>, target: ResultTarget) -> Self {
        self.result_mapping.insert(name.into(), target);
        self
    }

    pub fn with_resource_config(mut self, name: impl Into<String>, config: serde_json::Value) -> Self {
        self.resource_configs.insert(name.into(), config);
        self
    }

    pub fn status(&self) -> ToolStepStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<Timestamp> {
        self.completed_at
    }

    /// pending → executing. Returns false (and changes nothing) from any other status.
    pub fn begin(&mut self) -> bool {
        if self.status != ToolStepStatus::Pending {
            return false;
        }
        self.status = ToolStepStatus::Executing;
        self.started_at = Some(Utc::now());
        true
    }

    /// executing → completed.
    pub fn complete(&mut self) -> bool {
        if self.status != ToolStepStatus::Executing {
            return false;
        }
        self.status = ToolStepStatus::Completed;
        self.completed_at = Some(Utc::now());
        true
    }

    /// Any non-terminal status → failed, with the failure attached.
    pub fn fail(&mut self, failure: StepFailure) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ToolStepStatus::Failed;
        self.failure = Some(failure);
        self.completed_at = Some(Utc::now());
        true
    }

    /// A fresh pending step with the same tool, bindings and configs.
    pub fn retry(&self) -> ToolStep {
        let mut step = ToolStep::new(self.tool_id.clone(), self.description.clone());
        step.parameter_mapping = self.parameter_mapping.clone();
        step.result_mapping = self.result_mapping.clone();
        step.resource_configs = self.resource_configs.clone();
        step.retry_of = Some(self.id);
        step
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InvocationError;

    fn search_step() -> ToolStep {
        ToolStep::new("web_search", "search the web")
            .with_param("query", Mapping::asset("query"))
            .with_param("limit", Mapping::literal(5i64))
            .with_result("results", ResultTarget::asset("results"))
            .with_resource_config("engine", serde_json::json!({"name": "ddg"}))
    }

    #[test]
    fn test_lifecycle_happy_path() {
        let mut step = search_step();
        assert_eq!(step.status(), ToolStepStatus::Pending);
        assert!(step.begin());
        assert!(step.started_at().is_some());
        assert!(step.complete());
        assert_eq!(step.status(), ToolStepStatus::Completed);
        assert!(step.completed_at().is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut step = search_step();
        step.begin();
        step.fail(StepFailure::Invocation(InvocationError::failed("web_search", "boom")));
        assert!(!step.begin());
        assert!(!step.complete());
        assert!(!step.fail(StepFailure::Cancelled));
        assert_eq!(step.status(), ToolStepStatus::Failed);
        assert!(matches!(step.failure(), Some(StepFailure::Invocation(_))));
    }

    #[test]
    fn test_complete_requires_executing() {
        let mut step = search_step();
        assert!(!step.complete());
        assert_eq!(step.status(), ToolStepStatus::Pending);
    }

    #[test]
    fn test_retry_copies_bindings() {
        let mut step = search_step();
        step.begin();
        step.fail(StepFailure::Cancelled);
        let retry = step.retry();
        assert_ne!(retry.id, step.id);
        assert_eq!(retry.retry_of, Some(step.id));
        assert_eq!(retry.status(), ToolStepStatus::Pending);
        assert!(retry.failure().is_none());
        assert_eq!(retry.parameter_mapping, step.parameter_mapping);
        assert_eq!(retry.result_mapping, step.result_mapping);
        assert_eq!(retry.resource_configs, step.resource_configs);
    }

    #[test]
    fn test_status_db_str_roundtrip() {
        for status in [
            ToolStepStatus::Pending,
            ToolStepStatus::Executing,
            ToolStepStatus::Completed,
            ToolStepStatus::Failed,
        ] {
            assert_eq!(ToolStepStatus::from_db_str(status.as_db_str()).unwrap(), status);
        }
        assert!("running".parse::<ToolStepStatus>().is_err());
    }

    #[test]
    fn test_step_serde_roundtrip() {
        let step = search_step();
        let json = serde_json::to_string(&step).unwrap();
        let back: ToolStep = serde_json::from_str(&json).unwrap();
        assert_eq!(back, step);
    }
}
