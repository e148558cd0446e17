//! Error types for HOPWISE operations

use crate::{AssetStatus, EntityType, HopId, MissionId, PathParseError, ToolStepId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Asset Store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetError {
    #[error("Asset not found: {key}")]
    NotFound { key: String },

    #[error("Invalid transition for asset {key} from {from:?}: {reason}")]
    InvalidTransition {
        key: String,
        from: AssetStatus,
        reason: String,
    },

    #[error("Schema mismatch for asset {key}: expected {expected}, got {got}")]
    SchemaMismatch {
        key: String,
        expected: String,
        got: String,
    },

    #[error("Asset lock poisoned: {key}")]
    LockPoisoned { key: String },
}

/// Mapping resolution errors. These fail the owning ToolStep only.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingError {
    #[error("Unresolved asset reference: {key}")]
    UnresolvedAsset { key: String },

    #[error("Asset {key} is not ready (status {status:?})")]
    AssetNotReady { key: String, status: AssetStatus },

    #[error("Path {path} not found in asset {key}")]
    PathNotFound { key: String, path: String },

    #[error("Tool output has no result named {result}")]
    MissingResult { result: String },

    #[error("Asset write failed: {0}")]
    Asset(#[from] AssetError),
}

/// Lifecycle errors: an operation was attempted in a status that does not allow it.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateError {
    #[error("Invalid state for {entity_type} {id}: cannot {operation} while {status}")]
    InvalidState {
        entity_type: EntityType,
        id: String,
        status: String,
        operation: String,
    },
}

impl StateError {
    pub fn invalid(
        entity_type: EntityType,
        id: impl ToString,
        status: impl std::fmt::Debug,
        operation: impl Into<String>,
    ) -> Self {
        StateError::InvalidState {
            entity_type,
            id: id.to_string(),
            status: format!("{status:?}"),
            operation: operation.into(),
        }
    }
}

/// Definition-time validation errors for Hops and Missions.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Dependency cycle detected in hop {hop_id} between steps {steps:?}")]
    CycleDetected { hop_id: HopId, steps: Vec<ToolStepId> },

    #[error("Steps {first} and {second} both write {key} at overlapping paths without ordering")]
    WriteConflict {
        key: String,
        first: ToolStepId,
        second: ToolStepId,
    },

    #[error("Hop {hop_id} references unknown local key {key}")]
    UnknownScopeKey { hop_id: HopId, key: String },

    #[error("Hop {hop_id} maps to missing mission asset {key}")]
    MissingMissionAsset { hop_id: HopId, key: String },

    #[error("Hop {hop_id} declares local key {key} and also maps an input onto it")]
    DuplicateScopeKey { hop_id: HopId, key: String },

    #[error("Duplicate step id {step_id} in hop {hop_id}")]
    DuplicateStep { hop_id: HopId, step_id: ToolStepId },

    #[error("Step {step_id} writes {key} at path {path}, which its schema cannot hold")]
    InvalidPath {
        step_id: ToolStepId,
        key: String,
        path: String,
    },
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid {kind} status: {value}")]
pub struct StatusParseError {
    pub kind: EntityType,
    pub value: String,
}

/// Category of an external tool failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationErrorKind {
    /// The tool ran and reported an error
    Failed,
    /// The tool did not answer in time
    Timeout,
    /// The tool was cancelled cooperatively
    Cancelled,
    /// No tool is registered under the requested id
    UnknownTool,
}

/// Failure reported by the Tool Invocation collaborator. Surfaced verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("Tool {tool_id} failed ({kind:?}): {message}")]
pub struct InvocationError {
    pub tool_id: String,
    pub kind: InvocationErrorKind,
    pub message: String,
    /// Hint passed through from the tool; the engine never retries on its own.
    pub retryable: bool,
}

impl InvocationError {
    pub fn failed(tool_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            kind: InvocationErrorKind::Failed,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn timeout(tool_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            kind: InvocationErrorKind::Timeout,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn cancelled(tool_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            kind: InvocationErrorKind::Cancelled,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn unknown_tool(tool_id: impl Into<String>) -> Self {
        let tool_id = tool_id.into();
        Self {
            message: format!("no tool registered as {tool_id}"),
            tool_id,
            kind: InvocationErrorKind::UnknownTool,
            retryable: false,
        }
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// Why a ToolStep ended in `failed`. Attached to the step for audit.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepFailure {
    #[error("{} parameter binding(s) failed: {errors:?}", .errors.len())]
    ParameterResolution { errors: Vec<MappingError> },

    #[error("Invocation failed: {0}")]
    Invocation(InvocationError),

    #[error("Result mapping failed after writing {written:?}: {error}")]
    ResultResolution {
        error: MappingError,
        /// Result names whose writes were committed before the failure.
        written: Vec<String>,
    },

    #[error("Cancelled before invocation")]
    Cancelled,
}

/// Persistence collaborator errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Mission not found: {id}")]
    NotFound { id: MissionId },

    #[error("Serialization failed for mission {id}: {reason}")]
    Serialization { id: MissionId, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all HOPWISE errors.
#[derive(Debug, Clone, Error)]
pub enum HopwiseError {
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    #[error("Step {step_id} failed: {failure}")]
    StepFailed {
        step_id: ToolStepId,
        failure: StepFailure,
    },

    #[error("Hop {hop_id} failed: {reason}")]
    HopFailed { hop_id: HopId, reason: String },

    #[error("Path error: {0}")]
    Path(#[from] PathParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for HOPWISE operations.
pub type HopwiseResult<T> = Result<T, HopwiseError>;

// =============================================================================
// TESTS
// =============================================================================
