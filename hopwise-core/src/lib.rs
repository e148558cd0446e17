//! HOPWISE Core - Mission / Hop / ToolStep data model
//!
//! Typed Assets and the Asset Store, declarative mappings and their
//! resolution, the ToolStep / Hop / Mission state machines, the step
//! dependency graph, engine configuration, and the Tool Invocation
//! boundary. Execution lives in `hopwise-engine`; persistence in
//! `hopwise-storage`.

pub mod asset;
pub mod config;
pub mod error;
pub mod graph;
pub mod hop;
pub mod identity;
pub mod invoke;
pub mod mapping;
pub mod mission;
pub mod schema;
pub mod step;
pub mod value;

pub use asset::{Asset, AssetHandle, AssetRole, AssetState, AssetStatus, AssetStore, WritePolicy};
pub use config::EngineConfig;
pub use error::{
    AssetError, ConfigError, HopwiseError, HopwiseResult, InvocationError, InvocationErrorKind,
    MappingError, StateError, StatusParseError, StepFailure, StorageError, ValidationError,
};
pub use graph::DependencyGraph;
pub use hop::{Hop, HopStatus, ScopeMapping};
pub use identity::{
    new_entity_id, AssetId, EntityId, EntityIdType, EntityType, HopId, MissionId, Timestamp,
    ToolStepId,
};
pub use invoke::{ToolInvoker, ToolOutputs, ToolParams};
pub use mapping::{
    resolve_parameter, resolve_parameters, resolve_result, AssetRef, Mapping, ParameterMapping,
    ResultMapping, ResultTarget,
};
pub use mission::{Mission, MissionStatus};
pub use schema::{AssetSchema, PrimitiveType};
pub use step::{ResourceConfigs, ToolStep, ToolStepStatus};
pub use value::{
    FieldPath, FileRef, PathMiss, PathParseError, PathSegment, Value, ValueMap, FILE_MARKER,
};
