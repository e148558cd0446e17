//! HOPWISE Test Utilities
//!
//! Centralized test infrastructure for the HOPWISE workspace:
//! - A scripted tool invoker that records every call
//! - Proptest generators for values, paths and schemas
//! - Fixtures for common Mission/Hop shapes
//! - Custom assertions for HOPWISE-specific validation

// Re-export the in-memory repository from its source crate
pub use hopwise_storage::InMemoryMissionRepository;

// Re-export core types for convenience
pub use hopwise_core::{
    Asset, AssetError, AssetSchema, AssetStatus, AssetStore, EngineConfig, EntityIdType, FieldPath,
    Hop, HopId, HopStatus, HopwiseError, HopwiseResult, InvocationError, InvocationErrorKind,
    Mapping, MappingError, Mission, MissionId, MissionStatus, PathSegment, PrimitiveType,
    ResourceConfigs, ResultTarget, StateError, StepFailure, ToolInvoker, ToolOutputs, ToolParams,
    ToolStep, ToolStepId, ToolStepStatus, ValidationError, Value, ValueMap,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// SCRIPTED INVOKER
// ============================================================================

type Script = Arc<dyn Fn(&ToolParams) -> Result<ToolOutputs, InvocationError> + Send + Sync>;

/// One observed `invoke` call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub tool_id: String,
    pub params: ToolParams,
    pub resource_configs: ResourceConfigs,
}

/// Tool invoker answering from per-tool scripts.
///
/// Unscripted tools fail with `UnknownTool`. Every call is recorded in
/// arrival order, and the peak number of concurrent calls is tracked.
#[derive(Default)]
pub struct ScriptedInvoker {
    scripts: HashMap<String, Script>,
    delays: HashMap<String, Duration>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl std::fmt::Debug for ScriptedInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedInvoker")
            .field("tools", &self.scripts.keys().collect::<Vec<_>>())
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `tool_id` with `f(params)`.
    pub fn respond_with<F>(mut self, tool_id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&ToolParams) -> Result<ToolOutputs, InvocationError> + Send + Sync + 'static,
    {
        self.scripts.insert(tool_id.into(), Arc::new(f));
        self
    }

    /// Answer `tool_id` with fixed outputs.
    pub fn respond(self, tool_id: impl Into<String>, outputs: ToolOutputs) -> Self {
        self.respond_with(tool_id, move |_| Ok(outputs.clone()))
    }

    /// Answer `tool_id` with its parameters, plus `out` set to the `input` parameter.
    pub fn echo(self, tool_id: impl Into<String>) -> Self {
        self.respond_with(tool_id, |params| {
            let mut outputs = params.clone();
            outputs.insert(
                "out".to_string(),
                params.get("input").cloned().unwrap_or_default(),
            );
            Ok(outputs)
        })
    }

    /// Fail every call to `tool_id` with `error`.
    pub fn fail(self, tool_id: impl Into<String>, error: InvocationError) -> Self {
        self.respond_with(tool_id, move |_| Err(error.clone()))
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep this long inside calls to `tool_id` only.
    pub fn with_tool_delay(mut self, tool_id: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(tool_id.into(), delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, tool_id: &str) -> usize {
        self.calls().iter().filter(|c| c.tool_id == tool_id).count()
    }

    /// Tool ids in the order their calls arrived.
    pub fn call_order(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.tool_id).collect()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        tool_id: &str,
        params: ToolParams,
        resource_configs: &ResourceConfigs,
    ) -> Result<ToolOutputs, InvocationError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                tool_id: tool_id.to_string(),
                params: params.clone(),
                resource_configs: resource_configs.clone(),
            });
        }

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(tool_id).copied().or(self.delay) {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.scripts.get(tool_id) {
            Some(script) => script(&params),
            None => Err(InvocationError::unknown_tool(tool_id)),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for HOPWISE values and definitions.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_mission_id() -> impl Strategy<Value = MissionId> {
        any::<u128>().prop_map(|n| MissionId::new(Uuid::from_u128(n)))
    }

    pub fn arb_hop_id() -> impl Strategy<Value = HopId> {
        any::<u128>().prop_map(|n| HopId::new(Uuid::from_u128(n)))
    }

    /// Field names that survive a textual path round trip.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_]{0,8}"
    }

    pub fn arb_field_path() -> impl Strategy<Value = FieldPath> {
        prop::collection::vec(
            prop_oneof![
                arb_field_name().prop_map(PathSegment::Field),
                (0usize..8).prop_map(PathSegment::Index),
            ],
            1..5,
        )
        .prop_map(|segments| {
            let mut path = FieldPath::root();
            for (i, segment) in segments.into_iter().enumerate() {
                path = match segment {
                    // A path starts with a field.
                    PathSegment::Index(_) if i == 0 => path.field("root"),
                    PathSegment::Index(index) => Ok(path.index(index)),
                    PathSegment::Field(name) => path.field(name),
                }
                .expect("generated field names are valid");
            }
            path
        })
    }

    /// Scalar values. Floats are finite so equality is meaningful.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1.0e9f64..1.0e9).prop_map(Value::Float),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
        ]
    }

    /// Nested values up to depth 3.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::vec((arb_field_name(), inner), 0..4)
                    .prop_map(|fields| Value::object(fields)),
            ]
        })
    }

    pub fn arb_primitive_type() -> impl Strategy<Value = PrimitiveType> {
        prop_oneof![
            Just(PrimitiveType::String),
            Just(PrimitiveType::Integer),
            Just(PrimitiveType::Number),
            Just(PrimitiveType::Boolean),
        ]
    }

    pub fn arb_asset_schema() -> impl Strategy<Value = AssetSchema> {
        let leaf = prop_oneof![
            Just(AssetSchema::Any),
            arb_primitive_type().prop_map(AssetSchema::primitive),
            Just(AssetSchema::File { mime_type: None }),
        ];
        leaf.prop_recursive(2, 12, 3, |inner| {
            prop_oneof![
                inner.clone().prop_map(AssetSchema::array),
                prop::collection::vec((arb_field_name(), inner), 1..4)
                    .prop_map(|fields| AssetSchema::object(fields)),
            ]
        })
    }

    /// A chain `k0 → k1 → … → kn`, one step per link, returned in a
    /// shuffled declaration order along with the asset keys.
    pub fn arb_step_chain(max_len: usize) -> impl Strategy<Value = (Vec<ToolStep>, Vec<String>)> {
        (2..=max_len.max(2))
            .prop_flat_map(|len| {
                let keys: Vec<String> = (0..=len).map(|i| format!("k{i}")).collect();
                let steps: Vec<ToolStep> = (0..len)
                    .map(|i| {
                        ToolStep::new("echo", format!("link {i}"))
                            .with_param("input", Mapping::asset(keys[i].clone()))
                            .with_result("out", ResultTarget::asset(keys[i + 1].clone()))
                    })
                    .collect();
                (Just(steps).prop_shuffle(), Just(keys))
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built Missions and Hops for common scenarios.

    use super::*;

    /// Mission with a ready `query` input and an empty `summary` output.
    pub fn mission_with_query(query: &str) -> Mission {
        let mut mission = Mission::new("research", "summarize a topic")
            .with_asset("query", Asset::input("query", AssetSchema::text()))
            .with_asset("summary", Asset::output("summary", AssetSchema::Any));
        mission
            .provide_input("query", Value::from(query))
            .expect("query is an input asset");
        mission
    }

    /// Walk `hop` through every approval gate with `steps` as its implementation.
    pub fn approve(hop: &mut Hop, steps: Vec<ToolStep>, mission_state: &AssetStore) {
        hop.accept_plan().expect("plan accepted");
        hop.propose_implementation(steps).expect("implementation proposed");
        hop.submit_for_resolution(mission_state)
            .expect("implementation validates");
        hop.accept_implementation(mission_state)
            .expect("implementation accepted");
    }

    /// `query → mid → summary` as two echo steps in two waves, ready to run.
    pub fn two_stage_hop(mission_state: &AssetStore) -> Hop {
        let mut hop = Hop::new("summarize", "search then summarize")
            .with_input("q", "query")
            .with_asset("mid", Asset::intermediate("mid", AssetSchema::Any))
            .with_asset("s", Asset::intermediate("s", AssetSchema::Any))
            .with_output("s", "summary");
        let steps = vec![
            ToolStep::new("echo", "search")
                .with_param("input", Mapping::asset("q"))
                .with_result("out", ResultTarget::asset("mid")),
            ToolStep::new("echo", "summarize")
                .with_param("input", Mapping::asset("mid"))
                .with_result("out", ResultTarget::asset("s")),
        ];
        approve(&mut hop, steps, mission_state);
        hop
    }

    /// Outputs map with a single `name → value` entry.
    pub fn outputs(name: &str, value: impl Into<Value>) -> ToolOutputs {
        let mut out = ToolOutputs::new();
        out.insert(name.to_string(), value.into());
        out
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for HOPWISE-specific validation.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &HopwiseResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &HopwiseResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert the result is an `InvalidState` error.
    #[track_caller]
    pub fn assert_invalid_state<T: std::fmt::Debug>(result: &HopwiseResult<T>) {
        match result {
            Err(HopwiseError::State(StateError::InvalidState { .. })) => {}
            other => panic!("Expected InvalidState, got: {:?}", other),
        }
    }

    /// Assert the result is `AssetNotReady` for `key`.
    #[track_caller]
    pub fn assert_asset_not_ready<T: std::fmt::Debug>(result: &HopwiseResult<T>, key: &str) {
        match result {
            Err(HopwiseError::Mapping(MappingError::AssetNotReady { key: k, .. })) => {
                assert_eq!(k, key, "Wrong asset in AssetNotReady");
            }
            other => panic!("Expected AssetNotReady({key}), got: {:?}", other),
        }
    }

    /// Assert the result is a `CycleDetected` validation error.
    #[track_caller]
    pub fn assert_cycle_detected<T: std::fmt::Debug>(result: &HopwiseResult<T>) {
        match result {
            Err(HopwiseError::Validation(ValidationError::CycleDetected { .. })) => {}
            other => panic!("Expected CycleDetected, got: {:?}", other),
        }
    }

    /// Assert `step` failed during parameter binding and return the collected errors.
    #[track_caller]
    pub fn assert_parameter_failure(step: &ToolStep) -> Vec<MappingError> {
        assert_eq!(step.status(), ToolStepStatus::Failed, "step {} not failed", step.id);
        match step.failure() {
            Some(StepFailure::ParameterResolution { errors }) => errors.clone(),
            other => panic!("Expected ParameterResolution failure, got: {:?}", other),
        }
    }

    /// Assert the stored value of `key` in `store`.
    #[track_caller]
    pub fn assert_asset_value(store: &AssetStore, key: &str, expected: &Value) {
        let asset = store
            .get(key)
            .unwrap_or_else(|e| panic!("asset {key} unreadable: {e}"));
        assert_eq!(asset.value(), Some(expected), "asset {key} value");
        assert_eq!(asset.status(), AssetStatus::Ready, "asset {key} status");
    }

    /// Assert `key` is absent or still pending in `store`.
    #[track_caller]
    pub fn assert_asset_pending(store: &AssetStore, key: &str) {
        let asset = store
            .get(key)
            .unwrap_or_else(|e| panic!("asset {key} unreadable: {e}"));
        assert_eq!(asset.status(), AssetStatus::Pending, "asset {key} status");
        assert!(asset.value().is_none(), "pending asset {key} has a value");
    }

    /// The Mission's derived hop status matches its current Hop.
    #[track_caller]
    pub fn assert_hop_status_consistent(mission: &Mission) {
        assert_eq!(
            mission.hop_status(),
            mission.current_hop().map(Hop::status),
            "hop_status diverged from current hop"
        );
    }
}
