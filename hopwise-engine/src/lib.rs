//! HOPWISE Engine - execution of Missions, Hops and ToolSteps
//!
//! - [`StepExecutor`] runs one ToolStep: bind parameters, invoke once,
//!   distribute results.
//! - [`HopOrchestrator`] runs a Hop's steps in dependency waves with
//!   bounded concurrency.
//! - [`MissionOrchestrator`] walks a stored Mission's Hops and persists
//!   at every boundary.
//! - [`ToolRegistry`] is an in-process tool invoker with per-tool timeouts.

pub mod cancel;
pub mod executor;
pub mod hop;
pub mod mission;
pub mod registry;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use executor::{PreparedCall, StepExecutor};
pub use hop::{HopHost, HopOrchestrator, HopProgress, HopReport, HopRun};
pub use mission::{MissionOrchestrator, MissionProgress};
pub use registry::{tool_fn, FnTool, ToolHandler, ToolRegistry};
