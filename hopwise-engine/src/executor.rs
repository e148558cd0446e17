//! ToolStep Executor.
//!
//! Drives one step through `pending → executing → {completed, failed}`:
//! bind parameters, invoke the tool once, distribute results. Failures are
//! attached to the step and returned as [`HopwiseError::StepFailed`].
//!
//! The three phases are exposed separately so a caller can persist the
//! step between them: [`StepExecutor::prepare`] and [`StepExecutor::commit`]
//! mutate the step, [`StepExecutor::invoke`] owns everything it needs.

use crate::cancel::CancelToken;
use hopwise_core::{
    resolve_parameters, resolve_result, AssetStore, EntityType, HopwiseError, HopwiseResult,
    InvocationError, ResourceConfigs, StateError, StepFailure, ToolInvoker, ToolOutputs,
    ToolParams, ToolStep, ToolStepId, ToolStepStatus,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// A step that is `executing` with its parameters bound, ready to invoke.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub step_id: ToolStepId,
    pub tool_id: String,
    pub params: ToolParams,
    pub resource_configs: ResourceConfigs,
}

/// Executes ToolSteps against a Hop scope through a [`ToolInvoker`].
#[derive(Clone)]
pub struct StepExecutor {
    invoker: Arc<dyn ToolInvoker>,
}

impl std::fmt::Debug for StepExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecutor").finish_non_exhaustive()
    }
}

impl StepExecutor {
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }

    /// Execute `step` once.
    ///
    /// A step that is not `pending` is rejected with `InvalidState` before
    /// anything is read, written or invoked.
    pub async fn execute(
        &self,
        step: &mut ToolStep,
        scope: &AssetStore,
        cancel: &CancelToken,
    ) -> HopwiseResult<()> {
        let call = self.prepare(step, scope, cancel)?;
        let invoked = self.invoke(call).await;
        self.commit(step, scope, invoked)
    }

    /// pending → executing, then bind every parameter.
    ///
    /// All resolution failures are collected; any of them fails the step
    /// without invoking. A cancellation seen here also fails the step.
    pub fn prepare(
        &self,
        step: &mut ToolStep,
        scope: &AssetStore,
        cancel: &CancelToken,
    ) -> HopwiseResult<PreparedCall> {
        if !step.begin() {
            return Err(
                StateError::invalid(EntityType::ToolStep, step.id, step.status(), "execute").into(),
            );
        }
        debug!(step_id = %step.id, tool_id = %step.tool_id, "Step executing");

        let params = match resolve_parameters(&step.parameter_mapping, scope) {
            Ok(params) => params,
            Err(errors) => {
                return Err(fail(step, StepFailure::ParameterResolution { errors }));
            }
        };

        if cancel.is_cancelled() {
            return Err(fail(step, StepFailure::Cancelled));
        }

        Ok(PreparedCall {
            step_id: step.id,
            tool_id: step.tool_id.clone(),
            params,
            resource_configs: step.resource_configs.clone(),
        })
    }

    /// The single tool invocation for a prepared step.
    pub fn invoke(
        &self,
        call: PreparedCall,
    ) -> impl Future<Output = Result<ToolOutputs, InvocationError>> + Send + 'static {
        let invoker = Arc::clone(&self.invoker);
        let PreparedCall {
            tool_id,
            params,
            resource_configs,
            ..
        } = call;
        async move { invoker.invoke(&tool_id, params, &resource_configs).await }
    }

    /// executing → completed | failed from the invocation outcome.
    pub fn commit(
        &self,
        step: &mut ToolStep,
        scope: &AssetStore,
        invoked: Result<ToolOutputs, InvocationError>,
    ) -> HopwiseResult<()> {
        if step.status() != ToolStepStatus::Executing {
            return Err(
                StateError::invalid(EntityType::ToolStep, step.id, step.status(), "commit").into(),
            );
        }
        let outputs = match invoked {
            Ok(outputs) => outputs,
            Err(error) => return Err(fail(step, StepFailure::Invocation(error))),
        };

        // Declaration order; writes before a failing entry stay committed.
        let mut written = Vec::new();
        let mut result_error = None;
        for (name, target) in &step.result_mapping {
            match resolve_result(name, target, scope, &outputs) {
                Ok(true) => written.push(name.clone()),
                Ok(false) => {}
                Err(error) => {
                    result_error = Some(error);
                    break;
                }
            }
        }
        if let Some(error) = result_error {
            return Err(fail(step, StepFailure::ResultResolution { error, written }));
        }

        step.complete();
        debug!(
            step_id = %step.id,
            tool_id = %step.tool_id,
            results = written.len(),
            "Step completed"
        );
        Ok(())
    }
}

fn fail(step: &mut ToolStep, failure: StepFailure) -> HopwiseError {
    warn!(step_id = %step.id, tool_id = %step.tool_id, %failure, "Step failed");
    step.fail(failure.clone());
    HopwiseError::StepFailed {
        step_id: step.id,
        failure,
    }
}
