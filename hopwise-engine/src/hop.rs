//! Hop Orchestrator.
//!
//! Runs a Hop's ToolSteps wave by wave. Steps in a wave have no ordering
//! constraint between them and run concurrently, bounded by a semaphore;
//! waves are strictly sequential so a reader never starts before its
//! producers have committed.
//!
//! Execution is exposed one wave at a time ([`HopOrchestrator::advance`]).
//! Within a wave every step transition (to `executing`, then to a terminal
//! status) is reported to a [`HopHost`] checkpoint before the run goes on,
//! so a stored Hop never shows a step as `pending` once its tool was called.

use crate::cancel::CancelToken;
use crate::executor::StepExecutor;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use hopwise_core::{
    AssetStore, DependencyGraph, EngineConfig, EntityType, Hop, HopId, HopStatus, HopwiseError,
    HopwiseResult, InvocationError, StateError, StepFailure, ToolInvoker, ToolStepId,
    ToolStepStatus,
};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Owner of the Hop being driven.
///
/// `parts` is called again after every await point, so the host may
/// persist whatever contains the Hop in `checkpoint`.
#[async_trait]
pub trait HopHost: Send {
    /// The Hop and the Mission Asset Store its outputs are projected into.
    fn parts(&mut self) -> HopwiseResult<(&mut Hop, &AssetStore)>;

    /// Called after each step transition.
    async fn checkpoint(&mut self) -> HopwiseResult<()>;
}

/// A Hop held outside any Mission; checkpoints are no-ops.
struct Detached<'a> {
    hop: &'a mut Hop,
    mission_state: &'a AssetStore,
}

#[async_trait]
impl<'a> HopHost for Detached<'a> {
    fn parts(&mut self) -> HopwiseResult<(&mut Hop, &AssetStore)> {
        Ok((&mut *self.hop, self.mission_state))
    }

    async fn checkpoint(&mut self) -> HopwiseResult<()> {
        Ok(())
    }
}

/// Failures and interruptions collected over one wave.
#[derive(Default)]
struct WaveTally {
    failures: Vec<String>,
    interrupted: bool,
}

impl WaveTally {
    fn record(&mut self, run: &mut HopRun, index: usize, outcome: HopwiseResult<()>) {
        match outcome {
            Ok(()) => run.executed.push(index),
            Err(HopwiseError::StepFailed {
                failure: StepFailure::Cancelled,
                ..
            }) => {
                run.executed.push(index);
                self.interrupted = true;
            }
            Err(HopwiseError::StepFailed { step_id, failure }) => {
                run.executed.push(index);
                self.failures.push(format!("step {step_id}: {failure}"));
            }
            Err(other) => self.failures.push(other.to_string()),
        }
    }
}

/// Outcome of one [`HopOrchestrator::advance`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopProgress {
    /// Wave `wave` finished and every step in it completed.
    WaveCompleted { wave: usize },
    /// The Hop reached a terminal status.
    Finished(HopStatus),
}

/// Cursor over a running Hop's waves.
#[derive(Debug, Clone)]
pub struct HopRun {
    hop_id: HopId,
    graph: DependencyGraph,
    next_wave: usize,
    waves_executed: usize,
    executed: Vec<usize>,
}

impl HopRun {
    fn new(hop_id: HopId, graph: DependencyGraph) -> Self {
        Self {
            hop_id,
            graph,
            next_wave: 0,
            waves_executed: 0,
            executed: Vec::new(),
        }
    }

    pub fn hop_id(&self) -> HopId {
        self.hop_id
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Index of the next wave to run.
    pub fn next_wave(&self) -> usize {
        self.next_wave
    }

    pub fn waves_remaining(&self) -> usize {
        self.graph.wave_count().saturating_sub(self.next_wave)
    }

    /// Summarize the run against the Hop it drove.
    pub fn report(&self, hop: &Hop) -> HopReport {
        let steps = hop.tool_steps();
        let executed: Vec<_> = self.executed.iter().filter_map(|&i| steps.get(i)).collect();
        HopReport {
            hop_id: hop.id,
            status: hop.status(),
            steps: executed.iter().map(|step| (step.id, step.status())).collect(),
            waves_executed: self.waves_executed,
            failures: executed
                .iter()
                .filter_map(|step| step.failure().map(|f| (step.id, f.clone())))
                .collect(),
        }
    }
}

/// Result of executing a Hop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HopReport {
    pub hop_id: HopId,
    pub status: HopStatus,
    /// Steps that were started, in execution order.
    pub steps: Vec<(ToolStepId, ToolStepStatus)>,
    pub waves_executed: usize,
    pub failures: Vec<(ToolStepId, StepFailure)>,
}

impl HopReport {
    pub fn step_status(&self, step_id: ToolStepId) -> Option<ToolStepStatus> {
        self.steps
            .iter()
            .find(|(id, _)| *id == step_id)
            .map(|(_, status)| *status)
    }

    /// Position of `step_id` in execution order.
    pub fn position(&self, step_id: ToolStepId) -> Option<usize> {
        self.steps.iter().position(|(id, _)| *id == step_id)
    }
}

/// Drives Hops from `impl_ready` to a terminal status.
#[derive(Debug, Clone)]
pub struct HopOrchestrator {
    executor: StepExecutor,
    semaphore: Arc<Semaphore>,
}

impl HopOrchestrator {
    pub fn new(invoker: Arc<dyn ToolInvoker>, config: &EngineConfig) -> Self {
        Self {
            executor: StepExecutor::new(invoker),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_steps.max(1))),
        }
    }

    /// Project inputs and build the wave plan: impl_ready → running.
    ///
    /// On refusal (`UnresolvedAsset`, `AssetNotReady`, validation) the Hop is unchanged.
    pub fn start(&self, hop: &mut Hop, mission_state: &AssetStore) -> HopwiseResult<HopRun> {
        let graph = hop.begin(mission_state)?;
        info!(
            hop_id = %hop.id,
            steps = hop.tool_steps().len(),
            waves = graph.wave_count(),
            "Hop started"
        );
        Ok(HopRun::new(hop.id, graph))
    }

    /// Pick up a Hop left `running` by an earlier process.
    ///
    /// Steps caught mid-invocation are failed as interrupted rather than
    /// invoked again. Completed waves are skipped.
    pub fn resume(&self, hop: &mut Hop) -> HopwiseResult<HopRun> {
        if hop.status() != HopStatus::Running {
            return Err(StateError::invalid(EntityType::Hop, hop.id, hop.status(), "resume").into());
        }
        let graph = DependencyGraph::build(hop.id, hop.tool_steps())?;

        let (steps, _) = hop.execution_parts();
        for step in steps.iter_mut() {
            if step.status() == ToolStepStatus::Executing {
                let tool_id = step.tool_id.clone();
                warn!(step_id = %step.id, tool_id = %tool_id, "Step interrupted mid-invocation");
                step.fail(StepFailure::Invocation(InvocationError::cancelled(
                    tool_id,
                    "interrupted before completion",
                )));
            }
        }

        let mut run = HopRun::new(hop.id, graph);
        let steps = hop.tool_steps();
        run.executed = run
            .graph
            .order()
            .filter(|&i| steps[i].status().is_terminal())
            .collect();
        run.next_wave = run
            .graph
            .waves()
            .iter()
            .position(|wave| wave.iter().any(|&i| steps[i].status() != ToolStepStatus::Completed))
            .unwrap_or(run.graph.wave_count());
        run.waves_executed = run.next_wave;

        let failed = steps
            .iter()
            .find_map(|step| step.failure().map(|f| format!("step {}: {f}", step.id)));
        if let Some(reason) = failed {
            hop.fail(reason)?;
        }
        info!(hop_id = %hop.id, next_wave = run.next_wave, status = %hop.status(), "Hop resumed");
        Ok(run)
    }

    /// Run the next wave of a Hop held outside a Mission, or finish it.
    pub async fn advance(
        &self,
        run: &mut HopRun,
        hop: &mut Hop,
        mission_state: &AssetStore,
        cancel: &CancelToken,
    ) -> HopwiseResult<HopProgress> {
        let mut host = Detached { hop, mission_state };
        self.advance_in(run, &mut host, cancel).await
    }

    /// Run the next wave, or finish the Hop when none is left.
    ///
    /// Steps start in wave order as semaphore permits free up. Each one is
    /// checkpointed once it is `executing` (before its tool is called) and
    /// again once it is terminal. A failed sibling does not stop the rest
    /// of the wave; cancellation stops new starts and lets in-flight
    /// invocations finish.
    pub async fn advance_in<H: HopHost>(
        &self,
        run: &mut HopRun,
        host: &mut H,
        cancel: &CancelToken,
    ) -> HopwiseResult<HopProgress> {
        let wave_index = run.next_wave;
        let mut queue: VecDeque<usize> = {
            let (hop, mission_state) = host.parts()?;
            if hop.id != run.hop_id {
                return Err(StateError::invalid(EntityType::Hop, hop.id, hop.status(), "advance").into());
            }
            if hop.status().is_terminal() {
                return Ok(HopProgress::Finished(hop.status()));
            }
            if hop.status() != HopStatus::Running {
                return Err(StateError::invalid(EntityType::Hop, hop.id, hop.status(), "advance").into());
            }
            if cancel.is_cancelled() {
                return self.cancel(hop);
            }
            let Some(wave) = run.graph.waves().get(wave_index) else {
                return self.finish(hop, mission_state);
            };
            let steps = hop.tool_steps();
            wave.iter()
                .copied()
                .filter(|&i| steps.get(i).is_some_and(|s| s.status() == ToolStepStatus::Pending))
                .collect()
        };
        let wave_len = queue.len();

        let mut in_flight = FuturesUnordered::new();
        let mut tally = WaveTally::default();
        loop {
            while !tally.interrupted {
                let Some(&index) = queue.front() else { break };
                let Some(permit) = self.next_permit(in_flight.is_empty(), cancel).await else {
                    if in_flight.is_empty() {
                        tally.interrupted = true;
                    }
                    break;
                };
                if cancel.is_cancelled() {
                    tally.interrupted = true;
                    break;
                }
                queue.pop_front();

                let prepared = {
                    let (hop, _) = host.parts()?;
                    let (steps, scope) = hop.execution_parts();
                    self.executor.prepare(&mut steps[index], scope, cancel)
                };
                host.checkpoint().await?;
                match prepared {
                    Ok(call) => {
                        let invocation = self.executor.invoke(call);
                        in_flight.push(async move {
                            let outcome = invocation.await;
                            drop(permit);
                            (index, outcome)
                        });
                    }
                    Err(error) => tally.record(run, index, Err(error)),
                }
            }

            let Some((index, invoked)) = in_flight.next().await else {
                break;
            };
            let committed = {
                let (hop, _) = host.parts()?;
                let (steps, scope) = hop.execution_parts();
                self.executor.commit(&mut steps[index], scope, invoked)
            };
            host.checkpoint().await?;
            tally.record(run, index, committed);
        }
        run.waves_executed += 1;

        let (hop, _) = host.parts()?;
        if !tally.failures.is_empty() {
            let reason = tally.failures.join("; ");
            warn!(hop_id = %hop.id, wave = wave_index, %reason, "Hop failed");
            hop.fail(reason)?;
            return Ok(HopProgress::Finished(HopStatus::Failed));
        }
        if tally.interrupted || !queue.is_empty() {
            return self.cancel(hop);
        }

        run.next_wave += 1;
        debug!(hop_id = %hop.id, wave = wave_index, steps = wave_len, "Wave completed");
        Ok(HopProgress::WaveCompleted { wave: wave_index })
    }

    /// A permit for the next step start.
    ///
    /// Only waits when nothing is in flight; otherwise the caller should
    /// drain a finished invocation first. `None` once cancellation wins
    /// the wait or no permit is free.
    async fn next_permit(&self, idle: bool, cancel: &CancelToken) -> Option<OwnedSemaphorePermit> {
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Some(permit);
        }
        if !idle {
            return None;
        }
        tokio::select! {
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
            () = cancel.cancelled() => None,
        }
    }

    /// Start `hop` and drive it to a terminal status.
    pub async fn execute(
        &self,
        hop: &mut Hop,
        mission_state: &AssetStore,
        cancel: &CancelToken,
    ) -> HopwiseResult<HopReport> {
        let mut run = self.start(hop, mission_state)?;
        loop {
            if let HopProgress::Finished(_) = self.advance(&mut run, hop, mission_state, cancel).await? {
                return Ok(run.report(hop));
            }
        }
    }

    fn finish(&self, hop: &mut Hop, mission_state: &AssetStore) -> HopwiseResult<HopProgress> {
        match hop.finish(mission_state) {
            Ok(()) => {
                info!(hop_id = %hop.id, "Hop completed");
                Ok(HopProgress::Finished(HopStatus::Completed))
            }
            Err(error) => {
                warn!(hop_id = %hop.id, %error, "Hop outputs could not be projected");
                hop.fail(error.to_string())?;
                Ok(HopProgress::Finished(HopStatus::Failed))
            }
        }
    }

    fn cancel(&self, hop: &mut Hop) -> HopwiseResult<HopProgress> {
        hop.cancel()?;
        info!(hop_id = %hop.id, "Hop cancelled");
        Ok(HopProgress::Finished(HopStatus::Cancelled))
    }
}
