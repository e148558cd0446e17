//! Mission Orchestrator.
//!
//! Loads a Mission, runs consecutive `impl_ready` Hops and saves around
//! every boundary: after each ToolStep transition (when configured), after
//! each Hop transition and after each Mission transition. It stops as soon as the
//! current Hop needs an external decision.

use crate::cancel::CancelToken;
use crate::hop::{HopHost, HopOrchestrator, HopProgress};
use async_trait::async_trait;
use hopwise_core::{
    AssetStore, EngineConfig, EntityType, Hop, HopStatus, HopwiseResult, Mission, MissionId,
    MissionStatus, StateError, ToolInvoker,
};
use hopwise_storage::MissionRepository;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a [`MissionOrchestrator::run`] call left the Mission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionProgress {
    Completed,
    Failed { hop_index: usize },
    Cancelled,
    /// The current Hop is in a plan/implementation gate.
    AwaitingApproval { hop_index: usize, status: HopStatus },
    /// Every Hop is done but some output Asset is not ready yet.
    AwaitingHops,
}

/// Drives Missions stored in a [`MissionRepository`].
pub struct MissionOrchestrator {
    repo: Arc<dyn MissionRepository>,
    hops: HopOrchestrator,
    config: EngineConfig,
}

impl std::fmt::Debug for MissionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MissionOrchestrator")
            .field("hops", &self.hops)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MissionOrchestrator {
    pub fn new(
        repo: Arc<dyn MissionRepository>,
        invoker: Arc<dyn ToolInvoker>,
        config: EngineConfig,
    ) -> HopwiseResult<Self> {
        config.validate()?;
        Ok(Self {
            repo,
            hops: HopOrchestrator::new(invoker, &config),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<dyn MissionRepository> {
        &self.repo
    }

    /// Persist a new (or externally edited) Mission.
    pub async fn submit(&self, mission: &Mission) -> HopwiseResult<()> {
        self.repo.save_mission(mission).await
    }

    /// Load, mutate, save. Nothing is saved when `f` fails.
    ///
    /// This is how plan/implementation approvals, input provisioning and
    /// Hop replacement reach a stored Mission.
    pub async fn update<T, F>(&self, id: MissionId, f: F) -> HopwiseResult<T>
    where
        F: FnOnce(&mut Mission) -> HopwiseResult<T> + Send,
        T: Send,
    {
        let mut mission = self.repo.load_mission(id).await?;
        let out = f(&mut mission)?;
        self.repo.save_mission(&mission).await?;
        Ok(out)
    }

    /// Read-only JSON view of a stored Mission.
    pub async fn snapshot(&self, id: MissionId) -> HopwiseResult<serde_json::Value> {
        self.repo.load_mission(id).await?.snapshot()
    }

    /// Run the Mission as far as it can go without outside input.
    ///
    /// A Hop that refuses to start (missing or non-ready input) is left
    /// unchanged and the error is returned.
    pub async fn run(&self, id: MissionId, cancel: &CancelToken) -> HopwiseResult<MissionProgress> {
        let mut mission = self.repo.load_mission(id).await?;
        mission.set_write_policy(self.config.write_policy());

        match mission.status() {
            MissionStatus::Completed => return Ok(MissionProgress::Completed),
            MissionStatus::Cancelled => return Ok(MissionProgress::Cancelled),
            MissionStatus::Failed => {
                return Ok(MissionProgress::Failed {
                    hop_index: mission.current_hop_index(),
                })
            }
            MissionStatus::Pending => {
                mission.activate()?;
                self.repo.save_mission(&mission).await?;
                info!(mission_id = %id, "Mission activated");
            }
            MissionStatus::Active => {}
        }

        loop {
            let hop_index = mission.current_hop_index();
            if cancel.is_cancelled() {
                mission.cancel()?;
                self.repo.save_mission(&mission).await?;
                info!(mission_id = %id, hop_index, "Mission cancelled");
                return Ok(MissionProgress::Cancelled);
            }

            match mission.hop_status() {
                None => {
                    if !mission.outputs_ready()? {
                        debug!(mission_id = %id, "Mission awaiting further hops");
                        return Ok(MissionProgress::AwaitingHops);
                    }
                    mission.complete()?;
                    self.repo.save_mission(&mission).await?;
                    info!(mission_id = %id, hops = mission.hops().len(), "Mission completed");
                    return Ok(MissionProgress::Completed);
                }
                Some(HopStatus::Completed) => {
                    mission.advance()?;
                    self.repo.save_mission(&mission).await?;
                }
                Some(HopStatus::ImplReady | HopStatus::Running) => {
                    self.drive_current_hop(&mut mission, cancel).await?;
                }
                Some(HopStatus::Failed) => {
                    mission.fail()?;
                    self.repo.save_mission(&mission).await?;
                    warn!(mission_id = %id, hop_index, "Mission failed");
                    return Ok(MissionProgress::Failed { hop_index });
                }
                Some(HopStatus::Cancelled) => {
                    mission.cancel()?;
                    self.repo.save_mission(&mission).await?;
                    info!(mission_id = %id, hop_index, "Mission cancelled");
                    return Ok(MissionProgress::Cancelled);
                }
                Some(status) => {
                    debug!(mission_id = %id, hop_index, %status, "Hop awaiting approval");
                    return Ok(MissionProgress::AwaitingApproval { hop_index, status });
                }
            }
        }
    }

    /// Run the current Hop to a terminal status, persisting as it goes.
    async fn drive_current_hop(&self, mission: &mut Mission, cancel: &CancelToken) -> HopwiseResult<()> {
        let mut run = {
            let (hop, mission_state) = current_parts(mission)?;
            if hop.status() == HopStatus::Running {
                self.hops.resume(hop)?
            } else {
                self.hops.start(hop, mission_state)?
            }
        };
        self.repo.save_mission(mission).await?;

        let mut host = MissionHost {
            mission,
            repo: self.repo.as_ref(),
            save_steps: self.config.save_after_each_step,
        };
        loop {
            if let HopProgress::Finished(_) = self.hops.advance_in(&mut run, &mut host, cancel).await? {
                self.repo.save_mission(&*host.mission).await?;
                return Ok(());
            }
        }
    }
}

/// The current Hop of a stored Mission; step checkpoints save the whole Mission.
struct MissionHost<'a> {
    mission: &'a mut Mission,
    repo: &'a dyn MissionRepository,
    save_steps: bool,
}

#[async_trait]
impl<'a> HopHost for MissionHost<'a> {
    fn parts(&mut self) -> HopwiseResult<(&mut Hop, &AssetStore)> {
        current_parts(self.mission)
    }

    async fn checkpoint(&mut self) -> HopwiseResult<()> {
        if self.save_steps {
            self.repo.save_mission(&*self.mission).await?;
        }
        Ok(())
    }
}

fn current_parts(mission: &mut Mission) -> HopwiseResult<(&mut Hop, &AssetStore)> {
    let (id, status) = (mission.id, mission.status());
    mission
        .current_hop_parts()
        .ok_or_else(|| StateError::invalid(EntityType::Mission, id, status, "run_hop").into())
}
