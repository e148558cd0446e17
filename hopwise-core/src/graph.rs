//! Data-dependency graph over a Hop's ToolSteps.
//!
//! A step that reads a scope location depends on every step writing an
//! overlapping location, whatever their declaration order. Steps are
//! grouped into waves: every step in a wave depends only on steps in
//! earlier waves.

use crate::{HopId, ToolStep, ToolStepId, ValidationError};
use std::collections::{BTreeSet, HashSet};

/// Dependencies and execution waves for an ordered list of steps.
/// Steps are referred to by their index in that list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// `depends_on[i]`: indices of steps that must commit before step `i` starts.
    depends_on: Vec<BTreeSet<usize>>,
    waves: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph, rejecting duplicate ids, cycles and unordered overlapping writes.
    pub fn build(hop_id: HopId, steps: &[ToolStep]) -> Result<Self, ValidationError> {
        let mut seen = HashSet::with_capacity(steps.len());
        for step in steps {
            if !seen.insert(step.id) {
                return Err(ValidationError::DuplicateStep {
                    hop_id,
                    step_id: step.id,
                });
            }
        }

        let depends_on = Self::edges(steps);
        let waves = Self::layer(hop_id, steps, &depends_on)?;
        let graph = Self { depends_on, waves };
        graph.check_write_conflicts(steps)?;
        Ok(graph)
    }

    fn edges(steps: &[ToolStep]) -> Vec<BTreeSet<usize>> {
        steps
            .iter()
            .enumerate()
            .map(|(reader_idx, reader)| {
                let reads: Vec<_> = reader
                    .parameter_mapping
                    .values()
                    .filter_map(|m| m.reads())
                    .collect();
                steps
                    .iter()
                    .enumerate()
                    .filter(|(writer_idx, _)| *writer_idx != reader_idx)
                    .filter(|(_, writer)| {
                        writer
                            .result_mapping
                            .values()
                            .filter_map(|t| t.writes())
                            .any(|w| reads.iter().any(|r| r.overlaps(&w)))
                    })
                    .map(|(writer_idx, _)| writer_idx)
                    .collect()
            })
            .collect()
    }

    /// Kahn layering. Within a wave steps keep declaration order.
    fn layer(
        hop_id: HopId,
        steps: &[ToolStep],
        depends_on: &[BTreeSet<usize>],
    ) -> Result<Vec<Vec<usize>>, ValidationError> {
        let mut waves = Vec::new();
        let mut placed = vec![false; steps.len()];
        let mut remaining = steps.len();

        while remaining > 0 {
            let wave: Vec<usize> = (0..steps.len())
                .filter(|&i| !placed[i] && depends_on[i].iter().all(|&d| placed[d]))
                .collect();

            if wave.is_empty() {
                let cycle: Vec<ToolStepId> = (0..steps.len())
                    .filter(|&i| !placed[i])
                    .map(|i| steps[i].id)
                    .collect();
                return Err(ValidationError::CycleDetected {
                    hop_id,
                    steps: cycle,
                });
            }

            for &i in &wave {
                placed[i] = true;
            }
            remaining -= wave.len();
            waves.push(wave);
        }

        Ok(waves)
    }

    fn check_write_conflicts(&self, steps: &[ToolStep]) -> Result<(), ValidationError> {
        let ancestors = self.ancestors();
        for (a, first) in steps.iter().enumerate() {
            for (b, second) in steps.iter().enumerate().skip(a + 1) {
                if ancestors[a].contains(&b) || ancestors[b].contains(&a) {
                    continue;
                }
                for wa in first.result_mapping.values().filter_map(|t| t.writes()) {
                    let clash = second
                        .result_mapping
                        .values()
                        .filter_map(|t| t.writes())
                        .any(|wb| wa.overlaps(&wb));
                    if clash {
                        return Err(ValidationError::WriteConflict {
                            key: wa.key.to_string(),
                            first: first.id,
                            second: second.id,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Transitive dependencies of every step, computed in wave order.
    fn ancestors(&self) -> Vec<BTreeSet<usize>> {
        let mut ancestors = vec![BTreeSet::new(); self.depends_on.len()];
        for wave in &self.waves {
            for &i in wave {
                let mut set = BTreeSet::new();
                for &d in &self.depends_on[i] {
                    set.insert(d);
                    set.extend(ancestors[d].iter().copied());
                }
                ancestors[i] = set;
            }
        }
        ancestors
    }

    /// Step indices grouped into sequential waves.
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    pub fn wave_count(&self) -> usize {
        self.waves.len()
    }

    /// Direct dependencies of step `index`.
    pub fn dependencies(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.depends_on
            .get(index)
            .into_iter()
            .flat_map(|deps| deps.iter().copied())
    }

    /// Execution order flattened across waves.
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        self.waves.iter().flatten().copied()
    }
}
