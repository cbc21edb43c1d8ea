use serde::Serialize;
use std::path::PathBuf;

use crate::assign::Assigner;
use crate::console::Console;
use crate::error::{Result, SortError};
use crate::naming::short_name;
use crate::prune::{sanity_check, PruneReport, Pruner};
use crate::scheduler::{PassReport, Scheduler};
use crate::store::{ClusterStore, HoldingKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Assigning,
    Pruning,
    Evaluating,
    Escalating,
    Done,
    Failed,
}

/// Where to go after a round's pool sizes are known.
///
/// The pool keeps flowing between assignment and pruning at one threshold
/// while it shrinks. Once it stalls the threshold is raised, and after the
/// last step the run ends.
pub fn next_phase(before: usize, after: usize, last_step: bool) -> Phase {
    if after == 0 {
        Phase::Done
    } else if after < before {
        Phase::Assigning
    } else if last_step {
        Phase::Done
    } else {
        Phase::Escalating
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub threshold: f64,
    pub rounds: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvergenceReport {
    pub phase: Phase,
    pub steps: Vec<StepReport>,
    pub assignment: PassReport,
    pub pruning: PruneReport,
    /// Documents moved to the unsorted holding area at the end
    pub leftovers: usize,
    pub clusters: usize,
    /// Clusters that failed the sanity check
    pub violations: Vec<PathBuf>,
}

/// Repeats assignment and pruning at rising thresholds until the input pool
/// stops changing.
pub struct Convergence<'a> {
    store: &'a ClusterStore,
    assigner: &'a Assigner<'a>,
    pruner: &'a Pruner<'a>,
    scheduler: &'a Scheduler,
    console: Console,
    schedule: Vec<f64>,
    ceiling: f64,
    phase: Phase,
    step: usize,
    pool_before: usize,
    report: ConvergenceReport,
}

impl<'a> Convergence<'a> {
    /// `schedule` must be non-empty and ascending; pruning always runs at `ceiling`.
    pub fn new(
        store: &'a ClusterStore,
        assigner: &'a Assigner<'a>,
        pruner: &'a Pruner<'a>,
        scheduler: &'a Scheduler,
        schedule: Vec<f64>,
        ceiling: f64,
        console: Console,
    ) -> Self {
        let first = schedule.first().copied().unwrap_or(ceiling);
        let schedule = if schedule.is_empty() { vec![ceiling] } else { schedule };
        Convergence {
            store,
            assigner,
            pruner,
            scheduler,
            console,
            schedule,
            ceiling,
            phase: Phase::Assigning,
            step: 0,
            pool_before: 0,
            report: ConvergenceReport {
                phase: Phase::Assigning,
                steps: vec![StepReport {
                    threshold: first,
                    rounds: 0,
                    remaining: 0,
                }],
                assignment: PassReport::default(),
                pruning: PruneReport::default(),
                leftovers: 0,
                clusters: 0,
                violations: Vec::new(),
            },
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn threshold(&self) -> f64 {
        self.schedule[self.step]
    }

    fn is_last_step(&self) -> bool {
        self.step + 1 >= self.schedule.len()
    }

    /// Do the work of the current phase and move to the next one.
    pub fn advance(&mut self) -> Result<Phase> {
        self.phase = match self.phase {
            Phase::Assigning => {
                let threshold = self.threshold();
                self.pool_before = self.store.pool_count()?;
                self.console.rule();
                self.console
                    .heading(format!("Sorting {} files at {}%", self.pool_before, threshold));
                self.report.assignment += self.scheduler.run_pass(self.assigner, threshold)?;
                if let Some(step) = self.report.steps.last_mut() {
                    step.rounds += 1;
                }
                Phase::Pruning
            }
            Phase::Pruning => {
                self.console.rule();
                self.console
                    .heading(format!("Pruning similar files at {}%", self.ceiling));
                let pruned = self.pruner.prune_all(self.ceiling)?;
                self.console.warn(format!("{} files removed.", pruned.pruned));
                self.report.pruning += pruned;
                Phase::Evaluating
            }
            Phase::Evaluating => {
                let failed = sanity_check(self.store)?;
                if !failed.is_empty() {
                    self.console.rule();
                    self.console.danger("Directories without exactly one file:");
                    for cluster in &failed {
                        self.console.danger(format!("  {}", cluster.name()));
                    }
                    self.report.violations =
                        failed.iter().map(|c| c.path().to_path_buf()).collect();
                    Phase::Failed
                } else {
                    let after = self.store.pool_count()?;
                    if let Some(step) = self.report.steps.last_mut() {
                        step.remaining = after;
                    }
                    let next = next_phase(self.pool_before, after, self.is_last_step());
                    if next == Phase::Done && after > 0 {
                        self.report.leftovers = self.set_aside_leftovers()?;
                    } else if next == Phase::Escalating {
                        self.console
                            .danger(format!("{} files could not be sorted at {}%.", after, self.threshold()));
                    }
                    next
                }
            }
            Phase::Escalating => {
                self.step += 1;
                let threshold = self.threshold();
                self.report.steps.push(StepReport {
                    threshold,
                    rounds: 0,
                    remaining: 0,
                });
                self.console
                    .heading(format!("Raising sort threshold to {}%", threshold));
                Phase::Assigning
            }
            done @ (Phase::Done | Phase::Failed) => done,
        };
        self.report.phase = self.phase;
        Ok(self.phase)
    }

    /// Drive the state machine to the end. A failed sanity check is an error.
    pub fn run(mut self) -> Result<ConvergenceReport> {
        while !matches!(self.phase(), Phase::Done | Phase::Failed) {
            self.advance()?;
        }
        if self.phase == Phase::Failed {
            return Err(SortError::SanityViolation {
                clusters: self.report.violations,
            });
        }
        self.report.clusters = self.store.list_clusters()?.len();
        self.console.rule();
        self.console
            .heading(format!("{} clusters, {} files set aside.", self.report.clusters, self.report.leftovers));
        Ok(self.report)
    }

    fn set_aside_leftovers(&self) -> Result<usize> {
        let mut moved = 0;
        for file in self.store.pool_files()? {
            match self.store.route_to_holding(HoldingKind::Unsorted, &file) {
                Ok(_) => {
                    self.console
                        .danger(format!("  {} could not be sorted -> unsorted", short_name(&file, 30)));
                    moved += 1;
                }
                Err(e) => self.console.error(format!("{}: {}", short_name(&file, 30), e)),
            }
        }
        Ok(moved)
    }
}
