use rayon::prelude::*;
use serde::Serialize;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::assign::{Assigner, Assignment};
use crate::config::Config;
use crate::console::Console;
use crate::error::{Result, SortError};
use crate::naming::short_name;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub attempted: usize,
    pub joined: usize,
    pub created: usize,
    pub unreadable: usize,
    pub unsaveable: usize,
    /// Documents left where they were after an error
    pub failed: usize,
}

impl PassReport {
    fn record(&mut self, outcome: &Result<Assignment>) {
        self.attempted += 1;
        match outcome {
            Ok(Assignment::Joined { .. }) => self.joined += 1,
            Ok(Assignment::Created { .. }) => self.created += 1,
            Ok(Assignment::Unreadable { .. }) => self.unreadable += 1,
            Ok(Assignment::Unsaveable { .. }) => self.unsaveable += 1,
            Err(_) => self.failed += 1,
        }
    }
}

impl AddAssign for PassReport {
    fn add_assign(&mut self, other: PassReport) {
        self.attempted += other.attempted;
        self.joined += other.joined;
        self.created += other.created;
        self.unreadable += other.unreadable;
        self.unsaveable += other.unsaveable;
        self.failed += other.failed;
    }
}

/// Runs assignment over the input pool in batches on a fixed worker pool.
pub struct Scheduler {
    pool: rayon::ThreadPool,
    workers: usize,
    batch_len: usize,
    progress_every: Duration,
    console: Console,
}

impl Scheduler {
    pub fn new(config: &Config, console: Console) -> Result<Self> {
        let workers = config.worker_count();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("recluster-worker-{}", i))
            .build()?;
        Ok(Scheduler {
            pool,
            workers,
            batch_len: config.batch_len(),
            progress_every: config.progress_interval(),
            console,
        })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// One pass over a snapshot of the input pool. Errors are contained per
    /// document: they are reported and counted, never propagated.
    pub fn run_pass(&self, assigner: &Assigner<'_>, threshold: f64) -> Result<PassReport> {
        let files = assigner.store().pool_files()?;
        let started = Instant::now();
        let mut last_progress = started;
        let mut report = PassReport::default();

        self.console.progress(format!(
            "{} files remaining, {} workers, threshold {}%",
            files.len(),
            self.workers,
            threshold
        ));

        for batch in batches(&files, self.batch_len) {
            if last_progress.elapsed() >= self.progress_every {
                let remaining = assigner.store().pool_count()?;
                self.console.warn(format!(
                    "{:.0?} elapsed: {} files remaining",
                    started.elapsed(),
                    remaining
                ));
                last_progress = Instant::now();
            }

            let names: Vec<String> = batch.iter().map(|f| short_name(f, 30)).collect();
            self.console
                .progress(format!("Working on\n  {}", names.join("\n  ")));

            let outcomes: Vec<(PathBuf, Result<Assignment>)> = self.pool.install(|| {
                batch
                    .par_iter()
                    .map(|doc| (doc.clone(), assigner.assign(doc, threshold)))
                    .collect()
            });

            for (doc, outcome) in &outcomes {
                report.record(outcome);
                if let Err(e) = outcome {
                    self.report_failure(doc, e);
                }
            }
        }

        Ok(report)
    }

    fn report_failure(&self, doc: &Path, error: &SortError) {
        let name = short_name(doc, 30);
        if error.is_per_document() {
            self.console
                .danger(format!("  {} left in place: {}", name, error));
        } else {
            self.console.error(format!("{}: {}", name, error));
        }
    }
}

/// Split a file listing into consecutive batches of at most `size` files.
pub fn batches(files: &[PathBuf], size: usize) -> impl Iterator<Item = &[PathBuf]> {
    files.chunks(size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::RtfExtractor;
    use crate::store::tests::layout;
    use crate::store::{ClusterStore, HoldingKind};
    use pretty_assertions::assert_eq;
    use std::fs;

    #[test]
    fn test_batches() {
        let files: Vec<PathBuf> = (0..7).map(|i| PathBuf::from(format!("{}.rtf", i))).collect();
        let sizes: Vec<usize> = batches(&files, 3).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches(&files, 0).count(), 7);
        assert_eq!(batches(&[], 4).count(), 0);
    }

    #[test]
    fn test_pass_assigns_whole_pool_and_contains_failures() {
        let (_tmp, config) = layout();
        let console = Console::new(true);
        let store = ClusterStore::open(&config, console).unwrap();
        let assigner = Assigner::new(&store, &RtfExtractor, &config, console);
        let scheduler = Scheduler::new(&config, console).unwrap();

        fs::write(config.source_dir.join("a.rtf"), "minutes of the meeting").unwrap();
        fs::write(config.source_dir.join("b.rtf"), "recipe for lemon cake").unwrap();
        fs::write(config.source_dir.join("c.rtf"), "shopping list eggs milk").unwrap();
        fs::write(config.source_dir.join("d.rtf"), b"\xff bad bytes").unwrap();

        let report = scheduler.run_pass(&assigner, 70.0).unwrap();

        assert_eq!(report.attempted, 4);
        assert_eq!(report.unreadable, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.joined + report.created, 3);
        assert_eq!(store.pool_count().unwrap(), 0);
        assert_eq!(store.holding_files(HoldingKind::Unreadable).unwrap().len(), 1);
    }

    #[test]
    fn test_pass_over_empty_pool() {
        let (_tmp, config) = layout();
        let console = Console::new(true);
        let store = ClusterStore::open(&config, console).unwrap();
        let assigner = Assigner::new(&store, &RtfExtractor, &config, console);
        let scheduler = Scheduler::new(&config, console).unwrap();

        assert_eq!(scheduler.run_pass(&assigner, 70.0).unwrap(), PassReport::default());
    }
}
