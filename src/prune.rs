use serde::Serialize;
use std::ops::AddAssign;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::console::Console;
use crate::error::{Result, SortError};
use crate::extract::{read_text, ExtractError, TextExtractor};
use crate::naming::short_name;
use crate::similarity::{compare_to_document, tokenize};
use crate::store::{Cluster, ClusterStore, HoldingKind};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    /// Members deleted as duplicates of their representative
    pub pruned: usize,
    /// Members sent back to the input pool
    pub returned: usize,
    pub unreadable: usize,
    pub removed_clusters: usize,
    /// Documents left where they were after an error
    pub failed: usize,
}

impl AddAssign for PruneReport {
    fn add_assign(&mut self, other: PruneReport) {
        self.pruned += other.pruned;
        self.returned += other.returned;
        self.unreadable += other.unreadable;
        self.removed_clusters += other.removed_clusters;
        self.failed += other.failed;
    }
}

/// What happened to one non-representative member.
enum Verdict {
    Pruned,
    Returned,
    Unreadable,
    /// The representative could not be read. Nothing was moved.
    NoRepresentative(ExtractError),
}

/// Collapses each cluster down to its representative.
///
/// Deletion is irreversible, so this should only ever run at a near-maximum
/// threshold.
pub struct Pruner<'a> {
    store: &'a ClusterStore,
    extractor: &'a dyn TextExtractor,
    console: Console,
    prefix_len: usize,
}

impl<'a> Pruner<'a> {
    pub fn new(
        store: &'a ClusterStore,
        extractor: &'a dyn TextExtractor,
        config: &Config,
        console: Console,
    ) -> Self {
        Pruner {
            store,
            extractor,
            console,
            prefix_len: config.prefix_len,
        }
    }

    /// Compare every non-representative member to the representative.
    /// Matches at or above `ceiling` are deleted; the rest go back to the
    /// input pool. An emptied cluster directory is removed.
    ///
    /// A member that cannot be moved or deleted is reported, counted as
    /// failed and left in place.
    pub fn prune_cluster(&self, cluster: &Cluster, ceiling: f64) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        let members = cluster.members()?;

        if members.len() > 1 {
            if let Some(rep) = self.store.representative_of(cluster)? {
                let mut rep_unreadable = false;

                for member in members.iter().filter(|m| m.path != rep.path) {
                    let name = short_name(&member.path, 30);
                    let outcome = if rep_unreadable {
                        self.return_to_pool(&member.path, &name, None)
                            .map(|()| Verdict::Returned)
                    } else {
                        self.prune_member(cluster, &member.path, &name, &rep.path, ceiling)
                    };

                    match outcome {
                        Ok(Verdict::Pruned) => report.pruned += 1,
                        Ok(Verdict::Returned) => report.returned += 1,
                        Ok(Verdict::Unreadable) => report.unreadable += 1,
                        Ok(Verdict::NoRepresentative(cause)) => {
                            // Without a readable representative nothing here can be trusted.
                            rep_unreadable = true;
                            self.console.danger(format!(
                                "  {} -> unreadable because {}",
                                short_name(&rep.path, 30),
                                cause
                            ));
                            match self.store.route_to_holding(HoldingKind::Unreadable, &rep.path) {
                                Ok(_) => report.unreadable += 1,
                                Err(e) => self.contain(&rep.path, &e, &mut report),
                            }
                            match self.return_to_pool(&member.path, &name, None) {
                                Ok(()) => report.returned += 1,
                                Err(e) => self.contain(&member.path, &e, &mut report),
                            }
                        }
                        Err(e) => self.contain(&member.path, &e, &mut report),
                    }
                }
            }
        }

        match self.store.reclaim_if_empty(cluster) {
            Ok(true) => {
                self.console
                    .warn(format!("  Deleting empty /{}", short_name(cluster.path(), 40)));
                report.removed_clusters += 1;
            }
            Ok(false) => {}
            Err(e) => self
                .console
                .error(format!("/{}: {}", short_name(cluster.path(), 40), e)),
        }
        Ok(report)
    }

    pub fn prune_all(&self, ceiling: f64) -> Result<PruneReport> {
        let mut report = PruneReport::default();
        for cluster in self.store.list_clusters()? {
            if cluster.member_count()? > 1 {
                self.console
                    .progress(format!("Working in /{}", short_name(cluster.path(), 40)));
            }
            match self.prune_cluster(&cluster, ceiling) {
                Ok(pruned) => report += pruned,
                Err(e) => self
                    .console
                    .error(format!("/{}: {}", short_name(cluster.path(), 40), e)),
            }
        }
        Ok(report)
    }

    fn prune_member(
        &self,
        cluster: &Cluster,
        member: &Path,
        name: &str,
        rep: &Path,
        ceiling: f64,
    ) -> Result<Verdict> {
        let text = match read_text(self.extractor, member, None) {
            Ok(text) => text,
            Err(e) => {
                self.console.danger(format!("  {} -> unreadable because {}", name, e));
                self.store.route_to_holding(HoldingKind::Unreadable, member)?;
                return Ok(Verdict::Unreadable);
            }
        };

        match compare_to_document(&tokenize(&text), rep, ceiling, self.prefix_len, self.extractor) {
            Ok(score) if score >= ceiling => {
                self.store.remove_member(cluster, member)?;
                self.console
                    .warn(format!("  {} match {:.2}% -> Deleted.", name, score));
                Ok(Verdict::Pruned)
            }
            Ok(score) => {
                self.return_to_pool(member, name, Some(score))?;
                Ok(Verdict::Returned)
            }
            Err(e) => Ok(Verdict::NoRepresentative(e)),
        }
    }

    fn return_to_pool(&self, member: &Path, name: &str, score: Option<f64>) -> Result<()> {
        let pool = short_name(self.store.source_dir(), 30);
        match score {
            Some(score) => self.console.info(format!(
                "  {} match {:.2}% -> Returned to /{}",
                name, score, pool
            )),
            None => self.console.info(format!("  {} -> Returned to /{}", name, pool)),
        }
        self.store.release_to_pool(member)?;
        Ok(())
    }

    fn contain(&self, doc: &Path, error: &SortError, report: &mut PruneReport) {
        report.failed += 1;
        let name = short_name(doc, 30);
        if error.is_per_document() {
            self.console
                .danger(format!("  {} left in place: {}", name, error));
        } else {
            self.console.error(format!("{}: {}", name, error));
        }
    }
}

/// Clusters that do not hold exactly one document.
pub fn sanity_check(store: &ClusterStore) -> Result<Vec<Cluster>> {
    let mut failed = Vec::new();
    for cluster in store.list_clusters()? {
        if cluster.member_count()? != 1 {
            failed.push(cluster);
        }
    }
    Ok(failed)
}

/// Report every violating cluster and fail if there is any.
pub fn ensure_converged(store: &ClusterStore, console: Console) -> Result<()> {
    let failed = sanity_check(store)?;
    if failed.is_empty() {
        return Ok(());
    }
    console.rule();
    console.danger("Directories without exactly one file:");
    for cluster in &failed {
        console.danger(format!("  {}", cluster.name()));
    }
    Err(SortError::SanityViolation {
        clusters: failed.iter().map(|c| c.path().to_path_buf()).collect::<Vec<PathBuf>>(),
    })
}
