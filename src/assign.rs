use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::console::Console;
use crate::error::{Result, SortError};
use crate::extract::{read_text, ExtractError, TextExtractor};
use crate::naming::short_name;
use crate::similarity::{compare_to_document, tokenize, TokenSet};
use crate::store::{Cluster, ClusterStore, HoldingKind};

/// Where one document ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    /// Attached to an existing cluster that scored at least the threshold
    Joined {
        cluster: Cluster,
        score: f64,
        path: PathBuf,
    },
    /// Seeded a new cluster; `best` is the highest score seen, if any
    Created {
        cluster: Cluster,
        best: Option<f64>,
        path: PathBuf,
    },
    Unreadable {
        path: PathBuf,
    },
    Unsaveable {
        path: PathBuf,
    },
}

/// What `assign` would do with a document, without moving anything.
#[derive(Debug, Clone, PartialEq)]
pub enum Preview {
    Join { cluster: Cluster, score: f64 },
    /// A new cluster under `name`; `best` is the highest score seen, if any
    Create { name: String, best: Option<f64> },
    Unreadable,
}

/// Places one input document into the best matching cluster, or a new one.
///
/// Cluster state is re-read for every document since other workers may be
/// moving files at the same time.
pub struct Assigner<'a> {
    store: &'a ClusterStore,
    extractor: &'a dyn TextExtractor,
    console: Console,
    prefix_len: usize,
}

impl<'a> Assigner<'a> {
    pub fn new(
        store: &'a ClusterStore,
        extractor: &'a dyn TextExtractor,
        config: &Config,
        console: Console,
    ) -> Self {
        Assigner {
            store,
            extractor,
            console,
            prefix_len: config.prefix_len,
        }
    }

    pub fn store(&self) -> &ClusterStore {
        self.store
    }

    /// The highest scoring cluster. The first cluster (by name) wins ties.
    pub fn best_match(&self, tokens: &TokenSet, threshold: f64) -> Result<Option<(Cluster, f64)>> {
        let mut best: Option<(Cluster, f64)> = None;

        for cluster in self.store.list_clusters()? {
            let Some(rep) = self.store.representative_of(&cluster)? else {
                continue;
            };
            match compare_to_document(tokens, &rep.path, threshold, self.prefix_len, self.extractor) {
                Ok(score) => {
                    if best.as_ref().map_or(true, |(_, top)| score > *top) {
                        best = Some((cluster, score));
                    }
                }
                Err(e) => {
                    self.console.warn(format!(
                        "  Skipping /{}: cannot read {} because {}",
                        short_name(cluster.path(), 30),
                        short_name(&rep.path, 30),
                        e
                    ));
                }
            }
        }

        Ok(best)
    }

    pub fn assign(&self, document: &Path, threshold: f64) -> Result<Assignment> {
        let name = short_name(document, 30);

        let text = match read_text(self.extractor, document, None) {
            Ok(text) => text,
            Err(ExtractError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(e.into());
            }
            Err(source) => {
                let cause = SortError::Extraction {
                    path: document.to_path_buf(),
                    source,
                };
                self.console.danger(format!("  {} -> unreadable: {}", name, cause));
                let path = self.store.route_to_holding(HoldingKind::Unreadable, document)?;
                return Ok(Assignment::Unreadable { path });
            }
        };

        let tokens = tokenize(&text);
        let best = self.best_match(&tokens, threshold)?;
        let top = best.as_ref().map(|(_, score)| *score);

        let (cluster, joined) = match best {
            Some((cluster, score)) if score >= threshold => {
                self.console.info(format!(
                    "  {} match: {:.2}% in /{}",
                    name,
                    score,
                    short_name(cluster.path(), 30)
                ));
                (cluster, Some(score))
            }
            other => {
                match &other {
                    Some((_, score)) => self
                        .console
                        .warn(format!("  {} match {:.2}% < {}%", name, score, threshold)),
                    None => self.console.warn(format!("  {}: no clusters to compare with", name)),
                }
                match self.store.create_cluster(&text) {
                    Ok(cluster) => (cluster, None),
                    Err(e @ SortError::NameTooLong { .. }) => {
                        return self.save_elsewhere(document, &name, &e);
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match self.store.add_to_cluster(&cluster, document, &text) {
            Ok(path) => {
                self.console.info(format!(
                    "  {} -> /{}/{}",
                    name,
                    short_name(cluster.path(), 30),
                    short_name(&path, 30)
                ));
                Ok(match joined {
                    Some(score) => Assignment::Joined { cluster, score, path },
                    None => Assignment::Created {
                        cluster,
                        best: top,
                        path,
                    },
                })
            }
            Err(e) => {
                if joined.is_none() {
                    if let Err(reclaim) = self.store.reclaim_if_empty(&cluster) {
                        self.console
                            .warn(format!("  Could not remove /{}: {}", short_name(cluster.path(), 30), reclaim));
                    }
                }
                self.save_elsewhere(document, &name, &e)
            }
        }
    }

    /// Score `document` the way `assign` does and report the decision.
    /// Nothing on disk changes.
    pub fn preview(&self, document: &Path, threshold: f64) -> Result<Preview> {
        let name = short_name(document, 30);

        let text = match read_text(self.extractor, document, None) {
            Ok(text) => text,
            Err(ExtractError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                return Err(e.into());
            }
            Err(e) => {
                self.console.danger(format!("  {} would be unreadable because {}", name, e));
                return Ok(Preview::Unreadable);
            }
        };

        match self.best_match(&tokenize(&text), threshold)? {
            Some((cluster, score)) if score >= threshold => {
                self.console.info(format!(
                    "  {} match: {:.2}% -> would join /{}",
                    name,
                    score,
                    short_name(cluster.path(), 30)
                ));
                Ok(Preview::Join { cluster, score })
            }
            other => {
                let best = other.map(|(_, score)| score);
                let proposed = self.store.proposed_name(&text);
                match best {
                    Some(score) => self.console.warn(format!(
                        "  {} match {:.2}% < {}% -> would create /{}",
                        name,
                        score,
                        threshold,
                        short_name(Path::new(&proposed), 30)
                    )),
                    None => self.console.warn(format!(
                        "  {} -> would create /{}",
                        name,
                        short_name(Path::new(&proposed), 30)
                    )),
                }
                Ok(Preview::Create { name: proposed, best })
            }
        }
    }

    fn save_elsewhere(&self, document: &Path, name: &str, cause: &SortError) -> Result<Assignment> {
        self.console.danger(format!(
            "  Could not save {} because {}. Moving it to unsaveable",
            name, cause
        ));
        let path = self.store.route_to_holding(HoldingKind::Unsaveable, document)?;
        Ok(Assignment::Unsaveable { path })
    }
}
