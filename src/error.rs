use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::extract::ExtractError;
use crate::store::HoldingKind;

pub type Result<T> = std::result::Result<T, SortError>;

#[derive(Error, Debug)]
pub enum SortError {
    #[error("cannot extract text from {}: {source}", path.display())]
    Extraction {
        path: PathBuf,
        #[source]
        source: ExtractError,
    },

    #[error("name too long for the filesystem: {name}")]
    NameTooLong { name: String },

    #[error("could not move {} to {}: {source}", from.display(), to.display())]
    Write {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} cluster(s) do not hold exactly one document", clusters.len())]
    SanityViolation { clusters: Vec<PathBuf> },

    #[error("no {0} holding area is configured")]
    MissingHoldingArea(HoldingKind),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cannot parse {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("cannot start worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SortError {
    /// Errors that are contained to a single document and never abort a pass.
    pub fn is_per_document(&self) -> bool {
        matches!(
            self,
            SortError::Extraction { .. } | SortError::NameTooLong { .. } | SortError::Write { .. }
        )
    }
}
