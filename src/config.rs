use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, SortError};

/// Run configuration. Built once at startup and handed to every worker by
/// reference; nothing mutates it after dispatch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Flat input pool of recovered files
    pub source_dir: PathBuf,
    /// Root holding one directory per cluster plus the holding areas
    pub sorted_dir: PathBuf,
    pub unreadable_name: String,
    pub unsaveable_name: String,
    pub unsorted_name: String,
    /// First sort threshold of the ratchet
    pub start_threshold: u32,
    pub threshold_step: u32,
    /// Last sort threshold, and the threshold pruning always runs at
    pub prune_ceiling: u32,
    /// Characters of text used to name a new cluster directory
    pub dir_name_len: usize,
    /// Characters of text used to name a member file
    pub file_name_len: usize,
    /// Bytes read for the cheap first comparison phase
    pub prefix_len: usize,
    pub extension: String,
    /// 0 means available parallelism minus one
    pub workers: usize,
    /// 0 means one file per worker
    pub batch_size: usize,
    pub progress_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub quiet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            source_dir: PathBuf::from("files"),
            sorted_dir: PathBuf::from("sorted"),
            unreadable_name: "unreadable".into(),
            unsaveable_name: "unsaveable".into(),
            unsorted_name: "unsorted".into(),
            start_threshold: 70,
            threshold_step: 5,
            prune_ceiling: 95,
            dir_name_len: 100,
            file_name_len: 40,
            prefix_len: 500,
            extension: "rtf".into(),
            workers: 0,
            batch_size: 0,
            progress_interval_secs: 300,
            poll_interval_secs: 60,
            quiet: false,
        }
    }
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Config> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => return Err(e.into()),
        };
        toml::from_str(&content).map_err(|source| SortError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.prune_ceiling > 100 {
            return Err(SortError::Config(format!(
                "prune ceiling {} exceeds 100",
                self.prune_ceiling
            )));
        }
        if self.start_threshold > self.prune_ceiling {
            return Err(SortError::Config(format!(
                "start threshold {} is above the prune ceiling {}",
                self.start_threshold, self.prune_ceiling
            )));
        }
        if self.threshold_step == 0 {
            return Err(SortError::Config("threshold step must be positive".into()));
        }
        if self.dir_name_len == 0 || self.file_name_len == 0 || self.prefix_len == 0 {
            return Err(SortError::Config("name and prefix lengths must be positive".into()));
        }
        if self.extension.is_empty() || self.extension.contains(|c: char| matches!(c, '/' | '\\' | '.')) {
            return Err(SortError::Config(format!("bad extension {:?}", self.extension)));
        }
        let names = [&self.unreadable_name, &self.unsaveable_name, &self.unsorted_name];
        if names.iter().any(|n| n.is_empty() || n.contains(|c: char| matches!(c, '/' | '\\'))) {
            return Err(SortError::Config("holding area names must be plain names".into()));
        }
        Ok(())
    }

    /// The sort thresholds of the ratchet, ending at the prune ceiling.
    pub fn threshold_schedule(&self) -> Vec<f64> {
        let mut steps: Vec<f64> = (self.start_threshold..self.prune_ceiling)
            .step_by(self.threshold_step.max(1) as usize)
            .map(f64::from)
            .collect();
        steps.push(f64::from(self.prune_ceiling));
        steps
    }

    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }

    pub fn batch_len(&self) -> usize {
        if self.batch_size > 0 {
            self.batch_size
        } else {
            self.worker_count()
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn test_default_schedule() {
        let config = Config::default();
        assert_eq!(config.threshold_schedule(), vec![70.0, 75.0, 80.0, 85.0, 90.0, 95.0]);
    }

    #[test]
    fn test_schedule_always_ends_at_ceiling() {
        let config = Config {
            start_threshold: 70,
            threshold_step: 10,
            prune_ceiling: 95,
            ..Config::default()
        };
        assert_eq!(config.threshold_schedule(), vec![70.0, 80.0, 90.0, 95.0]);

        let single = Config {
            start_threshold: 95,
            ..Config::default()
        };
        assert_eq!(single.threshold_schedule(), vec![95.0]);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".recluster.toml");
        fs::write(&path, "source_dir = \"/data/in\"\nstart_threshold = 80\nquiet = true\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.source_dir, PathBuf::from("/data/in"));
        assert_eq!(config.start_threshold, 80);
        assert!(config.quiet);
        assert_eq!(config.prune_ceiling, 95);
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "start_threshold = \"high\"").unwrap();
        assert!(matches!(Config::load(&path), Err(SortError::ConfigFile { .. })));
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let inverted = Config {
            start_threshold: 96,
            ..Config::default()
        };
        assert!(inverted.validate().is_err());

        let no_step = Config {
            threshold_step: 0,
            ..Config::default()
        };
        assert!(no_step.validate().is_err());

        let nested = Config {
            unsorted_name: "a/b".into(),
            ..Config::default()
        };
        assert!(nested.validate().is_err());
    }

    #[test]
    fn test_worker_count_never_zero() {
        assert!(Config::default().worker_count() >= 1);
        let fixed = Config {
            workers: 3,
            ..Config::default()
        };
        assert_eq!(fixed.worker_count(), 3);
        assert_eq!(fixed.batch_len(), 3);
    }
}
