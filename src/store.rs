use serde::Serialize;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::console::Console;
use crate::error::{Result, SortError};
use crate::naming::{char_prefix, sanitize_name, short_name};

/// Common filesystem limit on a single path component, in bytes.
const MAX_NAME_BYTES: usize = 255;
/// Give up looking for a free member name after this many collisions.
const MAX_NAME_ATTEMPTS: usize = 10_000;

/// Flat directories that hold documents outside any cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HoldingKind {
    /// Text extraction failed
    Unreadable,
    /// Could not be written to its cluster
    Unsaveable,
    /// Left over after the last threshold step
    Unsorted,
}

impl HoldingKind {
    pub const ALL: [HoldingKind; 3] =
        [HoldingKind::Unreadable, HoldingKind::Unsaveable, HoldingKind::Unsorted];

    fn dir_name(self, config: &Config) -> &str {
        match self {
            HoldingKind::Unreadable => &config.unreadable_name,
            HoldingKind::Unsaveable => &config.unsaveable_name,
            HoldingKind::Unsorted => &config.unsorted_name,
        }
    }
}

impl fmt::Display for HoldingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HoldingKind::Unreadable => "unreadable",
            HoldingKind::Unsaveable => "unsaveable",
            HoldingKind::Unsorted => "unsorted",
        };
        f.write_str(name)
    }
}

/// A document file and its size on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub size: u64,
}

/// A directory of documents believed to share one source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    path: PathBuf,
}

impl Cluster {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Members ordered by file name. Files that vanish mid-listing are skipped.
    pub fn members(&self) -> Result<Vec<Document>> {
        list_files(&self.path)
    }

    pub fn member_count(&self) -> Result<usize> {
        Ok(self.members()?.len())
    }
}

#[derive(Debug, Serialize)]
pub struct StoreStats {
    pub pool: usize,
    pub clusters: usize,
    pub clustered_documents: usize,
    pub holdings: BTreeMap<HoldingKind, usize>,
    pub multi_member_clusters: Vec<String>,
}

/// Owns the on-disk layout: the input pool, one directory per cluster under
/// the sorted root, and the configured holding areas.
#[derive(Debug)]
pub struct ClusterStore {
    source: PathBuf,
    root: PathBuf,
    holdings: BTreeMap<HoldingKind, PathBuf>,
    dir_name_len: usize,
    file_name_len: usize,
    extension: String,
}

impl ClusterStore {
    /// Open the layout with every holding area.
    pub fn open(config: &Config, console: Console) -> Result<Self> {
        Self::with_holdings(config, &HoldingKind::ALL, console)
    }

    /// Open the layout with only the given holding areas, creating the
    /// directories that are missing.
    pub fn with_holdings(config: &Config, kinds: &[HoldingKind], console: Console) -> Result<Self> {
        prepare_dir(&config.source_dir, console)?;
        prepare_dir(&config.sorted_dir, console)?;

        let mut holdings = BTreeMap::new();
        for &kind in kinds {
            let dir = config.sorted_dir.join(kind.dir_name(config));
            prepare_dir(&dir, console)?;
            holdings.insert(kind, dir);
        }

        Ok(ClusterStore {
            source: config.source_dir.clone(),
            root: config.sorted_dir.clone(),
            holdings,
            dir_name_len: config.dir_name_len,
            file_name_len: config.file_name_len,
            extension: config.extension.clone(),
        })
    }

    pub fn source_dir(&self) -> &Path {
        &self.source
    }

    pub fn holding(&self, kind: HoldingKind) -> Option<&Path> {
        self.holdings.get(&kind).map(PathBuf::as_path)
    }

    /// Documents currently in the input pool, ordered by file name.
    pub fn pool_files(&self) -> Result<Vec<PathBuf>> {
        Ok(list_files(&self.source)?.into_iter().map(|d| d.path).collect())
    }

    pub fn pool_count(&self) -> Result<usize> {
        Ok(list_files(&self.source)?.len())
    }

    pub fn holding_files(&self, kind: HoldingKind) -> Result<Vec<PathBuf>> {
        let dir = self.holding(kind).ok_or(SortError::MissingHoldingArea(kind))?;
        Ok(list_files(dir)?.into_iter().map(|d| d.path).collect())
    }

    /// Every cluster under the sorted root, ordered by name. Holding areas
    /// are not clusters.
    pub fn list_clusters(&self) -> Result<Vec<Cluster>> {
        let mut clusters = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            let path = entry.into_path();
            if self.holdings.values().any(|h| h == &path) {
                continue;
            }
            clusters.push(Cluster { path });
        }
        Ok(clusters)
    }

    /// The largest member by byte size. Ties go to the first by name.
    pub fn representative_of(&self, cluster: &Cluster) -> Result<Option<Document>> {
        let members = cluster.members()?;
        Ok(members
            .into_iter()
            .reduce(|best, doc| if doc.size > best.size { doc } else { best }))
    }

    /// Create (or reuse) the cluster named after the start of `seed_text`.
    ///
    /// When the filesystem rejects the name, the name is retried once at half
    /// the length before giving up with `NameTooLong`.
    pub fn create_cluster(&self, seed_text: &str) -> Result<Cluster> {
        let mut len = self.dir_name_len;
        let mut name = self.cluster_name(seed_text, len);
        for attempt in 0..2 {
            let path = self.root.join(&name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok(Cluster { path }),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {
                    return Ok(Cluster { path });
                }
                Err(e) if e.kind() != io::ErrorKind::InvalidFilename => return Err(e.into()),
                Err(_) if attempt == 0 => {
                    len = (len / 2).max(1);
                    name = self.cluster_name(seed_text, len);
                }
                Err(_) => break,
            }
        }
        Err(SortError::NameTooLong { name })
    }

    /// The directory name `create_cluster` would first try for `seed_text`.
    pub fn proposed_name(&self, seed_text: &str) -> String {
        self.cluster_name(seed_text, self.dir_name_len)
    }

    fn cluster_name(&self, seed_text: &str, len: usize) -> String {
        let name = sanitize_name(char_prefix(seed_text.trim(), len));
        let clashes = self
            .holdings
            .values()
            .any(|h| h.file_name().map(|n| n == name.as_str()).unwrap_or(false));
        if clashes {
            format!("_{}", name)
        } else {
            name
        }
    }

    /// Move `document` into `cluster` as `<stem> <index>.<ext>`, where the
    /// index starts at the current member count. Either the document ends up
    /// at the returned path and is gone from its old one, or it is untouched.
    pub fn add_to_cluster(&self, cluster: &Cluster, document: &Path, stem: &str) -> Result<PathBuf> {
        let stem = sanitize_name(char_prefix(stem.trim(), self.file_name_len));
        let first = cluster.member_count()?;
        let ext = &self.extension;
        move_unique(document, cluster.path(), first, |index| {
            fit_name(&stem, &format!(" {}.{}", index, ext))
        })
    }

    pub fn remove_member(&self, cluster: &Cluster, document: &Path) -> Result<()> {
        debug_assert!(document.starts_with(cluster.path()));
        match fs::remove_file(document) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the cluster directory if nothing is left in it.
    pub fn reclaim_if_empty(&self, cluster: &Cluster) -> Result<bool> {
        let mut entries = match fs::read_dir(cluster.path()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if entries.next().is_some() {
            return Ok(false);
        }
        match fs::remove_dir(cluster.path()) {
            Ok(()) => Ok(true),
            Err(e) if lost_reclaim_race(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Return a document to the input pool under its current file name.
    pub fn release_to_pool(&self, document: &Path) -> Result<PathBuf> {
        let source = self.source.clone();
        move_keeping_name(document, &source)
    }

    pub fn route_to_holding(&self, kind: HoldingKind, document: &Path) -> Result<PathBuf> {
        let dir = self.holding(kind).ok_or(SortError::MissingHoldingArea(kind))?;
        move_keeping_name(document, dir)
    }

    /// Return every clustered and held document to the input pool and drop
    /// the emptied cluster directories.
    pub fn unsort_all(&self, console: Console) -> Result<usize> {
        let mut moved = 0;
        for cluster in self.list_clusters()? {
            for member in cluster.members()? {
                self.release_to_pool(&member.path)?;
                moved += 1;
            }
            if self.reclaim_if_empty(&cluster)? {
                console.info(format!("  Removed /{}", short_name(cluster.path(), 40)));
            }
        }
        for kind in self.holdings.keys() {
            for file in self.holding_files(*kind)? {
                self.release_to_pool(&file)?;
                moved += 1;
            }
        }
        Ok(moved)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let clusters = self.list_clusters()?;
        let mut clustered_documents = 0;
        let mut multi_member_clusters = Vec::new();
        for cluster in &clusters {
            let count = cluster.member_count()?;
            clustered_documents += count;
            if count > 1 {
                multi_member_clusters.push(cluster.name());
            }
        }
        let mut holdings = BTreeMap::new();
        for kind in self.holdings.keys() {
            holdings.insert(*kind, self.holding_files(*kind)?.len());
        }
        Ok(StoreStats {
            pool: self.pool_count()?,
            clusters: clusters.len(),
            clustered_documents,
            holdings,
            multi_member_clusters,
        })
    }
}

/// Another worker added a member or removed the directory first.
fn lost_reclaim_race(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
    )
}

/// Regular files directly inside `dir`, ordered by file name.
fn list_files(dir: &Path) -> Result<Vec<Document>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(_) => continue,
        };
        files.push(Document {
            path: entry.into_path(),
            size,
        });
    }
    Ok(files)
}

/// Truncate `stem` so that `stem + tail` fits in one path component.
fn fit_name(stem: &str, tail: &str) -> String {
    let budget = MAX_NAME_BYTES.saturating_sub(tail.len());
    let mut end = stem.len().min(budget);
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", stem[..end].trim_end(), tail)
}

fn move_keeping_name(document: &Path, dir: &Path) -> Result<PathBuf> {
    let file_name = document
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("document"));
    let original = Path::new(&file_name);
    let stem = original
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = original
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let plain = file_name.to_string_lossy().into_owned();

    move_unique(document, dir, 0, |n| {
        if n == 0 {
            plain.clone()
        } else {
            fit_name(&stem, &format!(" ({}){}", n, ext))
        }
    })
}

/// Move `from` into `dir` under the first free name produced by `name_for`,
/// counting up from `first`.
fn move_unique(
    from: &Path,
    dir: &Path,
    first: usize,
    name_for: impl Fn(usize) -> String,
) -> Result<PathBuf> {
    let mut last = dir.to_path_buf();
    for index in first..first + MAX_NAME_ATTEMPTS {
        let target = dir.join(name_for(index));
        match relocate(from, &target) {
            Ok(()) => return Ok(target),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last = target,
            Err(source) => {
                return Err(SortError::Write {
                    from: from.to_path_buf(),
                    to: target,
                    source,
                })
            }
        }
    }
    Err(SortError::Write {
        from: from.to_path_buf(),
        to: last,
        source: io::Error::new(io::ErrorKind::AlreadyExists, "no free file name"),
    })
}

/// Move one file without ever overwriting `to`. A hard link is tried first;
/// across devices the content is copied. On any failure the source is left
/// where it was and no partial target remains.
fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(e),
        Err(e) if e.kind() == io::ErrorKind::NotFound && !from.exists() => return Err(e),
        Err(_) => copy_new(from, to)?,
    }
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

fn copy_new(from: &Path, to: &Path) -> io::Result<()> {
    let mut reader = File::open(from)?;
    let mut writer = OpenOptions::new().write(true).create_new(true).open(to)?;
    let copied = io::copy(&mut reader, &mut writer).and_then(|_| writer.sync_all());
    if let Err(e) = copied {
        drop(writer);
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// Create `dir`. Anything that is not a directory squatting on the name is
/// renamed to `<name>.bak` first.
fn prepare_dir(dir: &Path, console: Console) -> Result<()> {
    if dir.exists() && !dir.is_dir() {
        let mut backup = dir.as_os_str().to_owned();
        backup.push(".bak");
        let backup = PathBuf::from(backup);
        relocate(dir, &backup).map_err(|source| SortError::Write {
            from: dir.to_path_buf(),
            to: backup.clone(),
            source,
        })?;
        console.danger(format!(
            "Found a file at {} and renamed it to {}",
            dir.display(),
            backup.display()
        ));
    }
    fs::create_dir_all(dir)?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::{tempdir, TempDir};

    pub(crate) fn layout() -> (TempDir, Config) {
        let tmp = tempdir().unwrap();
        let config = Config {
            source_dir: tmp.path().join("files"),
            sorted_dir: tmp.path().join("sorted"),
            workers: 2,
            progress_interval_secs: 3600,
            ..Config::default()
        };
        (tmp, config)
    }

    fn open(config: &Config) -> ClusterStore {
        ClusterStore::open(config, Console::new(true)).unwrap()
    }

    #[test]
    fn test_open_creates_layout() {
        let (_tmp, config) = layout();
        let store = open(&config);
        assert!(config.source_dir.is_dir());
        assert!(config.sorted_dir.join("unreadable").is_dir());
        assert!(config.sorted_dir.join("unsaveable").is_dir());
        assert!(config.sorted_dir.join("unsorted").is_dir());
        assert!(store.list_clusters().unwrap().is_empty());
    }

    #[test]
    fn test_open_backs_up_squatting_file() {
        let (_tmp, config) = layout();
        fs::create_dir_all(&config.sorted_dir).unwrap();
        fs::write(config.sorted_dir.join("unreadable"), "not a dir").unwrap();

        open(&config);
        assert!(config.sorted_dir.join("unreadable").is_dir());
        assert_eq!(
            fs::read_to_string(config.sorted_dir.join("unreadable.bak")).unwrap(),
            "not a dir"
        );
    }

    #[test]
    fn test_holding_areas_are_optional() {
        let (_tmp, config) = layout();
        let store =
            ClusterStore::with_holdings(&config, &[HoldingKind::Unreadable], Console::new(true))
                .unwrap();
        assert!(store.holding(HoldingKind::Unsorted).is_none());

        let doc = config.source_dir.join("a.rtf");
        fs::write(&doc, "x").unwrap();
        assert!(matches!(
            store.route_to_holding(HoldingKind::Unsorted, &doc),
            Err(SortError::MissingHoldingArea(HoldingKind::Unsorted))
        ));
        assert!(doc.exists());
    }

    #[test]
    fn test_create_cluster_reuses_existing() {
        let (_tmp, config) = layout();
        let store = open(&config);

        let a = store.create_cluster("  Dear John: hello").unwrap();
        let b = store.create_cluster("Dear John: hello").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.name(), "Dear John_ hello");
        assert_eq!(store.list_clusters().unwrap().len(), 1);
    }

    #[test]
    fn test_create_cluster_bounds_name_length() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let text = "word ".repeat(100);
        let cluster = store.create_cluster(&text).unwrap();
        assert!(cluster.name().chars().count() <= config.dir_name_len);
    }

    #[test]
    fn test_create_cluster_halves_overlong_names() {
        let (_tmp, mut config) = layout();
        config.dir_name_len = 100;
        let store = open(&config);

        // 100 three-byte characters exceed the 255-byte limit; 50 do not.
        let text = "語".repeat(120);
        let cluster = store.create_cluster(&text).unwrap();
        assert_eq!(cluster.name().chars().count(), 50);
    }

    #[test]
    fn test_create_cluster_gives_up_after_one_retry() {
        let (_tmp, mut config) = layout();
        config.dir_name_len = 400;
        let store = open(&config);

        // Even halved, 200 four-byte characters are too long.
        let text = "😀".repeat(400);
        assert!(matches!(
            store.create_cluster(&text),
            Err(SortError::NameTooLong { .. })
        ));
    }

    #[test]
    fn test_cluster_never_named_after_holding_area() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let cluster = store.create_cluster("unreadable").unwrap();
        assert_eq!(cluster.name(), "_unreadable");
        assert_eq!(store.list_clusters().unwrap(), vec![cluster]);
    }

    #[test]
    fn test_list_clusters_excludes_holdings_and_files() {
        let (_tmp, config) = layout();
        let store = open(&config);
        fs::create_dir(config.sorted_dir.join("beta")).unwrap();
        fs::create_dir(config.sorted_dir.join("alpha")).unwrap();
        fs::write(config.sorted_dir.join("stray.rtf"), "x").unwrap();

        let names: Vec<String> = store.list_clusters().unwrap().iter().map(Cluster::name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_representative_is_largest_member() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let cluster = store.create_cluster("letter").unwrap();
        assert_eq!(store.representative_of(&cluster).unwrap(), None);

        fs::write(cluster.path().join("a 0.rtf"), "short").unwrap();
        fs::write(cluster.path().join("b 1.rtf"), "much longer content").unwrap();
        fs::write(cluster.path().join("c 2.rtf"), "mid size").unwrap();

        let rep = store.representative_of(&cluster).unwrap().unwrap();
        assert_eq!(rep.path, cluster.path().join("b 1.rtf"));
        assert_eq!(rep.size, 19);
    }

    #[test]
    fn test_representative_tie_goes_to_first_name() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let cluster = store.create_cluster("letter").unwrap();
        fs::write(cluster.path().join("b.rtf"), "same").unwrap();
        fs::write(cluster.path().join("a.rtf"), "same").unwrap();

        let rep = store.representative_of(&cluster).unwrap().unwrap();
        assert_eq!(rep.path, cluster.path().join("a.rtf"));
    }

    #[test]
    fn test_add_to_cluster_names_by_member_count() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let cluster = store.create_cluster("letter").unwrap();

        let a = config.source_dir.join("File Name Lost (1).rtf");
        let b = config.source_dir.join("File Name Lost (2).rtf");
        fs::write(&a, "one").unwrap();
        fs::write(&b, "two").unwrap();

        let first = store.add_to_cluster(&cluster, &a, "Dear John, how are you?").unwrap();
        let second = store.add_to_cluster(&cluster, &b, "Dear John, how are you?").unwrap();

        assert_eq!(first, cluster.path().join("Dear John, how are you_ 0.rtf"));
        assert_eq!(second, cluster.path().join("Dear John, how are you_ 1.rtf"));
        assert!(!a.exists());
        assert!(!b.exists());
        assert_eq!(fs::read_to_string(second).unwrap(), "two");
    }

    #[test]
    fn test_add_to_cluster_skips_taken_index() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let cluster = store.create_cluster("letter").unwrap();
        // One member already, but it took index 1.
        fs::write(cluster.path().join("hello 1.rtf"), "old").unwrap();

        let doc = config.source_dir.join("x.rtf");
        fs::write(&doc, "new").unwrap();
        let placed = store.add_to_cluster(&cluster, &doc, "hello").unwrap();

        assert_eq!(placed, cluster.path().join("hello 2.rtf"));
        assert_eq!(fs::read_to_string(cluster.path().join("hello 1.rtf")).unwrap(), "old");
    }

    #[test]
    fn test_add_missing_document_reports_write_failure() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let cluster = store.create_cluster("letter").unwrap();

        let err = store
            .add_to_cluster(&cluster, &config.source_dir.join("gone.rtf"), "gone")
            .unwrap_err();
        assert!(matches!(err, SortError::Write { .. }));
        assert_eq!(cluster.member_count().unwrap(), 0);
    }

    #[test]
    fn test_route_to_holding_keeps_both_on_collision() {
        let (_tmp, config) = layout();
        let store = open(&config);

        let first = config.source_dir.join("doc.rtf");
        fs::write(&first, "first").unwrap();
        let held = store.route_to_holding(HoldingKind::Unreadable, &first).unwrap();
        assert_eq!(held, config.sorted_dir.join("unreadable/doc.rtf"));

        fs::write(&first, "second").unwrap();
        let held = store.route_to_holding(HoldingKind::Unreadable, &first).unwrap();
        assert_eq!(held, config.sorted_dir.join("unreadable/doc (1).rtf"));
        assert_eq!(store.holding_files(HoldingKind::Unreadable).unwrap().len(), 2);
        assert_eq!(store.pool_count().unwrap(), 0);
    }

    #[test]
    fn test_remove_member_and_reclaim() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let cluster = store.create_cluster("letter").unwrap();
        let member = cluster.path().join("letter 0.rtf");
        fs::write(&member, "x").unwrap();

        assert!(!store.reclaim_if_empty(&cluster).unwrap());
        store.remove_member(&cluster, &member).unwrap();
        // Removing twice is harmless.
        store.remove_member(&cluster, &member).unwrap();
        assert!(store.reclaim_if_empty(&cluster).unwrap());
        assert!(!cluster.path().exists());
    }

    #[test]
    fn test_unsort_all_returns_everything() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let cluster = store.create_cluster("letter").unwrap();
        fs::write(cluster.path().join("letter 0.rtf"), "a").unwrap();
        fs::write(cluster.path().join("letter 1.rtf"), "b").unwrap();
        fs::write(config.sorted_dir.join("unsorted/left.rtf"), "c").unwrap();

        let moved = store.unsort_all(Console::new(true)).unwrap();
        assert_eq!(moved, 3);
        assert_eq!(store.pool_count().unwrap(), 3);
        assert!(store.list_clusters().unwrap().is_empty());
    }

    #[test]
    fn test_stats() {
        let (_tmp, config) = layout();
        let store = open(&config);
        let one = store.create_cluster("one").unwrap();
        let two = store.create_cluster("two").unwrap();
        fs::write(one.path().join("a.rtf"), "a").unwrap();
        fs::write(two.path().join("b.rtf"), "b").unwrap();
        fs::write(two.path().join("c.rtf"), "c").unwrap();
        fs::write(config.source_dir.join("d.rtf"), "d").unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pool, 1);
        assert_eq!(stats.clusters, 2);
        assert_eq!(stats.clustered_documents, 3);
        assert_eq!(stats.multi_member_clusters, vec!["two".to_string()]);
        assert_eq!(stats.holdings[&HoldingKind::Unreadable], 0);
    }

    #[test]
    fn test_create_cluster_passes_on_other_errors() {
        let (_tmp, config) = layout();
        let store = open(&config);
        // The sorted root is no longer a directory.
        fs::remove_dir_all(&config.sorted_dir).unwrap();
        fs::write(&config.sorted_dir, "squatter").unwrap();

        match store.create_cluster("hello") {
            Err(SortError::Io(e)) => assert_ne!(e.kind(), io::ErrorKind::InvalidFilename),
            other => panic!("expected an IO error, got {:?}", other),
        }
    }

    #[test]
    fn test_reclaim_races_are_not_errors() {
        assert!(lost_reclaim_race(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(lost_reclaim_race(&io::Error::from(io::ErrorKind::DirectoryNotEmpty)));
        assert!(!lost_reclaim_race(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn test_reclaim_reports_unexpected_errors() {
        let (_tmp, config) = layout();
        let store = open(&config);
        // A plain file where the cluster directory should be.
        let path = config.sorted_dir.join("not a dir");
        fs::write(&path, "x").unwrap();
        let cluster = Cluster { path };

        assert!(store.reclaim_if_empty(&cluster).is_err());
    }

    #[test]
    fn test_copy_new_copies_without_touching_source() {
        let tmp = tempdir().unwrap();
        let from = tmp.path().join("from.rtf");
        let to = tmp.path().join("to.rtf");
        fs::write(&from, "content").unwrap();

        copy_new(&from, &to).unwrap();
        assert_eq!(fs::read_to_string(&to).unwrap(), "content");
        assert_eq!(fs::read_to_string(&from).unwrap(), "content");
    }

    #[test]
    fn test_copy_new_never_overwrites() {
        let tmp = tempdir().unwrap();
        let from = tmp.path().join("from.rtf");
        let to = tmp.path().join("to.rtf");
        fs::write(&from, "new").unwrap();
        fs::write(&to, "existing").unwrap();

        let err = copy_new(&from, &to).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&to).unwrap(), "existing");
        assert_eq!(fs::read_to_string(&from).unwrap(), "new");
    }

    #[test]
    fn test_failed_copy_leaves_source() {
        let tmp = tempdir().unwrap();
        let from = tmp.path().join("from.rtf");
        fs::write(&from, "keep me").unwrap();
        let to = tmp.path().join("missing").join("to.rtf");

        assert!(copy_new(&from, &to).is_err());
        assert!(relocate(&from, &to).is_err());
        assert_eq!(fs::read_to_string(&from).unwrap(), "keep me");
        assert!(!to.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_copy_removes_partial_target() {
        let tmp = tempdir().unwrap();
        // Opening a directory succeeds on unix but reading from it fails.
        let from = tmp.path().join("a dir");
        fs::create_dir(&from).unwrap();
        let to = tmp.path().join("to.rtf");

        assert!(copy_new(&from, &to).is_err());
        assert!(!to.exists());
        assert!(from.is_dir());
    }

    #[test]
    fn test_fit_name_respects_byte_limit() {
        let stem = "é".repeat(200);
        let name = fit_name(&stem, " 3.rtf");
        assert!(name.len() <= MAX_NAME_BYTES);
        assert!(name.ends_with(" 3.rtf"));
    }
}
