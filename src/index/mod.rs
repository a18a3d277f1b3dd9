//! File index: one record per filename stem in a scanned directory.
//!
//! The index is an arena (`Vec<FileRecord>`) addressed through a case-folded stem map.
//! Records pair at most one raw and one jpg file and carry the numeric identity parsed
//! from the stem, which is what sequence grouping keys on.
//!
//! Modification times are memoized per [`FileRef`] in a single-threaded cell: the first
//! request stats the file, later requests reuse the result (including a failed stat).

pub mod sequence;

use chrono::{DateTime, Local, NaiveDate};
use std::cell::OnceCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use crate::errors::StackError;
use crate::naming::identity_stem;

pub use sequence::{SeqEntry, SequenceIndex};

/// Raw extensions recognised by the indexer (lowercase, without dot).
pub const RAW_EXTENSIONS: &[&str] = &[
    "orf", "cr2", "cr3", "nef", "arw", "dng", "pef", "rw2", "raf", "raw", "sr2", "srw", "x3f",
    "3fr", "iiq",
];

/// JPEG extensions recognised by the indexer (lowercase, without dot).
pub const JPG_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Minimum length of the trailing digit run that forms a numeric identity.
pub const MIN_SEQUENCE_DIGITS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Raw,
    Jpg,
}

impl FileKind {
    /// Classify a path by extension (case-insensitive). Unknown extensions yield None.
    pub fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if RAW_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Raw)
        } else if JPG_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileKind::Jpg)
        } else {
            None
        }
    }
}

/// Numeric identity of a stem: `<prefix><digits>` with at least six trailing digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NumericIdentity {
    pub prefix: String,
    pub number: u64,
    pub width: u8,
}

/// Parse the numeric identity of a stem.
///
/// Tagged outputs (`P7010123 stacked`) are parsed on their untagged part. Runs shorter than
/// six digits, or too long for `u64`, yield None.
pub fn parse_numeric_identity(stem: &str) -> Option<NumericIdentity> {
    let base = identity_stem(stem);
    let digits = base.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits < MIN_SEQUENCE_DIGITS {
        return None;
    }
    let split = base.len() - digits;
    let number = base[split..].parse::<u64>().ok()?;
    let width = u8::try_from(digits).ok()?;
    Some(NumericIdentity {
        prefix: base[..split].to_string(),
        number,
        width,
    })
}

/// A single file on disk with a lazily stat'ed modification time.
#[derive(Debug, Clone)]
pub struct FileRef {
    path: PathBuf,
    basename: String,
    mtime: OnceCell<Option<SystemTime>>,
}

impl FileRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            basename,
            mtime: OnceCell::new(),
        }
    }

    /// A reference whose time is already known (from an earlier listing, or a failed stat).
    pub fn with_known_mtime(path: impl Into<PathBuf>, mtime: Option<SystemTime>) -> Self {
        let r = Self::new(path);
        let _ = r.mtime.set(mtime);
        r
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Extension including its leading dot, original case preserved ("" if none).
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Memoized modification time. A failed stat is cached as None for the rest of the run.
    pub fn mtime(&self) -> Option<SystemTime> {
        *self.mtime.get_or_init(|| match stat_mtime(&self.path) {
            Ok(t) => Some(t),
            Err(e) => {
                debug!(error = %e, "mtime unavailable");
                None
            }
        })
    }

    /// Local calendar date of the modification time.
    pub fn date(&self) -> Option<NaiveDate> {
        self.mtime().map(|t| DateTime::<Local>::from(t).date_naive())
    }

    /// Record the file's new location after a completed relocation. The cached time stays
    /// valid because renames and timestamp-preserving copies keep the mtime.
    pub fn relocated_to(&mut self, path: PathBuf) {
        self.basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path = path;
    }
}

fn stat_mtime(path: &Path) -> Result<SystemTime, StackError> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|source| StackError::Stat {
            path: path.to_path_buf(),
            source,
        })
}

/// Everything known about one stem.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub stem: String,
    pub raw: Option<FileRef>,
    pub jpg: Option<FileRef>,
    pub numeric_identity: Option<NumericIdentity>,
}

impl FileRecord {
    /// A stacked-output candidate: a jpg with no matching raw.
    pub fn is_jpg_only(&self) -> bool {
        self.jpg.is_some() && self.raw.is_none()
    }

    /// Present files, raw first.
    pub fn files(&self) -> impl Iterator<Item = &FileRef> {
        self.raw.iter().chain(self.jpg.iter())
    }

    pub fn files_mut(&mut self) -> impl Iterator<Item = &mut FileRef> {
        self.raw.iter_mut().chain(self.jpg.iter_mut())
    }
}

/// Arena of [`FileRecord`]s for one directory.
#[derive(Debug, Default)]
pub struct FileIndex {
    root: PathBuf,
    records: Vec<FileRecord>,
    by_key: HashMap<String, usize>,
}

fn stem_key(stem: &str) -> String {
    stem.to_lowercase()
}

impl FileIndex {
    /// Scan `dir` (non-recursive) and index every regular raw/jpg file.
    ///
    /// Fails with [`StackError::Scan`] only when the directory itself cannot be listed;
    /// unreadable entries are logged and skipped.
    pub fn scan(dir: &Path) -> Result<Self, StackError> {
        fs::read_dir(dir).map_err(|source| StackError::Scan {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) if e.depth() == 0 => {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("walk failed"));
                    return Err(StackError::Scan {
                        path: dir.to_path_buf(),
                        source,
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            paths.push(entry.into_path());
        }

        let index = Self::from_paths(dir, paths);
        debug!(dir = %dir.display(), stems = index.len(), "Indexed directory");
        Ok(index)
    }

    /// Build an index from already-listed paths (assumed to be regular files).
    pub fn from_paths(root: impl Into<PathBuf>, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut index = FileIndex {
            root: root.into(),
            ..Default::default()
        };
        for path in paths {
            index.insert(path);
        }
        index
    }

    fn insert(&mut self, path: PathBuf) {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            warn!(path = %path.display(), "Skipping non-UTF-8 filename");
            return;
        };
        if name.starts_with('.') {
            trace!(name, "Skipping hidden file");
            return;
        }
        let Some(kind) = FileKind::of(&path) else {
            return;
        };
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_owned) else {
            return;
        };

        let key = stem_key(&stem);
        let idx = match self.by_key.get(&key) {
            Some(&i) => i,
            None => {
                let numeric_identity = parse_numeric_identity(&stem);
                self.records.push(FileRecord {
                    stem,
                    raw: None,
                    jpg: None,
                    numeric_identity,
                });
                let i = self.records.len() - 1;
                self.by_key.insert(key, i);
                i
            }
        };

        let record = &mut self.records[idx];
        let slot = match kind {
            FileKind::Raw => &mut record.raw,
            FileKind::Jpg => &mut record.jpg,
        };
        if let Some(existing) = slot {
            warn!(
                stem = %record.stem,
                kept = %existing.basename(),
                ignored = %path.display(),
                "Duplicate file kind for stem; keeping the first"
            );
        } else {
            *slot = Some(FileRef::new(path));
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, stem: &str) -> Option<&FileRecord> {
        self.by_key.get(&stem_key(stem)).map(|&i| &self.records[i])
    }

    pub fn get_mut(&mut self, stem: &str) -> Option<&mut FileRecord> {
        let i = *self.by_key.get(&stem_key(stem))?;
        Some(&mut self.records[i])
    }

    pub fn records(&self) -> &[FileRecord] {
        &self.records
    }

    /// Modification time of a stem's raw file, the timestamp an input frame is judged by.
    pub fn raw_time(&self, stem: &str) -> Option<SystemTime> {
        self.get(stem)?.raw.as_ref()?.mtime()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[test]
    fn parses_trailing_digit_runs() {
        let id = parse_numeric_identity("P7010123").unwrap();
        assert_eq!(id.prefix, "P");
        assert_eq!(id.number, 7_010_123);
        assert_eq!(id.width, 7);

        let id = parse_numeric_identity("_DSC000042").unwrap();
        assert_eq!(id.prefix, "_DSC");
        assert_eq!(id.number, 42);
        assert_eq!(id.width, 6);
    }

    #[test]
    fn short_or_missing_digit_runs_have_no_identity() {
        assert!(parse_numeric_identity("IMG_12345").is_none());
        assert!(parse_numeric_identity("holiday").is_none());
        assert!(parse_numeric_identity("123456abc").is_none());
        assert!(parse_numeric_identity("X99999999999999999999999").is_none());
    }

    #[test]
    fn tagged_outputs_keep_their_identity() {
        let id = parse_numeric_identity("P7010123 macro stacked").unwrap();
        assert_eq!(id.prefix, "P");
        assert_eq!(id.number, 7_010_123);
    }

    #[test]
    fn pairs_raw_and_jpg_by_stem_case_insensitively() {
        let idx = FileIndex::from_paths(
            "/d",
            vec![
                PathBuf::from("/d/P7010001.ORF"),
                PathBuf::from("/d/P7010001.jpg"),
                PathBuf::from("/d/p7010002.JPG"),
                PathBuf::from("/d/notes.txt"),
                PathBuf::from("/d/.hidden.jpg"),
            ],
        );
        assert_eq!(idx.len(), 2);
        let r = idx.get("P7010001").unwrap();
        assert!(r.raw.is_some() && r.jpg.is_some());
        let j = idx.get("P7010002").unwrap();
        assert!(j.is_jpg_only());
        assert_eq!(j.stem, "p7010002");
    }

    #[test]
    fn first_file_of_a_kind_wins() {
        let idx = FileIndex::from_paths(
            "/d",
            vec![PathBuf::from("/d/A000001.jpeg"), PathBuf::from("/d/A000001.jpg")],
        );
        let r = idx.get("A000001").unwrap();
        assert_eq!(r.jpg.as_ref().unwrap().basename(), "A000001.jpeg");
    }

    #[test]
    fn scan_skips_directories_and_unknown_files() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("P0000001.orf").touch().unwrap();
        dir.child("P0000001.jpg").touch().unwrap();
        dir.child("readme.md").touch().unwrap();
        dir.child("nested.jpg").create_dir_all().unwrap();

        let idx = FileIndex::scan(dir.path()).unwrap();
        assert_eq!(idx.len(), 1);
        assert!(idx.get("P0000001").unwrap().raw.is_some());
    }

    #[test]
    fn scan_missing_directory_is_scan_error() {
        let dir = assert_fs::TempDir::new().unwrap();
        let err = FileIndex::scan(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, StackError::Scan { .. }));
    }

    #[test]
    fn failed_stat_is_cached() {
        let dir = assert_fs::TempDir::new().unwrap();
        let f = dir.child("P0000001.orf");
        let r = FileRef::new(f.path());
        assert!(r.mtime().is_none());
        f.touch().unwrap();
        // still None: the failure was memoized
        assert!(r.mtime().is_none());
        assert!(r.date().is_none());
    }
}
