//! Single-directory modes that don't look at sequences: copy, rename, and stackcopy.
//!
//! Each picks the jpg-only files of a directory (stacked outputs straight from the camera),
//! skips names that already carry the processed marker, and hands the rest to the
//! relocation engine as one batch. An existing destination with different content fails
//! that file unless `force` is set.

use anyhow::{Result, bail};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::errors::StackError;
use crate::fs_ops::{BatchReport, Confirm, MoveTask, RelocationEngine, SpaceGuard, TaskKind};
use crate::index::{FileIndex, FileRef};
use crate::naming;
use crate::shutdown;

/// Name of the subdirectory `stackcopy` mode writes into.
pub const STACKED_SUBDIR: &str = "stacked";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleMode {
    /// Copy jpg-only files from `src` to `dest`; tagged only when a prefix is given.
    Copy { src: PathBuf, dest: PathBuf },
    /// Tag jpg-only files in place.
    Rename { dir: PathBuf },
    /// Copy jpg-only files, tagged, into `<dir>/stacked/`.
    Stackcopy { dir: PathBuf },
}

impl SimpleMode {
    pub fn source(&self) -> &Path {
        match self {
            SimpleMode::Copy { src, .. } => src,
            SimpleMode::Rename { dir } | SimpleMode::Stackcopy { dir } => dir,
        }
    }

    fn target_dir(&self) -> PathBuf {
        match self {
            SimpleMode::Copy { dest, .. } => dest.clone(),
            SimpleMode::Rename { dir } => dir.clone(),
            SimpleMode::Stackcopy { dir } => dir.join(STACKED_SUBDIR),
        }
    }

    fn kind(&self) -> TaskKind {
        match self {
            SimpleMode::Rename { .. } => TaskKind::Move,
            _ => TaskKind::Copy,
        }
    }

    fn tags(&self, prefix: Option<&str>) -> bool {
        match self {
            SimpleMode::Copy { .. } => prefix.is_some_and(|p| !p.trim().is_empty()),
            _ => true,
        }
    }

    /// Verb for user-facing lines.
    pub fn verb(&self, dry_run: bool) -> &'static str {
        match (self.kind(), dry_run) {
            (TaskKind::Move, false) => "Renamed",
            (TaskKind::Move, true) => "Would rename",
            (TaskKind::Copy, false) => "Copied",
            (TaskKind::Copy, true) => "Would copy",
        }
    }
}

impl fmt::Display for SimpleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SimpleMode::Copy { .. } => "copy",
            SimpleMode::Rename { .. } => "rename",
            SimpleMode::Stackcopy { .. } => "stackcopy",
        })
    }
}

#[derive(Debug, Clone)]
pub struct SimpleOptions {
    pub prefix: Option<String>,
    pub force: bool,
    pub dry_run: bool,
    pub jobs: usize,
    pub space: SpaceGuard,
}

#[derive(Debug, Default)]
pub struct SimpleSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub report: BatchReport,
}

fn resolved(p: &Path) -> PathBuf {
    dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

/// Destination filename for one jpg-only file, or `None` if it is already processed.
fn dest_name(file: &FileRef, stem: &str, tag: bool, prefix: Option<&str>) -> Option<String> {
    if naming::is_already_processed(file.basename()) {
        return None;
    }
    if tag {
        Some(naming::stacked_name(stem, &file.extension(), prefix))
    } else {
        Some(file.basename().to_string())
    }
}

/// Run one simple mode over the jpg-only files accepted by `filter`.
pub fn run_simple(
    mode: &SimpleMode,
    opts: &SimpleOptions,
    filter: &dyn Fn(&FileRef) -> bool,
    confirm: &dyn Confirm,
) -> Result<SimpleSummary> {
    if let SimpleMode::Copy { src, dest } = mode {
        if resolved(src) == resolved(dest) {
            bail!(
                "source and destination are the same directory: '{}'",
                src.display()
            );
        }
    }
    if shutdown::is_requested() {
        return Err(StackError::Interrupted.into());
    }

    let index = FileIndex::scan(mode.source())?;
    let target = mode.target_dir();
    let tag = mode.tags(opts.prefix.as_deref());
    let kind = mode.kind();

    let mut summary = SimpleSummary::default();
    let mut tasks = Vec::new();
    for rec in index.records().iter().filter(|r| r.is_jpg_only()) {
        let Some(jpg) = rec.jpg.as_ref() else { continue };
        if !filter(jpg) {
            continue;
        }
        match dest_name(jpg, &rec.stem, tag, opts.prefix.as_deref()) {
            Some(name) => tasks.push(MoveTask {
                src: jpg.path().to_path_buf(),
                dest: target.join(name),
                kind,
                group: rec.stem.clone(),
            }),
            None => {
                debug!(file = %jpg.basename(), "Already processed; skipping");
                summary.skipped += 1;
            }
        }
    }
    info!(mode = %mode, files = tasks.len(), skipped = summary.skipped, "Planned");

    if tasks.is_empty() {
        return Ok(summary);
    }
    if shutdown::is_requested() {
        return Err(StackError::Interrupted.into());
    }
    // a single batch, so approval never needs to outlive this call
    let mut approved = HashSet::new();
    if opts.dry_run {
        opts.space.ensure(&tasks, &|_: &str| true, &mut approved)?;
    } else {
        opts.space.ensure(&tasks, confirm, &mut approved)?;
    }

    let engine = RelocationEngine::new(opts.jobs, opts.force, opts.dry_run);
    let report = engine.execute(tasks)?;
    summary.processed = report.succeeded();
    summary.failed = report.failed().count();
    summary.report = report;
    Ok(summary)
}
