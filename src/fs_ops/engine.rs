//! Relocation engine: executes a batch of [`MoveTask`]s on a bounded rayon pool.
//!
//! Tasks in one batch have disjoint destinations (the collision resolver reserves every
//! name it hands out), so workers never race on a path. Each worker returns its own
//! [`TaskOutcome`]; per-group tallies are computed after the batch joins.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info, warn};

use super::atomic::try_atomic_move;
use super::copy::safe_copy_and_rename;
use super::helpers::io_error_with_help;
use super::util::is_cross_device;
use super::compare;
use crate::errors::StackError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Move,
    Copy,
}

/// One file to place. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveTask {
    pub src: PathBuf,
    pub dest: PathBuf,
    pub kind: TaskKind,
    /// Stem of the group this file belongs to.
    pub group: String,
}

/// What a successful task did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Same-filesystem rename.
    Renamed,
    /// Move across filesystems: copy, then delete the source. A failed delete leaves the
    /// source behind but the archived copy is complete.
    CopiedAcross { source_removed: bool },
    Copied,
    /// Destination already held the same bytes; nothing was written.
    Identical { source_removed: bool },
    /// Dry run: all checks passed, nothing changed.
    Planned,
}

#[derive(Debug)]
pub struct TaskOutcome {
    pub task: MoveTask,
    pub result: Result<Applied>,
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GroupTally {
    pub enqueued: usize,
    pub succeeded: usize,
}

impl GroupTally {
    pub fn fully_relocated(&self) -> bool {
        self.enqueued > 0 && self.succeeded == self.enqueued
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<TaskOutcome>,
    pub groups: BTreeMap<String, GroupTally>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }

    /// Groups where some but not all files made it.
    pub fn partial_failures(&self) -> Vec<StackError> {
        self.groups
            .iter()
            .filter(|(_, t)| t.succeeded > 0 && !t.fully_relocated())
            .map(|(stem, t)| StackError::PartialGroupFailure {
                stem: stem.clone(),
                succeeded: t.succeeded,
                enqueued: t.enqueued,
            })
            .collect()
    }

    pub fn is_fully_relocated(&self, group: &str) -> bool {
        self.groups.get(group).is_some_and(GroupTally::fully_relocated)
    }
}

/// Worker count clamped to `1..=2 × available_parallelism`.
pub fn clamp_jobs(requested: usize) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    requested.clamp(1, cores * 2)
}

pub struct RelocationEngine {
    jobs: usize,
    force: bool,
    dry_run: bool,
    created_dirs: Mutex<HashSet<PathBuf>>,
}

impl RelocationEngine {
    pub fn new(jobs: usize, force: bool, dry_run: bool) -> Self {
        Self {
            jobs: clamp_jobs(jobs),
            force,
            dry_run,
            created_dirs: Mutex::new(HashSet::new()),
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run every task and tally per group. Fails only if the pool cannot be built;
    /// per-task failures are reported in the outcomes.
    pub fn execute(&self, tasks: Vec<MoveTask>) -> Result<BatchReport> {
        let mut groups: BTreeMap<String, GroupTally> = BTreeMap::new();
        for t in &tasks {
            groups.entry(t.group.clone()).or_default().enqueued += 1;
        }
        if tasks.is_empty() {
            return Ok(BatchReport::default());
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.jobs)
            .thread_name(|i| format!("stackcopy-worker-{i}"))
            .build()
            .context("build relocation worker pool")?;
        debug!(tasks = tasks.len(), jobs = self.jobs, "Executing relocation batch");

        let outcomes: Vec<TaskOutcome> = pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| {
                    let result = self.execute_one(&task);
                    if let Err(e) = &result {
                        warn!(src = %task.src.display(), dest = %task.dest.display(), error = %format!("{e:#}"), "Relocation failed");
                    }
                    TaskOutcome { task, result }
                })
                .collect()
        });

        for o in outcomes.iter().filter(|o| o.succeeded()) {
            if let Some(t) = groups.get_mut(&o.task.group) {
                t.succeeded += 1;
            }
        }
        Ok(BatchReport { outcomes, groups })
    }

    /// Place a single file.
    pub fn execute_one(&self, task: &MoveTask) -> Result<Applied> {
        let (src, dest) = (task.src.as_path(), task.dest.as_path());
        let src_meta = fs::metadata(src).map_err(io_error_with_help("stat source", src))?;

        match fs::symlink_metadata(dest) {
            Ok(dm) => {
                if compare::is_same_file(src, dest) {
                    debug!(src = %src.display(), "Source already at destination");
                    return Ok(Applied::Identical {
                        source_removed: false,
                    });
                }
                if !dm.is_file() {
                    return Err(StackError::DestinationConflict(dest.to_path_buf()).into());
                }
                if dm.len() == 0 && src_meta.len() > 0 {
                    info!(dest = %dest.display(), "Replacing zero-byte placeholder");
                } else if compare::same_content(src, dest)
                    .map_err(io_error_with_help("compare with destination", dest))?
                {
                    return self.finish_identical(task);
                } else if self.force {
                    info!(dest = %dest.display(), "Overwriting differing destination (force)");
                } else {
                    return Err(StackError::DestinationConflict(dest.to_path_buf()).into());
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_error_with_help("stat destination", dest)(e)),
        }

        if self.dry_run {
            info!(src = %src.display(), dest = %dest.display(), kind = ?task.kind, "dry-run: would relocate");
            return Ok(Applied::Planned);
        }

        if let Some(parent) = dest.parent() {
            self.ensure_directory(parent)?;
        }

        match task.kind {
            TaskKind::Copy => {
                safe_copy_and_rename(src, dest)?;
                info!(src = %src.display(), dest = %dest.display(), "Copied");
                Ok(Applied::Copied)
            }
            TaskKind::Move => match try_atomic_move(src, dest) {
                Ok(()) => {
                    info!(src = %src.display(), dest = %dest.display(), "Moved");
                    Ok(Applied::Renamed)
                }
                Err(e) if is_cross_device(&e) => {
                    let note = StackError::CrossDevice {
                        src: src.to_path_buf(),
                        dest: dest.to_path_buf(),
                    };
                    debug!(reason = %note, "Falling back to copy + delete");
                    safe_copy_and_rename(src, dest)?;
                    let source_removed = remove_source(src);
                    info!(src = %src.display(), dest = %dest.display(), "Moved across filesystems");
                    Ok(Applied::CopiedAcross { source_removed })
                }
                Err(e) => Err(io_error_with_help("rename into place", dest)(e)),
            },
        }
    }

    fn finish_identical(&self, task: &MoveTask) -> Result<Applied> {
        let src = task.src.as_path();
        if self.dry_run || task.kind == TaskKind::Copy {
            info!(src = %src.display(), dest = %task.dest.display(), "Destination already identical");
            return Ok(Applied::Identical {
                source_removed: false,
            });
        }
        let source_removed = remove_source(src);
        info!(src = %src.display(), dest = %task.dest.display(), "Destination already identical; removed redundant source");
        Ok(Applied::Identical { source_removed })
    }

    /// `create_dir_all` at most once per directory per engine.
    fn ensure_directory(&self, dir: &Path) -> Result<()> {
        let mut created = self
            .created_dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if created.contains(dir) {
            return Ok(());
        }
        match fs::create_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
            Err(e) => return Err(io_error_with_help("create destination directory", dir)(e)),
        }
        created.insert(dir.to_path_buf());
        Ok(())
    }
}

/// Delete a source whose bytes are already safe at the destination. Failure is a note only.
fn remove_source(src: &Path) -> bool {
    match fs::remove_file(src) {
        Ok(()) => true,
        Err(e) => {
            warn!(src = %src.display(), error = %e, "Could not remove source after copy; it stays in place");
            false
        }
    }
}
