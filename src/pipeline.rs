//! One sort run: index, detect, relocate.
//!
//! 1. Scan the source directory and build the sequence index.
//! 2. Detect stacks. Each accepted output is relocated (tagged) right away; if that fails
//!    the group is held: its output and inputs stay where they are for this run.
//! 3. Relocate the inputs of every stack whose output made it, as one parallel batch.
//! 4. Sweep: everything in scope that is still in the source directory and not held goes
//!    to the archive under its own name. This picks up standalone captures, rejected
//!    candidates, and files whose group only partially relocated.
//!
//! Archive layout is `<archive>/<YYYY>/<YYYY-MM-DD>/` from each file's own mtime.

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::detect::{ClaimSet, Detection, StackCandidate, StackDetector, StackPolicy};
use crate::errors::StackError;
use crate::fs_ops::{
    Applied, BatchReport, CollisionResolver, Confirm, MoveTask, PlannedFile, RelocationEngine,
    SpaceGuard, TaskKind,
};
use crate::index::{FileIndex, FileRecord, FileRef, SequenceIndex};
use crate::naming;
use crate::shutdown;

/// Everything a sort run needs besides the filter and the confirmation prompt.
#[derive(Debug, Clone)]
pub struct SortOptions {
    pub source: PathBuf,
    pub archive_root: PathBuf,
    /// Copy instead of move; sources stay in place.
    pub copy: bool,
    /// Extra word placed before the processed marker in output names.
    pub prefix: Option<String>,
    pub force: bool,
    pub dry_run: bool,
    pub jobs: usize,
    pub policy: StackPolicy,
    pub space: SpaceGuard,
}

/// Counts reported at the end of a run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub stacks_accepted: usize,
    pub stacks_rejected: usize,
    pub outputs_relocated: usize,
    pub outputs_failed: usize,
    pub inputs_relocated: usize,
    pub inputs_failed: usize,
    pub swept: usize,
    pub sweep_failed: usize,
    /// Groups whose destination name could not be resolved.
    pub conflicts: usize,
    /// Files with no usable modification time, so no dated directory.
    pub unplaced: usize,
    pub partial_groups: Vec<StackError>,
    /// Distinct source files that ended the run unrelocated after a failure, however many
    /// phases tried them.
    pub not_relocated: usize,
}

impl RunSummary {
    /// Files that failed to relocate, each counted once.
    pub fn failures(&self) -> usize {
        self.not_relocated
    }
}

pub fn archive_dir(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(date.format("%Y").to_string())
        .join(date.format("%Y-%m-%d").to_string())
}

/// Detection only: scan `source` and report every decision. Nothing is moved.
pub fn run_detect(
    source: &Path,
    policy: StackPolicy,
    filter: &dyn Fn(&FileRef) -> bool,
) -> Result<Detection, StackError> {
    let index = FileIndex::scan(source)?;
    let seq = SequenceIndex::build(&index);
    Ok(StackDetector::new(&index, &seq, policy).detect_all(filter))
}

struct Run<'a> {
    opts: &'a SortOptions,
    confirm: &'a dyn Confirm,
    engine: RelocationEngine,
    resolver: CollisionResolver,
    /// Source paths already handled (including dry-run plans).
    placed: HashSet<PathBuf>,
    /// Stems left in place because their stack's output could not be relocated.
    held: HashSet<String>,
    /// Sources whose last attempt failed; a later success removes them.
    failed: HashSet<PathBuf>,
    /// Devices the user agreed to fill despite low space.
    approved: HashSet<u64>,
    interrupted: bool,
    summary: RunSummary,
}

impl<'a> Run<'a> {
    fn task_kind(&self) -> TaskKind {
        if self.opts.copy {
            TaskKind::Copy
        } else {
            TaskKind::Move
        }
    }

    fn hold(&mut self, cand: &StackCandidate) {
        self.held.insert(cand.output_stem.clone());
        self.held.extend(cand.input_stems.iter().cloned());
    }

    /// Resolve destinations for the files of one record, grouped by dated directory.
    fn plan_files(&mut self, rec: &FileRecord, dest_stem: &str, files: &[&FileRef]) -> Vec<MoveTask> {
        let mut by_dir: BTreeMap<PathBuf, Vec<&FileRef>> = BTreeMap::new();
        for &f in files {
            match f.date() {
                Some(d) => by_dir
                    .entry(archive_dir(&self.opts.archive_root, d))
                    .or_default()
                    .push(f),
                None => {
                    warn!(path = %f.path().display(), "No modification time; leaving file in place");
                    self.summary.unplaced += 1;
                    self.failed.insert(f.path().to_path_buf());
                }
            }
        }

        let kind = self.task_kind();
        let mut tasks = Vec::new();
        for (dir, group) in by_dir {
            let exts: Vec<String> = group.iter().map(|f| f.extension()).collect();
            let planned: Vec<PlannedFile<'_>> = group
                .iter()
                .zip(&exts)
                .map(|(f, ext)| PlannedFile {
                    src: f.path(),
                    ext: ext.as_str(),
                })
                .collect();
            match self.resolver.resolve(&dir, dest_stem, &planned) {
                Ok(res) => {
                    for (f, dest) in group.iter().zip(res.dests) {
                        tasks.push(MoveTask {
                            src: f.path().to_path_buf(),
                            dest,
                            kind,
                            group: rec.stem.clone(),
                        });
                    }
                }
                Err(e) => {
                    warn!(stem = %rec.stem, error = %e, "Skipping group");
                    self.summary.conflicts += 1;
                    self.failed.extend(group.iter().map(|f| f.path().to_path_buf()));
                }
            }
        }
        tasks
    }

    /// Space check and execution of one batch. Interrupts and refused low-space batches
    /// abort the run.
    fn execute_batch(&mut self, tasks: Vec<MoveTask>) -> Result<BatchReport> {
        if shutdown::is_requested() {
            return Err(StackError::Interrupted.into());
        }
        if tasks.is_empty() {
            return Ok(BatchReport::default());
        }
        self.check_space(&tasks)?;
        let report = self.engine.execute(tasks)?;
        for o in &report.outcomes {
            if o.succeeded() {
                self.placed.insert(o.task.src.clone());
                self.failed.remove(&o.task.src);
            } else {
                self.failed.insert(o.task.src.clone());
            }
        }
        self.summary.partial_groups.extend(report.partial_failures());
        Ok(report)
    }

    fn check_space(&mut self, tasks: &[MoveTask]) -> Result<(), StackError> {
        if self.opts.dry_run {
            // Report shortfalls but never block a run that writes nothing.
            self.opts.space.ensure(tasks, &|_: &str| true, &mut self.approved)
        } else {
            self.opts.space.ensure(tasks, self.confirm, &mut self.approved)
        }
    }

    /// Relocate an accepted output on its own, before its inputs are scheduled.
    fn relocate_output(&mut self, index: &FileIndex, cand: &StackCandidate) -> Result<(MoveTask, Applied)> {
        if shutdown::is_requested() {
            return Err(StackError::Interrupted.into());
        }
        let rec = index
            .get(&cand.output_stem)
            .ok_or_else(|| anyhow::anyhow!("output '{}' vanished from the index", cand.output_stem))?;
        let jpg = rec
            .jpg
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("output '{}' has no jpg", cand.output_stem))?;
        let dest_stem = naming::output_name(&rec.stem, "", self.opts.prefix.as_deref());
        let conflicts_before = self.summary.conflicts;
        let unplaced_before = self.summary.unplaced;
        let mut tasks = self.plan_files(rec, &dest_stem, &[jpg]);
        let Some(task) = tasks.pop() else {
            // counted once, as a failed output
            self.summary.conflicts = conflicts_before;
            self.summary.unplaced = unplaced_before;
            anyhow::bail!("no destination for output '{}'", cand.output_stem);
        };
        self.check_space(std::slice::from_ref(&task))?;
        let applied = match self.engine.execute_one(&task) {
            Ok(a) => a,
            Err(e) => {
                self.failed.insert(task.src.clone());
                return Err(e);
            }
        };
        self.placed.insert(task.src.clone());
        Ok((task, applied))
    }
}

/// Record completed moves in the index so later phases see the files' new homes.
fn apply_moves<'t>(index: &mut FileIndex, done: impl IntoIterator<Item = (&'t MoveTask, Applied)>) {
    for (task, applied) in done {
        if task.kind != TaskKind::Move || applied == Applied::Planned {
            continue;
        }
        let Some(rec) = index.get_mut(&task.group) else { continue };
        for f in rec.files_mut() {
            if f.path() == task.src {
                f.relocated_to(task.dest.clone());
            }
        }
    }
}

fn successes(report: &BatchReport) -> impl Iterator<Item = (&MoveTask, Applied)> {
    report
        .outcomes
        .iter()
        .filter_map(|o| o.result.as_ref().ok().map(|a| (&o.task, *a)))
}

/// Full sort of `opts.source` into `opts.archive_root`.
///
/// `filter` scopes which outputs are considered and which files the sweep picks up.
/// `confirm` is asked when a batch would leave a destination low on space.
pub fn run_sort(
    opts: &SortOptions,
    filter: &dyn Fn(&FileRef) -> bool,
    confirm: &dyn Confirm,
) -> Result<RunSummary> {
    if shutdown::is_requested() {
        return Err(StackError::Interrupted.into());
    }
    let mut index = FileIndex::scan(&opts.source)?;
    let seq = SequenceIndex::build(&index);
    info!(source = %opts.source.display(), stems = index.len(), "Indexed source directory");

    let mut run = Run {
        opts,
        confirm,
        engine: RelocationEngine::new(opts.jobs, opts.force, opts.dry_run),
        resolver: CollisionResolver::new(opts.force),
        placed: HashSet::new(),
        held: HashSet::new(),
        failed: HashSet::new(),
        approved: HashSet::new(),
        interrupted: false,
        summary: RunSummary::default(),
    };

    // Detection, with each accepted output relocated as soon as it is decided.
    let mut accepted: Vec<StackCandidate> = Vec::new();
    let mut outputs: Vec<(MoveTask, Applied)> = Vec::new();
    let mut fatal: Option<anyhow::Error> = None;
    {
        let detector = StackDetector::new(&index, &seq, opts.policy.clone());
        let mut claims = ClaimSet::default();
        detector.detect_each(&mut claims, filter, |cand| {
            if !cand.is_accepted() {
                run.summary.stacks_rejected += 1;
                return;
            }
            run.summary.stacks_accepted += 1;
            accepted.push(cand.clone());
            if run.interrupted || fatal.is_some() {
                run.hold(cand);
                return;
            }
            match run.relocate_output(&index, cand) {
                Ok(done) => {
                    run.summary.outputs_relocated += 1;
                    outputs.push(done);
                }
                Err(e) => {
                    run.hold(cand);
                    match e.downcast_ref::<StackError>() {
                        Some(StackError::Interrupted) => run.interrupted = true,
                        Some(StackError::LowSpace { .. }) => fatal = Some(e),
                        _ => {
                            warn!(output = %cand.output_stem, error = %format!("{e:#}"), "Output relocation failed; leaving its stack in place");
                            run.summary.outputs_failed += 1;
                        }
                    }
                }
            }
        });
        debug!(claimed = claims.len(), held = run.held.len(), "Detection finished");
    }
    apply_moves(&mut index, outputs.iter().map(|(t, a)| (t, *a)));
    if let Some(e) = fatal {
        return Err(e);
    }
    if run.interrupted {
        return Err(StackError::Interrupted.into());
    }

    // Inputs of stacks whose output is in the archive.
    let mut tasks = Vec::new();
    for cand in &accepted {
        if run.held.contains(&cand.output_stem) {
            continue;
        }
        for stem in &cand.input_stems {
            let Some(rec) = index.get(stem) else { continue };
            let files: Vec<&FileRef> = rec.files().collect();
            tasks.extend(run.plan_files(rec, &rec.stem, &files));
        }
    }
    let report = run.execute_batch(tasks)?;
    run.summary.inputs_relocated += report.succeeded();
    run.summary.inputs_failed += report.failed().count();
    apply_moves(&mut index, successes(&report));

    // Sweep whatever is still in the source directory.
    let root = index.root().to_path_buf();
    let mut tasks = Vec::new();
    for rec in index.records() {
        if run.held.contains(&rec.stem) {
            continue;
        }
        let pending: Vec<&FileRef> = rec
            .files()
            .filter(|f| f.path().parent() == Some(root.as_path()))
            .filter(|f| !run.placed.contains(f.path()))
            .filter(|f| filter(*f))
            .collect();
        if !pending.is_empty() {
            tasks.extend(run.plan_files(rec, &rec.stem, &pending));
        }
    }
    let report = run.execute_batch(tasks)?;
    run.summary.swept += report.succeeded();
    run.summary.sweep_failed += report.failed().count();
    apply_moves(&mut index, successes(&report));

    run.summary.not_relocated = run.failed.len();
    let s = &run.summary;
    info!(
        accepted = s.stacks_accepted,
        rejected = s.stacks_rejected,
        outputs = s.outputs_relocated,
        inputs = s.inputs_relocated,
        swept = s.swept,
        failures = s.failures(),
        dry_run = opts.dry_run,
        "Sort finished"
    );
    Ok(run.summary)
}
