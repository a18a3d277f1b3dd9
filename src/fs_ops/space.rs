//! Pre-flight capacity check for a relocation batch.
//!
//! Required bytes are summed per destination device. Same-device moves are renames and
//! cost nothing; cross-device moves and every copy cost the source size. A device is short
//! when the batch doesn't fit or would leave less than the reserve free
//! (`max(reserve_min, reserve_percent of total)`).

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::engine::{MoveTask, TaskKind};
use crate::errors::StackError;

pub const DEFAULT_RESERVE_MIN: u64 = 2 * 1024 * 1024 * 1024;
pub const DEFAULT_RESERVE_PERCENT: f64 = 5.0;

pub(crate) fn format_bytes(n: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    let f = n as f64;
    if f >= GB {
        format!("{:.1} GiB", f / GB)
    } else if f >= MB {
        format!("{:.1} MiB", f / MB)
    } else if f >= KB {
        format!("{:.1} KiB", f / KB)
    } else {
        format!("{n} B")
    }
}

/// First existing path among `path` and its ancestors.
fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

#[cfg(unix)]
fn device_of(path: &Path) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(path)?.dev())
}

// Without device numbers every path is treated as one device; moves then cost nothing.
#[cfg(not(unix))]
fn device_of(path: &Path) -> io::Result<u64> {
    fs::metadata(path).map(|_| 0)
}

/// Device id of `path`, resolved through its nearest existing ancestor.
pub fn device_id(path: &Path) -> io::Result<(u64, PathBuf)> {
    let existing = nearest_existing(path).ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no existing ancestor of {}", path.display()))
    })?;
    Ok((device_of(existing)?, existing.to_path_buf()))
}

/// Bytes a batch needs on one destination device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNeed {
    pub device: u64,
    /// An existing directory on the device, used for free-space queries.
    pub probe: PathBuf,
    pub required: u64,
}

/// A device that failed the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shortfall {
    pub device: u64,
    pub probe: PathBuf,
    pub required: u64,
    pub available: u64,
    pub reserve: u64,
}

impl Shortfall {
    pub fn into_error(self) -> StackError {
        StackError::LowSpace {
            required: self.required,
            available: self.available,
            reserve: self.reserve,
            dest: self.probe,
        }
    }
}

/// Asks the user whether to go ahead despite low space.
pub trait Confirm {
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F: Fn(&str) -> bool> Confirm for F {
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Prompts on the terminal. Refuses when stdin or stderr is not a TTY.
pub struct TerminalConfirm;

impl Confirm for TerminalConfirm {
    fn confirm(&self, prompt: &str) -> bool {
        if !atty::is(atty::Stream::Stdin) || !atty::is(atty::Stream::Stderr) {
            warn!("Not interactive; refusing low-space batch");
            return false;
        }
        let mut stderr = io::stderr();
        let _ = write!(stderr, "{prompt} [y/N] ");
        let _ = stderr.flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpaceGuard {
    reserve_min: u64,
    reserve_percent: f64,
}

impl Default for SpaceGuard {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVE_MIN, DEFAULT_RESERVE_PERCENT)
    }
}

impl SpaceGuard {
    pub fn new(reserve_min: u64, reserve_percent: f64) -> Self {
        Self {
            reserve_min,
            reserve_percent,
        }
    }

    pub fn reserve_for(&self, total: u64) -> u64 {
        let pct = (total as f64 * self.reserve_percent / 100.0) as u64;
        self.reserve_min.max(pct)
    }

    /// Sum required bytes per destination device. Tasks whose source or destination can't
    /// be stat'ed are skipped here; they fail on their own during execution.
    pub fn plan(&self, tasks: &[MoveTask]) -> Vec<DeviceNeed> {
        let mut needs: BTreeMap<u64, DeviceNeed> = BTreeMap::new();
        for t in tasks {
            let Some(dest_dir) = t.dest.parent() else { continue };
            let (dev, probe) = match device_id(dest_dir) {
                Ok(d) => d,
                Err(e) => {
                    debug!(dest = %t.dest.display(), error = %e, "No device for destination");
                    continue;
                }
            };
            let Ok(size) = fs::metadata(&t.src).map(|m| m.len()) else { continue };
            let cost = match t.kind {
                TaskKind::Copy => size,
                TaskKind::Move => match device_id(&t.src) {
                    Ok((src_dev, _)) if src_dev == dev => 0,
                    _ => size,
                },
            };
            needs
                .entry(dev)
                .or_insert_with(|| DeviceNeed {
                    device: dev,
                    probe,
                    required: 0,
                })
                .required += cost;
        }
        needs.into_values().collect()
    }

    /// Devices that can't take their share. Devices needing zero bytes aren't queried.
    pub fn shortfalls(&self, needs: &[DeviceNeed]) -> io::Result<Vec<Shortfall>> {
        let mut out = Vec::new();
        for need in needs.iter().filter(|n| n.required > 0) {
            let available = fs2::available_space(&need.probe)?;
            let total = fs2::total_space(&need.probe)?;
            let reserve = self.reserve_for(total);
            debug!(
                probe = %need.probe.display(),
                required = need.required,
                available,
                reserve,
                "Space check"
            );
            if need.required > available || available - need.required < reserve {
                out.push(Shortfall {
                    device: need.device,
                    probe: need.probe.clone(),
                    required: need.required,
                    available,
                    reserve,
                });
            }
        }
        Ok(out)
    }

    /// Check a batch. On shortfall ask `confirm`; a refusal yields `LowSpace`.
    /// A free-space query that fails is treated as a shortfall on that device.
    ///
    /// `approved` holds devices the user already agreed to fill during this run; they are
    /// not asked about again. A confirmation adds every device it covered.
    pub fn ensure(
        &self,
        tasks: &[MoveTask],
        confirm: &dyn Confirm,
        approved: &mut HashSet<u64>,
    ) -> Result<(), StackError> {
        let needs = self.plan(tasks);
        let mut shortfalls = match self.shortfalls(&needs) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Free-space query failed");
                needs
                    .iter()
                    .filter(|n| n.required > 0)
                    .map(|n| Shortfall {
                        device: n.device,
                        probe: n.probe.clone(),
                        required: n.required,
                        available: 0,
                        reserve: self.reserve_min,
                    })
                    .collect()
            }
        };
        shortfalls.retain(|s| {
            let known = approved.contains(&s.device);
            if known {
                debug!(dest = %s.probe.display(), required = s.required, "Low space already approved");
            }
            !known
        });
        let Some(first) = shortfalls.first() else {
            return Ok(());
        };
        for s in &shortfalls {
            warn!(
                dest = %s.probe.display(),
                required = %format_bytes(s.required),
                available = %format_bytes(s.available),
                reserve = %format_bytes(s.reserve),
                "Low disk space"
            );
        }
        let prompt = format!(
            "Low disk space on {}: need {}, free {}, keeping {} in reserve. Continue?",
            first.probe.display(),
            format_bytes(first.required),
            format_bytes(first.available),
            format_bytes(first.reserve)
        );
        if confirm.confirm(&prompt) {
            approved.extend(shortfalls.iter().map(|s| s.device));
            Ok(())
        } else {
            Err(first.clone().into_error())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task(src: &Path, dest: &Path, kind: TaskKind) -> MoveTask {
        MoveTask {
            src: src.to_path_buf(),
            dest: dest.to_path_buf(),
            kind,
            group: "g".into(),
        }
    }

    #[test]
    fn reserve_is_the_larger_bound() {
        let g = SpaceGuard::default();
        assert_eq!(g.reserve_for(10 * 1024 * 1024 * 1024), DEFAULT_RESERVE_MIN);
        let tb = 1024u64 * 1024 * 1024 * 1024;
        assert_eq!(g.reserve_for(tb), tb / 20);
    }

    #[test]
    fn same_device_moves_are_free_and_copies_cost_size() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        fs::write(&src, vec![0u8; 1000]).unwrap();
        let dest = dir.path().join("not/yet/created/a.jpg");

        let g = SpaceGuard::default();
        let moves = g.plan(&[task(&src, &dest, TaskKind::Move)]);
        assert_eq!(moves.len(), 1);
        assert_eq!(moves[0].required, 0);
        assert_eq!(moves[0].probe, dir.path());

        let copies = g.plan(&[
            task(&src, &dest, TaskKind::Copy),
            task(&src, &dest.with_file_name("b.jpg"), TaskKind::Copy),
        ]);
        assert_eq!(copies[0].required, 2000);
    }

    #[test]
    fn zero_requirement_never_prompts() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        fs::write(&src, b"x").unwrap();
        let g = SpaceGuard::new(u64::MAX, 100.0);
        let asked = std::cell::Cell::new(false);
        let confirm = |_: &str| {
            asked.set(true);
            false
        };
        g.ensure(
            &[task(&src, &dir.path().join("b.jpg"), TaskKind::Move)],
            &confirm,
            &mut HashSet::new(),
        )
        .unwrap();
        assert!(!asked.get());
    }

    #[test]
    fn impossible_reserve_asks_and_fails_closed() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        fs::write(&src, b"x").unwrap();
        let g = SpaceGuard::new(u64::MAX, 0.0);
        let tasks = [task(&src, &dir.path().join("b.jpg"), TaskKind::Copy)];

        let err = g.ensure(&tasks, &|_: &str| false, &mut HashSet::new()).unwrap_err();
        assert!(matches!(err, StackError::LowSpace { required: 1, .. }));
        g.ensure(&tasks, &|_: &str| true, &mut HashSet::new()).unwrap();
    }

    #[test]
    fn approval_is_remembered_per_device() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jpg");
        fs::write(&src, b"x").unwrap();
        let g = SpaceGuard::new(u64::MAX, 0.0);
        let tasks = [task(&src, &dir.path().join("b.jpg"), TaskKind::Copy)];

        let asked = std::cell::Cell::new(0);
        let confirm = |_: &str| {
            asked.set(asked.get() + 1);
            true
        };
        let mut approved = HashSet::new();
        g.ensure(&tasks, &confirm, &mut approved).unwrap();
        g.ensure(&tasks, &confirm, &mut approved).unwrap();
        assert_eq!(asked.get(), 1);
        assert_eq!(approved.len(), 1);

        // a refusal is not remembered
        let mut approved = HashSet::new();
        assert!(g.ensure(&tasks, &|_: &str| false, &mut approved).is_err());
        assert!(approved.is_empty());
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
