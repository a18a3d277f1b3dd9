//! Destination naming for same-stem groups.
//!
//! A raw+jpg pair must keep a shared name in the archive, so the suffix counter is chosen per
//! group: `stem.ext`, then `stem__2.ext`, `stem__3.ext`, ... until every file of the group is
//! free at once. Names handed out earlier in the batch are reserved and count as taken.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::compare;
use crate::errors::StackError;

pub const MAX_ATTEMPTS: u32 = 999;

/// One file of a group about to be placed: its current path and its extension (with dot).
#[derive(Debug, Clone, Copy)]
pub struct PlannedFile<'a> {
    pub src: &'a Path,
    pub ext: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Shared counter; 1 means unsuffixed.
    pub counter: u32,
    /// Destination per planned file, same order as the input.
    pub dests: Vec<PathBuf>,
}

pub fn candidate_name(stem: &str, ext: &str, n: u32) -> String {
    if n <= 1 {
        format!("{stem}{ext}")
    } else {
        format!("{stem}__{n}{ext}")
    }
}

#[derive(Debug, Default)]
pub struct CollisionResolver {
    force: bool,
    reserved: HashSet<PathBuf>,
}

impl CollisionResolver {
    pub fn new(force: bool) -> Self {
        Self {
            force,
            reserved: HashSet::new(),
        }
    }

    /// Pick the smallest counter under which every file of the group is free, and reserve
    /// the resulting names.
    pub fn resolve(
        &mut self,
        dir: &Path,
        stem: &str,
        files: &[PlannedFile<'_>],
    ) -> Result<Resolution, StackError> {
        for n in 1..=MAX_ATTEMPTS {
            let dests: Vec<PathBuf> = files
                .iter()
                .map(|f| dir.join(candidate_name(stem, f.ext, n)))
                .collect();
            let blocked = files
                .iter()
                .zip(&dests)
                .any(|(f, d)| self.conflicts(f.src, d));
            if blocked {
                trace!(stem, counter = n, "destination taken");
                continue;
            }
            if n > 1 {
                debug!(stem, counter = n, dir = %dir.display(), "Suffixed to avoid collision");
            }
            self.reserved.extend(dests.iter().cloned());
            return Ok(Resolution { counter: n, dests });
        }
        Err(StackError::DestinationConflict(
            dir.join(candidate_name(stem, files.first().map_or("", |f| f.ext), 1)),
        ))
    }

    /// A destination is taken if reserved, or if it exists and cannot be reused: not a
    /// regular file, or different content without `force`. A zero-byte placeholder for a
    /// non-empty source and byte-identical content are reusable.
    ///
    /// A destination that can't be stat'ed at all is not taken: every counter would hit the
    /// same fault, so the name is handed out and the relocation reports the real error.
    fn conflicts(&self, src: &Path, dest: &Path) -> bool {
        if self.reserved.contains(dest) {
            return true;
        }
        let dm = match fs::symlink_metadata(dest) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return false,
            Err(e) => {
                debug!(dest = %dest.display(), error = %e, "Cannot stat destination; leaving it to the relocation");
                return false;
            }
        };
        if !dm.is_file() {
            return true;
        }
        if self.force || compare::is_same_file(src, dest) {
            return false;
        }
        let src_len = fs::metadata(src).map(|m| m.len()).unwrap_or(0);
        if dm.len() == 0 && src_len > 0 {
            return false;
        }
        !compare::same_content(src, dest).unwrap_or(false)
    }

    pub fn reserved_len(&self) -> usize {
        self.reserved.len()
    }
}
