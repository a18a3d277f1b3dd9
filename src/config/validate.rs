//! Config validation: thresholds, and archive placement relative to the source.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::types::Config;
use crate::detect::{MAX_STACK_INPUTS, MIN_STACK_INPUTS};

/// Canonical form of `p`, resolving through its nearest existing ancestor when `p`
/// itself doesn't exist yet.
fn resolved(p: &Path) -> PathBuf {
    for anc in p.ancestors() {
        if let Ok(real) = dunce::canonicalize(anc) {
            return match p.strip_prefix(anc) {
                Ok(rest) if !rest.as_os_str().is_empty() => real.join(rest),
                _ => real,
            };
        }
    }
    p.to_path_buf()
}

impl Config {
    /// Check thresholds, and when `source` is given, that the archive sits outside it.
    /// Creates the archive root unless this is a dry run.
    pub fn validate(&self, source: Option<&Path>) -> Result<()> {
        let p = &self.policy;
        if p.max_output_lag.is_zero() || p.max_input_gap.is_zero() || p.max_burst_gap.is_zero() {
            bail!("time thresholds must be positive");
        }
        if p.min_inputs < MIN_STACK_INPUTS || p.min_inputs > p.max_inputs || p.max_inputs > MAX_STACK_INPUTS {
            bail!(
                "stack size bounds must satisfy {MIN_STACK_INPUTS} <= min <= max <= {MAX_STACK_INPUTS} (min {}, max {})",
                p.min_inputs,
                p.max_inputs
            );
        }
        if self.jobs == 0 {
            bail!("jobs must be at least 1");
        }
        if !(0.0..=100.0).contains(&self.reserve_percent) {
            bail!("reserve_percent must be between 0 and 100, got {}", self.reserve_percent);
        }

        let Some(source) = source else {
            return Ok(());
        };
        if !source.is_dir() {
            bail!("source is not a directory: {}", source.display());
        }
        let src_real = resolved(source);
        let arch_real = resolved(&self.archive_root);
        if arch_real == src_real {
            bail!("archive root and source are the same directory: '{}'", src_real.display());
        }
        if arch_real.starts_with(&src_real) {
            bail!(
                "archive root '{}' must not be inside the source directory '{}'",
                arch_real.display(),
                src_real.display()
            );
        }

        if self.archive_root.exists() {
            if !self.archive_root.is_dir() {
                bail!("archive root exists but isn't a directory: {}", self.archive_root.display());
            }
        } else if self.dry_run {
            debug!(archive = %self.archive_root.display(), "dry-run: archive root would be created");
        } else {
            fs::create_dir_all(&self.archive_root).with_context(|| {
                format!("create archive root '{}'", self.archive_root.display())
            })?;
            info!(archive = %self.archive_root.display(), "Created archive root");
        }
        Ok(())
    }
}
