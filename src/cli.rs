//! CLI definition and parsing.
//!
//! Notes:
//! - Shared flags are global and may appear before or after the subcommand.
//! - --debug is a shorthand for --log-level debug; -v for --log-level info.
//! - --today, --yesterday and --date are mutually exclusive.

use anyhow::{Result, bail};
use chrono::{Days, Local, NaiveDate};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

use crate::config::types::{Config, LogLevel};

/// Sort focus-stacked photo bursts into a dated archive.
/// CLI flags override config values (which are loaded from XML if present).
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Detect in-camera focus stacks and archive them safely"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub shared: SharedFlags,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Detect stacks and relocate them, then sweep the rest, into the archive.
    Sort {
        #[arg(value_name = "DIR", value_hint = ValueHint::DirPath)]
        dir: PathBuf,
        /// Archive root (overrides the config file)
        #[arg(long, value_name = "ROOT", value_hint = ValueHint::DirPath)]
        archive: Option<PathBuf>,
        /// Copy instead of move; sources stay in place
        #[arg(long)]
        copy: bool,
    },
    /// Print detected stacks without touching any file.
    Detect {
        #[arg(value_name = "DIR", value_hint = ValueHint::DirPath)]
        dir: PathBuf,
    },
    /// Copy jpg-only files to DEST (tagged when --prefix is given).
    Copy {
        #[arg(value_name = "SRC", value_hint = ValueHint::DirPath)]
        src: PathBuf,
        #[arg(value_name = "DEST", value_hint = ValueHint::DirPath)]
        dest: PathBuf,
    },
    /// Tag jpg-only files in place.
    Rename {
        #[arg(value_name = "DIR", default_value = ".", value_hint = ValueHint::DirPath)]
        dir: PathBuf,
    },
    /// Copy jpg-only files, tagged, into DIR/stacked.
    Stackcopy {
        #[arg(value_name = "DIR", default_value = ".", value_hint = ValueHint::DirPath)]
        dir: PathBuf,
    },
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SharedFlags {
    /// Word inserted before the "stacked" marker in output names
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Only files modified today (local time)
    #[arg(long, global = true, conflicts_with_all = ["yesterday", "date"])]
    pub today: bool,

    /// Only files modified yesterday (local time)
    #[arg(long, global = true, conflicts_with = "date")]
    pub yesterday: bool,

    /// Only files modified on this day
    #[arg(long, global = true, value_name = "YYYY-MM-DD")]
    pub date: Option<NaiveDate>,

    /// Show what would be done, but do not modify files or directories
    #[arg(long, visible_alias = "dry", global = true)]
    pub dry_run: bool,

    /// Overwrite destinations whose content differs
    #[arg(long, global = true)]
    pub force: bool,

    /// Report every decision (same as --log-level info)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Relocation workers (clamped to twice the CPU count)
    #[arg(long, global = true, value_name = "N")]
    pub jobs: Option<usize>,

    /// Set log level: quiet, normal, info, debug
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Emit logs in structured JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Print the config file location used by stackcopy and exit
    #[arg(long, global = true)]
    pub print_config: bool,
}

impl Args {
    /// Local calendar day selected by the date flags, relative to `today`.
    pub fn date_filter_from(&self, today: NaiveDate) -> Option<NaiveDate> {
        let s = &self.shared;
        if s.today {
            Some(today)
        } else if s.yesterday {
            today.checked_sub_days(Days::new(1))
        } else {
            s.date
        }
    }

    pub fn date_filter(&self) -> Option<NaiveDate> {
        self.date_filter_from(Local::now().date_naive())
    }

    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level > --verbose > None (use config).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        let s = &self.shared;
        if s.debug {
            Some(LogLevel::Debug)
        } else if s.log_level.is_some() {
            s.log_level
        } else if s.verbose {
            Some(LogLevel::Info)
        } else {
            None
        }
    }

    /// Reject flag combinations clap can't express.
    pub fn check(&self) -> Result<()> {
        let dated = self.shared.today || self.shared.yesterday || self.shared.date.is_some();
        if dated && matches!(self.command, Some(Command::Rename { .. })) {
            bail!("rename works on a whole directory; date filters are not supported");
        }
        if self.shared.jobs == Some(0) {
            bail!("--jobs must be at least 1");
        }
        Ok(())
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(Command::Sort {
            archive: Some(root),
            ..
        }) = &self.command
        {
            cfg.archive_root = root.clone();
        }
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        if let Some(j) = self.shared.jobs {
            cfg.jobs = j;
        }
        if self.shared.dry_run {
            cfg.dry_run = true;
        }
        if self.shared.force {
            cfg.force = true;
        }
    }
}

pub fn parse() -> Args {
    Args::parse()
}
