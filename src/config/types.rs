//! Core configuration types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::paths;
use crate::detect::StackPolicy;
use crate::fs_ops::SpaceGuard;
use crate::fs_ops::space::{DEFAULT_RESERVE_MIN, DEFAULT_RESERVE_PERCENT};

/// Verbosity levels exposed to users and the config file, quietest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    #[default]
    Normal,
    /// Per-decision detail (what `-v` selects)
    Info,
    Debug,
}

impl LogLevel {
    /// Parse common names (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" => Some(LogLevel::Normal),
            "info" | "verbose" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        })
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Runtime settings for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the `<year>/<date>/` archive tree.
    pub archive_root: PathBuf,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    /// Relocation workers (clamped by the engine).
    pub jobs: usize,
    pub policy: StackPolicy,
    pub reserve_min_bytes: u64,
    pub reserve_percent: f64,
    pub dry_run: bool,
    pub force: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            archive_root: paths::default_archive_root(),
            log_level: LogLevel::Normal,
            log_file: None,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            policy: StackPolicy::default(),
            reserve_min_bytes: DEFAULT_RESERVE_MIN,
            reserve_percent: DEFAULT_RESERVE_PERCENT,
            dry_run: false,
            force: false,
        }
    }
}

impl Config {
    pub fn space_guard(&self) -> SpaceGuard {
        SpaceGuard::new(self.reserve_min_bytes, self.reserve_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_names() {
        assert_eq!(LogLevel::parse(" Verbose "), Some(LogLevel::Info));
        assert_eq!("quiet".parse::<LogLevel>().unwrap(), LogLevel::Quiet);
        assert!("loud".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Debug.to_string(), "debug");
    }

    #[test]
    fn defaults_match_documented_thresholds() {
        let c = Config::default();
        assert_eq!(c.policy.max_output_lag.as_secs(), 120);
        assert_eq!(c.policy.max_input_gap.as_secs(), 6);
        assert_eq!(c.policy.min_inputs, 3);
        assert_eq!(c.policy.max_inputs, 15);
        assert_eq!(c.reserve_min_bytes, 2 * 1024 * 1024 * 1024);
        assert!(c.jobs >= 1);
    }
}
