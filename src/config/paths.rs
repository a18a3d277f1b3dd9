//! Default locations and symlink checks.

use dirs::{config_dir, home_dir, picture_dir};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "STACKCOPY_CONFIG";

/// `<config_dir>/stackcopy/config.xml`, falling back to `~/.config`.
pub fn default_config_path() -> Option<PathBuf> {
    let base = config_dir().or_else(|| home_dir().map(|h| h.join(".config")))?;
    Some(base.join("stackcopy").join("config.xml"))
}

/// Config file in effect: `$STACKCOPY_CONFIG` when set (second value true), else the default.
pub fn config_path() -> Option<(PathBuf, bool)> {
    match env::var_os(CONFIG_ENV) {
        Some(p) if !p.is_empty() => Some((PathBuf::from(p), true)),
        _ => default_config_path().map(|p| (p, false)),
    }
}

/// `<Pictures>/stackcopy`, or `./stackcopy-archive` when no picture dir is known.
pub fn default_archive_root() -> PathBuf {
    picture_dir()
        .or_else(|| home_dir().map(|h| h.join("Pictures")))
        .map(|p| p.join("stackcopy"))
        .unwrap_or_else(|| PathBuf::from("stackcopy-archive"))
}

/// True if any existing ancestor of `path` is a symlink.
pub fn path_has_symlink_ancestor(path: &Path) -> io::Result<bool> {
    for anc in path.ancestors().skip(1) {
        if anc.as_os_str().is_empty() || !anc.exists() {
            continue;
        }
        if fs::symlink_metadata(anc)?.file_type().is_symlink() {
            return Ok(true);
        }
    }
    Ok(false)
}
