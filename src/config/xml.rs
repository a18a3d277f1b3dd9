//! XML configuration file.
//!
//! ```xml
//! <config>
//!   <archive_root>/srv/photos</archive_root>
//!   <log_level>info</log_level>
//!   <jobs>4</jobs>
//!   <max_output_lag_secs>120</max_output_lag_secs>
//! </config>
//! ```
//!
//! Every element is optional; unknown elements are an error so typos don't pass silently.
//! Values are trimmed before parsing.

use anyhow::{Context, Result, anyhow, bail};
use quick_xml::de::from_str as from_xml_str;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use super::paths::config_path;
use super::types::{Config, LogLevel};

#[derive(Debug, Default, Deserialize)]
#[serde(rename = "config", deny_unknown_fields)]
struct XmlConfig {
    archive_root: Option<String>,
    log_level: Option<String>,
    log_file: Option<String>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    jobs: Option<usize>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    max_output_lag_secs: Option<f64>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    max_input_gap_secs: Option<f64>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    max_burst_gap_secs: Option<f64>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    min_stack_inputs: Option<usize>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    max_stack_inputs: Option<usize>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    reserve_min_bytes: Option<u64>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    reserve_percent: Option<f64>,
}

fn de_trimmed_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

fn non_empty_path(s: Option<&str>) -> Option<PathBuf> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(PathBuf::from)
}

fn secs(name: &str, v: f64) -> Result<Duration> {
    if v <= 0.0 {
        bail!("{name} must be positive, got {v}");
    }
    Duration::try_from_secs_f64(v).map_err(|e| anyhow!("{name}: {e}"))
}

fn overlay(cfg: &mut Config, x: XmlConfig) -> Result<()> {
    if let Some(p) = non_empty_path(x.archive_root.as_deref()) {
        cfg.archive_root = p;
    }
    if let Some(s) = x.log_level.as_deref() {
        cfg.log_level = s.parse::<LogLevel>().map_err(|e| anyhow!(e))?;
    }
    if let Some(p) = non_empty_path(x.log_file.as_deref()) {
        cfg.log_file = Some(p);
    }
    if let Some(j) = x.jobs {
        cfg.jobs = j;
    }
    if let Some(v) = x.max_output_lag_secs {
        cfg.policy.max_output_lag = secs("max_output_lag_secs", v)?;
    }
    if let Some(v) = x.max_input_gap_secs {
        cfg.policy.max_input_gap = secs("max_input_gap_secs", v)?;
    }
    if let Some(v) = x.max_burst_gap_secs {
        cfg.policy.max_burst_gap = secs("max_burst_gap_secs", v)?;
    }
    if let Some(n) = x.min_stack_inputs {
        cfg.policy.min_inputs = n;
    }
    if let Some(n) = x.max_stack_inputs {
        cfg.policy.max_inputs = n;
    }
    if let Some(b) = x.reserve_min_bytes {
        cfg.reserve_min_bytes = b;
    }
    if let Some(p) = x.reserve_percent {
        cfg.reserve_percent = p;
    }
    Ok(())
}

/// Overlay the settings in `path` onto `cfg`.
pub fn apply_xml_file(cfg: &mut Config, path: &Path) -> Result<()> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config xml '{}'", path.display()))?;
    let parsed: XmlConfig =
        from_xml_str(&contents).with_context(|| format!("parse config xml '{}'", path.display()))?;
    overlay(cfg, parsed).with_context(|| format!("invalid value in '{}'", path.display()))
}

/// Overlay the config file in effect, if any. Returns the file that was read.
///
/// A missing default file is fine; a missing file named by `$STACKCOPY_CONFIG` is an error.
pub fn load_config_from_xml(cfg: &mut Config) -> Result<Option<PathBuf>> {
    let Some((path, explicit)) = config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        if explicit {
            bail!("config file from {} not found: {}", super::CONFIG_ENV, path.display());
        }
        return Ok(None);
    }
    apply_xml_file(cfg, &path)?;
    Ok(Some(path))
}
