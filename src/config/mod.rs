//! Configuration: defaults, XML file overlay, and validation.
//! Precedence is defaults < XML < CLI flags (the CLI layer applies the last step).

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{CONFIG_ENV, default_archive_root, default_config_path, path_has_symlink_ancestor};
pub use types::{Config, LogLevel};
pub use xml::{apply_xml_file, load_config_from_xml};
