//! Core library for `stackcopy`.
//!
//! Finds the frames an in-camera focus stack was built from and relocates each stack,
//! together with everything else in the directory, into a dated archive without ever
//! overwriting or losing a file.
//!
//! Layout:
//! - [`index`]: per-stem file records and numeric sequences
//! - [`detect`]: the backward walk that turns an output into a stack candidate
//! - [`fs_ops`]: collision-free naming, capacity checks, and the parallel relocation engine
//! - [`pipeline`]: a whole sort run; [`simple`]: the copy/rename/stackcopy modes
//! - [`config`], [`cli`], [`output`]: the outer layer used by the binary

pub mod cli;
pub mod config;
pub mod detect;
pub mod errors;
pub mod fs_ops;
pub mod index;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod shutdown;
pub mod simple;

pub use config::{
    CONFIG_ENV, Config, LogLevel, default_archive_root, default_config_path,
    load_config_from_xml, path_has_symlink_ancestor,
};
pub use detect::{Detection, StackCandidate, StackDetector, StackPolicy};
pub use errors::StackError;
pub use index::{FileIndex, FileRef, SequenceIndex};
pub use pipeline::{RunSummary, SortOptions, run_detect, run_sort};
pub use simple::{SimpleMode, SimpleOptions, SimpleSummary, run_simple};
