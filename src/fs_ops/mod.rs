//! Filesystem side of the pipeline: naming collisions, capacity checks, and the
//! rename/copy primitives the relocation engine is built on.

mod atomic;
mod copy;
mod helpers;
mod io_copy;
mod meta;
mod util;

pub mod collision;
pub mod compare;
pub mod engine;
pub mod space;

pub use collision::{CollisionResolver, PlannedFile, Resolution};
pub use copy::safe_copy_and_rename;
pub use engine::{Applied, BatchReport, GroupTally, MoveTask, RelocationEngine, TaskKind, TaskOutcome};
pub use helpers::io_error_with_help;
pub use space::{Confirm, SpaceGuard, TerminalConfirm};
pub use util::{TEMP_PREFIX, is_cross_device};
