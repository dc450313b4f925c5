// Keepsake backup system.

//! Keepsake makes dated snapshot backups that look like complete copies
//! of a source tree while sharing unchanged file content across
//! snapshots through hard links: full-backup restores, incremental-
//! backup disk usage.

pub mod backup;
pub mod catalog;
pub mod compare;
pub mod config;
pub mod errors;
pub mod filter;
pub mod integrity;
pub mod kind;
pub(crate) mod misc;
pub mod recover;
pub mod restore;
pub mod retention;
pub mod stats;
pub mod test_fixtures;
pub mod timespan;
pub mod vfs;
pub mod walk;

pub use crate::backup::{backup, BackupOptions};
pub use crate::catalog::Snapshot;
pub use crate::compare::CompareMode;
pub use crate::errors::Error;
pub use crate::filter::Filter;
pub use crate::kind::Kind;
pub use crate::misc::{human_bytes, unique_path};
pub use crate::recover::MoveSelection;
pub use crate::restore::{restore, RestoreOptions};
pub use crate::retention::{retain, RetentionOptions};
pub use crate::stats::{BackupStats, DeleteStats, RestoreStats, VerifyStats};
pub use crate::timespan::TimeSpan;
pub use crate::vfs::{Context, Filesystem, LocalFs};

pub type Result<T> = std::result::Result<T, Error>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
