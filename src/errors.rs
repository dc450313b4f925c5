// Keepsake backup system.

//! Structural errors that terminate a run.
//!
//! Per-file problems during a walk are deliberately *not* represented here:
//! they are logged, counted in the relevant stats struct, and the walk
//! continues.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort an operation.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    #[error("Not a directory: {path:?}")]
    NotADirectory { path: PathBuf },

    #[error("Backup folder cannot be inside the source folder: source {source_root:?}, backup {backup_root:?}")]
    BackupInsideSource {
        source_root: PathBuf,
        backup_root: PathBuf,
    },

    #[error("Failed to read source folder {path:?}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to list snapshots in {path:?}: {source}")]
    ListSnapshots {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No snapshots found in {path:?}")]
    NoSnapshots { path: PathBuf },

    #[error("Failed to create snapshot directory {path:?}: {source}")]
    CreateSnapshotDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to finalize snapshot as {path:?}: {source}")]
    FinalizeSnapshot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read filter file {path:?}: {source}")]
    ReadFilter {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Filter file {path:?} line {line}: {reason}")]
    ParseFilter {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid glob pattern: {source}")]
    ParseGlob {
        #[from]
        source: globset::Error,
    },

    #[error("Failed to read configuration file {path:?}: {source}")]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Configuration file {path:?} line {line}: {reason}")]
    ParseConfig {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid time span {input:?}: expected a positive whole number followed by y, m, w, or d")]
    InvalidTimeSpan { input: String },

    #[error("Invalid storage size {input:?}")]
    InvalidByteSize { input: String },

    #[error("Invalid date {input:?}: expected YYYY-MM-DD")]
    InvalidDate { input: String },

    #[error("Invalid probability {input:?}: must be between 0.0 and 1.0 (or 0% and 100%)")]
    InvalidProbability { input: String },

    #[error("Invalid hard link count {input:?}: must be a positive whole number")]
    InvalidHardLinkCount { input: String },

    #[error("{reason}")]
    InvalidOptions { reason: String },

    #[error("{path:?} is not inside the source folder {source_root:?}")]
    NotInSource {
        path: PathBuf,
        source_root: PathBuf,
    },

    #[error("Failed to create directory {path:?}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to copy {path:?}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to query free space at {path:?}: {source}")]
    FreeSpace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No checksum manifest found in {path:?}")]
    NoManifest { path: PathBuf },

    #[error("Failed to read checksum manifest {path:?}: {source}")]
    ReadManifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {path:?}: {source}")]
    WriteReport {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Interrupted")]
    Interrupted,
}
