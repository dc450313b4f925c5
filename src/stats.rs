// Keepsake backup system.

//! Counters accumulated by each engine operation, with table-style
//! rendering for the log.

use std::fmt;

use derive_more::{Add, AddAssign};
use thousands::Separable;

use crate::misc::human_bytes;

fn write_count(w: &mut fmt::Formatter<'_>, label: &str, value: usize) -> fmt::Result {
    writeln!(w, "{:>12}      {}", value.separate_with_commas(), label)
}

fn write_size(w: &mut fmt::Formatter<'_>, label: &str, value: u64) -> fmt::Result {
    writeln!(w, "{:>12}      {}", human_bytes(value), label)
}

/// What happened while building one snapshot.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BackupStats {
    pub directories: usize,
    pub linked_files: usize,
    pub copied_files: usize,
    pub symlinks: usize,
    /// Hard links that failed and fell back to copying.
    pub failed_links: usize,
    pub failed_copies: usize,
    /// Entries of unsupported kind (sockets, devices).
    pub skipped_unknown: usize,
    /// Entries that could not be read at all.
    pub errors: usize,
    pub copied_bytes: u64,
}

impl BackupStats {
    /// Files present in the finished snapshot.
    pub fn backed_up_files(&self) -> usize {
        self.linked_files + self.copied_files + self.symlinks
    }
}

impl fmt::Display for BackupStats {
    fn fmt(&self, w: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_count(w, "linked files", self.linked_files)?;
        write_count(w, "copied files", self.copied_files)?;
        write_count(w, "symlinks", self.symlinks)?;
        write_count(w, "folders", self.directories)?;
        write_size(w, "copied", self.copied_bytes)?;
        if self.failed_links > 0 {
            write_count(w, "failed links (copied instead)", self.failed_links)?;
        }
        if self.failed_copies > 0 {
            write_count(w, "failed copies", self.failed_copies)?;
        }
        if self.skipped_unknown > 0 {
            write_count(w, "unsupported file kinds", self.skipped_unknown)?;
        }
        if self.errors > 0 {
            write_count(w, "errors", self.errors)?;
        }
        Ok(())
    }
}

/// What a retention pass deleted.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeleteStats {
    pub deleted_snapshots: usize,
    pub errors: usize,
}

impl fmt::Display for DeleteStats {
    fn fmt(&self, w: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_count(w, "deleted snapshots", self.deleted_snapshots)?;
        if self.errors > 0 {
            write_count(w, "errors", self.errors)?;
        }
        Ok(())
    }
}

/// Result of writing a checksum manifest.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChecksumStats {
    pub hashed_files: usize,
    pub hashed_bytes: u64,
    pub read_errors: usize,
}

impl fmt::Display for ChecksumStats {
    fn fmt(&self, w: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_count(w, "hashed files", self.hashed_files)?;
        write_size(w, "hashed", self.hashed_bytes)?;
        if self.read_errors > 0 {
            write_count(w, "unreadable files", self.read_errors)?;
        }
        Ok(())
    }
}

/// Partition counts from a verification pass.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct VerifyStats {
    pub matching: usize,
    pub mismatching: usize,
    pub errors: usize,
}

impl fmt::Display for VerifyStats {
    fn fmt(&self, w: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_count(w, "matching files", self.matching)?;
        write_count(w, "mismatching files", self.mismatching)?;
        write_count(w, "error files", self.errors)
    }
}

/// What a restore wrote into the destination.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RestoreStats {
    pub files: usize,
    pub symlinks: usize,
    pub directories: usize,
    pub deleted_extra: usize,
    pub errors: usize,
}

impl fmt::Display for RestoreStats {
    fn fmt(&self, w: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_count(w, "restored files", self.files)?;
        write_count(w, "restored symlinks", self.symlinks)?;
        write_count(w, "folders", self.directories)?;
        if self.deleted_extra > 0 {
            write_count(w, "deleted extra items", self.deleted_extra)?;
        }
        if self.errors > 0 {
            write_count(w, "errors", self.errors)?;
        }
        Ok(())
    }
}

/// What a purge removed across all snapshots.
#[derive(Add, AddAssign, Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PurgeStats {
    pub deleted_paths: usize,
    pub errors: usize,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backup_stats_accumulate() {
        let a = BackupStats {
            linked_files: 2,
            copied_files: 1,
            copied_bytes: 10,
            ..Default::default()
        };
        let b = BackupStats {
            copied_files: 3,
            copied_bytes: 90,
            ..Default::default()
        };
        let sum = a + b;
        assert_eq!(sum.linked_files, 2);
        assert_eq!(sum.copied_files, 4);
        assert_eq!(sum.copied_bytes, 100);
        assert_eq!(sum.backed_up_files(), 6);
    }

    #[test]
    fn display_is_a_table() {
        let stats = BackupStats {
            linked_files: 1200,
            copied_files: 34,
            copied_bytes: 2048,
            ..Default::default()
        };
        let rendered = format!("{stats}");
        assert!(rendered.contains("1,200"));
        assert!(rendered.contains("linked files"));
        assert!(rendered.contains("2.00 KB"));
        assert!(!rendered.contains("errors"));
    }
}
