// Keepsake backup system.

//! Rebuild a full tree from a chosen snapshot.
//!
//! Restored files are plain copies, never hard links, so the destination
//! is independent of the backup set afterwards.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::catalog::Snapshot;
use crate::integrity::is_manifest;
use crate::kind::Kind;
use crate::stats::RestoreStats;
use crate::vfs::{remove_path, Context, Filesystem};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    /// Delete destination files that are not present in the snapshot.
    pub delete_extra: bool,
}

/// Copy a snapshot's contents into `destination`, overwriting files that
/// were backed up.
///
/// Checksum manifests are part of the snapshot, not the source tree, and
/// are not restored.
pub fn restore(
    ctx: &Context,
    snapshot: &Snapshot,
    destination: &Path,
    options: &RestoreOptions,
) -> Result<RestoreStats> {
    info!("Restoring from: {}", snapshot.label());
    info!("Restoring to  : {:?}", destination);
    info!("Deleting extra files: {:?}", options.delete_extra);
    let mut stats = RestoreStats::default();
    restore_dir(ctx, snapshot, Path::new(""), destination, options, &mut stats)?;
    info!("{}", stats);
    Ok(stats)
}

fn restore_dir(
    ctx: &Context,
    snapshot: &Snapshot,
    rel: &Path,
    destination: &Path,
    options: &RestoreOptions,
    stats: &mut RestoreStats,
) -> Result<()> {
    if ctx.interrupted() {
        return Err(Error::Interrupted);
    }
    let fs = ctx.fs.as_ref();
    let snapshot_dir = snapshot.path.join(rel);
    let dest_dir = destination.join(rel);
    let entries = fs
        .list_dir(&snapshot_dir)
        .map_err(|source| Error::ListSnapshots {
            path: snapshot_dir.clone(),
            source,
        })?;
    fs.create_dir_all(&dest_dir)
        .map_err(|source| Error::CreateDirectory {
            path: dest_dir.clone(),
            source,
        })?;

    for entry in &entries {
        let rel_child = rel.join(&entry.name);
        if is_manifest(&rel_child) {
            continue;
        }
        let src = snapshot.path.join(&rel_child);
        let dest = destination.join(&rel_child);
        match entry.kind {
            Kind::Dir => {
                stats.directories += 1;
                restore_dir(ctx, snapshot, &rel_child, destination, options, stats)?;
            }
            Kind::File => match fs.copy_file(&src, &dest) {
                Ok(_) => {
                    debug!("Restored {:?}", rel_child);
                    stats.files += 1;
                }
                Err(err) => {
                    warn!("Could not restore {:?} from {:?}: {}", dest, src, err);
                    stats.errors += 1;
                }
            },
            Kind::Symlink => match restore_symlink(fs, &src, &dest) {
                Ok(()) => stats.symlinks += 1,
                Err(err) => {
                    warn!("Could not restore symlink {:?}: {}", dest, err);
                    stats.errors += 1;
                }
            },
            Kind::Unknown => {
                debug!("Skipping unsupported entry {:?}", rel_child);
            }
        }
    }

    if options.delete_extra {
        delete_extra_entries(fs, &entries, &dest_dir, stats);
    }
    Ok(())
}

fn restore_symlink(fs: &dyn Filesystem, src: &Path, dest: &Path) -> std::io::Result<()> {
    let target = fs.read_link(src)?;
    if fs.exists(dest) {
        fs.unlink(dest)?;
    }
    fs.symlink(&target, dest)
}

/// Remove destination entries with no counterpart in the snapshot
/// directory just restored.
fn delete_extra_entries(
    fs: &dyn Filesystem,
    snapshot_entries: &[crate::vfs::DirEntry],
    dest_dir: &Path,
    stats: &mut RestoreStats,
) {
    let dest_entries = match fs.list_dir(dest_dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!("Could not list {:?} for cleanup: {}", dest_dir, err);
            stats.errors += 1;
            return;
        }
    };
    for extra in dest_entries
        .iter()
        .filter(|d| !snapshot_entries.iter().any(|s| s.name == d.name))
    {
        let path = dest_dir.join(&extra.name);
        debug!("Deleting extra item {:?}", path);
        stats.errors += remove_path(fs, &path);
        stats.deleted_extra += 1;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backup::{backup, BackupOptions};
    use crate::catalog;
    use crate::test_fixtures::TreeFixture;
    use crate::vfs::LocalFs;
    use std::fs;
    use time::macros::datetime;

    fn snapshot_of(src: &TreeFixture, backups: &TreeFixture) -> Snapshot {
        let ctx = Context::local_at(datetime!(2024-01-01 10:00:00));
        backup(&ctx, src.path(), backups.path(), &BackupOptions::default()).unwrap();
        catalog::previous(&LocalFs, backups.path())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn restore_with_delete_extra_removes_strays() {
        let src = TreeFixture::new();
        src.create_file_with_content("a", b"from snapshot");
        src.create_file_with_content("b", b"from snapshot");
        let backups = TreeFixture::new();
        let snapshot = snapshot_of(&src, &backups);

        let dest = TreeFixture::new();
        dest.create_file_with_content("b", b"stale");
        dest.create_file_with_content("c", b"extra");

        let ctx = Context::local();
        let stats = restore(
            &ctx,
            &snapshot,
            dest.path(),
            &RestoreOptions { delete_extra: true },
        )
        .unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.deleted_extra, 1);
        assert_eq!(dest.read("a"), b"from snapshot");
        assert_eq!(dest.read("b"), b"from snapshot");
        assert!(!dest.path().join("c").exists());
    }

    #[test]
    fn restore_with_keep_extra_leaves_strays() {
        let src = TreeFixture::new();
        src.create_file_with_content("a", b"from snapshot");
        src.create_file_with_content("b", b"from snapshot");
        let backups = TreeFixture::new();
        let snapshot = snapshot_of(&src, &backups);

        let dest = TreeFixture::new();
        dest.create_file_with_content("b", b"stale");
        dest.create_file_with_content("c", b"extra");

        let ctx = Context::local();
        restore(&ctx, &snapshot, dest.path(), &RestoreOptions::default()).unwrap();
        assert_eq!(dest.read("b"), b"from snapshot");
        assert_eq!(dest.read("c"), b"extra");
    }

    #[cfg(unix)]
    #[test]
    fn restored_files_are_copies_not_links() {
        let src = TreeFixture::new();
        src.create_file_with_content("a", b"data");
        let backups = TreeFixture::new();
        let snapshot = snapshot_of(&src, &backups);

        let dest = TreeFixture::new();
        let ctx = Context::local();
        restore(&ctx, &snapshot, dest.path(), &RestoreOptions::default()).unwrap();

        let in_snapshot = LocalFs.stat(&snapshot.path.join("a")).unwrap();
        let restored = LocalFs.stat(&dest.path().join("a")).unwrap();
        assert_ne!(in_snapshot.ino, restored.ino);
        assert_eq!(restored.nlink, 1);
    }

    #[test]
    fn manifests_are_not_restored() {
        let src = TreeFixture::new();
        src.create_file_with_content("a", b"data");
        let backups = TreeFixture::new();
        let snapshot = snapshot_of(&src, &backups);
        fs::write(snapshot.path.join("checksums.sha3"), b"a abc\n").unwrap();

        let dest = TreeFixture::new();
        let ctx = Context::local();
        let stats = restore(&ctx, &snapshot, dest.path(), &RestoreOptions::default()).unwrap();
        assert_eq!(stats.files, 1);
        assert!(!dest.path().join("checksums.sha3").exists());
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_restored_with_their_targets() {
        let src = TreeFixture::new();
        src.create_file_with_content("real", b"data");
        src.create_symlink("link", "real");
        let backups = TreeFixture::new();
        let snapshot = snapshot_of(&src, &backups);

        let dest = TreeFixture::new();
        let ctx = Context::local();
        let stats = restore(&ctx, &snapshot, dest.path(), &RestoreOptions::default()).unwrap();
        assert_eq!(stats.symlinks, 1);
        assert_eq!(
            fs::read_link(dest.path().join("link")).unwrap(),
            Path::new("real")
        );
    }
}
