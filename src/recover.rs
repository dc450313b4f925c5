// Keepsake backup system.

//! Recover historical versions of single paths, purge paths from every
//! snapshot, and move ranges of snapshots to a new backup root.
//!
//! These operations return candidate lists and accept a chosen index, so
//! menu rendering stays in the front end and tests can drive them
//! directly.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::SeedableRng;
use time::PrimitiveDateTime;
use tracing::{info, warn};

use crate::backup;
use crate::catalog::{self, Snapshot};
use crate::compare::CompareMode;
use crate::filter::Filter;
use crate::integrity::is_manifest;
use crate::kind::Kind;
use crate::misc::{slash_path, unique_path};
use crate::stats::{BackupStats, PurgeStats};
use crate::vfs::{remove_path, Context, Filesystem};
use crate::{Error, Result};

/// Map an absolute path inside the source tree to its snapshot-relative
/// form.
pub fn relative_to_source(path: &Path, source_root: &Path) -> Result<PathBuf> {
    path.strip_prefix(source_root)
        .map(Path::to_path_buf)
        .map_err(|_| Error::NotInSource {
            path: path.to_path_buf(),
            source_root: source_root.to_path_buf(),
        })
}

/// The snapshots holding distinct versions of `rel`.
///
/// Hard-linked repeats of the same inode are collapsed to the first
/// snapshot that carries them, so each entry is a genuinely different
/// version.
pub fn versions_of(fs: &dyn Filesystem, backup_root: &Path, rel: &Path) -> Result<Vec<Snapshot>> {
    let mut seen_inodes: HashSet<u64> = HashSet::new();
    let mut versions = Vec::new();
    for snapshot in catalog::enumerate(fs, backup_root)? {
        let candidate = snapshot.path.join(rel);
        let Ok(info) = fs.stat(&candidate) else {
            continue;
        };
        // Inode 0 means the platform has no inode numbers; keep every
        // occurrence rather than collapsing them all.
        if info.ino == 0 || seen_inodes.insert(info.ino) {
            versions.push(snapshot);
        }
    }
    Ok(versions)
}

/// Copy one version of `rel` from a snapshot back next to the original.
///
/// The copy never clobbers existing data: on a name collision it becomes
/// `<stem>.<N>.<ext>` with the smallest unused N.
pub fn recover(
    ctx: &Context,
    snapshot: &Snapshot,
    rel: &Path,
    source_root: &Path,
) -> Result<PathBuf> {
    let fs = ctx.fs.as_ref();
    let backed_up = snapshot.path.join(rel);
    let destination = unique_path(fs, &source_root.join(rel));
    info!("Copying {:?} to {:?}", backed_up, destination);
    copy_recursive(fs, &backed_up, &destination)?;
    Ok(destination)
}

fn copy_recursive(fs: &dyn Filesystem, src: &Path, dest: &Path) -> Result<()> {
    let info = fs.stat(src).map_err(|source| Error::Copy {
        path: src.to_path_buf(),
        source,
    })?;
    let copy_err = |source| Error::Copy {
        path: src.to_path_buf(),
        source,
    };
    match info.kind {
        Kind::Dir => {
            fs.create_dir_all(dest)
                .map_err(|source| Error::CreateDirectory {
                    path: dest.to_path_buf(),
                    source,
                })?;
            for entry in fs.list_dir(src).map_err(copy_err)? {
                copy_recursive(fs, &src.join(&entry.name), &dest.join(&entry.name))?;
            }
        }
        Kind::Symlink => {
            let target = fs.read_link(src).map_err(copy_err)?;
            fs.symlink(&target, dest).map_err(copy_err)?;
        }
        _ => {
            fs.copy_file(src, dest).map_err(copy_err)?;
        }
    }
    Ok(())
}

/// Every distinct (name, kind) ever backed up directly under `rel_dir`,
/// across all snapshots. Drives the `--list` and `--purge-list` menus.
pub fn names_under(
    fs: &dyn Filesystem,
    backup_root: &Path,
    rel_dir: &Path,
) -> Result<Vec<(String, Kind)>> {
    let mut names: BTreeSet<(String, Kind)> = BTreeSet::new();
    for snapshot in catalog::enumerate(fs, backup_root)? {
        let dir = snapshot.path.join(rel_dir);
        let Ok(entries) = fs.list_dir(&dir) else {
            continue;
        };
        for entry in entries {
            let rel_child = rel_dir.join(&entry.name);
            if !is_manifest(&rel_child) {
                names.insert((entry.name.to_string_lossy().into_owned(), entry.kind));
            }
        }
    }
    Ok(names.into_iter().collect())
}

/// How many occurrences of `rel` exist across all snapshots, by kind.
///
/// More than one kind means the path changed type at some point and the
/// caller should ask which kinds to purge.
pub fn purge_kinds(
    fs: &dyn Filesystem,
    backup_root: &Path,
    rel: &Path,
) -> Result<Vec<(Kind, usize)>> {
    let mut counts: BTreeMap<Kind, usize> = BTreeMap::new();
    for snapshot in catalog::enumerate(fs, backup_root)? {
        if let Ok(info) = fs.stat(&snapshot.path.join(rel)) {
            *counts.entry(info.kind).or_default() += 1;
        }
    }
    Ok(counts.into_iter().collect())
}

/// Delete every occurrence of `rel` with a kind in `kinds` from all
/// snapshots.
pub fn purge(
    ctx: &Context,
    backup_root: &Path,
    rel: &Path,
    kinds: &[Kind],
) -> Result<PurgeStats> {
    let fs = ctx.fs.as_ref();
    let mut stats = PurgeStats::default();
    for snapshot in catalog::enumerate(fs, backup_root)? {
        if ctx.interrupted() {
            return Err(Error::Interrupted);
        }
        let target = snapshot.path.join(rel);
        let Ok(info) = fs.stat(&target) else {
            continue;
        };
        if !kinds.contains(&info.kind) {
            continue;
        }
        info!("Deleting {} {:?} ...", info.kind, target);
        stats.errors += remove_path(fs, &target);
        stats.deleted_paths += 1;
    }
    if stats.deleted_paths == 0 {
        info!("Could not find any backed up copies of {:?}", rel);
    } else {
        info!("To keep the purged item out of future backups, consider adding");
        info!("this line to a filter file:");
        info!("- {}", slash_path(rel));
    }
    Ok(stats)
}

/// Which snapshots a `--move-backup` run re-materializes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveSelection {
    /// The newest N snapshots.
    Count(usize),
    All,
    /// Snapshots no older than a span.
    Age(crate::timespan::TimeSpan),
    /// Snapshots made on or after a date.
    Since(PrimitiveDateTime),
}

fn select_snapshots(
    snapshots: Vec<Snapshot>,
    selection: MoveSelection,
    now: PrimitiveDateTime,
) -> Vec<Snapshot> {
    match selection {
        MoveSelection::All => snapshots,
        MoveSelection::Count(n) => {
            let skip = snapshots.len().saturating_sub(n);
            snapshots.into_iter().skip(skip).collect()
        }
        MoveSelection::Age(span) => {
            let cutoff = span.cutoff(now);
            snapshots
                .into_iter()
                .filter(|s| s.timestamp >= cutoff)
                .collect()
        }
        MoveSelection::Since(date) => snapshots
            .into_iter()
            .filter(|s| s.timestamp >= date)
            .collect(),
    }
}

/// Re-materialize a range of snapshots at a new backup root.
///
/// Each snapshot is replayed through the ordinary link-or-copy walk with
/// the previously moved snapshot as "previous", so hard-link sharing
/// within the moved range is preserved. Snapshot names (and therefore
/// timestamps) carry over unchanged.
pub fn move_snapshots(
    ctx: &Context,
    backup_root: &Path,
    dest_root: &Path,
    selection: MoveSelection,
) -> Result<(usize, BackupStats)> {
    let fs = ctx.fs.as_ref();
    let selected = select_snapshots(
        catalog::enumerate(fs, backup_root)?,
        selection,
        ctx.now,
    );
    if selected.is_empty() {
        warn!("No snapshots selected to move from {:?}", backup_root);
        return Ok((0, BackupStats::default()));
    }
    info!("Moving {} snapshots", selected.len());
    info!("from {:?}", backup_root);
    info!("to   {:?}", dest_root);
    fs.create_dir_all(dest_root)
        .map_err(|source| Error::CreateDirectory {
            path: dest_root.to_path_buf(),
            source,
        })?;

    let mut moved = 0;
    let mut total = BackupStats::default();
    let mut rng =
        SmallRng::seed_from_u64(ctx.now.assume_utc().unix_timestamp() as u64);
    for snapshot in &selected {
        let bucket = dest_root.join(format!("{:04}", snapshot.timestamp.year()));
        let final_path = bucket.join(&snapshot.name);
        if fs.exists(&final_path) {
            warn!("{:?} already exists; skipping", final_path);
            continue;
        }
        let staging = catalog::staging_path(dest_root);
        let previous = catalog::previous(fs, dest_root)?;
        info!("Moving snapshot: {}", snapshot.label());
        let stats = backup::snapshot_tree(
            ctx,
            &snapshot.path,
            previous.as_ref().map(|p| p.path.as_path()),
            &staging,
            &Filter::everything(),
            CompareMode::Quick,
            0.0,
            &mut rng,
        )?;
        if !fs.exists(&staging) {
            warn!("{} had no content to move", snapshot.label());
            continue;
        }
        fs.create_dir_all(&bucket)
            .map_err(|source| Error::CreateSnapshotDir {
                path: bucket.clone(),
                source,
            })?;
        fs.rename(&staging, &final_path)
            .map_err(|source| Error::FinalizeSnapshot {
                path: final_path.clone(),
                source,
            })?;
        moved += 1;
        total += stats;
    }
    Ok((moved, total))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backup::{backup, BackupOptions};
    use crate::test_fixtures::TreeFixture;
    use crate::vfs::LocalFs;
    use std::fs;
    use time::macros::datetime;

    fn backup_at(src: &TreeFixture, backups: &TreeFixture, now: PrimitiveDateTime) {
        let ctx = Context::local_at(now);
        backup(&ctx, src.path(), backups.path(), &BackupOptions::default()).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn versions_collapse_hard_linked_repeats() {
        let src = TreeFixture::new();
        src.create_file_with_content("doc.txt", b"v1");
        let backups = TreeFixture::new();

        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));
        // Unchanged: second snapshot hard-links the same inode.
        backup_at(&src, &backups, datetime!(2024-01-02 10:00:00));
        // Changed: third snapshot holds a new version.
        src.create_file_with_content("doc.txt", b"v2 longer");
        backup_at(&src, &backups, datetime!(2024-01-03 10:00:00));

        let versions = versions_of(&LocalFs, backups.path(), Path::new("doc.txt")).unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].timestamp, datetime!(2024-01-01 10:00:00));
        assert_eq!(versions[1].timestamp, datetime!(2024-01-03 10:00:00));
    }

    #[test]
    fn recover_renames_around_existing_files() {
        let src = TreeFixture::new();
        src.create_file_with_content("X", b"backed up");
        let backups = TreeFixture::new();
        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));

        // The original and two numbered copies already exist.
        src.create_file_with_content("X.1", b"old copy");
        src.create_file_with_content("X.2", b"old copy");

        let ctx = Context::local();
        let snapshot = catalog::previous(&LocalFs, backups.path())
            .unwrap()
            .unwrap();
        let recovered = recover(&ctx, &snapshot, Path::new("X"), src.path()).unwrap();
        assert_eq!(recovered, src.path().join("X.3"));
        assert_eq!(fs::read(recovered).unwrap(), b"backed up");
    }

    #[test]
    fn recover_copies_whole_directories() {
        let src = TreeFixture::new();
        src.create_dir("dir/sub");
        src.create_file_with_content("dir/a.txt", b"a");
        src.create_file_with_content("dir/sub/b.txt", b"b");
        let backups = TreeFixture::new();
        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));

        let ctx = Context::local();
        let snapshot = catalog::previous(&LocalFs, backups.path())
            .unwrap()
            .unwrap();
        let recovered = recover(&ctx, &snapshot, Path::new("dir"), src.path()).unwrap();
        assert_eq!(recovered, src.path().join("dir.1"));
        assert_eq!(fs::read(recovered.join("sub/b.txt")).unwrap(), b"b");
    }

    #[test]
    fn names_under_unions_all_snapshots() {
        let src = TreeFixture::new();
        src.create_file_with_content("early.txt", b"1");
        let backups = TreeFixture::new();
        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));

        fs::remove_file(src.path().join("early.txt")).unwrap();
        src.create_file_with_content("late.txt", b"2");
        src.create_dir("subdir");
        src.create_file_with_content("subdir/inner.txt", b"3");
        backup_at(&src, &backups, datetime!(2024-01-02 10:00:00));

        let names = names_under(&LocalFs, backups.path(), Path::new("")).unwrap();
        assert_eq!(
            names,
            vec![
                ("early.txt".to_owned(), Kind::File),
                ("late.txt".to_owned(), Kind::File),
                ("subdir".to_owned(), Kind::Dir),
            ]
        );
    }

    #[test]
    fn purge_removes_path_from_every_snapshot() {
        let src = TreeFixture::new();
        src.create_file_with_content("secret.txt", b"oops");
        src.create_file_with_content("keep.txt", b"fine");
        let backups = TreeFixture::new();
        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));
        backup_at(&src, &backups, datetime!(2024-01-02 10:00:00));

        let kinds = purge_kinds(&LocalFs, backups.path(), Path::new("secret.txt")).unwrap();
        assert_eq!(kinds, vec![(Kind::File, 2)]);

        let ctx = Context::local();
        let stats = purge(&ctx, backups.path(), Path::new("secret.txt"), &[Kind::File]).unwrap();
        assert_eq!(stats.deleted_paths, 2);
        for snapshot in catalog::enumerate(&LocalFs, backups.path()).unwrap() {
            assert!(!snapshot.path.join("secret.txt").exists());
            assert!(snapshot.path.join("keep.txt").exists());
        }
    }

    #[test]
    fn purge_respects_kind_choice() {
        let src = TreeFixture::new();
        src.create_file_with_content("thing", b"file version");
        let backups = TreeFixture::new();
        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));

        fs::remove_file(src.path().join("thing")).unwrap();
        src.create_dir("thing");
        src.create_file_with_content("thing/inner", b"dir version");
        backup_at(&src, &backups, datetime!(2024-01-02 10:00:00));

        let kinds = purge_kinds(&LocalFs, backups.path(), Path::new("thing")).unwrap();
        assert_eq!(kinds, vec![(Kind::File, 1), (Kind::Dir, 1)]);

        let ctx = Context::local();
        let stats = purge(&ctx, backups.path(), Path::new("thing"), &[Kind::Dir]).unwrap();
        assert_eq!(stats.deleted_paths, 1);
        let snapshots = catalog::enumerate(&LocalFs, backups.path()).unwrap();
        assert!(snapshots[0].path.join("thing").exists());
        assert!(!snapshots[1].path.join("thing").exists());
    }

    #[cfg(unix)]
    #[test]
    fn moved_snapshots_keep_names_and_hard_link_sharing() {
        let src = TreeFixture::new();
        src.create_file_with_content("stable.txt", b"same bytes");
        let backups = TreeFixture::new();
        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));
        backup_at(&src, &backups, datetime!(2024-01-02 10:00:00));

        let dest = TreeFixture::new();
        let ctx = Context::local_at(datetime!(2024-06-01 00:00:00));
        let (moved, stats) =
            move_snapshots(&ctx, backups.path(), dest.path(), MoveSelection::All).unwrap();
        assert_eq!(moved, 2);
        assert_eq!(stats.copied_files, 1);
        assert_eq!(stats.linked_files, 1);

        let moved_snapshots = catalog::enumerate(&LocalFs, dest.path()).unwrap();
        assert_eq!(moved_snapshots.len(), 2);
        assert_eq!(moved_snapshots[0].timestamp, datetime!(2024-01-01 10:00:00));
        let a = LocalFs
            .stat(&moved_snapshots[0].path.join("stable.txt"))
            .unwrap();
        let b = LocalFs
            .stat(&moved_snapshots[1].path.join("stable.txt"))
            .unwrap();
        assert_eq!(a.ino, b.ino);
    }

    #[test]
    fn move_count_takes_the_newest() {
        let src = TreeFixture::new();
        src.create_file_with_content("f", b"x");
        let backups = TreeFixture::new();
        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));
        backup_at(&src, &backups, datetime!(2024-01-02 10:00:00));
        backup_at(&src, &backups, datetime!(2024-01-03 10:00:00));

        let dest = TreeFixture::new();
        let ctx = Context::local_at(datetime!(2024-06-01 00:00:00));
        let (moved, _) =
            move_snapshots(&ctx, backups.path(), dest.path(), MoveSelection::Count(2)).unwrap();
        assert_eq!(moved, 2);
        let timestamps: Vec<_> = catalog::enumerate(&LocalFs, dest.path())
            .unwrap()
            .into_iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(
            timestamps,
            vec![datetime!(2024-01-02 10:00:00), datetime!(2024-01-03 10:00:00)]
        );
    }

    #[test]
    fn move_since_filters_by_date() {
        let src = TreeFixture::new();
        src.create_file_with_content("f", b"x");
        let backups = TreeFixture::new();
        backup_at(&src, &backups, datetime!(2024-01-01 10:00:00));
        backup_at(&src, &backups, datetime!(2024-03-01 10:00:00));

        let dest = TreeFixture::new();
        let ctx = Context::local_at(datetime!(2024-06-01 00:00:00));
        let (moved, _) = move_snapshots(
            &ctx,
            backups.path(),
            dest.path(),
            MoveSelection::Since(datetime!(2024-02-01 00:00:00)),
        )
        .unwrap();
        assert_eq!(moved, 1);
    }
}
