// Keepsake backup system.

//! Build a new dated snapshot by walking the source tree and either
//! hard-linking each unchanged file to the previous snapshot or copying
//! a fresh byte stream.
//!
//! The snapshot is assembled in a staging directory and renamed into its
//! year bucket only when the walk completes, so an interrupted build
//! never becomes the "previous snapshot" of a later run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use time::PrimitiveDateTime;
use tracing::{debug, info, warn};

use crate::catalog;
use crate::compare::{self, CompareMode};
use crate::filter::Filter;
use crate::kind::Kind;
use crate::stats::BackupStats;
use crate::vfs::{remove_tree, Context, Filesystem};
use crate::walk::walk_source;
use crate::{Error, Result};

pub struct BackupOptions {
    pub filter: Filter,
    pub mode: CompareMode,
    /// Chance of copying an unchanged file instead of hard-linking it,
    /// to bound hard-link fan-out.
    pub copy_probability: f64,
    /// Fixed dice seed; by default the run-start time seeds the dice.
    pub seed: Option<u64>,
    pub delete_on_error: bool,
    pub os_label: String,
    /// Override the snapshot's timestamp (used when moving backups).
    pub timestamp: Option<PrimitiveDateTime>,
}

impl Default for BackupOptions {
    fn default() -> Self {
        BackupOptions {
            filter: Filter::everything(),
            mode: CompareMode::Quick,
            copy_probability: 0.0,
            seed: None,
            delete_on_error: false,
            os_label: std::env::consts::OS.to_owned(),
            timestamp: None,
        }
    }
}

/// Convert an expected average hard link count into a copy probability.
///
/// Occasionally copying an unchanged file keeps several independent
/// copies of it in the backup set and stops link counts from growing
/// without bound: p = 1/(h + 1).
pub fn copy_probability_from_hard_link_count(count: &str) -> Result<f64> {
    let parsed: u64 = count.trim().parse().map_err(|_| Error::InvalidHardLinkCount {
        input: count.to_owned(),
    })?;
    if parsed == 0 {
        return Err(Error::InvalidHardLinkCount {
            input: count.to_owned(),
        });
    }
    Ok(1.0 / (parsed as f64 + 1.0))
}

/// Parse `--copy-probability`: a fraction like `0.05` or a percentage
/// like `5%`.
pub fn parse_probability(input: &str) -> Result<f64> {
    let text = input.trim();
    let err = || Error::InvalidProbability {
        input: input.to_owned(),
    };
    let (number, divisor) = match text.strip_suffix('%') {
        Some(rest) => (rest, 100.0),
        None => (text, 1.0),
    };
    let value: f64 = number.trim().parse().map_err(|_| err())?;
    let probability = value / divisor;
    if !(0.0..=1.0).contains(&probability) {
        return Err(err());
    }
    Ok(probability)
}

/// Create a new snapshot of `source_root` under `backup_root`.
///
/// Returns the per-file action counts. Per-file read and write failures
/// are logged and counted; only structural failures (unusable roots, a
/// failed finalizing rename) are errors.
pub fn backup(
    ctx: &Context,
    source_root: &Path,
    backup_root: &Path,
    options: &BackupOptions,
) -> Result<BackupStats> {
    check_roots(ctx.fs.as_ref(), source_root, backup_root)?;
    let staging = catalog::staging_path(backup_root);
    clean_stale_staging(ctx.fs.as_ref(), &staging);

    let previous = catalog::previous(ctx.fs.as_ref(), backup_root)?;
    match &previous {
        Some(snapshot) => info!("Previous snapshot: {}", snapshot.label()),
        None => info!("No previous snapshots. Copying everything."),
    }
    info!("Reading file contents = {:?}", options.mode == CompareMode::Deep);

    let timestamp = options.timestamp.unwrap_or(ctx.now);
    let seed = options
        .seed
        .unwrap_or_else(|| ctx.now.assume_utc().unix_timestamp() as u64);
    let mut rng = SmallRng::seed_from_u64(seed);

    let result = snapshot_tree(
        ctx,
        source_root,
        previous.as_ref().map(|s| s.path.as_path()),
        &staging,
        &options.filter,
        options.mode,
        options.copy_probability,
        &mut rng,
    )
    .and_then(|stats| {
        options.filter.warn_unused();
        if !ctx.fs.exists(&staging) {
            warn!("No files were backed up!");
            return Ok(stats);
        }
        let final_path = catalog::allocate(ctx.fs.as_ref(), backup_root, timestamp, &options.os_label);
        finalize_snapshot(ctx.fs.as_ref(), &staging, &final_path)?;
        info!("Completed snapshot: {:?}", final_path);
        Ok(stats)
    });

    if result.is_err() && options.delete_on_error && ctx.fs.exists(&staging) {
        info!("Deleting partial snapshot {:?}", staging);
        remove_tree(ctx.fs.as_ref(), &staging);
    }
    if let Ok(stats) = &result {
        for line in format!("{stats}").lines() {
            info!("{}", line);
        }
    }
    result
}

fn check_roots(fs: &dyn Filesystem, source_root: &Path, backup_root: &Path) -> Result<()> {
    match fs.stat(source_root) {
        Ok(info) if info.kind.is_dir() => {}
        _ => {
            return Err(Error::NotADirectory {
                path: source_root.to_path_buf(),
            })
        }
    }
    if backup_root.starts_with(source_root) {
        return Err(Error::BackupInsideSource {
            source_root: source_root.to_path_buf(),
            backup_root: backup_root.to_path_buf(),
        });
    }
    fs.create_dir_all(backup_root)
        .map_err(|source| Error::CreateSnapshotDir {
            path: backup_root.to_path_buf(),
            source,
        })
}

/// Delete a staging directory left behind by an interrupted build.
fn clean_stale_staging(fs: &dyn Filesystem, staging: &Path) {
    if fs.exists(staging) {
        info!(
            "Deleting staging folder left over from an incomplete backup: {:?}",
            staging
        );
        remove_tree(fs, staging);
    }
}

/// Rename a completed staging tree to its final catalog name.
fn finalize_snapshot(fs: &dyn Filesystem, staging: &Path, final_path: &Path) -> Result<()> {
    if let Some(bucket) = final_path.parent() {
        fs.create_dir_all(bucket)
            .map_err(|source| Error::CreateSnapshotDir {
                path: bucket.to_path_buf(),
                source,
            })?;
    }
    fs.rename(staging, final_path)
        .map_err(|source| Error::FinalizeSnapshot {
            path: final_path.to_path_buf(),
            source,
        })
}

/// Mirror the filtered source tree into `dest_root`, linking files that
/// are unchanged in `previous_root` and copying the rest.
///
/// Shared by ordinary backups and by backup moves, which replay old
/// snapshots through the same walk.
#[allow(clippy::too_many_arguments)]
pub(crate) fn snapshot_tree(
    ctx: &Context,
    source_root: &Path,
    previous_root: Option<&Path>,
    dest_root: &Path,
    filter: &Filter,
    mode: CompareMode,
    copy_probability: f64,
    rng: &mut SmallRng,
) -> Result<BackupStats> {
    let mut stats = BackupStats::default();
    let mut made_dirs: HashSet<PathBuf> = HashSet::new();
    let fs = ctx.fs.as_ref();

    let walk_errors = walk_source(ctx, source_root, filter, &mut |rel, info| {
        if info.kind == Kind::Unknown {
            debug!("Skipping unsupported file kind at {:?}", rel);
            stats.skipped_unknown += 1;
            return Ok(());
        }
        ensure_parent_dirs(fs, dest_root, rel, &mut made_dirs, &mut stats)?;
        let src = source_root.join(rel);
        let dest = dest_root.join(rel);
        match info.kind {
            Kind::Symlink => backup_symlink(fs, &src, &dest, &mut stats),
            _ => backup_file(
                fs,
                &src,
                &dest,
                previous_root.map(|p| p.join(rel)),
                info,
                mode,
                copy_probability,
                rng,
                &mut stats,
            ),
        }
        Ok(())
    })?;
    stats.errors += walk_errors;
    Ok(stats)
}

/// Create the destination directories holding `rel`, counting each
/// directory once. Failure here means the snapshot cannot be written at
/// all, which is fatal.
fn ensure_parent_dirs(
    fs: &dyn Filesystem,
    dest_root: &Path,
    rel: &Path,
    made_dirs: &mut HashSet<PathBuf>,
    stats: &mut BackupStats,
) -> Result<()> {
    let parent = rel.parent().unwrap_or_else(|| Path::new(""));
    if made_dirs.contains(parent) {
        return Ok(());
    }
    let dest_dir = dest_root.join(parent);
    fs.create_dir_all(&dest_dir)
        .map_err(|source| Error::CreateSnapshotDir {
            path: dest_dir,
            source,
        })?;
    for ancestor in parent.ancestors() {
        if !made_dirs.insert(ancestor.to_path_buf()) {
            break;
        }
        if !ancestor.as_os_str().is_empty() {
            stats.directories += 1;
        }
    }
    Ok(())
}

fn backup_symlink(fs: &dyn Filesystem, src: &Path, dest: &Path, stats: &mut BackupStats) {
    match fs.read_link(src) {
        Ok(target) => match fs.symlink(&target, dest) {
            Ok(()) => stats.symlinks += 1,
            Err(err) => {
                warn!("Could not create symlink {:?} ({})", dest, err);
                stats.failed_copies += 1;
            }
        },
        Err(err) => {
            warn!("Could not read symlink {:?} ({})", src, err);
            stats.errors += 1;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn backup_file(
    fs: &dyn Filesystem,
    src: &Path,
    dest: &Path,
    counterpart: Option<PathBuf>,
    info: &crate::vfs::FileInfo,
    mode: CompareMode,
    copy_probability: f64,
    rng: &mut SmallRng,
    stats: &mut BackupStats,
) {
    if let Some(counterpart) = counterpart {
        if compare::equivalent(fs, mode, src, info, &counterpart)
            && rng.gen::<f64>() >= copy_probability
        {
            match fs.hard_link(&counterpart, dest) {
                Ok(()) => {
                    debug!("Linked {:?} to {:?}", counterpart, dest);
                    stats.linked_files += 1;
                    return;
                }
                Err(err) => {
                    debug!(
                        "Could not create hard link from {:?} to {:?}: {}",
                        counterpart, dest, err
                    );
                    stats.failed_links += 1;
                }
            }
        }
    }
    match fs.copy_file(src, dest) {
        Ok(bytes) => {
            debug!("Copied {:?} to {:?}", src, dest);
            stats.copied_files += 1;
            stats.copied_bytes += bytes;
        }
        Err(err) => {
            warn!("Could not copy {:?} ({})", src, err);
            stats.failed_copies += 1;
        }
    }
}
