// Keepsake backup system.

//! Content-hash manifests and verification.
//!
//! Each snapshot can carry a `checksums.sha3` manifest: one line per
//! regular file, `<forward-slash relative path> <64-hex sha3-256>`.
//! Verification re-hashes against the manifest; live verification
//! compares the source tree against the latest snapshot directly.

use std::collections::{BTreeMap, HashSet};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use sha3::{Digest, Sha3_256};
use tracing::{info, warn};

use crate::catalog::{self, format_timestamp, Snapshot};
use crate::compare::contents_equal;
use crate::filter::Filter;
use crate::kind::Kind;
use crate::misc::{slash_path, unique_path};
use crate::stats::{ChecksumStats, VerifyStats};
use crate::timespan::TimeSpan;
use crate::vfs::{Context, Filesystem};
use crate::walk::walk_source;
use crate::{Error, Result};

static MANIFEST_NAME: &str = "checksums.sha3";

/// True for `checksums.sha3` and `checksums.<N>.sha3` at a snapshot root.
pub(crate) fn is_manifest(rel: &Path) -> bool {
    if rel.parent().is_some_and(|p| !p.as_os_str().is_empty()) {
        return false;
    }
    let Some(name) = rel.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name == MANIFEST_NAME {
        return true;
    }
    name.strip_prefix("checksums.")
        .and_then(|rest| rest.strip_suffix(".sha3"))
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

/// Manifests present in a snapshot, in creation order.
pub fn manifest_files(fs: &dyn Filesystem, snapshot: &Snapshot) -> Vec<PathBuf> {
    let Ok(entries) = fs.list_dir(&snapshot.path) else {
        return Vec::new();
    };
    let mut found: Vec<(u64, PathBuf)> = entries
        .iter()
        .filter(|e| e.kind.is_file())
        .filter_map(|e| {
            let name = e.name.to_str()?;
            if !is_manifest(Path::new(name)) {
                return None;
            }
            let ordinal = if name == MANIFEST_NAME {
                0
            } else {
                name.trim_start_matches("checksums.")
                    .trim_end_matches(".sha3")
                    .parse()
                    .ok()?
            };
            Some((ordinal, snapshot.path.join(name)))
        })
        .collect();
    found.sort();
    found.into_iter().map(|(_, path)| path).collect()
}

/// The snapshots that carry at least one manifest.
pub fn snapshots_with_manifest(fs: &dyn Filesystem, root: &Path) -> Result<Vec<Snapshot>> {
    Ok(catalog::enumerate(fs, root)?
        .into_iter()
        .filter(|s| !manifest_files(fs, s).is_empty())
        .collect())
}

fn hash_file(fs: &dyn Filesystem, path: &Path) -> std::io::Result<(String, u64)> {
    let mut reader = fs.open_read(path)?;
    let mut hasher = Sha3_256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

/// Write a fresh manifest for a snapshot and return its path.
///
/// An existing `checksums.sha3` is left in place and the new manifest
/// becomes `checksums.<N>.sha3` with the next free N.
pub fn write_manifest(ctx: &Context, snapshot: &Snapshot) -> Result<(PathBuf, ChecksumStats)> {
    let fs = ctx.fs.as_ref();
    let manifest_path = unique_path(fs, &snapshot.path.join(MANIFEST_NAME));
    info!("Writing checksums for {} to {:?}", snapshot.label(), manifest_path);

    let mut stats = ChecksumStats::default();
    let mut out = BufWriter::new(fs.open_write_new(&manifest_path).map_err(|source| {
        Error::WriteReport {
            path: manifest_path.clone(),
            source,
        }
    })?);
    walk_source(ctx, &snapshot.path, &Filter::everything(), &mut |rel, info| {
        if info.kind != Kind::File || is_manifest(rel) {
            return Ok(());
        }
        match hash_file(fs, &snapshot.path.join(rel)) {
            Ok((digest, bytes)) => {
                writeln!(out, "{} {}", slash_path(rel), digest).map_err(|source| {
                    Error::WriteReport {
                        path: manifest_path.clone(),
                        source,
                    }
                })?;
                stats.hashed_files += 1;
                stats.hashed_bytes += bytes;
            }
            Err(err) => {
                warn!("Could not hash {:?}: {}", rel, err);
                stats.read_errors += 1;
            }
        }
        Ok(())
    })?;
    out.flush().map_err(|source| Error::WriteReport {
        path: manifest_path.clone(),
        source,
    })?;
    Ok((manifest_path, stats))
}

/// Write a manifest for the newest snapshot unless any snapshot already
/// has one younger than `max_age`.
pub fn checksum_every(
    ctx: &Context,
    backup_root: &Path,
    max_age: TimeSpan,
) -> Result<Option<(PathBuf, ChecksumStats)>> {
    let fs = ctx.fs.as_ref();
    let snapshots = catalog::enumerate(fs, backup_root)?;
    let Some(newest) = snapshots.last() else {
        return Err(Error::NoSnapshots {
            path: backup_root.to_path_buf(),
        });
    };
    let cutoff = max_age.cutoff(ctx.now);
    for snapshot in &snapshots {
        for manifest in manifest_files(fs, snapshot) {
            if let Ok(info) = fs.stat(&manifest) {
                if ctx.local_datetime(info.mtime) >= cutoff {
                    info!(
                        "Found a recent checksum manifest in {}; skipping",
                        snapshot.label()
                    );
                    return Ok(None);
                }
            }
        }
    }
    write_manifest(ctx, newest).map(Some)
}

/// Re-hash a snapshot against its newest manifest.
///
/// Mismatching and unreadable paths are listed in a result file under
/// `out_dir`; when everything matches no file is written.
pub fn verify_manifest(
    ctx: &Context,
    snapshot: &Snapshot,
    out_dir: &Path,
) -> Result<(VerifyStats, Option<PathBuf>)> {
    let fs = ctx.fs.as_ref();
    let manifest = manifest_files(fs, snapshot)
        .pop()
        .ok_or_else(|| Error::NoManifest {
            path: snapshot.path.clone(),
        })?;
    info!("Verifying {} against {:?}", snapshot.label(), manifest);

    let mut text = String::new();
    fs.open_read(&manifest)
        .and_then(|mut r| r.read_to_string(&mut text))
        .map_err(|source| Error::ReadManifest {
            path: manifest.clone(),
            source,
        })?;

    let mut stats = VerifyStats::default();
    let mut bad_paths: Vec<String> = Vec::new();
    for line in text.lines().filter(|l| !l.is_empty()) {
        let Some((rel, expected)) = line.rsplit_once(' ') else {
            warn!("Malformed manifest line: {:?}", line);
            continue;
        };
        let file = snapshot.path.join(rel);
        match hash_file(fs, &file) {
            Ok((digest, _)) if digest == expected => stats.matching += 1,
            Ok(_) => {
                stats.mismatching += 1;
                bad_paths.push(rel.to_owned());
            }
            Err(err) => {
                warn!("Could not hash {:?}: {}", file, err);
                stats.errors += 1;
                bad_paths.push(rel.to_owned());
            }
        }
    }

    if bad_paths.is_empty() {
        info!("All checksums match.");
        return Ok((stats, None));
    }
    fs.create_dir_all(out_dir)
        .map_err(|source| Error::WriteReport {
            path: out_dir.to_path_buf(),
            source,
        })?;
    let result_path = unique_path(
        fs,
        &out_dir.join(format!(
            "{} checksum mismatches.txt",
            format_timestamp(ctx.now)
        )),
    );
    let mut out = fs
        .open_write_new(&result_path)
        .map_err(|source| Error::WriteReport {
            path: result_path.clone(),
            source,
        })?;
    for rel in &bad_paths {
        writeln!(out, "{rel}").map_err(|source| Error::WriteReport {
            path: result_path.clone(),
            source,
        })?;
    }
    warn!(
        "{} files failed verification; list written to {:?}",
        bad_paths.len(),
        result_path
    );
    Ok((stats, Some(result_path)))
}

struct ReportFile {
    path: PathBuf,
    out: BufWriter<Box<dyn Write>>,
}

impl ReportFile {
    fn create(fs: &dyn Filesystem, out_dir: &Path, name: &str, header: &str) -> Result<ReportFile> {
        let path = unique_path(fs, &out_dir.join(name));
        let mut out = BufWriter::new(fs.open_write_new(&path).map_err(|source| {
            Error::WriteReport {
                path: path.clone(),
                source,
            }
        })?);
        writeln!(out, "{header}").map_err(|source| Error::WriteReport {
            path: path.clone(),
            source,
        })?;
        Ok(ReportFile { path, out })
    }

    fn record(&mut self, rel: &Path) -> Result<()> {
        writeln!(self.out, "{}", slash_path(rel)).map_err(|source| Error::WriteReport {
            path: self.path.clone(),
            source,
        })
    }

    fn finish(mut self) -> Result<()> {
        self.out.flush().map_err(|source| Error::WriteReport {
            path: self.path.clone(),
            source,
        })
    }
}

/// Compare the filtered source tree against the latest snapshot.
///
/// Every source file lands in one of three timestamp-prefixed lists in
/// `out_dir`: matching, mismatching, or error (counterpart missing or
/// unreadable).
pub fn verify_live(
    ctx: &Context,
    source_root: &Path,
    backup_root: &Path,
    filter: &Filter,
    out_dir: &Path,
) -> Result<VerifyStats> {
    let fs = ctx.fs.as_ref();
    let snapshot = catalog::previous(fs, backup_root)?.ok_or_else(|| Error::NoSnapshots {
        path: backup_root.to_path_buf(),
    })?;
    info!(
        "Verifying {} by comparing against {:?}",
        snapshot.label(),
        source_root
    );
    fs.create_dir_all(out_dir)
        .map_err(|source| Error::WriteReport {
            path: out_dir.to_path_buf(),
            source,
        })?;

    let prefix = format_timestamp(ctx.now);
    let header = format!("Comparison: {:?} <---> {:?}", source_root, snapshot.path);
    let mut matching =
        ReportFile::create(fs, out_dir, &format!("{prefix} matching files.txt"), &header)?;
    let mut mismatching = ReportFile::create(
        fs,
        out_dir,
        &format!("{prefix} mismatching files.txt"),
        &header,
    )?;
    let mut errors =
        ReportFile::create(fs, out_dir, &format!("{prefix} error files.txt"), &header)?;

    let mut stats = VerifyStats::default();
    let walk_errors = walk_source(ctx, source_root, filter, &mut |rel, info| {
        let src = source_root.join(rel);
        let counterpart = snapshot.path.join(rel);
        let outcome = match info.kind {
            Kind::Symlink => match (fs.read_link(&src), fs.read_link(&counterpart)) {
                (Ok(a), Ok(b)) => Ok(a == b),
                _ => Err(()),
            },
            _ => contents_equal(fs, &src, &counterpart).map_err(|_| ()),
        };
        match outcome {
            Ok(true) => {
                stats.matching += 1;
                matching.record(rel)
            }
            Ok(false) => {
                stats.mismatching += 1;
                mismatching.record(rel)
            }
            Err(()) => {
                stats.errors += 1;
                errors.record(rel)
            }
        }
    })?;
    stats.errors += walk_errors;
    matching.finish()?;
    mismatching.finish()?;
    errors.finish()?;
    filter.warn_unused();
    info!("{}", stats);
    Ok(stats)
}

/// Report files that exist in any snapshot but are gone from the source.
///
/// Returns the path of `missing_files.txt`, or None when nothing is
/// missing.
pub fn find_missing(
    ctx: &Context,
    source_root: &Path,
    backup_root: &Path,
    filter: &Filter,
    out_dir: &Path,
) -> Result<Option<PathBuf>> {
    let fs = ctx.fs.as_ref();
    let snapshots = catalog::enumerate(fs, backup_root)?;
    if snapshots.is_empty() {
        return Err(Error::NoSnapshots {
            path: backup_root.to_path_buf(),
        });
    }

    info!("Creating list of source files in {:?} ...", source_root);
    let mut source_files: HashSet<PathBuf> = HashSet::new();
    walk_source(ctx, source_root, filter, &mut |rel, _info| {
        source_files.insert(rel.to_path_buf());
        Ok(())
    })?;

    info!("Searching for missing files in {:?} ...", backup_root);
    let mut last_seen: BTreeMap<PathBuf, String> = BTreeMap::new();
    for (index, snapshot) in snapshots.iter().enumerate() {
        info!("[{}/{}] {}", index + 1, snapshots.len(), snapshot.name);
        walk_source(ctx, &snapshot.path, filter, &mut |rel, _info| {
            if !is_manifest(rel) && !source_files.contains(rel) {
                last_seen.insert(rel.to_path_buf(), snapshot.name.clone());
            }
            Ok(())
        })?;
    }

    if last_seen.is_empty() {
        info!("No missing source files found.");
        return Ok(None);
    }
    fs.create_dir_all(out_dir)
        .map_err(|source| Error::WriteReport {
            path: out_dir.to_path_buf(),
            source,
        })?;
    let result_path = unique_path(fs, &out_dir.join("missing_files.txt"));
    warn!(
        "{} files missing from {:?}; list written to {:?}",
        last_seen.len(),
        source_root,
        result_path
    );
    let mut out = BufWriter::new(fs.open_write_new(&result_path).map_err(|source| {
        Error::WriteReport {
            path: result_path.clone(),
            source,
        }
    })?);
    let write_err = |source| Error::WriteReport {
        path: result_path.clone(),
        source,
    };
    writeln!(out, "Missing source files found in {:?}:", backup_root).map_err(write_err)?;
    let mut current_dir: Option<PathBuf> = None;
    for (rel, snapshot_name) in &last_seen {
        let parent = rel.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
        if current_dir.as_ref() != Some(&parent) {
            if parent.as_os_str().is_empty() {
                writeln!(out, ".").map_err(write_err)?;
            } else {
                writeln!(out, "{}", slash_path(&parent)).map_err(write_err)?;
            }
            current_dir = Some(parent);
        }
        writeln!(
            out,
            "    {}    last seen: {}",
            rel.file_name().unwrap_or_default().to_string_lossy(),
            snapshot_name
        )
        .map_err(write_err)?;
    }
    out.flush().map_err(write_err)?;
    Ok(Some(result_path))
}
