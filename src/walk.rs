// Keepsake backup system.

//! Deterministic depth-first iteration of a filtered source tree.
//!
//! The walk visits files, symlinks, and unknown-kind entries in sorted
//! order, recursing into every directory; the filter decides per file.
//! Unreadable entries are logged and counted, never fatal.

use std::io::Write;
use std::path::Path;

use tracing::{debug, warn};

use crate::filter::Filter;
use crate::kind::Kind;
use crate::misc::slash_path;
use crate::vfs::{Context, FileInfo, Filesystem};
use crate::{Error, Result};

/// Walk the filtered source tree, calling `visit` for each included
/// non-directory entry. Returns the number of entries that could not be
/// read.
///
/// An error from `visit` aborts the walk; per-entry stat failures do not.
pub fn walk_source<F>(
    ctx: &Context,
    source_root: &Path,
    filter: &Filter,
    visit: &mut F,
) -> Result<usize>
where
    F: FnMut(&Path, &FileInfo) -> Result<()>,
{
    let mut errors = 0;
    walk_dir(ctx, source_root, Path::new(""), filter, visit, &mut errors)?;
    Ok(errors)
}

fn walk_dir<F>(
    ctx: &Context,
    source_root: &Path,
    rel: &Path,
    filter: &Filter,
    visit: &mut F,
    errors: &mut usize,
) -> Result<()>
where
    F: FnMut(&Path, &FileInfo) -> Result<()>,
{
    if ctx.interrupted() {
        return Err(Error::Interrupted);
    }
    let abs = source_root.join(rel);
    let entries = match ctx.fs.list_dir(&abs) {
        Ok(entries) => entries,
        Err(source) if rel.as_os_str().is_empty() => {
            return Err(Error::ReadSource {
                path: abs,
                source,
            });
        }
        Err(err) => {
            warn!("Could not list {:?}: {}", abs, err);
            *errors += 1;
            return Ok(());
        }
    };
    for entry in entries {
        let child_rel = rel.join(&entry.name);
        let child_abs = source_root.join(&child_rel);
        let info = match ctx.fs.stat(&child_abs) {
            Ok(info) => info,
            Err(err) => {
                warn!("Could not read {:?}: {}", child_abs, err);
                *errors += 1;
                continue;
            }
        };
        match info.kind {
            Kind::Dir => {
                if info.reparse && !filter.included_with_default(&child_rel, false) {
                    debug!("Skipping reparse point {:?}", child_rel);
                    continue;
                }
                walk_dir(ctx, source_root, &child_rel, filter, visit, errors)?;
            }
            _ => {
                if filter.included_with_default(&child_rel, !info.reparse) {
                    visit(&child_rel, &info)?;
                }
            }
        }
    }
    Ok(())
}

/// List every file the filter lets through, one slash-separated relative
/// path per line. Used by `--preview-filter`.
pub fn preview_filter(
    ctx: &Context,
    source_root: &Path,
    filter: &Filter,
    out: &mut dyn Write,
) -> Result<usize> {
    let errors = walk_source(ctx, source_root, filter, &mut |rel, _info| {
        writeln!(out, "{}", slash_path(rel)).map_err(|source| Error::WriteReport {
            path: source_root.to_path_buf(),
            source,
        })
    })?;
    filter.warn_unused();
    Ok(errors)
}
