// Keepsake backup system.

//! Generally useful helpers.

use std::path::{Path, PathBuf};

use crate::vfs::Filesystem;

/// Make a path unique by inserting a number before the extension.
///
/// If nothing exists at `path` it is returned unchanged; otherwise the
/// smallest unused `<stem>.<N><.ext>` with N >= 1 is returned.
pub fn unique_path(fs: &dyn Filesystem, path: &Path) -> PathBuf {
    if !fs.exists(path) {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    for n in 1.. {
        let candidate = parent.join(format!("{stem}.{n}{suffix}"));
        if !fs.exists(&candidate) {
            return candidate;
        }
    }
    unreachable!();
}

/// Render a relative path with forward slashes, as stored in manifests.
pub fn slash_path(rel: &Path) -> String {
    rel.iter()
        .map(|c| c.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

const BYTE_UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

/// Display a byte count with a binary unit.
pub fn human_bytes(size: u64) -> String {
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < BYTE_UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{size} B")
    } else {
        format!("{value:.2} {}", BYTE_UNITS[unit])
    }
}
