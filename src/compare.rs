// Keepsake backup system.

//! Decide whether a source file still matches its counterpart in the
//! previous snapshot.

use std::io::Read;
use std::path::Path;

use tracing::debug;

use crate::vfs::{FileInfo, Filesystem};

/// How file equality is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMode {
    /// Same kind, size, and mtime at second precision.
    #[default]
    Quick,
    /// Same kind, size, and byte-for-byte contents; mtime is ignored.
    Deep,
}

/// True if the source file is equivalent to the previous snapshot's copy
/// under `mode`.
///
/// Any failure to read the counterpart makes the files non-equivalent, so
/// an unreadable previous copy is re-copied rather than linked.
pub fn equivalent(
    fs: &dyn Filesystem,
    mode: CompareMode,
    src: &Path,
    src_info: &FileInfo,
    counterpart: &Path,
) -> bool {
    let prev_info = match fs.stat(counterpart) {
        Ok(info) => info,
        Err(err) => {
            debug!("Could not stat previous copy {:?}: {}", counterpart, err);
            return false;
        }
    };
    if prev_info.kind != src_info.kind || prev_info.len != src_info.len {
        return false;
    }
    match mode {
        CompareMode::Quick => prev_info.mtime_seconds() == src_info.mtime_seconds(),
        CompareMode::Deep => match contents_equal(fs, src, counterpart) {
            Ok(equal) => equal,
            Err(err) => {
                debug!(
                    "Could not compare {:?} with previous copy {:?}: {}",
                    src, counterpart, err
                );
                false
            }
        },
    }
}

const COMPARE_BUF_SIZE: usize = 64 * 1024;

/// Compare two files byte for byte.
pub fn contents_equal(fs: &dyn Filesystem, a: &Path, b: &Path) -> std::io::Result<bool> {
    let mut ra = fs.open_read(a)?;
    let mut rb = fs.open_read(b)?;
    let mut ba = vec![0u8; COMPARE_BUF_SIZE];
    let mut bb = vec![0u8; COMPARE_BUF_SIZE];
    loop {
        let na = read_full(&mut ra, &mut ba)?;
        let nb = read_full(&mut rb, &mut bb)?;
        if na != nb || ba[..na] != bb[..nb] {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
    }
}

/// Read until the buffer is full or the reader is exhausted.
fn read_full(reader: &mut dyn Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vfs::LocalFs;
    use filetime::FileTime;
    use std::fs;

    fn stat(path: &Path) -> FileInfo {
        LocalFs.stat(path).unwrap()
    }

    #[test]
    fn quick_mode_compares_size_and_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, b"same size").unwrap();
        fs::write(&b, b"same size").unwrap();
        let t = FileTime::from_unix_time(1_600_000_000, 0);
        filetime::set_file_mtime(&a, t).unwrap();
        filetime::set_file_mtime(&b, t).unwrap();

        assert!(equivalent(&LocalFs, CompareMode::Quick, &a, &stat(&a), &b));

        filetime::set_file_mtime(&b, FileTime::from_unix_time(1_600_000_001, 0)).unwrap();
        assert!(!equivalent(&LocalFs, CompareMode::Quick, &a, &stat(&a), &b));
    }

    #[test]
    fn quick_mode_rejects_different_sizes() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, b"ten bytes!").unwrap();
        fs::write(&b, b"eleven bytes").unwrap();
        assert!(!equivalent(&LocalFs, CompareMode::Quick, &a, &stat(&a), &b));
    }

    #[test]
    fn deep_mode_ignores_mtime_but_reads_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        let b = tmp.path().join("b");
        fs::write(&a, b"identical").unwrap();
        fs::write(&b, b"identical").unwrap();
        filetime::set_file_mtime(&b, FileTime::from_unix_time(1_000_000, 0)).unwrap();

        assert!(equivalent(&LocalFs, CompareMode::Deep, &a, &stat(&a), &b));

        fs::write(&b, b"identicaX").unwrap();
        filetime::set_file_mtime(&b, stat(&a).mtime).unwrap();
        assert!(!equivalent(&LocalFs, CompareMode::Deep, &a, &stat(&a), &b));
    }

    #[test]
    fn missing_counterpart_is_not_equivalent() {
        let tmp = tempfile::tempdir().unwrap();
        let a = tmp.path().join("a");
        fs::write(&a, b"contents").unwrap();
        let gone = tmp.path().join("gone");
        assert!(!equivalent(&LocalFs, CompareMode::Quick, &a, &stat(&a), &gone));
        assert!(!equivalent(&LocalFs, CompareMode::Deep, &a, &stat(&a), &gone));
    }
}
