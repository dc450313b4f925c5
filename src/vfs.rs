// Keepsake backup system.

//! The filesystem capability boundary.
//!
//! Everything the engine does to a disk goes through [Filesystem], so
//! platform differences (case sensitivity, reparse points, free-space
//! queries) stay out of the walk logic and tests can substitute a fake.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use filetime::FileTime;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::error;

use crate::kind::Kind;

/// Metadata for one directory entry, read without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub kind: Kind,
    pub len: u64,
    pub mtime: FileTime,
    /// Inode number, or 0 where the platform has none.
    pub ino: u64,
    /// Hard link count, or 1 where the platform has none.
    pub nlink: u64,
    /// True for platform reparse points (junctions). Always false on unix.
    pub reparse: bool,
}

impl FileInfo {
    /// Mtime truncated to whole seconds, the precision snapshots compare at.
    pub fn mtime_seconds(&self) -> i64 {
        self.mtime.unix_seconds()
    }
}

/// One name within a directory, paired with its kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: Kind,
}

/// The capability surface the engine needs from a filesystem.
pub trait Filesystem {
    /// Stat without following symlinks.
    fn stat(&self, path: &Path) -> io::Result<FileInfo>;

    /// List a directory, sorted by name.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read>>;

    /// Open for writing; the file must not already exist.
    fn open_write_new(&self, path: &Path) -> io::Result<Box<dyn Write>>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Copy a regular file, preserving permissions and mtime.
    /// An existing destination is overwritten.
    fn copy_file(&self, src: &Path, dest: &Path) -> io::Result<u64>;

    fn hard_link(&self, existing: &Path, new: &Path) -> io::Result<()>;

    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()>;

    fn read_link(&self, path: &Path) -> io::Result<PathBuf>;

    fn unlink(&self, path: &Path) -> io::Result<()>;

    /// Remove an empty directory.
    fn rmdir(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Bytes available to unprivileged writers on the filesystem holding
    /// `path`.
    fn free_space(&self, path: &Path) -> io::Result<u64>;

    /// Whether glob matching on this filesystem should ignore case.
    fn case_insensitive(&self) -> bool;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_ok()
    }
}

/// The real, local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFs;

impl Filesystem for LocalFs {
    fn stat(&self, path: &Path) -> io::Result<FileInfo> {
        let meta = fs::symlink_metadata(path)?;
        #[cfg(unix)]
        let (ino, nlink) = {
            use std::os::unix::fs::MetadataExt;
            (meta.ino(), meta.nlink())
        };
        #[cfg(not(unix))]
        let (ino, nlink) = (0, 1);
        #[cfg(windows)]
        let reparse = {
            use std::os::windows::fs::MetadataExt;
            const FILE_ATTRIBUTE_REPARSE_POINT: u32 = 0x400;
            !meta.file_type().is_symlink()
                && meta.file_attributes() & FILE_ATTRIBUTE_REPARSE_POINT != 0
        };
        #[cfg(not(windows))]
        let reparse = false;
        Ok(FileInfo {
            kind: meta.file_type().into(),
            len: meta.len(),
            mtime: FileTime::from_last_modification_time(&meta),
            ino,
            nlink,
            reparse,
        })
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            entries.push(DirEntry {
                name: entry.file_name(),
                kind: entry.file_type()?.into(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn open_write_new(&self, path: &Path) -> io::Result<Box<dyn Write>> {
        Ok(Box::new(
            fs::File::options().write(true).create_new(true).open(path)?,
        ))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn copy_file(&self, src: &Path, dest: &Path) -> io::Result<u64> {
        let bytes = fs::copy(src, dest)?;
        let mtime = FileTime::from_last_modification_time(&fs::metadata(src)?);
        filetime::set_file_mtime(dest, mtime)?;
        Ok(bytes)
    }

    fn hard_link(&self, existing: &Path, new: &Path) -> io::Result<()> {
        fs::hard_link(existing, new)
    }

    #[cfg(unix)]
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, link)
    }

    #[cfg(windows)]
    fn symlink(&self, target: &Path, link: &Path) -> io::Result<()> {
        std::os::windows::fs::symlink_file(target, link)
    }

    fn read_link(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(path)
    }

    fn unlink(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rmdir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    #[cfg(unix)]
    fn free_space(&self, path: &Path) -> io::Result<u64> {
        use std::os::unix::ffi::OsStrExt;
        let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        if unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }

    #[cfg(not(unix))]
    fn free_space(&self, _path: &Path) -> io::Result<u64> {
        tracing::debug!("free-space query not supported on this platform");
        Ok(u64::MAX)
    }

    fn case_insensitive(&self) -> bool {
        cfg!(windows)
    }
}

/// Everything an engine operation needs besides its own options: the
/// filesystem, the instant the run started, and the interrupt flag.
pub struct Context {
    pub fs: Box<dyn Filesystem>,
    pub now: PrimitiveDateTime,
    /// The offset `now` was observed at, for converting file mtimes.
    pub offset: UtcOffset,
    pub interrupt: Arc<AtomicBool>,
}

impl Context {
    /// A context on the local filesystem, started now, in local time.
    pub fn local() -> Context {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        Context {
            fs: Box::new(LocalFs),
            now: PrimitiveDateTime::new(now.date(), now.time()),
            offset: now.offset(),
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A local-filesystem context with a fixed clock.
    pub fn local_at(now: PrimitiveDateTime) -> Context {
        Context {
            fs: Box::new(LocalFs),
            now,
            offset: UtcOffset::UTC,
            interrupt: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::Relaxed)
    }

    /// A file mtime as a local wall-clock time, comparable with `now`.
    pub fn local_datetime(&self, mtime: FileTime) -> PrimitiveDateTime {
        let utc = OffsetDateTime::from_unix_timestamp(mtime.unix_seconds())
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
            .to_offset(self.offset);
        PrimitiveDateTime::new(utc.date(), utc.time())
    }
}

/// Delete a directory tree, unlinking each entry rather than rewriting
/// shared inodes, and removing directories bottom-up.
///
/// Failures are logged and skipped; the number of failures is returned.
pub fn remove_tree(fs: &dyn Filesystem, path: &Path) -> usize {
    let mut errors = 0;
    let entries = match fs.list_dir(path) {
        Ok(entries) => entries,
        Err(err) => {
            error!("Could not list {:?} for deletion: {}", path, err);
            return 1;
        }
    };
    for entry in entries {
        let child = path.join(&entry.name);
        if entry.kind.is_dir() {
            errors += remove_tree(fs, &child);
        } else if let Err(err) = fs.unlink(&child) {
            error!("Could not delete {:?}: {}", child, err);
            errors += 1;
        }
    }
    if let Err(err) = fs.rmdir(path) {
        error!("Could not remove directory {:?}: {}", path, err);
        errors += 1;
    }
    errors
}

/// Delete whatever is at `path`: a tree if it is a real directory,
/// otherwise a single unlink.
pub fn remove_path(fs: &dyn Filesystem, path: &Path) -> usize {
    match fs.stat(path) {
        Ok(info) if info.kind.is_dir() => remove_tree(fs, path),
        Ok(_) => {
            if let Err(err) = fs.unlink(path) {
                error!("Could not delete {:?}: {}", path, err);
                1
            } else {
                0
            }
        }
        Err(err) => {
            error!("Could not stat {:?} for deletion: {}", path, err);
            1
        }
    }
}
