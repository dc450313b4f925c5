// Keepsake backup system.

//! Discovery, ordering, and naming of snapshots inside a backup root.
//!
//! A backup root holds year buckets (`2024/`, `2025/`, ...) and each
//! bucket holds snapshot directories named
//! `YYYY-MM-DD HH-MM-SS (<os-label>)`. Anything that does not parse is
//! ignored, so unrelated content can live alongside the catalog.

use std::path::{Path, PathBuf};

use time::format_description::FormatItem;
use time::PrimitiveDateTime;

use crate::vfs::Filesystem;
use crate::{Error, Result};

/// New snapshots are assembled here and renamed into a year bucket only
/// once complete.
pub static STAGING_NAME: &str = "Staging";

fn name_format() -> &'static [FormatItem<'static>] {
    time::macros::format_description!("[year]-[month]-[day] [hour]-[minute]-[second]")
}

/// Render a timestamp the way snapshot directories are named.
pub fn format_timestamp(timestamp: PrimitiveDateTime) -> String {
    timestamp
        .format(name_format())
        .expect("timestamp formats into a name")
}

/// Extract the leading `YYYY-MM-DD HH-MM-SS` from a directory name.
///
/// Anything after the timestamp must be absent or start with a space
/// (the os-label and collision suffixes), and is ignored for ordering.
pub fn parse_timestamp(name: &str) -> Option<PrimitiveDateTime> {
    let head = name.get(..19)?;
    let rest = &name[19..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    PrimitiveDateTime::parse(head, name_format()).ok()
}

/// One discovered snapshot: a completed dated backup directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub path: PathBuf,
    pub name: String,
    pub timestamp: PrimitiveDateTime,
}

impl Snapshot {
    /// The year-bucket-relative label shown to users, e.g.
    /// `2024/2024-03-01 10-00-00 (linux)`.
    pub fn label(&self) -> String {
        format!("{:04}/{}", self.timestamp.year(), self.name)
    }
}

/// All snapshots under a backup root, ascending by timestamp.
///
/// Unparseable directory names, stray files, and symlinked directories
/// are skipped silently.
pub fn enumerate(fs: &dyn Filesystem, root: &Path) -> Result<Vec<Snapshot>> {
    let buckets = fs.list_dir(root).map_err(|source| Error::ListSnapshots {
        path: root.to_path_buf(),
        source,
    })?;
    let mut snapshots = Vec::new();
    for bucket in buckets.iter().filter(|e| e.kind.is_dir()) {
        let bucket_name = bucket.name.to_string_lossy();
        let Ok(year) = bucket_name.parse::<i32>() else {
            continue;
        };
        let bucket_path = root.join(&bucket.name);
        let entries = fs
            .list_dir(&bucket_path)
            .map_err(|source| Error::ListSnapshots {
                path: bucket_path.clone(),
                source,
            })?;
        for entry in entries.iter().filter(|e| e.kind.is_dir()) {
            let name = entry.name.to_string_lossy().into_owned();
            if let Some(timestamp) = parse_timestamp(&name) {
                if timestamp.year() == year {
                    snapshots.push(Snapshot {
                        path: bucket_path.join(&entry.name),
                        name,
                        timestamp,
                    });
                }
            }
        }
    }
    snapshots.sort_by(|a, b| (a.timestamp, &a.name).cmp(&(b.timestamp, &b.name)));
    Ok(snapshots)
}

/// The most recent completed snapshot, if any.
pub fn previous(fs: &dyn Filesystem, root: &Path) -> Result<Option<Snapshot>> {
    Ok(enumerate(fs, root)?.pop())
}

/// Compute the final path for a new snapshot started at `now`.
///
/// If the second-precision name is already taken, ` (2)`, ` (3)`, ... are
/// appended until the name is unique. The directory is not created.
pub fn allocate(
    fs: &dyn Filesystem,
    root: &Path,
    now: PrimitiveDateTime,
    os_label: &str,
) -> PathBuf {
    let bucket = root.join(format!("{:04}", now.year()));
    let base = format!("{} ({})", format_timestamp(now), os_label);
    let mut name = base.clone();
    let mut n = 2;
    while fs.exists(&bucket.join(&name)) {
        name = format!("{base} ({n})");
        n += 1;
    }
    bucket.join(name)
}

/// Where partial snapshots are assembled.
pub fn staging_path(root: &Path) -> PathBuf {
    root.join(STAGING_NAME)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vfs::LocalFs;
    use std::fs;
    use time::macros::datetime;

    #[test]
    fn timestamps_round_trip() {
        let t = datetime!(2024-03-01 10:30:59);
        assert_eq!(format_timestamp(t), "2024-03-01 10-30-59");
        assert_eq!(parse_timestamp("2024-03-01 10-30-59"), Some(t));
        assert_eq!(parse_timestamp("2024-03-01 10-30-59 (linux)"), Some(t));
        assert_eq!(parse_timestamp("2024-03-01 10-30-59 (linux) (2)"), Some(t));
    }

    #[test]
    fn bad_names_do_not_parse() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("notadate"), None);
        assert_eq!(parse_timestamp("2024-03-01"), None);
        assert_eq!(parse_timestamp("2024-13-01 10-30-59"), None);
        assert_eq!(parse_timestamp("2024-03-01 10-30-59x"), None);
        assert_eq!(parse_timestamp("2024-03-01 10:30:59"), None);
    }

    #[test]
    fn enumerate_orders_and_skips_strays() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("2023/2023-12-31 23-59-59 (linux)")).unwrap();
        fs::create_dir_all(root.join("2024/2024-01-01 00-00-00 (linux)")).unwrap();
        fs::create_dir_all(root.join("2024/2024-06-15 12-00-00 (linux)")).unwrap();
        // Stray content that must be ignored.
        fs::create_dir_all(root.join("2024/not-a-snapshot")).unwrap();
        fs::create_dir_all(root.join("notes")).unwrap();
        fs::write(root.join("README"), b"unrelated").unwrap();
        // Timestamp in the wrong year bucket.
        fs::create_dir_all(root.join("2023/2024-02-02 02-02-02 (linux)")).unwrap();

        let snapshots = enumerate(&LocalFs, root).unwrap();
        let labels: Vec<_> = snapshots.iter().map(Snapshot::label).collect();
        assert_eq!(
            labels,
            [
                "2023/2023-12-31 23-59-59 (linux)",
                "2024/2024-01-01 00-00-00 (linux)",
                "2024/2024-06-15 12-00-00 (linux)",
            ]
        );

        let last = previous(&LocalFs, root).unwrap().unwrap();
        assert_eq!(last.timestamp, datetime!(2024-06-15 12:00:00));
    }

    #[test]
    fn previous_of_empty_root_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(previous(&LocalFs, tmp.path()).unwrap(), None);
    }

    #[test]
    fn allocate_appends_counter_on_collision() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        let now = datetime!(2024-06-15 12:00:00);

        let first = allocate(&LocalFs, root, now, "linux");
        assert_eq!(
            first,
            root.join("2024").join("2024-06-15 12-00-00 (linux)")
        );

        fs::create_dir_all(&first).unwrap();
        let second = allocate(&LocalFs, root, now, "linux");
        assert_eq!(
            second,
            root.join("2024").join("2024-06-15 12-00-00 (linux) (2)")
        );

        fs::create_dir_all(&second).unwrap();
        let third = allocate(&LocalFs, root, now, "linux");
        assert_eq!(
            third,
            root.join("2024").join("2024-06-15 12-00-00 (linux) (3)")
        );
    }
}
