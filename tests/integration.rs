// Keepsake backup system.

//! End-to-end scenarios through the public API.

#![cfg(unix)]

use std::fs;
use std::path::Path;

use time::macros::datetime;
use time::Duration;

use keepsake::catalog;
use keepsake::test_fixtures::TreeFixture;
use keepsake::{backup, retain, BackupOptions, CompareMode, Context, LocalFs, RetentionOptions};
use keepsake::{Filesystem, Snapshot};

fn backup_at(
    src: &TreeFixture,
    backups: &TreeFixture,
    timestamp: time::PrimitiveDateTime,
    mutate: impl FnOnce(&mut BackupOptions),
) -> keepsake::BackupStats {
    let ctx = Context::local_at(timestamp);
    let mut options = BackupOptions {
        timestamp: Some(timestamp),
        ..Default::default()
    };
    mutate(&mut options);
    backup(&ctx, src.path(), backups.path(), &options).expect("backup succeeds")
}

fn snapshots(backups: &TreeFixture) -> Vec<Snapshot> {
    catalog::enumerate(&LocalFs, backups.path()).unwrap()
}

fn inode(path: &Path) -> u64 {
    LocalFs.stat(path).unwrap().ino
}

#[test]
fn three_run_link_and_copy_sequence() {
    let src = TreeFixture::new();
    src.create_file_with_content("a.txt", b"ten bytes!");
    src.set_mtime("a.txt", 1_600_000_000);
    let backups = TreeFixture::new();

    // Fresh run: a copy with link count 1.
    let stats = backup_at(&src, &backups, datetime!(2024-01-01 08:00:00), |_| {});
    assert_eq!(stats.copied_files, 1);
    let first = snapshots(&backups)[0].clone();
    let first_info = LocalFs.stat(&first.path.join("a.txt")).unwrap();
    assert_eq!(first_info.len, 10);
    assert_eq!(first_info.nlink, 1);

    // Unchanged second run: same inode, link count 2.
    let stats = backup_at(&src, &backups, datetime!(2024-01-02 08:00:00), |_| {});
    assert_eq!(stats.linked_files, 1);
    let all = snapshots(&backups);
    assert_eq!(all.len(), 2);
    assert_eq!(
        inode(&all[0].path.join("a.txt")),
        inode(&all[1].path.join("a.txt"))
    );
    assert_eq!(LocalFs.stat(&all[1].path.join("a.txt")).unwrap().nlink, 2);

    // Changed file: a new inode, old snapshots untouched.
    src.create_file_with_content("a.txt", b"eleven byte");
    src.set_mtime("a.txt", 1_600_000_100);
    let stats = backup_at(&src, &backups, datetime!(2024-01-03 08:00:00), |_| {});
    assert_eq!(stats.copied_files, 1);
    let all = snapshots(&backups);
    assert_eq!(all.len(), 3);
    assert_ne!(
        inode(&all[0].path.join("a.txt")),
        inode(&all[2].path.join("a.txt"))
    );
    assert_eq!(fs::read(all[0].path.join("a.txt")).unwrap(), b"ten bytes!");
    assert_eq!(fs::read(all[2].path.join("a.txt")).unwrap(), b"eleven byte");
}

#[test]
fn deep_compare_catches_content_change_hidden_from_quick_mode() {
    let src = TreeFixture::new();
    src.create_file_with_content("sneaky.bin", b"aaaaaaaa");
    src.set_mtime("sneaky.bin", 1_600_000_000);
    let backups = TreeFixture::new();
    backup_at(&src, &backups, datetime!(2024-01-01 08:00:00), |o| {
        o.mode = CompareMode::Deep;
    });

    // Same size, same mtime, different bytes.
    src.create_file_with_content("sneaky.bin", b"bbbbbbbb");
    src.set_mtime("sneaky.bin", 1_600_000_000);
    let stats = backup_at(&src, &backups, datetime!(2024-01-02 08:00:00), |o| {
        o.mode = CompareMode::Deep;
    });
    assert_eq!(stats.copied_files, 1);
    assert_eq!(stats.linked_files, 0);

    // Quick mode would have linked it.
    let all = snapshots(&backups);
    assert_ne!(
        inode(&all[0].path.join("sneaky.bin")),
        inode(&all[1].path.join("sneaky.bin"))
    );
}

#[test]
fn recopy_dice_balances_links_and_copies() {
    let src = TreeFixture::new();
    for i in 0..40 {
        src.create_file_with_content(&format!("file{i:02}"), b"stable contents");
    }
    let backups = TreeFixture::new();
    backup_at(&src, &backups, datetime!(2024-01-01 08:00:00), |_| {});

    let stats = backup_at(&src, &backups, datetime!(2024-01-02 08:00:00), |o| {
        o.copy_probability = 0.5;
        o.seed = Some(42);
    });
    assert_eq!(stats.linked_files + stats.copied_files, 40);
    // With p = 0.5 over 40 unchanged files both outcomes occur.
    assert!(stats.linked_files > 0);
    assert!(stats.copied_files > 0);
}

#[test]
fn retention_by_age_respects_cap_and_newest() {
    let src = TreeFixture::new();
    src.create_file("f");
    let backups = TreeFixture::new();
    let t0 = datetime!(2024-03-01 12:00:00);
    for day in 0..=10 {
        backup_at(&src, &backups, t0 + Duration::days(day), |_| {});
    }

    let ctx = Context::local_at(t0 + Duration::days(10));
    let options = RetentionOptions {
        delete_after: Some("7d".parse().unwrap()),
        max_deletions: Some(2),
        ..Default::default()
    };
    let stats = retain(&ctx, backups.path(), &options).unwrap();
    assert_eq!(stats.deleted_snapshots, 2);

    let left = snapshots(&backups);
    assert_eq!(left.len(), 9);
    assert_eq!(left.first().unwrap().timestamp, t0 + Duration::days(2));
    assert_eq!(left.last().unwrap().timestamp, t0 + Duration::days(10));
}

#[test]
fn retention_after_backup_leaves_hard_links_usable() {
    let src = TreeFixture::new();
    src.create_file_with_content("doc", b"shared bytes");
    let backups = TreeFixture::new();
    let t0 = datetime!(2024-03-01 12:00:00);
    for day in 0..3 {
        backup_at(&src, &backups, t0 + Duration::days(day), |_| {});
    }

    // Deleting the oldest snapshot unlinks its entries but leaves the
    // shared inode reachable from the remaining snapshots.
    let ctx = Context::local_at(t0 + Duration::days(2));
    let options = RetentionOptions {
        delete_after: Some("1d".parse().unwrap()),
        ..Default::default()
    };
    retain(&ctx, backups.path(), &options).unwrap();

    let left = snapshots(&backups);
    assert_eq!(left.len(), 2);
    for snapshot in &left {
        assert_eq!(fs::read(snapshot.path.join("doc")).unwrap(), b"shared bytes");
    }
    assert_eq!(LocalFs.stat(&left[0].path.join("doc")).unwrap().nlink, 2);
}
