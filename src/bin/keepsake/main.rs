// Keepsake backup system.

//! Command-line entry point for Keepsake backups.

use std::error::Error as StdError;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use keepsake::backup::{copy_probability_from_hard_link_count, parse_probability};
use keepsake::catalog::{self, Snapshot};
use keepsake::config::config_to_args;
use keepsake::integrity;
use keepsake::recover::{self, MoveSelection};
use keepsake::restore::RestoreOptions;
use keepsake::timespan::{parse_byte_size, parse_date, TimeSpan};
use keepsake::walk;
use keepsake::{
    backup, human_bytes, retain, unique_path, BackupOptions, CompareMode, Context, Error,
    Filesystem, Filter, Kind, Result, RetentionOptions,
};

mod console;
mod log;

#[derive(Debug, Parser)]
#[command(
    name = "keepsake",
    about = "Dated snapshot backups that share unchanged files through hard links",
    version,
    args_override_self = true
)]
struct Args {
    /// Folder to back up.
    #[arg(long, value_name = "DIR")]
    user_folder: Option<PathBuf>,

    /// Folder that holds the dated snapshots.
    #[arg(long, value_name = "DIR")]
    backup_folder: Option<PathBuf>,

    /// File of +/- glob rules choosing what gets backed up.
    #[arg(long, value_name = "FILE")]
    filter: Option<PathBuf>,

    /// Detect changes by reading whole file contents.
    #[arg(long, overrides_with = "whole_file")]
    compare_contents: bool,

    /// Trust file size and modification time (the default).
    #[arg(long, overrides_with = "compare_contents")]
    whole_file: bool,

    /// Bound hard-link fan-out to an expected average link count.
    #[arg(long, value_name = "N")]
    hard_link_count: Option<String>,

    /// Chance of copying an unchanged file instead of linking it.
    #[arg(long, value_name = "P")]
    copy_probability: Option<String>,

    /// Copy every file, even unchanged ones.
    #[arg(long, overrides_with = "no_force_copy")]
    force_copy: bool,
    #[arg(long, overrides_with = "force_copy", hide = true)]
    no_force_copy: bool,

    /// Delete the partial snapshot if the backup fails.
    #[arg(long, overrides_with = "no_delete_on_error")]
    delete_on_error: bool,
    #[arg(long, overrides_with = "delete_on_error", hide = true)]
    no_delete_on_error: bool,

    /// Run the retention pass before the backup instead of after.
    #[arg(long, overrides_with = "no_delete_first")]
    delete_first: bool,
    #[arg(long, overrides_with = "delete_first", hide = true)]
    no_delete_first: bool,

    /// Delete oldest snapshots until this much space is free.
    #[arg(long, value_name = "SIZE")]
    free_up: Option<String>,

    /// Delete snapshots older than this span (e.g. 6m, 2y).
    #[arg(long, value_name = "SPAN")]
    delete_after: Option<String>,

    /// Thin snapshots older than this span to one per week.
    #[arg(long, value_name = "SPAN")]
    keep_weekly_after: Option<String>,

    /// Thin snapshots older than this span to one per month.
    #[arg(long, value_name = "SPAN")]
    keep_monthly_after: Option<String>,

    /// Thin snapshots older than this span to one per year.
    #[arg(long, value_name = "SPAN")]
    keep_yearly_after: Option<String>,

    /// Cap on snapshot deletions per run.
    #[arg(long, value_name = "N")]
    max_deletions: Option<usize>,

    /// Run only the retention pass, no backup.
    #[arg(long)]
    delete_only: bool,

    /// Compare the source tree against the latest snapshot; write
    /// result lists into this folder.
    #[arg(long, value_name = "DIR")]
    verify: Option<PathBuf>,

    /// Re-hash a snapshot against its checksum manifest; write any
    /// mismatch list into this folder.
    #[arg(long, value_name = "DIR")]
    verify_checksum: Option<PathBuf>,

    /// Write a checksum manifest for a snapshot.
    #[arg(long)]
    checksum: bool,

    /// Write a manifest only if no snapshot has one younger than SPAN.
    #[arg(long, value_name = "SPAN")]
    checksum_every: Option<String>,

    /// Pick the oldest eligible snapshot instead of showing a menu.
    #[arg(long, conflicts_with = "newest")]
    oldest: bool,

    /// Pick the newest eligible snapshot instead of showing a menu.
    #[arg(long)]
    newest: bool,

    /// List files present in snapshots but missing from the source.
    #[arg(long, value_name = "DIR")]
    find_missing: Option<PathBuf>,

    /// Recover one file or folder next to its original location.
    #[arg(long, value_name = "PATH")]
    recover: Option<PathBuf>,

    /// Choose what to recover from everything ever backed up under DIR.
    #[arg(long, value_name = "DIR")]
    list: Option<PathBuf>,

    /// Rebuild a full tree from a chosen snapshot.
    #[arg(long)]
    restore: bool,

    /// Where a restore writes its tree.
    #[arg(long, value_name = "DIR")]
    destination: Option<PathBuf>,

    /// During restore, delete destination files not in the snapshot.
    #[arg(long, overrides_with = "keep_extra")]
    delete_extra: bool,

    /// During restore, leave extra destination files alone.
    #[arg(long, overrides_with = "delete_extra")]
    keep_extra: bool,

    /// Restore from the most recent snapshot.
    #[arg(long, overrides_with = "choose_backup")]
    last_backup: bool,

    /// Restore from a snapshot chosen from a menu.
    #[arg(long, overrides_with = "last_backup")]
    choose_backup: bool,

    /// Remove every occurrence of PATH from all snapshots.
    #[arg(long, value_name = "PATH")]
    purge: Option<PathBuf>,

    /// Choose what to purge from everything ever backed up under DIR.
    #[arg(long, value_name = "DIR")]
    purge_list: Option<PathBuf>,

    /// Re-materialize a range of snapshots at a new backup root.
    #[arg(long, value_name = "DIR")]
    move_backup: Option<PathBuf>,

    /// How many newest snapshots to move, or `all`.
    #[arg(long, value_name = "N|all")]
    move_count: Option<String>,

    /// Move snapshots no older than this span.
    #[arg(long, value_name = "SPAN")]
    move_age: Option<String>,

    /// Move snapshots made on or after this date (YYYY-MM-DD).
    #[arg(long, value_name = "DATE")]
    move_since: Option<String>,

    /// Read defaults from a `key: value` configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write the full log to this file.
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Write warnings and errors to this file.
    #[arg(long, value_name = "FILE")]
    error_log: Option<PathBuf>,

    /// Log at trace level.
    #[arg(long, short = 'D')]
    debug: bool,

    /// List the files the filter lets through, to FILE or stdout.
    #[arg(long, value_name = "FILE")]
    preview_filter: Option<Option<PathBuf>>,

    /// Override the snapshot timestamp (YYYY-MM-DD HH-MM-SS).
    #[arg(long, hide = true, value_name = "TIMESTAMP")]
    timestamp: Option<String>,

    /// Answer menus with this zero-based index.
    #[arg(long, hide = true, value_name = "N")]
    choice: Option<usize>,

    /// Seed the re-copy dice.
    #[arg(long, hide = true, value_name = "SEED")]
    random_seed: Option<u64>,

    /// Override the os label in snapshot names.
    #[arg(long, hide = true, value_name = "LABEL")]
    os_label: Option<String>,
}

fn main() -> ExitCode {
    let args = parse_with_config();
    let _log_guard = match log::init(log::LoggingOptions {
        file: args.log.clone(),
        error_file: args.error_log.clone(),
        debug: args.debug,
    }) {
        Ok(guard) => guard,
        Err(message) => {
            eprintln!("Failed to initialize logging: {message}");
            return ExitCode::from(4);
        }
    };

    let ctx = Context::local();
    install_signal_handlers(&ctx);

    match run(&args, &ctx) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            let mut cause: &dyn StdError = &err;
            while let Some(next) = cause.source() {
                error!("  caused by: {}", next);
                cause = next;
            }
            ExitCode::from(exit_code_for(&err))
        }
    }
}

/// Parse argv; when `--config` is given, splice the file's arguments in
/// front of the real ones and parse again, so the command line overrides
/// the file per key.
fn parse_with_config() -> Args {
    let argv: Vec<OsString> = std::env::args_os().collect();
    let args = Args::parse_from(&argv);
    let Some(config_path) = &args.config else {
        return args;
    };
    match config_to_args(&keepsake::LocalFs, config_path) {
        Ok(mut spliced) => {
            let mut combined: Vec<OsString> = Vec::with_capacity(argv.len() + spliced.len());
            combined.push(argv[0].clone());
            combined.append(&mut spliced);
            combined.extend(argv.iter().skip(1).cloned());
            Args::parse_from(combined)
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    }
}

#[cfg(unix)]
fn install_signal_handlers(ctx: &Context) {
    use signal_hook::consts::{SIGINT, SIGTERM};
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, ctx.interrupt.clone()) {
            warn!("Could not install handler for signal {}: {}", signal, err);
        }
    }
}

#[cfg(not(unix))]
fn install_signal_handlers(_ctx: &Context) {}

fn exit_code_for(err: &Error) -> u8 {
    match err {
        Error::InvalidOptions { .. }
        | Error::InvalidTimeSpan { .. }
        | Error::InvalidByteSize { .. }
        | Error::InvalidDate { .. }
        | Error::InvalidProbability { .. }
        | Error::InvalidHardLinkCount { .. }
        | Error::ReadConfig { .. }
        | Error::ParseConfig { .. }
        | Error::ReadFilter { .. }
        | Error::ParseFilter { .. }
        | Error::ParseGlob { .. } => 2,
        _ => 1,
    }
}

fn run(args: &Args, ctx: &Context) -> Result<()> {
    if args.recover.is_some() {
        cmd_recover(args, ctx)
    } else if args.list.is_some() {
        cmd_list(args, ctx)
    } else if args.move_backup.is_some() {
        cmd_move(args, ctx)
    } else if args.verify.is_some() {
        cmd_verify(args, ctx)
    } else if args.verify_checksum.is_some() {
        cmd_verify_checksum(args, ctx)
    } else if args.restore {
        cmd_restore(args, ctx)
    } else if args.purge.is_some() {
        cmd_purge(args, ctx)
    } else if args.purge_list.is_some() {
        cmd_purge_list(args, ctx)
    } else if args.find_missing.is_some() {
        cmd_find_missing(args, ctx)
    } else if args.delete_only {
        cmd_delete_only(args, ctx)
    } else if args.preview_filter.is_some() {
        cmd_preview_filter(args, ctx)
    } else if args.user_folder.is_none() && (args.checksum || args.checksum_every.is_some()) {
        cmd_checksum(args, ctx)
    } else {
        cmd_backup(args, ctx)
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn required_folder(option: &Option<PathBuf>, flag: &str) -> Result<PathBuf> {
    option
        .as_deref()
        .map(absolute)
        .ok_or_else(|| Error::InvalidOptions {
            reason: format!("{flag} not specified"),
        })
}

fn exactly_one(a: bool, b: bool, a_flag: &str, b_flag: &str) -> Result<()> {
    if a == b {
        return Err(Error::InvalidOptions {
            reason: format!("Exactly one of {a_flag} or {b_flag} must be specified"),
        });
    }
    Ok(())
}

fn load_filter(args: &Args, ctx: &Context, source_root: &Path) -> Result<Filter> {
    match &args.filter {
        Some(file) => Filter::from_file(ctx.fs.as_ref(), &absolute(file), source_root),
        None => Ok(Filter::everything()),
    }
}

fn parse_span(option: &Option<String>) -> Result<Option<TimeSpan>> {
    option.as_deref().map(str::parse).transpose()
}

fn retention_options(args: &Args) -> Result<RetentionOptions> {
    Ok(RetentionOptions {
        delete_after: parse_span(&args.delete_after)?,
        free_up: args.free_up.as_deref().map(parse_byte_size).transpose()?,
        keep_weekly_after: parse_span(&args.keep_weekly_after)?,
        keep_monthly_after: parse_span(&args.keep_monthly_after)?,
        keep_yearly_after: parse_span(&args.keep_yearly_after)?,
        max_deletions: args.max_deletions,
    })
}

fn backup_options(args: &Args, filter: Filter) -> Result<BackupOptions> {
    let copy_probability = if args.force_copy {
        1.0
    } else if let Some(count) = &args.hard_link_count {
        copy_probability_from_hard_link_count(count)?
    } else if let Some(probability) = &args.copy_probability {
        parse_probability(probability)?
    } else {
        0.0
    };
    let timestamp = args
        .timestamp
        .as_deref()
        .map(|text| {
            catalog::parse_timestamp(text).ok_or_else(|| Error::InvalidDate {
                input: text.to_owned(),
            })
        })
        .transpose()?;
    Ok(BackupOptions {
        filter,
        mode: if args.compare_contents {
            CompareMode::Deep
        } else {
            CompareMode::Quick
        },
        copy_probability,
        seed: args.random_seed,
        delete_on_error: args.delete_on_error,
        os_label: args
            .os_label
            .clone()
            .unwrap_or_else(|| std::env::consts::OS.to_owned()),
        timestamp,
    })
}

fn pick_index(args: &Args, menu: &[String], prompt: &str) -> Result<usize> {
    if let Some(choice) = args.choice {
        if choice >= menu.len() {
            return Err(Error::InvalidOptions {
                reason: format!("--choice {choice} is out of range (menu has {} items)", menu.len()),
            });
        }
        return Ok(choice);
    }
    console::choose_from_menu(menu, prompt).map_err(|err| Error::InvalidOptions {
        reason: format!("No selection made: {err}"),
    })
}

/// Choose one snapshot by `--oldest`, `--newest`, or a menu.
fn choose_snapshot(args: &Args, mut snapshots: Vec<Snapshot>, prompt: &str) -> Result<Snapshot> {
    if args.oldest {
        return Ok(snapshots.remove(0));
    }
    if args.newest {
        return Ok(snapshots.pop().expect("snapshot list is not empty"));
    }
    let menu: Vec<String> = snapshots.iter().map(Snapshot::label).collect();
    let index = pick_index(args, &menu, prompt)?;
    Ok(snapshots.swap_remove(index))
}

fn log_storage_stats(ctx: &Context, backup_root: &Path) {
    if let Ok(free) = ctx.fs.free_space(backup_root) {
        info!("Free space on backup storage: {}", human_bytes(free));
    }
    if let Ok(snapshots) = catalog::enumerate(ctx.fs.as_ref(), backup_root) {
        info!("Snapshots stored: {}", snapshots.len());
        if let Some(first) = snapshots.first() {
            info!("Earliest snapshot: {}", first.label());
        }
    }
}

/// Warn when one backup consumed most of the `--free-up` allowance,
/// since the next run may then run out of space.
fn warn_backup_size(free_up: Option<u64>, copied_bytes: u64) {
    let Some(target) = free_up.filter(|t| *t > 0) else {
        info!("Backup space used: {}", human_bytes(copied_bytes));
        return;
    };
    let percent = (100 * copied_bytes).div_ceil(target);
    if percent >= 90 {
        warn!(
            "Backup space used: {} ({percent}% of --free-up)",
            human_bytes(copied_bytes)
        );
        warn!("Consider increasing the size of the --free-up parameter.");
    } else {
        info!(
            "Backup space used: {} ({percent}% of --free-up)",
            human_bytes(copied_bytes)
        );
    }
}

fn cmd_backup(args: &Args, ctx: &Context) -> Result<()> {
    let source_root = required_folder(&args.user_folder, "--user-folder")?;
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let filter = load_filter(args, ctx, &source_root)?;
    let retention = retention_options(args)?;
    info!("Starting new backup");

    ctx.fs
        .create_dir_all(&backup_root)
        .map_err(|source| Error::CreateDirectory {
            path: backup_root.clone(),
            source,
        })?;
    if args.delete_first {
        retain(ctx, &backup_root, &retention)?;
    } else if let Some(target) = retention.free_up {
        let free = ctx
            .fs
            .free_space(&backup_root)
            .map_err(|source| Error::FreeSpace {
                path: backup_root.clone(),
                source,
            })?;
        if free < target {
            info!(
                "Free space {} is below the --free-up target {}; deleting old backups first",
                human_bytes(free),
                human_bytes(target)
            );
            retain(ctx, &backup_root, &retention)?;
        }
    }

    let options = backup_options(args, filter)?;
    let stats = backup(ctx, &source_root, &backup_root, &options)?;
    warn_backup_size(retention.free_up, stats.copied_bytes);

    if !args.delete_first {
        retain(ctx, &backup_root, &retention)?;
    }
    if let Some(span) = parse_span(&args.checksum_every)? {
        integrity::checksum_every(ctx, &backup_root, span)?;
    } else if args.checksum {
        if let Some(newest) = catalog::previous(ctx.fs.as_ref(), &backup_root)? {
            let (_, checksum_stats) = integrity::write_manifest(ctx, &newest)?;
            info!("{}", checksum_stats);
        }
    }
    log_storage_stats(ctx, &backup_root);
    Ok(())
}

fn cmd_delete_only(args: &Args, ctx: &Context) -> Result<()> {
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let retention = retention_options(args)?;
    info!("Deleting old backups");
    let stats = retain(ctx, &backup_root, &retention)?;
    for line in format!("{stats}").lines() {
        info!("{}", line);
    }
    log_storage_stats(ctx, &backup_root);
    Ok(())
}

fn cmd_preview_filter(args: &Args, ctx: &Context) -> Result<()> {
    let source_root = required_folder(&args.user_folder, "--user-folder")?;
    let filter = load_filter(args, ctx, &source_root)?;
    match args.preview_filter.as_ref().expect("dispatch checked") {
        Some(output) => {
            let path = unique_path(ctx.fs.as_ref(), &absolute(output));
            let mut out = ctx
                .fs
                .open_write_new(&path)
                .map_err(|source| Error::WriteReport {
                    path: path.clone(),
                    source,
                })?;
            walk::preview_filter(ctx, &source_root, &filter, &mut out)?;
            info!("Filter preview written to {:?}", path);
        }
        None => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            walk::preview_filter(ctx, &source_root, &filter, &mut out)?;
            out.flush().ok();
        }
    }
    Ok(())
}

fn cmd_verify(args: &Args, ctx: &Context) -> Result<()> {
    let source_root = required_folder(&args.user_folder, "--user-folder")?;
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let out_dir = required_folder(&args.verify, "--verify")?;
    let filter = load_filter(args, ctx, &source_root)?;
    info!("Verifying last backup");
    integrity::verify_live(ctx, &source_root, &backup_root, &filter, &out_dir)?;
    Ok(())
}

fn cmd_verify_checksum(args: &Args, ctx: &Context) -> Result<()> {
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let out_dir = required_folder(&args.verify_checksum, "--verify-checksum")?;
    let candidates = integrity::snapshots_with_manifest(ctx.fs.as_ref(), &backup_root)?;
    if candidates.is_empty() {
        return Err(Error::NoManifest { path: backup_root });
    }
    let snapshot = choose_snapshot(args, candidates, "Snapshot to verify")?;
    let (stats, _) = integrity::verify_manifest(ctx, &snapshot, &out_dir)?;
    for line in format!("{stats}").lines() {
        info!("{}", line);
    }
    Ok(())
}

fn cmd_checksum(args: &Args, ctx: &Context) -> Result<()> {
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    if let Some(span) = parse_span(&args.checksum_every)? {
        integrity::checksum_every(ctx, &backup_root, span)?;
        return Ok(());
    }
    let snapshots = catalog::enumerate(ctx.fs.as_ref(), &backup_root)?;
    if snapshots.is_empty() {
        return Err(Error::NoSnapshots { path: backup_root });
    }
    let snapshot = choose_snapshot(args, snapshots, "Snapshot to checksum")?;
    let (_, stats) = integrity::write_manifest(ctx, &snapshot)?;
    for line in format!("{stats}").lines() {
        info!("{}", line);
    }
    Ok(())
}

fn cmd_find_missing(args: &Args, ctx: &Context) -> Result<()> {
    let source_root = required_folder(&args.user_folder, "--user-folder")?;
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let out_dir = required_folder(&args.find_missing, "--find-missing")?;
    let filter = load_filter(args, ctx, &source_root)?;
    info!("Finding missing files");
    integrity::find_missing(ctx, &source_root, &backup_root, &filter, &out_dir)?;
    Ok(())
}

fn cmd_restore(args: &Args, ctx: &Context) -> Result<()> {
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let destination = required_folder(&args.destination, "--destination")?;
    exactly_one(
        args.delete_extra,
        args.keep_extra,
        "--delete-extra",
        "--keep-extra",
    )?;
    exactly_one(
        args.last_backup,
        args.choose_backup,
        "--last-backup",
        "--choose-backup",
    )?;
    let snapshots = catalog::enumerate(ctx.fs.as_ref(), &backup_root)?;
    if snapshots.is_empty() {
        return Err(Error::NoSnapshots { path: backup_root });
    }
    let snapshot = if args.last_backup {
        snapshots.into_iter().last().expect("checked non-empty")
    } else {
        choose_snapshot(args, snapshots, "Snapshot to restore")?
    };
    info!("Restoring from backup");
    keepsake::restore(
        ctx,
        &snapshot,
        &destination,
        &RestoreOptions {
            delete_extra: args.delete_extra,
        },
    )?;
    Ok(())
}

fn cmd_recover(args: &Args, ctx: &Context) -> Result<()> {
    let source_root = required_folder(&args.user_folder, "--user-folder")?;
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let target = absolute(args.recover.as_ref().expect("dispatch checked"));
    let rel = recover::relative_to_source(&target, &source_root)?;
    recover_version(args, ctx, &backup_root, &source_root, &rel)
}

/// Menu over the distinct versions of one path, then copy the chosen
/// one back next to the original.
fn recover_version(
    args: &Args,
    ctx: &Context,
    backup_root: &Path,
    source_root: &Path,
    rel: &Path,
) -> Result<()> {
    let versions = recover::versions_of(ctx.fs.as_ref(), backup_root, rel)?;
    if versions.is_empty() {
        info!("No backups found for {:?}", source_root.join(rel));
        return Ok(());
    }
    let menu: Vec<String> = versions
        .iter()
        .map(|snapshot| {
            let kind = ctx
                .fs
                .stat(&snapshot.path.join(rel))
                .map(|info| info.kind)
                .unwrap_or(Kind::Unknown);
            format!("{} ({})", snapshot.name, kind)
        })
        .collect();
    let index = pick_index(args, &menu, "Version to recover")?;
    let recovered = recover::recover(ctx, &versions[index], rel, source_root)?;
    info!("Recovered to {:?}", recovered);
    Ok(())
}

fn cmd_list(args: &Args, ctx: &Context) -> Result<()> {
    let source_root = required_folder(&args.user_folder, "--user-folder")?;
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let dir = absolute(args.list.as_ref().expect("dispatch checked"));
    let rel_dir = recover::relative_to_source(&dir, &source_root)?;
    info!("Searching for everything backed up from {:?} ...", dir);
    let names = recover::names_under(ctx.fs.as_ref(), &backup_root, &rel_dir)?;
    if names.is_empty() {
        info!("No backups found for the folder {:?}", dir);
        return Ok(());
    }
    let menu: Vec<String> = names
        .iter()
        .map(|(name, kind)| format!("{name} ({kind})"))
        .collect();
    let index = pick_index(args, &menu, "Which path for recovery")?;
    let rel = rel_dir.join(&names[index].0);
    recover_version(args, ctx, &backup_root, &source_root, &rel)
}

fn cmd_purge(args: &Args, ctx: &Context) -> Result<()> {
    let source_root = required_folder(&args.user_folder, "--user-folder")?;
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let target = absolute(args.purge.as_ref().expect("dispatch checked"));
    let rel = recover::relative_to_source(&target, &source_root)?;
    info!("Purging from backups");
    purge_with_kind_menu(args, ctx, &backup_root, &rel)
}

fn purge_with_kind_menu(
    args: &Args,
    ctx: &Context,
    backup_root: &Path,
    rel: &Path,
) -> Result<()> {
    let kinds = recover::purge_kinds(ctx.fs.as_ref(), backup_root, rel)?;
    if kinds.is_empty() {
        info!("Could not find any backed up copies of {:?}", rel);
        return Ok(());
    }
    let selected: Vec<Kind> = if kinds.len() == 1 {
        vec![kinds[0].0]
    } else {
        let total: usize = kinds.iter().map(|(_, count)| count).sum();
        let mut menu: Vec<String> = kinds
            .iter()
            .map(|(kind, count)| format!("{kind}s ({count} items)"))
            .collect();
        menu.push(format!("All ({total} items)"));
        let index = pick_index(
            args,
            &menu,
            "Multiple kinds of paths were found. Which one should be deleted",
        )?;
        if index == kinds.len() {
            kinds.iter().map(|(kind, _)| *kind).collect()
        } else {
            vec![kinds[index].0]
        }
    };
    let stats = recover::purge(ctx, backup_root, rel, &selected)?;
    info!("Deleted {} backed up copies", stats.deleted_paths);
    Ok(())
}

fn cmd_purge_list(args: &Args, ctx: &Context) -> Result<()> {
    let source_root = required_folder(&args.user_folder, "--user-folder")?;
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let dir = absolute(args.purge_list.as_ref().expect("dispatch checked"));
    let rel_dir = recover::relative_to_source(&dir, &source_root)?;
    info!("Listing files and directories for purging");
    let names = recover::names_under(ctx.fs.as_ref(), &backup_root, &rel_dir)?;
    if names.is_empty() {
        info!("No backups found for the folder {:?}", dir);
        return Ok(());
    }
    let menu: Vec<String> = names
        .iter()
        .map(|(name, kind)| format!("{name} ({kind})"))
        .collect();
    let index = pick_index(args, &menu, "Which path for purging")?;
    let rel = rel_dir.join(&names[index].0);
    purge_with_kind_menu(args, ctx, &backup_root, &rel)
}

fn cmd_move(args: &Args, ctx: &Context) -> Result<()> {
    let backup_root = required_folder(&args.backup_folder, "--backup-folder")?;
    let dest_root = required_folder(&args.move_backup, "--move-backup")?;
    let set_flags = [
        args.move_count.is_some(),
        args.move_age.is_some(),
        args.move_since.is_some(),
    ];
    if set_flags.iter().filter(|set| **set).count() != 1 {
        return Err(Error::InvalidOptions {
            reason: "Exactly one of --move-count, --move-age, or --move-since must be specified"
                .to_owned(),
        });
    }
    let selection = if let Some(count) = &args.move_count {
        if count.eq_ignore_ascii_case("all") {
            MoveSelection::All
        } else {
            let n: usize = count.parse().map_err(|_| Error::InvalidOptions {
                reason: format!("--move-count must be a positive whole number or `all`: {count}"),
            })?;
            if n == 0 {
                return Err(Error::InvalidOptions {
                    reason: "--move-count must be at least 1".to_owned(),
                });
            }
            MoveSelection::Count(n)
        }
    } else if let Some(span) = &args.move_age {
        MoveSelection::Age(span.parse()?)
    } else {
        MoveSelection::Since(parse_date(args.move_since.as_deref().expect("checked"))?)
    };
    info!("Moving backups");
    let (moved, stats) = recover::move_snapshots(ctx, &backup_root, &dest_root, selection)?;
    info!("Moved {} snapshots", moved);
    for line in format!("{stats}").lines() {
        info!("{}", line);
    }
    Ok(())
}
