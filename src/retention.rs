// Keepsake backup system.

//! Delete old snapshots by age, by free-space target, and by tiered
//! weekly/monthly/yearly thinning.
//!
//! The active policies are composed with AND semantics: a snapshot is
//! deleted only when every active policy agrees. Deletions run
//! oldest-first and the newest snapshot is never deleted.

use std::collections::HashSet;
use std::path::Path;

use time::{Duration, PrimitiveDateTime};
use tracing::{info, warn};

use crate::catalog::{self, Snapshot};
use crate::misc::human_bytes;
use crate::stats::DeleteStats;
use crate::timespan::{add_months, add_years, TimeSpan};
use crate::vfs::{remove_tree, Context, Filesystem};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionOptions {
    /// Delete snapshots older than this span.
    pub delete_after: Option<TimeSpan>,
    /// Delete oldest snapshots until this many bytes are free.
    pub free_up: Option<u64>,
    pub keep_weekly_after: Option<TimeSpan>,
    pub keep_monthly_after: Option<TimeSpan>,
    pub keep_yearly_after: Option<TimeSpan>,
    /// Cap on deletions per run.
    pub max_deletions: Option<usize>,
}

impl RetentionOptions {
    pub fn any_policy_active(&self) -> bool {
        self.delete_after.is_some()
            || self.free_up.is_some()
            || self.any_tier_active()
    }

    fn any_tier_active(&self) -> bool {
        self.keep_weekly_after.is_some()
            || self.keep_monthly_after.is_some()
            || self.keep_yearly_after.is_some()
    }

    /// The thinning tiers must widen with age: weekly before monthly
    /// before yearly.
    pub fn validate(&self, now: PrimitiveDateTime) -> Result<()> {
        let cutoffs = [
            ("keep-weekly-after", self.keep_weekly_after),
            ("keep-monthly-after", self.keep_monthly_after),
            ("keep-yearly-after", self.keep_yearly_after),
        ];
        let mut last: Option<(&str, PrimitiveDateTime)> = None;
        for (name, span) in cutoffs {
            let Some(span) = span else { continue };
            let cutoff = span.cutoff(now);
            if let Some((last_name, last_cutoff)) = last {
                if cutoff > last_cutoff {
                    return Err(Error::InvalidOptions {
                        reason: format!(
                            "--{last_name} must not be longer than --{name}"
                        ),
                    });
                }
            }
            last = Some((name, cutoff));
        }
        Ok(())
    }
}

/// How far apart kept snapshots must be in one thinning tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Week,
    Month,
    Year,
}

fn step(timestamp: PrimitiveDateTime, period: Period) -> PrimitiveDateTime {
    match period {
        Period::Week => timestamp + Duration::weeks(1),
        Period::Month => {
            PrimitiveDateTime::new(add_months(timestamp.date(), 1), timestamp.time())
        }
        Period::Year => PrimitiveDateTime::new(add_years(timestamp.date(), 1), timestamp.time()),
    }
}

/// Run one retention pass. Does nothing when no policy is active.
pub fn retain(ctx: &Context, backup_root: &Path, options: &RetentionOptions) -> Result<DeleteStats> {
    let mut stats = DeleteStats::default();
    if !options.any_policy_active() {
        return Ok(stats);
    }
    options.validate(ctx.now)?;

    let snapshots = catalog::enumerate(ctx.fs.as_ref(), backup_root)?;
    if snapshots.len() > 1 {
        // The newest snapshot is not a candidate under any policy.
        let candidates = &snapshots[..snapshots.len() - 1];
        let thinning = options
            .any_tier_active()
            .then(|| thinning_deletable(candidates, options, ctx.now));

        let max_deletions = options.max_deletions.unwrap_or(usize::MAX);
        let age_cutoff = options.delete_after.map(|span| span.cutoff(ctx.now));

        for (index, snapshot) in candidates.iter().enumerate() {
            if stats.deleted_snapshots >= max_deletions {
                info!("Stopped after reaching maximum number of deletions.");
                break;
            }
            // Candidates are ascending by age, so once the age or free-space
            // policy declines one snapshot it declines all later ones.
            if let Some(cutoff) = age_cutoff {
                if snapshot.timestamp >= cutoff {
                    break;
                }
            }
            if let Some(target) = options.free_up {
                if free_space(ctx, backup_root)? >= target {
                    break;
                }
            }
            if let Some(deletable) = &thinning {
                if !deletable.contains(&index) {
                    continue;
                }
            }
            info!("Deleting oldest backup: {:?}", snapshot.path);
            stats.errors += remove_tree(ctx.fs.as_ref(), &snapshot.path);
            stats.deleted_snapshots += 1;
            if let Some(bucket) = snapshot.path.parent() {
                if ctx.fs.rmdir(bucket).is_ok() {
                    info!("Deleted empty year folder {:?}", bucket);
                }
            }
        }
    }
    warn_if_target_unmet(ctx, backup_root, options)?;
    Ok(stats)
}

fn free_space(ctx: &Context, backup_root: &Path) -> Result<u64> {
    ctx.fs
        .free_space(backup_root)
        .map_err(|source| Error::FreeSpace {
            path: backup_root.to_path_buf(),
            source,
        })
}

/// After the deletion pass, tell the operator when the free-space target
/// is still unmet.
fn warn_if_target_unmet(ctx: &Context, backup_root: &Path, options: &RetentionOptions) -> Result<()> {
    let Some(target) = options.free_up else {
        return Ok(());
    };
    let free = free_space(ctx, backup_root)?;
    if free >= target {
        return Ok(());
    }
    let remaining = catalog::enumerate(ctx.fs.as_ref(), backup_root)?.len();
    if remaining <= 1 {
        warn!(
            "Could not free up {} of storage without deleting the most recent snapshot.",
            human_bytes(target)
        );
    } else {
        warn!(
            "Free space is still below the {} target ({} currently free).",
            human_bytes(target),
            human_bytes(free)
        );
    }
    Ok(())
}

/// Mark the candidates the thinning tiers would delete.
///
/// Each snapshot's own age selects its tier. Walking oldest-first, the
/// first snapshot of a period is kept and later ones are deletable until
/// a full period has passed since the last kept snapshot.
fn thinning_deletable(
    candidates: &[Snapshot],
    options: &RetentionOptions,
    now: PrimitiveDateTime,
) -> HashSet<usize> {
    let weekly = options.keep_weekly_after.map(|s| s.cutoff(now));
    let monthly = options.keep_monthly_after.map(|s| s.cutoff(now));
    let yearly = options.keep_yearly_after.map(|s| s.cutoff(now));

    let mut deletable = HashSet::new();
    let mut last_kept: Option<PrimitiveDateTime> = None;
    for (index, snapshot) in candidates.iter().enumerate() {
        let ts = snapshot.timestamp;
        let period = if yearly.is_some_and(|c| ts < c) {
            Some(Period::Year)
        } else if monthly.is_some_and(|c| ts < c) {
            Some(Period::Month)
        } else if weekly.is_some_and(|c| ts < c) {
            Some(Period::Week)
        } else {
            None
        };
        match (period, last_kept) {
            (Some(period), Some(kept)) if ts < step(kept, period) => {
                deletable.insert(index);
            }
            _ => last_kept = Some(ts),
        }
    }
    deletable
}
