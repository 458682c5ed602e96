//! Snapshot retention: which catalogued files survive a run.
//!
//! Partitioning is a pure function of the catalog and a reference "now". A
//! file without a known timestamp is always kept.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::catalog::SnapshotCatalog;
use crate::error::{Warning, Warnings};
use crate::recency::Recency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Delete files strictly older than `now - max_age_hours`.
    Age { max_age_hours: u64 },
    /// Keep the `keep_count` most recent files, delete the rest.
    Count { keep_count: usize },
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::Age { max_age_hours: 24 }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionPolicy::Age { max_age_hours } => write!(f, "age > {max_age_hours}h"),
            RetentionPolicy::Count { keep_count } => write!(f, "keep newest {keep_count}"),
        }
    }
}

impl RetentionPolicy {
    pub fn partition(&self, catalog: &SnapshotCatalog, now: OffsetDateTime) -> RetentionPlan {
        match *self {
            RetentionPolicy::Age { max_age_hours } => {
                partition_by_age(catalog.entries(), now, max_age_hours)
            }
            RetentionPolicy::Count { keep_count } => {
                partition_by_count(catalog.entries(), keep_count)
            }
        }
    }
}

fn partition_by_age(entries: &[Recency], now: OffsetDateTime, max_age_hours: u64) -> RetentionPlan {
    let cutoff = i64::try_from(max_age_hours)
        .ok()
        .and_then(|hours| hours.checked_mul(3_600))
        .and_then(|secs| now.checked_sub(Duration::seconds(secs)));

    let mut plan = RetentionPlan::default();
    for entry in entries {
        let expired = match (entry.timestamp, cutoff) {
            (Some(ts), Some(cutoff)) => ts < cutoff,
            _ => false,
        };
        if expired {
            plan.delete.push(entry.clone());
        } else {
            plan.keep.push(entry.clone());
        }
    }
    plan
}

fn partition_by_count(entries: &[Recency], keep_count: usize) -> RetentionPlan {
    let mut dated: Vec<&Recency> = entries.iter().filter(|e| !e.is_unknown()).collect();
    dated.sort_by(|a, b| newest_first(a, b));
    let doomed: HashSet<&Path> = dated
        .iter()
        .skip(keep_count)
        .map(|entry| entry.path.as_path())
        .collect();

    let mut plan = RetentionPlan::default();
    for entry in entries {
        if doomed.contains(entry.path.as_path()) {
            plan.delete.push(entry.clone());
        } else {
            plan.keep.push(entry.clone());
        }
    }
    plan
}

/// Descending timestamp, ties broken by ascending path.
fn newest_first(a: &Recency, b: &Recency) -> Ordering {
    b.timestamp
        .cmp(&a.timestamp)
        .then_with(|| a.path.cmp(&b.path))
}

/// Keep/delete partition of a catalog. Both lists preserve catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<Recency>,
    pub delete: Vec<Recency>,
}

impl RetentionPlan {
    /// Move any of `paths` from the delete-list to the keep-list.
    pub fn protect(&mut self, paths: &[PathBuf]) {
        if paths.is_empty() {
            return;
        }
        let protected: HashSet<&PathBuf> = paths.iter().collect();
        let (spared, delete): (Vec<_>, Vec<_>) = std::mem::take(&mut self.delete)
            .into_iter()
            .partition(|entry| protected.contains(&entry.path));
        for entry in &spared {
            log::info!("keeping {}: its rows were not merged", entry.path.display());
        }
        self.delete = delete;
        self.keep.extend(spared);
        self.keep.sort_by(|a, b| a.path.cmp(&b.path));
    }

    pub fn delete_paths(&self) -> Vec<PathBuf> {
        self.delete.iter().map(|entry| entry.path.clone()).collect()
    }
}

/// Remove every file in the delete-list. Failures are recorded and the file is
/// left in place. Returns the paths actually removed.
pub fn apply(plan: &RetentionPlan, warnings: &mut Warnings) -> Vec<PathBuf> {
    let mut removed = Vec::with_capacity(plan.delete.len());
    for entry in &plan.delete {
        match fs::remove_file(&entry.path) {
            Ok(()) => {
                log::info!("deleted {}", entry.path.display());
                removed.push(entry.path.clone());
            }
            Err(err) => warnings.record(Warning::Delete {
                path: entry.path.clone(),
                message: err.to_string(),
            }),
        }
    }
    removed
}
