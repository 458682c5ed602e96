//! One consolidation run: merge, write, catalog, retain.
//!
//! ```text
//! Idle -> Merging -> Written -> RetentionApplied -> Done
//!            |          |
//!            +----------+--> Failed
//! ```
//!
//! Deletion happens only after the canonical dataset has been synced and
//! renamed into place.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::Serialize;
use time::OffsetDateTime;

use crate::catalog::{list_snapshots, SnapshotCatalog};
use crate::config::PipelineConfig;
use crate::error::{Warning, Warnings};
use crate::merge::{MergeStats, Merger};
use crate::recency::TimestampProvider;
use crate::retention::{self, RetentionPlan, RetentionPolicy};
use crate::table::write_table;
use crate::vcs::VcsQuery;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Merging,
    Written,
    RetentionApplied,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Merging => "merging",
            PipelineState::Written => "written",
            PipelineState::RetentionApplied => "retention-applied",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub state: PipelineState,
    /// Every state visited, starting with `Idle`.
    pub history: Vec<PipelineState>,
    pub output: PathBuf,
    pub policy: RetentionPolicy,
    pub dry_run: bool,
    pub merge: MergeStats,
    pub kept: Vec<PathBuf>,
    /// Delete-list chosen by the retention policy.
    pub planned_deletions: Vec<PathBuf>,
    /// Files actually removed; a subset of `planned_deletions`.
    pub deleted: Vec<PathBuf>,
    /// Snapshots that could not be read this run.
    pub skipped: Vec<PathBuf>,
    pub warnings: Vec<Warning>,
    pub error: Option<String>,
    pub duration: Duration,
}

impl RunReport {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            state: PipelineState::Idle,
            history: vec![PipelineState::Idle],
            output: config.output_path(),
            policy: config.retention,
            dry_run: config.dry_run,
            merge: MergeStats::default(),
            kept: Vec::new(),
            planned_deletions: Vec::new(),
            deleted: Vec::new(),
            skipped: Vec::new(),
            warnings: Vec::new(),
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Done
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> i32 {
        if self.state == PipelineState::Failed {
            1
        } else {
            0
        }
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "State: {}, Rows: {}, Kept: {}, Deleted: {}, Skipped: {}, Warnings: {}, Duration: {:?}",
            self.state,
            self.merge.rows_written,
            self.kept.len(),
            self.deleted.len(),
            self.skipped.len(),
            self.warnings.len(),
            self.duration
        );
        if self.dry_run {
            line.push_str(&format!(", Would delete: {}", self.planned_deletions.len()));
        }
        if let Some(err) = &self.error {
            line.push_str(&format!(", Error: {err}"));
        }
        line
    }
}

pub struct Pipeline<'a> {
    config: PipelineConfig,
    vcs: Option<&'a dyn VcsQuery>,
    now: Option<OffsetDateTime>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            vcs: None,
            now: None,
        }
    }

    /// Resolve recency through `vcs` when `use_vcs` is set.
    pub fn with_vcs(mut self, vcs: &'a dyn VcsQuery) -> Self {
        self.vcs = Some(vcs);
        self
    }

    /// Reference time for age retention. Defaults to the time retention runs.
    pub fn with_now(mut self, now: OffsetDateTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn run(&self) -> RunReport {
        let start = Instant::now();
        let mut report = RunReport::new(&self.config);
        let mut warnings = Warnings::new();

        if let Err(err) = self.execute(&mut report, &mut warnings) {
            log::error!("pipeline failed: {err}");
            report.error = Some(err.to_string());
            transition(&mut report, PipelineState::Failed);
        }

        report.warnings = warnings.into_vec();
        report.duration = start.elapsed();
        log::info!("{}", report.summary());
        report
    }

    fn execute(&self, report: &mut RunReport, warnings: &mut Warnings) -> Result<()> {
        let config = &self.config;
        config.validate()?;
        let output = config.output_path();
        let exclude = [output.clone()];

        transition(report, PipelineState::Merging);
        let snapshots = list_snapshots(&config.directory, &config.pattern, &exclude)?;
        if snapshots.is_empty() {
            return Err(Error::NoSnapshots {
                directory: config.directory.clone(),
            });
        }

        let mut inputs = Vec::with_capacity(snapshots.len() + 1);
        if config.carry_forward && output.is_file() {
            inputs.push(output.clone());
        }
        inputs.extend(snapshots.iter().cloned());

        let merged = Merger::new(config.timestamp_field.as_str()).merge(&inputs, warnings)?;
        report.merge = merged.stats;
        if merged.skipped.contains(&output) {
            return Err(Error::UnreadableCanonical { path: output });
        }
        report.skipped = merged.skipped;

        transition(report, PipelineState::Written);
        write_table(&output, &merged.table)?;
        log::info!(
            "wrote {} rows to {}",
            merged.table.len(),
            output.display()
        );

        let provider = match (config.use_vcs, self.vcs) {
            (true, Some(vcs)) => TimestampProvider::new(Some(vcs)),
            _ => TimestampProvider::filesystem_only(),
        };
        let catalog =
            SnapshotCatalog::discover(&config.directory, &config.pattern, &exclude, &provider, warnings)?;
        let now = self.now.unwrap_or_else(OffsetDateTime::now_utc);
        let mut plan = config.retention.partition(&catalog, now);

        // Only files whose rows reached the canonical dataset may go.
        let merged_paths: HashSet<&PathBuf> = snapshots
            .iter()
            .filter(|path| !report.skipped.contains(path))
            .collect();
        let unmerged: Vec<PathBuf> = catalog
            .paths()
            .filter(|path| !merged_paths.contains(&path.to_path_buf()))
            .map(|path| path.to_path_buf())
            .collect();
        plan.protect(&unmerged);

        self.retain(report, &plan, warnings);
        transition(report, PipelineState::RetentionApplied);
        transition(report, PipelineState::Done);
        Ok(())
    }

    fn retain(&self, report: &mut RunReport, plan: &RetentionPlan, warnings: &mut Warnings) {
        report.kept = plan.keep.iter().map(|entry| entry.path.clone()).collect();
        report.planned_deletions = plan.delete_paths();
        if self.config.dry_run {
            for path in &report.planned_deletions {
                log::info!("dry run: would delete {}", path.display());
            }
            return;
        }
        report.deleted = retention::apply(plan, warnings);
        let removed: HashSet<&PathBuf> = report.deleted.iter().collect();
        let survivors: Vec<PathBuf> = report
            .planned_deletions
            .iter()
            .filter(|path| !removed.contains(path))
            .cloned()
            .collect();
        report.kept.extend(survivors);
        report.kept.sort();
    }
}

fn transition(report: &mut RunReport, next: PipelineState) {
    log::debug!("pipeline {} -> {}", report.state, next);
    report.state = next;
    report.history.push(next);
}
