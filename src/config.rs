//! Pipeline configuration.
//!
//! Sources, lowest precedence first: [`PipelineConfig::default`], an optional
//! JSON file, then command-line overrides applied by the binary.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::SnapshotPattern;
use crate::retention::RetentionPolicy;
use crate::{Error, Result};

pub const DEFAULT_DIRECTORY: &str = "data";
pub const DEFAULT_OUTPUT_NAME: &str = "sensor_data_combined.csv";
pub const DEFAULT_TIMESTAMP_FIELD: &str = "timestamp";
pub const DEFAULT_VCS_TIMEOUT_SECS: u64 = 10;

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory holding the snapshot files and the canonical output.
    /// Default: `data`
    pub directory: PathBuf,

    /// Snapshot naming convention.
    /// Default: `sensor_*.csv`
    pub pattern: SnapshotPattern,

    /// File name of the canonical dataset inside `directory`.
    /// Default: `sensor_data_combined.csv`
    pub output_name: String,

    /// Field rows are ordered by.
    /// Default: `timestamp`
    pub timestamp_field: String,

    /// Retention strategy applied after a successful write.
    /// Default: delete snapshots older than 24 hours
    pub retention: RetentionPolicy,

    /// Prefer version-control commit times over file mtimes.
    /// Default: true
    pub use_vcs: bool,

    /// Upper bound for every version-control query.
    /// Default: 10
    pub vcs_timeout_secs: u64,

    /// Feed the existing canonical dataset back into the merge so rows from
    /// purged snapshots are not lost.
    /// Default: true
    pub carry_forward: bool,

    /// Plan retention but delete nothing.
    /// Default: false
    pub dry_run: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            pattern: SnapshotPattern::default(),
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            timestamp_field: DEFAULT_TIMESTAMP_FIELD.to_string(),
            retention: RetentionPolicy::default(),
            use_vcs: true,
            vcs_timeout_secs: DEFAULT_VCS_TIMEOUT_SECS,
            carry_forward: true,
            dry_run: false,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        serde_json::from_slice(&data)
            .map_err(|err| Error::Config(format!("{}: {err}", path.display())))
    }

    pub fn output_path(&self) -> PathBuf {
        self.directory.join(&self.output_name)
    }

    pub fn vcs_timeout(&self) -> Duration {
        Duration::from_secs(self.vcs_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.output_name.is_empty()
            || self.output_name == "."
            || self.output_name == ".."
            || self.output_name.contains('/')
            || self.output_name.contains('\\')
        {
            return Err(Error::Config(format!(
                "output name must be a plain file name, got {:?}",
                self.output_name
            )));
        }
        if self.timestamp_field.is_empty() {
            return Err(Error::Config("timestamp field must not be empty".to_string()));
        }
        if self.pattern.prefix.is_empty() && self.pattern.suffix.is_empty() {
            return Err(Error::Config("snapshot pattern must not be empty".to_string()));
        }
        if self.vcs_timeout_secs == 0 {
            return Err(Error::Config("vcs timeout must be at least 1 second".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionMode {
    Age,
    Count,
}

impl FromStr for RetentionMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "age" => Ok(RetentionMode::Age),
            "count" => Ok(RetentionMode::Count),
            other => Err(Error::Config(format!(
                "unknown retention mode {other:?} (expected age or count)"
            ))),
        }
    }
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionMode::Age => f.write_str("age"),
            RetentionMode::Count => f.write_str("count"),
        }
    }
}

/// Retention options as given on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionOverrides {
    pub mode: Option<RetentionMode>,
    pub max_age_hours: Option<u64>,
    pub keep_count: Option<usize>,
}

impl RetentionOverrides {
    /// Combine with `base`. Options belonging to the other mode are rejected;
    /// a mode without its parameter inherits it from `base` when `base` uses
    /// the same mode.
    pub fn resolve(&self, base: RetentionPolicy) -> Result<RetentionPolicy> {
        let mode = match (self.mode, self.max_age_hours, self.keep_count) {
            (_, Some(_), Some(_)) => {
                return Err(Error::Config(
                    "max-age-hours and keep-count are mutually exclusive".to_string(),
                ))
            }
            (Some(mode), _, _) => mode,
            (None, Some(_), None) => RetentionMode::Age,
            (None, None, Some(_)) => RetentionMode::Count,
            (None, None, None) => return Ok(base),
        };

        match mode {
            RetentionMode::Age => {
                if self.keep_count.is_some() {
                    return Err(Error::Config("keep-count requires retention-mode=count".to_string()));
                }
                let hours = match (self.max_age_hours, base) {
                    (Some(hours), _) => hours,
                    (None, RetentionPolicy::Age { max_age_hours }) => max_age_hours,
                    (None, _) => {
                        return Err(Error::Config(
                            "retention-mode=age requires max-age-hours".to_string(),
                        ))
                    }
                };
                Ok(RetentionPolicy::Age { max_age_hours: hours })
            }
            RetentionMode::Count => {
                if self.max_age_hours.is_some() {
                    return Err(Error::Config("max-age-hours requires retention-mode=age".to_string()));
                }
                let count = match (self.keep_count, base) {
                    (Some(count), _) => count,
                    (None, RetentionPolicy::Count { keep_count }) => keep_count,
                    (None, _) => {
                        return Err(Error::Config(
                            "retention-mode=count requires keep-count".to_string(),
                        ))
                    }
                };
                Ok(RetentionPolicy::Count { keep_count: count })
            }
        }
    }
}
