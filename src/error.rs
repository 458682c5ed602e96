use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("no snapshot files found in {}", .directory.display())]
    NoSnapshots { directory: PathBuf },
    #[error("no readable rows in any snapshot file")]
    EmptyInput,
    #[error("existing canonical dataset {} is unreadable; refusing to overwrite it", .path.display())]
    UnreadableCanonical { path: PathBuf },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("`{command}` failed: {message}")]
    Vcs { command: String, message: String },
    #[error("`{command}` timed out after {timeout:?}")]
    VcsTimeout { command: String, timeout: Duration },
}

impl Error {
    /// Fatal errors end the pipeline in `Failed`; everything else is a
    /// per-file condition the caller degrades on.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoSnapshots { .. }
                | Error::EmptyInput
                | Error::UnreadableCanonical { .. }
                | Error::Write { .. }
                | Error::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal condition recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// Recency of a snapshot could not be fully resolved.
    Discovery { path: PathBuf, message: String },
    /// A snapshot could not be read and was skipped.
    Load { path: PathBuf, message: String },
    /// A row failed validation and was dropped. `row` is 1-based, header excluded.
    RowValidation {
        path: PathBuf,
        row: u64,
        message: String,
    },
    /// A snapshot selected for deletion could not be removed.
    Delete { path: PathBuf, message: String },
}

impl Warning {
    pub fn path(&self) -> &PathBuf {
        match self {
            Warning::Discovery { path, .. }
            | Warning::Load { path, .. }
            | Warning::RowValidation { path, .. }
            | Warning::Delete { path, .. } => path,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::Discovery { path, message } => {
                write!(f, "discovery warning for {}: {message}", path.display())
            }
            Warning::Load { path, message } => {
                write!(f, "skipping {}: {message}", path.display())
            }
            Warning::RowValidation { path, row, message } => {
                write!(f, "dropping row {row} of {}: {message}", path.display())
            }
            Warning::Delete { path, message } => {
                write!(f, "could not delete {}: {message}", path.display())
            }
        }
    }
}

/// Collects warnings and logs each one as it is recorded.
#[derive(Debug, Default, Clone)]
pub struct Warnings {
    items: Vec<Warning>,
}

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, warning: Warning) {
        log::warn!("{warning}");
        self.items.push(warning);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.items.iter()
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.items
    }
}
