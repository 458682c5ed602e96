//! Best-known recency of a snapshot file.
//!
//! Version-control history wins when the file is tracked and the lookup
//! succeeds; otherwise the filesystem modification time is used. Failures only
//! degrade the source, they never abort a run.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use time::OffsetDateTime;

use crate::vcs::VcsQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecencySource {
    VcsCommitTime,
    FilesystemMtime,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recency {
    pub path: PathBuf,
    #[serde(with = "time::serde::rfc3339::option")]
    pub timestamp: Option<OffsetDateTime>,
    pub source: RecencySource,
}

impl Recency {
    pub fn new(path: impl Into<PathBuf>, timestamp: OffsetDateTime, source: RecencySource) -> Self {
        Self {
            path: path.into(),
            timestamp: Some(timestamp),
            source,
        }
    }

    pub fn unknown(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timestamp: None,
            source: RecencySource::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.timestamp.is_none()
    }
}

/// Outcome of resolving one path: the record plus any notes on degraded
/// lookups, for the caller to report.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub recency: Recency,
    pub notes: Vec<String>,
}

pub struct TimestampProvider<'a> {
    vcs: Option<&'a dyn VcsQuery>,
}

impl<'a> TimestampProvider<'a> {
    /// Without a usable VCS every path falls back to filesystem metadata.
    /// The repository root is resolved once here; if that fails the VCS is
    /// disabled for the rest of the run.
    pub fn new(vcs: Option<&'a dyn VcsQuery>) -> Self {
        let vcs = vcs.and_then(|vcs| match vcs.repo_root() {
            Ok(root) => {
                log::debug!("resolving recency against repository {}", root.display());
                Some(vcs)
            }
            Err(err) => {
                log::info!("version control unavailable, using file mtimes: {err}");
                None
            }
        });
        Self { vcs }
    }

    pub fn filesystem_only() -> Self {
        Self { vcs: None }
    }

    pub fn has_vcs(&self) -> bool {
        self.vcs.is_some()
    }

    pub fn resolve(&self, path: &Path) -> Resolved {
        let mut notes = Vec::new();
        if let Some(vcs) = self.vcs {
            match vcs.is_tracked(path) {
                Ok(true) => match vcs.last_commit_time(path) {
                    Ok(at) => {
                        return Resolved {
                            recency: Recency::new(path, at, RecencySource::VcsCommitTime),
                            notes,
                        };
                    }
                    Err(err) => notes.push(format!("commit time lookup failed: {err}")),
                },
                Ok(false) => {}
                Err(err) => notes.push(format!("tracking query failed: {err}")),
            }
        }

        let recency = match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(mtime) => Recency::new(
                path,
                OffsetDateTime::from(mtime),
                RecencySource::FilesystemMtime,
            ),
            Err(err) => {
                notes.push(format!("modification time unavailable: {err}"));
                Recency::unknown(path)
            }
        };
        Resolved { recency, notes }
    }
}
