//! Discovery of snapshot files and their recency.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Warning, Warnings};
use crate::recency::{Recency, TimestampProvider};
use crate::Result;

/// Snapshot naming convention: `<prefix><suffix-anything><suffix>`, e.g.
/// `sensor_*.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPattern {
    pub prefix: String,
    pub suffix: String,
}

impl Default for SnapshotPattern {
    fn default() -> Self {
        Self {
            prefix: "sensor_".to_string(),
            suffix: ".csv".to_string(),
        }
    }
}

impl SnapshotPattern {
    pub fn matches(&self, name: &str) -> bool {
        name.len() > self.prefix.len() + self.suffix.len()
            && name.starts_with(&self.prefix)
            && name.ends_with(&self.suffix)
    }
}

/// Snapshot files of one directory with their recency, in path order.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCatalog {
    entries: Vec<Recency>,
}

impl SnapshotCatalog {
    pub fn from_entries(mut entries: Vec<Recency>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self { entries }
    }

    /// Discover matching regular files in `directory`, skipping `exclude`
    /// (the canonical output shares the naming convention). A missing
    /// directory yields an empty catalog.
    pub fn discover(
        directory: &Path,
        pattern: &SnapshotPattern,
        exclude: &[PathBuf],
        provider: &TimestampProvider<'_>,
        warnings: &mut Warnings,
    ) -> Result<Self> {
        let paths = list_snapshots(directory, pattern, exclude)?;
        let mut entries = Vec::with_capacity(paths.len());
        for path in paths {
            let resolved = provider.resolve(&path);
            for note in resolved.notes {
                warnings.record(Warning::Discovery {
                    path: path.clone(),
                    message: note,
                });
            }
            log::debug!(
                "catalogued {} ({:?})",
                path.display(),
                resolved.recency.source
            );
            entries.push(resolved.recency);
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[Recency] {
        &self.entries
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|entry| entry.path.as_path())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Matching snapshot paths in ascending lexical order.
pub fn list_snapshots(
    directory: &Path,
    pattern: &SnapshotPattern,
    exclude: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    if !directory.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(directory)? {
        let path = entry?.path();
        // Follows symlinks, so a linked snapshot counts as a regular file.
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => continue,
            Err(err) => {
                log::debug!("skipping {}: {err}", path.display());
                continue;
            }
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !pattern.matches(name) || exclude.iter().any(|skip| skip == &path) {
            continue;
        }
        paths.push(path);
    }
    paths.sort();
    Ok(paths)
}
