//! Consolidation of snapshot files into the canonical dataset.
//!
//! Files are read in the order given (callers pass them path-sorted), rows are
//! concatenated file-then-row, exact duplicates are dropped keeping the first
//! occurrence, and the survivors are stably sorted by the timestamp field.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Warning, Warnings};
use crate::table::{read_table, Table};
use crate::timestamp::{parse_reading_time, ReadingTime};
use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub rows_read: u64,
    pub duplicates_removed: u64,
    pub rows_dropped: u64,
    pub rows_written: u64,
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    pub table: Table,
    pub stats: MergeStats,
    /// Inputs that could not be read; none of their rows are in `table`.
    pub skipped: Vec<PathBuf>,
}

pub struct Merger {
    timestamp_field: String,
}

struct SourcedRow {
    source: usize,
    line: u64,
    values: Vec<String>,
}

impl Merger {
    pub fn new(timestamp_field: impl Into<String>) -> Self {
        Self {
            timestamp_field: timestamp_field.into(),
        }
    }

    /// Merge `paths` in the given order. Unreadable files are skipped with a
    /// warning; `Error::EmptyInput` is returned when no row survives.
    pub fn merge(&self, paths: &[PathBuf], warnings: &mut Warnings) -> Result<MergeOutput> {
        let mut stats = MergeStats::default();
        let mut skipped = Vec::new();
        let mut loaded: Vec<(&Path, Table)> = Vec::with_capacity(paths.len());
        for path in paths {
            match read_table(path) {
                Ok(table) => {
                    log::debug!("loaded {} rows from {}", table.len(), path.display());
                    stats.files_loaded += 1;
                    stats.rows_read += table.len() as u64;
                    loaded.push((path.as_path(), table));
                }
                Err(err) => {
                    stats.files_skipped += 1;
                    skipped.push(path.clone());
                    warnings.record(Warning::Load {
                        path: path.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let headers = union_headers(loaded.iter().map(|(_, table)| table));
        let Some(ts_index) = headers.iter().position(|h| *h == self.timestamp_field) else {
            for (path, table) in &loaded {
                if !table.is_empty() {
                    warnings.record(Warning::RowValidation {
                        path: path.to_path_buf(),
                        row: 1,
                        message: format!(
                            "no `{}` column; all {} rows dropped",
                            self.timestamp_field,
                            table.len()
                        ),
                    });
                }
            }
            return Err(Error::EmptyInput);
        };

        let mut seen: HashSet<Vec<String>> = HashSet::new();
        let mut rows: Vec<SourcedRow> = Vec::new();
        for (source, (_, table)) in loaded.iter().enumerate() {
            let positions: Vec<Option<usize>> =
                headers.iter().map(|name| table.column(name)).collect();
            for (idx, raw) in table.rows.iter().enumerate() {
                let values: Vec<String> = positions
                    .iter()
                    .map(|pos| pos.map(|p| raw[p].clone()).unwrap_or_default())
                    .collect();
                if seen.contains(&values) {
                    stats.duplicates_removed += 1;
                    continue;
                }
                seen.insert(values.clone());
                rows.push(SourcedRow {
                    source,
                    line: idx as u64 + 1,
                    values,
                });
            }
        }

        let mut keyed: Vec<(ReadingTime, Vec<String>)> = Vec::with_capacity(rows.len());
        for row in rows {
            match parse_reading_time(&row.values[ts_index]) {
                Some(at) => keyed.push((at, row.values)),
                None => {
                    stats.rows_dropped += 1;
                    let (path, _) = &loaded[row.source];
                    warnings.record(Warning::RowValidation {
                        path: path.to_path_buf(),
                        row: row.line,
                        message: format!(
                            "invalid `{}` value {:?}",
                            self.timestamp_field, row.values[ts_index]
                        ),
                    });
                }
            }
        }

        if keyed.is_empty() {
            return Err(Error::EmptyInput);
        }

        // `sort_by_key` is stable: equal timestamps keep concatenation order.
        keyed.sort_by_key(|(at, _)| *at);
        stats.rows_written = keyed.len() as u64;

        let mut table = Table::new(headers);
        table.rows = keyed.into_iter().map(|(_, values)| values).collect();
        Ok(MergeOutput {
            table,
            stats,
            skipped,
        })
    }
}

fn union_headers<'a>(tables: impl Iterator<Item = &'a Table>) -> Vec<String> {
    let mut headers: Vec<String> = Vec::new();
    for table in tables {
        for name in &table.headers {
            if !headers.contains(name) {
                headers.push(name.clone());
            }
        }
    }
    headers
}
