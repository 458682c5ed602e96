//! Delimited-file boundary.
//!
//! The merge engine only needs "given a path, return rows; given rows, write a
//! path". Values are kept as raw strings so structural equality is exact.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, WriterBuilder};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read a header-first CSV file. A row whose width differs from the header is
/// an error for the whole file.
pub fn read_table(path: &Path) -> Result<Table> {
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut table = Table::new(headers);
    for record in reader.records() {
        let record = record?;
        table.rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(table)
}

/// Write `table` to `path` durably: the data goes to a sibling temp file which
/// is synced and then renamed over the target.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    write_durable(path, table).map_err(|source| Error::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_durable(path: &Path, table: &Table) -> std::io::Result<()> {
    let tmp = temp_path(path);
    let mut buf = Vec::new();
    {
        let mut writer = WriterBuilder::new().has_headers(false).from_writer(&mut buf);
        writer.write_record(&table.headers).map_err(csv_to_io)?;
        for row in &table.rows {
            writer.write_record(row).map_err(csv_to_io)?;
        }
        writer.flush()?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)?;
    if let Err(err) = file.write_all(&buf).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    drop(file);
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err);
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn csv_to_io(err: csv::Error) -> std::io::Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::Other, format!("{other:?}")),
    }
}
