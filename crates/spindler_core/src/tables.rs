//! Pre-parsed simulation tables and their CSV layouts.
//!
//! Two layouts are understood:
//!
//! - Two-axis tables: a header line of eccentricity samples (optionally led by
//!   an index label cell), then one line per mass ratio: the `q` value followed
//!   by one cell per eccentricity.
//! - One-axis tables: a named header (`e` plus a rate column such as `adota`
//!   or `edot`) and one line per sample, in any order.

use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};

use crate::error::{GridError, TableError};
use crate::grid::{GridField2d, LinearField1d, OutOfBounds};

/// Rate sampled along eccentricity only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table1d {
    pub e: Vec<f64>,
    pub rate: Vec<f64>,
}

impl Table1d {
    pub fn new(e: Vec<f64>, rate: Vec<f64>) -> Result<Self, TableError> {
        if e.len() != rate.len() {
            return Err(TableError::LengthMismatch {
                left: e.len(),
                right: rate.len(),
            });
        }
        Ok(Self { e, rate })
    }

    /// Copy of the table ordered by eccentricity.
    pub fn sorted(&self) -> Self {
        let mut pairs: Vec<(f64, f64)> = self
            .e
            .iter()
            .cloned()
            .zip(self.rate.iter().cloned())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        let (e, rate) = pairs.into_iter().unzip();
        Self { e, rate }
    }

    /// Builds a 1-D field after sorting by eccentricity.
    pub fn to_field(&self, policy: OutOfBounds) -> Result<LinearField1d, GridError> {
        let sorted = self.sorted();
        LinearField1d::new(sorted.e, sorted.rate, policy)
    }

    /// Parses a headed CSV, taking `e` and `column` by name.
    pub fn from_csv_str(text: &str, column: &str) -> Result<Self, TableError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());
        let headers = reader.headers()?.clone();
        let e_idx = find_column(&headers, "e")?;
        let rate_idx = find_column(&headers, column)?;

        let mut e = Vec::new();
        let mut rate = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record = record?;
            let line = row + 2;
            e.push(parse_field(&record, e_idx, line)?);
            rate.push(parse_field(&record, rate_idx, line)?);
        }
        if e.is_empty() {
            return Err(TableError::Empty);
        }
        Self::new(e, rate)
    }
}

/// Value grid over `(q, e)`, row-major with one row per `q` sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table2d {
    pub q: Vec<f64>,
    pub e: Vec<f64>,
    pub values: Vec<f64>,
}

impl Table2d {
    pub fn new(q: Vec<f64>, e: Vec<f64>, values: Vec<f64>) -> Result<Self, TableError> {
        if q.len() * e.len() != values.len() {
            return Err(TableError::LengthMismatch {
                left: q.len() * e.len(),
                right: values.len(),
            });
        }
        Ok(Self { q, e, values })
    }

    pub fn to_field(&self, policy: OutOfBounds) -> Result<GridField2d, GridError> {
        GridField2d::new(self.q.clone(), self.e.clone(), self.values.clone(), policy)
    }

    /// Table on the same axes with every node replaced by `f(q, e, value)`.
    pub fn map_nodes(&self, f: impl Fn(f64, f64, f64) -> f64) -> Self {
        let cols = self.e.len();
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(idx, &v)| f(self.q[idx / cols], self.e[idx % cols], v))
            .collect();
        Self {
            q: self.q.clone(),
            e: self.e.clone(),
            values,
        }
    }

    pub fn same_axes(&self, other: &Table2d) -> bool {
        self.q == other.q && self.e == other.e
    }

    pub fn from_csv_str(text: &str) -> Result<Self, TableError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());
        let mut records = reader.records();
        let header = match records.next() {
            Some(record) => record?,
            None => return Err(TableError::Empty),
        };

        let mut rows = Vec::new();
        for record in records {
            rows.push(record?);
        }
        let width = match rows.first() {
            Some(first) => first.len(),
            None => return Err(TableError::Empty),
        };

        // A header one cell shorter than the data rows has no index label.
        let skip = if header.len() + 1 == width { 0 } else { 1 };
        if header.len() != width - 1 + skip {
            return Err(TableError::RaggedRow {
                line: 1,
                expected: width - 1 + skip,
                actual: header.len(),
            });
        }
        let e = (skip..header.len())
            .map(|idx| parse_field(&header, idx, 1))
            .collect::<Result<Vec<_>, _>>()?;

        let mut q = Vec::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len() * e.len());
        for (row, record) in rows.iter().enumerate() {
            let line = row + 2;
            if record.len() != width {
                return Err(TableError::RaggedRow {
                    line,
                    expected: width,
                    actual: record.len(),
                });
            }
            q.push(parse_field(record, 0, line)?);
            for idx in 1..width {
                values.push(parse_field(record, idx, line)?);
            }
        }
        Self::new(q, e, values)
    }
}

/// The complete table set one disk model is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum ModelTables {
    /// `adot/a`, raw eccentricity rate and accretion ratio λ over `(q, e)`.
    General {
        adota: Table2d,
        edot: Table2d,
        lambda: Table2d,
    },
    /// `adot/a` and raw eccentricity rate over `e`, for `q = 1`.
    EqualMass { adota: Table1d, edot: Table1d },
}

fn find_column(headers: &StringRecord, name: &str) -> Result<usize, TableError> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| TableError::MissingColumn {
            name: name.to_string(),
        })
}

fn parse_field(record: &StringRecord, idx: usize, line: usize) -> Result<f64, TableError> {
    let raw = record.get(idx).unwrap_or("");
    raw.parse::<f64>().map_err(|_| TableError::Parse {
        line,
        value: raw.to_string(),
    })
}

fn read_file(path: &Path) -> Result<String, TableError> {
    std::fs::read_to_string(path).map_err(|source| TableError::Io {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_table_1d(path: &Path, column: &str) -> Result<Table1d, TableError> {
    tracing::debug!(path = %path.display(), column, "loading 1-D table");
    Table1d::from_csv_str(&read_file(path)?, column)
}

pub fn load_table_2d(path: &Path) -> Result<Table2d, TableError> {
    tracing::debug!(path = %path.display(), "loading 2-D table");
    Table2d::from_csv_str(&read_file(path)?)
}

/// Path of `file` inside `dir`.
pub(crate) fn table_path(dir: &Path, file: &str) -> PathBuf {
    dir.join(file)
}
