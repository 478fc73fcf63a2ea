use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

use camino::Utf8Path;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::record::{AnnotationRecord, Annotations};
use crate::store::Store;

pub const IDENTIFIER_COLUMN: &str = "identifier";

/// Identifier-indexed annotation rows sharing one column set.
///
/// Rows and columns are only ever added; a cell is replaced by the latest
/// value written to it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationTable {
    columns: IndexSet<String>,
    rows: IndexMap<String, Annotations>,
}

#[derive(Serialize, Deserialize)]
struct TableFile {
    columns: Vec<String>,
    rows: Vec<AnnotationRecord>,
}

/// Field delimiter picked from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Comma,
    Tab,
}

impl Delimiter {
    pub fn for_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => Some(Delimiter::Comma),
            Some(ext) if ext.eq_ignore_ascii_case("tsv") || ext.eq_ignore_ascii_case("tab") => {
                Some(Delimiter::Tab)
            }
            _ => None,
        }
    }

    fn byte(self) -> u8 {
        match self {
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        }
    }
}

impl AnnotationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = AnnotationRecord>) -> Self {
        let mut table = Self::new();
        table.upsert(records);
        table
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.rows.contains_key(identifier)
    }

    pub fn cell(&self, identifier: &str, column: &str) -> Option<&str> {
        self.rows.get(identifier)?.get(column).map(String::as_str)
    }

    /// Columns usable for every identifier in `identifiers`, including the
    /// identifier column; empty as soon as one identifier has no row.
    pub fn covered_columns<S: AsRef<str>>(&self, identifiers: &[S]) -> BTreeSet<String> {
        if self.rows.is_empty()
            || !identifiers
                .iter()
                .all(|id| self.rows.contains_key(id.as_ref()))
        {
            return BTreeSet::new();
        }
        let mut covered: BTreeSet<String> = self.columns.iter().cloned().collect();
        covered.insert(IDENTIFIER_COLUMN.to_string());
        covered
    }

    /// Rows for `identifiers` in the given order; identifiers without a row
    /// get an empty record.
    pub fn records_for<S: AsRef<str>>(&self, identifiers: &[S]) -> Vec<AnnotationRecord> {
        identifiers
            .iter()
            .map(|id| {
                let id = id.as_ref();
                AnnotationRecord::new(id, self.rows.get(id).cloned().unwrap_or_default())
            })
            .collect()
    }

    pub fn upsert(&mut self, records: impl IntoIterator<Item = AnnotationRecord>) {
        for record in records {
            self.columns.extend(record.annotations.keys().cloned());
            let row = self.rows.entry(record.identifier).or_default();
            row.extend(record.annotations);
        }
    }

    /// New table restricted to `identifiers` and `columns`, in that order.
    /// Missing cells are empty strings.
    pub fn select<S: AsRef<str>>(&self, identifiers: &[S], columns: &IndexSet<String>) -> Self {
        let rows = identifiers
            .iter()
            .map(|id| {
                let id = id.as_ref();
                let source = self.rows.get(id);
                let row: Annotations = columns
                    .iter()
                    .map(|column| {
                        let value = source
                            .and_then(|row| row.get(column))
                            .cloned()
                            .unwrap_or_default();
                        (column.clone(), value)
                    })
                    .collect();
                (id.to_string(), row)
            })
            .collect();
        Self {
            columns: columns.clone(),
            rows,
        }
    }

    /// Rows with every table column present.
    pub fn to_records(&self) -> Vec<AnnotationRecord> {
        self.rows
            .iter()
            .map(|(identifier, row)| {
                let annotations = self
                    .columns
                    .iter()
                    .map(|column| (column.clone(), row.get(column).cloned().unwrap_or_default()))
                    .collect();
                AnnotationRecord::new(identifier.clone(), annotations)
            })
            .collect()
    }

    pub fn read_json(path: &Utf8Path) -> Result<Self, KiraError> {
        let content = fs::read(path.as_std_path()).map_err(|err| KiraError::TableRead {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })?;
        let file: TableFile = serde_json::from_slice(&content).map_err(|err| KiraError::TableRead {
            path: path.as_std_path().to_path_buf(),
            message: err.to_string(),
        })?;
        let mut table = Self::new();
        table.columns.extend(file.columns);
        table.upsert(file.rows);
        Ok(table)
    }

    pub fn write_json(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let file = TableFile {
            columns: self.columns.iter().cloned().collect(),
            rows: self.to_records(),
        };
        let content = serde_json::to_vec(&file).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Store::write_bytes_atomic(path, &content)
    }

    /// Reads a delimited table whose first column holds identifiers.
    pub fn read_delimited(path: &Path) -> Result<Self, KiraError> {
        let table_error = |message: String| KiraError::TableRead {
            path: path.to_path_buf(),
            message,
        };
        let delimiter = Delimiter::for_path(path).unwrap_or(Delimiter::Comma);
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter.byte())
            .flexible(true)
            .from_path(path)
            .map_err(|err| table_error(err.to_string()))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|err| table_error(err.to_string()))?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();
        if headers.is_empty() {
            return Err(table_error("no header row".to_string()));
        }

        let mut table = Self::new();
        table.columns.extend(headers.iter().skip(1).cloned());
        for row in reader.records() {
            let row = row.map_err(|err| table_error(err.to_string()))?;
            let Some(identifier) = row.get(0).map(str::trim).filter(|id| !id.is_empty()) else {
                continue;
            };
            let annotations: Annotations = headers
                .iter()
                .skip(1)
                .enumerate()
                .map(|(index, column)| {
                    (column.clone(), row.get(index + 1).unwrap_or("").to_string())
                })
                .collect();
            table.upsert([AnnotationRecord::new(identifier, annotations)]);
        }
        Ok(table)
    }

    pub fn write_delimited<W: io::Write>(&self, writer: W, delimiter: Delimiter) -> Result<(), KiraError> {
        let mut out = csv::WriterBuilder::new()
            .delimiter(delimiter.byte())
            .from_writer(writer);
        let header: Vec<&str> = std::iter::once(IDENTIFIER_COLUMN)
            .chain(self.columns())
            .collect();
        out.write_record(&header)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        for (identifier, row) in &self.rows {
            let record: Vec<&str> = std::iter::once(identifier.as_str())
                .chain(
                    self.columns
                        .iter()
                        .map(|column| row.get(column).map(String::as_str).unwrap_or("")),
                )
                .collect();
            out.write_record(&record)
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        out.flush().map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}
