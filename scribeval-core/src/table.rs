// Copyright 2025 Scribeval Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! The working record table: ordered columns, append-only rows, CSV in/out.
//!
//! A row's identity is its position. The engine never edits existing cells in
//! place; evaluation passes merge whole columns (`set_column`), and a re-run
//! under the same column name overwrites the previous output (last-write-wins).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single cell of the record table.
///
/// Sequence variants hold multi-trial evaluation output: one entry per trial,
/// in trial order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Text(String),
    Number(f64),
    NumberSeq(Vec<Option<f64>>),
    TextSeq(Vec<String>),
}

impl CellValue {
    /// Coerce the cell to text for template interpolation.
    pub fn as_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::NumberSeq(_) | CellValue::TextSeq(_) => self.to_csv_field(),
        }
    }

    /// Render the cell as a single CSV field (before quoting).
    ///
    /// Sequences serialize as inline array literals so a multi-trial run
    /// survives export/import as one column.
    fn to_csv_field(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => format_number(*n),
            CellValue::NumberSeq(seq) => {
                let items: Vec<String> = seq
                    .iter()
                    .map(|s| match s {
                        Some(n) => format_number(*n),
                        None => "null".to_string(),
                    })
                    .collect();
                format!("[{}]", items.join(", "))
            }
            CellValue::TextSeq(seq) => serde_json::to_string(seq).unwrap_or_default(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// A text snapshot of one row, taken before dispatch.
///
/// Fields are ordered as the table's columns; values are coerced to text so
/// concurrent evaluation tasks share immutable data only.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    pub fn from_pairs(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }

    /// Look up a field value by column name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Errors from table construction and CSV parsing.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("row has {got} cells, table has {expected} columns")]
    RowWidth { expected: usize, got: usize },

    #[error("CSV row {line} has {got} fields, header has {expected}")]
    CsvRowWidth {
        line: usize,
        expected: usize,
        got: usize,
    },

    #[error("unterminated quoted field in CSV input")]
    UnterminatedQuote,

    #[error("CSV input has no header row")]
    MissingHeader,

    #[error("column has {got} values, table has {expected} rows")]
    ColumnLength { expected: usize, got: usize },
}

/// The working table: ordered column names plus rows of cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordTable {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append one row. Cell count must match the column count.
    pub fn append_row(&mut self, cells: Vec<CellValue>) -> Result<(), TableError> {
        if cells.len() != self.columns.len() {
            return Err(TableError::RowWidth {
                expected: self.columns.len(),
                got: cells.len(),
            });
        }
        self.rows.push(cells);
        Ok(())
    }

    /// Merge a column into the table, overwriting any existing column with
    /// the same name (last-write-wins).
    pub fn set_column(&mut self, name: &str, values: Vec<CellValue>) -> Result<(), TableError> {
        if values.len() != self.rows.len() {
            return Err(TableError::ColumnLength {
                expected: self.rows.len(),
                got: values.len(),
            });
        }
        match self.column_index(name) {
            Some(idx) => {
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row[idx] = value;
                }
            }
            None => {
                self.columns.push(name.to_string());
                for (row, value) in self.rows.iter_mut().zip(values) {
                    row.push(value);
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Snapshot one row as an immutable text record.
    pub fn record(&self, row: usize) -> Option<Record> {
        let cells = self.rows.get(row)?;
        let fields = self
            .columns
            .iter()
            .zip(cells)
            .map(|(name, cell)| (name.clone(), cell.as_text()))
            .collect();
        Some(Record::from_pairs(fields))
    }

    /// Snapshot every row, in row order.
    pub fn records(&self) -> Vec<Record> {
        (0..self.rows.len())
            .filter_map(|i| self.record(i))
            .collect()
    }

    /// Parse a table from CSV text. The first row is the header.
    ///
    /// Quoted fields may contain commas, doubled quotes, and newlines —
    /// transcripts routinely span lines.
    pub fn from_csv(data: &str) -> Result<Self, TableError> {
        let mut raw = parse_csv(data)?;
        if raw.is_empty() {
            return Err(TableError::MissingHeader);
        }
        let columns = raw.remove(0);
        let mut table = RecordTable::with_columns(columns);
        for (i, fields) in raw.into_iter().enumerate() {
            if fields.len() != table.columns.len() {
                return Err(TableError::CsvRowWidth {
                    line: i + 2,
                    expected: table.columns.len(),
                    got: fields.len(),
                });
            }
            table
                .rows
                .push(fields.into_iter().map(CellValue::Text).collect());
        }
        Ok(table)
    }

    /// Serialize the table, header first, one line per record.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let header: Vec<String> = self.columns.iter().map(|c| escape_csv(c)).collect();
        out.push_str(&header.join(","));
        out.push('\n');
        for row in &self.rows {
            let fields: Vec<String> = row
                .iter()
                .map(|cell| escape_csv(&cell.to_csv_field()))
                .collect();
            out.push_str(&fields.join(","));
            out.push('\n');
        }
        out
    }
}

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Split CSV text into rows of unescaped fields.
fn parse_csv(data: &str) -> Result<Vec<Vec<String>>, TableError> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = data.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    // Doubled quote is a literal quote; a lone quote closes.
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(c),
            }
        } else {
            match c {
                '"' if field.is_empty() => in_quotes = true,
                ',' => row.push(std::mem::take(&mut field)),
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                '\n' => {
                    row.push(std::mem::take(&mut field));
                    rows.push(std::mem::take(&mut row));
                }
                _ => field.push(c),
            }
        }
    }

    if in_quotes {
        return Err(TableError::UnterminatedQuote);
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }

    // Blank lines carry no record.
    rows.retain(|r| !(r.len() == 1 && r[0].is_empty()));
    Ok(rows)
}
