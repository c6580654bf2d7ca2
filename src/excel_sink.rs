// src/excel_sink.rs

use crate::day_folder::day_label;
use crate::error::LedgerError;
use calamine::{Data, Reader, open_workbook_auto};
use chrono::NaiveDate;
use rust_xlsxwriter::Workbook;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

const SHEET_NAME: &str = "Sheet1";

/// Largest integer an f64 cell holds exactly.
const MAX_EXACT_INT: u64 = 1 << 53;

/// Blank rows written after every appended record.
pub const SEPARATOR_ROWS: usize = 2;

/// Destination for flattened invoice records.
pub trait LedgerSink: Send + Sync {
    /// Append one record to the ledger for `date`, returning the file written.
    fn append(&self, record: &Map<String, Value>, date: NaiveDate) -> Result<PathBuf, LedgerError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Cell::Empty,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => {
                let magnitude = n.as_u64().or_else(|| n.as_i64().map(i64::unsigned_abs));
                match (magnitude, n.as_f64()) {
                    // too wide for a float cell; keep every digit as text
                    (Some(m), _) if m > MAX_EXACT_INT => Cell::Text(n.to_string()),
                    (_, Some(f)) => Cell::Number(f),
                    _ => Cell::Text(n.to_string()),
                }
            }
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Text(other.to_string()),
        }
    }

    fn from_sheet(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) if s.is_empty() => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            other => Cell::Text(other.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Cell::Empty)
    }
}

/// In-memory copy of one ledger sheet: a header row plus body rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl LedgerSheet {
    /// Load an existing ledger. The xlsx format does not keep trailing empty
    /// rows, so the separator after the last record is restored here.
    pub fn read(path: &Path) -> Result<Self, LedgerError> {
        let mut workbook = open_workbook_auto(path)?;
        let Some(sheet) = workbook.sheet_names().first().cloned() else {
            return Ok(Self::default());
        };
        let range = workbook.worksheet_range(&sheet)?;
        let Some((start_row, start_col)) = range.start() else {
            return Ok(Self::default());
        };
        let (height, width) = range.get_size();
        let total_rows = start_row as usize + height;
        let total_cols = start_col as usize + width;

        let mut grid = vec![vec![Cell::Empty; total_cols]; total_rows];
        for (r, c, data) in range.used_cells() {
            grid[start_row as usize + r][start_col as usize + c] = Cell::from_sheet(data);
        }

        let mut grid = grid.into_iter();
        let headers: Vec<String> = grid
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(|cell| match cell {
                Cell::Empty => String::new(),
                Cell::Text(s) => s,
                Cell::Number(n) => n.to_string(),
                Cell::Bool(b) => b.to_string(),
            })
            .collect();

        let mut rows: Vec<Vec<Cell>> = grid.collect();
        while rows.last().is_some_and(|row| row.iter().all(Cell::is_empty)) {
            rows.pop();
        }
        if !rows.is_empty() {
            rows.extend(std::iter::repeat_n(Vec::new(), SEPARATOR_ROWS));
        }
        for row in &mut rows {
            row.resize(headers.len(), Cell::Empty);
        }

        Ok(Self { headers, rows })
    }

    /// Add `record` as a new row followed by the blank separators. Unknown
    /// keys become new columns on the right.
    pub fn append_record(&mut self, record: &Map<String, Value>) {
        for key in record.keys() {
            if !self.headers.iter().any(|h| h == key) {
                self.headers.push(key.clone());
            }
        }

        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, Cell::Empty);
        }

        let row = self
            .headers
            .iter()
            .map(|h| record.get(h).map(Cell::from_json).unwrap_or(Cell::Empty))
            .collect();
        self.rows.push(row);
        self.rows
            .extend(std::iter::repeat_n(vec![Cell::Empty; width], SEPARATOR_ROWS));
    }

    /// Rows that carry at least one value.
    pub fn data_rows(&self) -> impl Iterator<Item = &Vec<Cell>> {
        self.rows.iter().filter(|row| row.iter().any(|c| !c.is_empty()))
    }

    /// Write the whole sheet to `path` via a temp file in the same directory.
    pub fn write(&self, path: &Path) -> Result<(), LedgerError> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(SHEET_NAME)?;

        for (col, header) in self.headers.iter().enumerate() {
            worksheet.write_string(0, col as u16, sanitize_cell(header))?;
        }

        for (i, row) in self.rows.iter().enumerate() {
            let r = (i + 1) as u32;
            for (col, cell) in row.iter().enumerate() {
                let c = col as u16;
                match cell {
                    Cell::Empty => {}
                    Cell::Text(s) => {
                        worksheet.write_string(r, c, sanitize_cell(s))?;
                    }
                    Cell::Number(n) => {
                        worksheet.write_number(r, c, *n)?;
                    }
                    Cell::Bool(b) => {
                        worksheet.write_boolean(r, c, *b)?;
                    }
                }
            }
        }

        let tmp = path.with_extension("xlsx.tmp");
        workbook.save(&tmp)?;
        fs::rename(&tmp, path).map_err(|source| LedgerError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Drop control characters (except tab, newline, CR) that corrupt sheet XML.
fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

/// Dated, bucketed xlsx ledger under an output root.
#[derive(Debug, Clone)]
pub struct ExcelLedger {
    output_root: PathBuf,
    bucket: String,
    file_name: String,
}

impl ExcelLedger {
    pub fn new(output_root: PathBuf, bucket: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            output_root,
            bucket: bucket.into(),
            file_name: file_name.into(),
        }
    }

    /// `<output_root>/excel_output_<date>/<bucket>/<file_name>`
    pub fn ledger_path(&self, date: NaiveDate) -> PathBuf {
        self.output_root
            .join(format!("excel_output_{}", day_label(date)))
            .join(&self.bucket)
            .join(&self.file_name)
    }
}

impl LedgerSink for ExcelLedger {
    fn append(&self, record: &Map<String, Value>, date: NaiveDate) -> Result<PathBuf, LedgerError> {
        let path = self.ledger_path(date);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| LedgerError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let mut sheet = if path.exists() {
            LedgerSheet::read(&path)?
        } else {
            LedgerSheet::default()
        };
        let existing_rows = sheet.rows.len();

        sheet.append_record(record);
        sheet.write(&path)?;

        info!(
            path = %path.display(),
            rows_before = existing_rows,
            rows_after = sheet.rows.len(),
            records = sheet.data_rows().count(),
            columns = sheet.headers.len(),
            "Successfully appended data to ledger"
        );
        Ok(path)
    }
}
