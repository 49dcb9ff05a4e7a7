// 📒 Workbook - named, signature-based access to extract sheets
//
// ODS/XLSX/XLS/XLSB go through calamine, CSV through the csv crate (a CSV
// extract is a single main sheet with no relationship table).
//
// Sheets are located by name or by the columns they carry, never by position.

use crate::error::{ImportError, Result};
use crate::parser::CellValue;
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Columns that identify the main locations sheet
pub const MAIN_SHEET_SIGNATURE: &[&str] = &["Location ID", "Provider ID"];

// ============================================================================
// SOURCE FORMAT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Ods,
    Xlsx,
    Xls,
    Xlsb,
    Csv,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "ods" => Some(SourceFormat::Ods),
            "xlsx" | "xlsm" => Some(SourceFormat::Xlsx),
            "xls" => Some(SourceFormat::Xls),
            "xlsb" => Some(SourceFormat::Xlsb),
            "csv" => Some(SourceFormat::Csv),
            _ => None,
        }
    }

    /// Label used in logs and status records
    pub fn label(&self) -> &'static str {
        match self {
            SourceFormat::Ods => "ODS",
            SourceFormat::Xlsx | SourceFormat::Xls | SourceFormat::Xlsb => "XLSX",
            SourceFormat::Csv => "CSV",
        }
    }

    /// ODS decoding is markedly slower than the Excel formats
    pub fn is_slow(&self) -> bool {
        matches!(self, SourceFormat::Ods)
    }
}

// ============================================================================
// SHEET
// ============================================================================

/// One sheet: header row plus data rows, all cells kept raw.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    headers: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<CellValue>>,
}

static EMPTY_CELL: CellValue = CellValue::Empty;

impl Sheet {
    pub fn new(name: impl Into<String>, headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();
        let mut index = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            // First occurrence wins for duplicated headers
            index.entry(header.clone()).or_insert(i);
        }
        Sheet {
            name: name.into(),
            headers,
            index,
            rows,
        }
    }

    /// Sheet with headers and no rows
    pub fn empty(name: impl Into<String>, headers: &[&str]) -> Self {
        Sheet::new(name, headers.iter().map(|h| h.to_string()).collect(), Vec::new())
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, header: &str) -> bool {
        self.index.contains_key(header)
    }

    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().enumerate().map(move |(i, cells)| Row {
            sheet: self,
            position: i,
            cells,
        })
    }

    /// Raw column access, used by staging
    pub fn column(&self, header: &str) -> Option<impl Iterator<Item = &CellValue>> {
        let idx = *self.index.get(header)?;
        Some(
            self.rows
                .iter()
                .map(move |r| r.get(idx).unwrap_or(&EMPTY_CELL)),
        )
    }

    /// Drop rows where every cell is blank
    pub fn without_blank_rows(mut self) -> Self {
        self.rows.retain(|r| r.iter().any(|c| !c.is_blank()));
        self
    }

    /// Keep only rows matching the predicate
    pub fn retain_rows<F>(mut self, mut keep: F) -> Self
    where
        F: FnMut(&Row<'_>) -> bool,
    {
        let kept: Vec<bool> = self.rows().map(|row| keep(&row)).collect();
        let mut flags = kept.into_iter();
        self.rows.retain(|_| flags.next().unwrap_or(false));
        self
    }
}

/// Borrowed view of one data row with access by header text.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    sheet: &'a Sheet,
    position: usize,
    cells: &'a [CellValue],
}

impl<'a> Row<'a> {
    /// Cell under `header`; missing columns read as Empty
    pub fn get(&self, header: &str) -> &'a CellValue {
        self.sheet
            .index
            .get(header)
            .and_then(|i| self.cells.get(*i))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Line in the source sheet (header is line 1)
    pub fn line_number(&self) -> usize {
        self.position + 2
    }
}

// ============================================================================
// WORKBOOK
// ============================================================================

#[derive(Debug, Clone)]
pub struct Workbook {
    path: PathBuf,
    format: SourceFormat,
}

impl Workbook {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ImportError::SourceUnreadable {
                path: path.to_path_buf(),
                reason: "file not found".to_string(),
            });
        }
        let format = SourceFormat::from_path(path).ok_or_else(|| ImportError::SourceUnreadable {
            path: path.to_path_buf(),
            reason: "unsupported format; expected .ods, .xlsx, .xls, .xlsb or .csv".to_string(),
        })?;
        Ok(Workbook {
            path: path.to_path_buf(),
            format,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    pub fn size_mb(&self) -> f64 {
        std::fs::metadata(&self.path)
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }

    pub fn sheet_names(&self) -> Result<Vec<String>> {
        if self.format == SourceFormat::Csv {
            return Ok(vec![self.csv_sheet_name()]);
        }
        let workbook = open_workbook_auto(&self.path).map_err(|e| self.unreadable(e))?;
        Ok(workbook.sheet_names().to_vec())
    }

    pub fn read_sheet(&self, name: &str) -> Result<Sheet> {
        if self.format == SourceFormat::Csv {
            return self.read_csv();
        }
        let mut workbook = open_workbook_auto(&self.path).map_err(|e| self.unreadable(e))?;
        let range = workbook.worksheet_range(name)?;

        let mut rows = range.rows();
        let headers: Vec<String> = match rows.next() {
            Some(header_row) => header_row
                .iter()
                .map(|c| cell_from_data(c).to_text().unwrap_or_default())
                .collect(),
            None => Vec::new(),
        };
        let data: Vec<Vec<CellValue>> = rows
            .map(|r| r.iter().map(cell_from_data).collect())
            .collect();

        debug!("Read sheet '{}': {} rows, {} columns", name, data.len(), headers.len());
        Ok(Sheet::new(name, headers, data))
    }

    /// Main locations sheet: by name first, then by column signature.
    pub fn read_main_sheet(&self, preferred_name: &str) -> Result<Sheet> {
        if self.format == SourceFormat::Csv {
            return self.read_csv();
        }
        let names = self.sheet_names()?;
        if names.iter().any(|n| n == preferred_name) {
            return self.read_sheet(preferred_name);
        }
        info!(
            "Sheet '{}' not found in {:?}; looking for the locations sheet by columns",
            preferred_name, names
        );
        self.find_sheet_with_columns(MAIN_SHEET_SIGNATURE, None)?
            .ok_or_else(|| ImportError::SourceUnreadable {
                path: self.path.clone(),
                reason: format!("no sheet with columns {:?}", MAIN_SHEET_SIGNATURE),
            })
    }

    /// First sheet (other than `exclude`) whose header row holds every
    /// `required` column.
    pub fn find_sheet_with_columns(
        &self,
        required: &[&str],
        exclude: Option<&str>,
    ) -> Result<Option<Sheet>> {
        for name in self.sheet_names()? {
            if exclude == Some(name.as_str()) {
                continue;
            }
            let sheet = match self.read_sheet(&name) {
                Ok(sheet) => sheet,
                Err(e) => {
                    debug!("Skipping unreadable sheet '{}': {}", name, e);
                    continue;
                }
            };
            if sheet.missing_columns(required).is_empty() {
                return Ok(Some(sheet));
            }
        }
        Ok(None)
    }

    fn read_csv(&self) -> Result<Sheet> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| self.unreadable(e))?;

        let headers: Vec<String> = reader.headers()?.iter().map(|h| h.to_string()).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(CellValue::text).collect());
        }
        Ok(Sheet::new(self.csv_sheet_name(), headers, rows))
    }

    fn csv_sheet_name(&self) -> String {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sheet")
            .to_string()
    }

    fn unreadable(&self, err: impl std::fmt::Display) -> ImportError {
        ImportError::SourceUnreadable {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) => CellValue::text(s.clone()),
        Data::Bool(b) => CellValue::Bool(*b),
        // as_datetime honours the workbook's 1900/1904 epoch
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(value) if dt.is_datetime() => CellValue::Date(value.date()),
            _ => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::text(s.clone()),
        Data::Error(_) | Data::Empty => CellValue::Empty,
    }
}
