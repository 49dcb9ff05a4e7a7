// 📦 Staging Accelerator - spreadsheet → Parquet, once
//
// Spreadsheet decoding (ODS especially) dominates import time. Staging reads
// the main and relationship sheets once and writes them as Parquet with every
// column as UTF-8 text. Imports from staged files see the same cells the
// parsers would have seen from the spreadsheet.
//
//   <stem>_main.parquet       main locations sheet
//   <stem>_dual.parquet       relationship sheet (possibly empty)
//   <stem>.manifest.json      source hash, lets a repeat run reuse the above

use crate::error::{ImportError, Result};
use crate::parser::CellValue;
use crate::reconciliation::{RelationshipTable, RELATIONSHIP_COLUMNS, RELATIONSHIP_REQUIRED};
use crate::workbook::{Sheet, SourceFormat, Workbook};
use chrono::{DateTime, Utc};
use polars::prelude::{
    Column, DataFrame, DataType, ParquetCompression, ParquetReader, ParquetWriter, SerReader,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Columns every staged main file must carry
pub const MAIN_REQUIRED: &[&str] = &["Location ID", "Provider ID", "Location Name"];

// ============================================================================
// OPTIONS / RESULTS
// ============================================================================

#[derive(Debug, Clone)]
pub struct StagingOptions {
    pub output_dir: PathBuf,
    pub main_sheet: String,
    pub ods_timeout: Duration,
    pub xlsx_timeout: Duration,
    pub relationship_timeout: Duration,
    /// Reuse staged files when the manifest hash matches the source
    pub reuse: bool,
}

impl StagingOptions {
    fn main_timeout(&self, format: SourceFormat) -> Duration {
        if format.is_slow() {
            self.ods_timeout
        } else {
            self.xlsx_timeout
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingStats {
    pub main_rows: usize,
    pub main_columns: usize,
    pub relationship_rows: usize,
    pub source_size_mb: f64,
    pub elapsed_secs: f64,
    pub reused: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedExtract {
    pub main_path: PathBuf,
    pub relationship_path: PathBuf,
    pub source_sha256: String,
    pub stats: StagingStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StagingManifest {
    source_file: String,
    source_sha256: String,
    main_path: PathBuf,
    relationship_path: PathBuf,
    main_rows: usize,
    main_columns: usize,
    relationship_rows: usize,
    created_at: DateTime<Utc>,
}

/// Rows, columns and size of one staged file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedInfo {
    pub rows: usize,
    pub columns: usize,
    pub column_names: Vec<String>,
    pub size_bytes: u64,
}

// ============================================================================
// CONVERSION
// ============================================================================

/// Hex SHA-256 of a file's contents
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Convert a source spreadsheet into staged Parquet files.
///
/// The main sheet must be read within the format's timeout or the run fails
/// with `StagingTimeout`. The relationship sheet is best effort: a timeout or
/// read problem produces an empty file with the expected columns.
pub fn convert(source: &Path, options: &StagingOptions) -> Result<StagedExtract> {
    let started = Instant::now();
    let workbook = Workbook::open(source)?;
    let format = workbook.format();
    let size_mb = workbook.size_mb();

    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("extract")
        .to_string();
    let main_path = options.output_dir.join(format!("{}_main.parquet", stem));
    let relationship_path = options.output_dir.join(format!("{}_dual.parquet", stem));
    let manifest_path = options.output_dir.join(format!("{}.manifest.json", stem));
    let source_sha256 = file_sha256(source)?;

    if options.reuse {
        if let Some(manifest) = read_manifest(&manifest_path, &source_sha256) {
            info!("♻️  Reusing staged files for {} (hash unchanged)", source.display());
            return Ok(StagedExtract {
                main_path: manifest.main_path,
                relationship_path: manifest.relationship_path,
                source_sha256,
                stats: StagingStats {
                    main_rows: manifest.main_rows,
                    main_columns: manifest.main_columns,
                    relationship_rows: manifest.relationship_rows,
                    source_size_mb: size_mb,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                    reused: true,
                },
            });
        }
    }

    std::fs::create_dir_all(&options.output_dir)?;
    info!("🔄 Converting {} file: {}", format.label(), source.display());
    info!("📏 File size: {:.1} MB", size_mb);
    warn_if_large(size_mb, format);

    let main = read_main_sheet_within(&workbook, options)?;
    write_sheet(&main, &main_path)?;
    info!(
        "✓ Main sheet staged: {} rows, {} columns",
        main.len(),
        main.headers().len()
    );

    let relationships = locate_relationships_within(&workbook, &main.name, options);
    let relationship_rows = match &relationships {
        RelationshipTable::Present(sheet) => {
            write_sheet(sheet, &relationship_path)?;
            sheet.len()
        }
        RelationshipTable::Absent(reason) => {
            warn!("⚠️  No relationship data ({}), creating empty Parquet file", reason);
            write_sheet(&Sheet::empty("relationships", RELATIONSHIP_COLUMNS), &relationship_path)?;
            0
        }
    };

    let stats = StagingStats {
        main_rows: main.len(),
        main_columns: main.headers().len(),
        relationship_rows,
        source_size_mb: size_mb,
        elapsed_secs: started.elapsed().as_secs_f64(),
        reused: false,
    };

    let manifest = StagingManifest {
        source_file: source.display().to_string(),
        source_sha256: source_sha256.clone(),
        main_path: main_path.clone(),
        relationship_path: relationship_path.clone(),
        main_rows: stats.main_rows,
        main_columns: stats.main_columns,
        relationship_rows,
        created_at: Utc::now(),
    };
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

    info!("✅ Staging completed in {:.1}s", stats.elapsed_secs);
    Ok(StagedExtract {
        main_path,
        relationship_path,
        source_sha256,
        stats,
    })
}

/// Main sheet, read under the format's hard timeout
pub(crate) fn read_main_sheet_within(workbook: &Workbook, options: &StagingOptions) -> Result<Sheet> {
    let timeout = options.main_timeout(workbook.format());
    let reader = workbook.clone();
    let main_sheet_name = options.main_sheet.clone();
    match run_with_timeout(timeout, move || reader.read_main_sheet(&main_sheet_name)) {
        Ok(sheet) => sheet,
        Err(RecvTimeoutError::Timeout) => Err(ImportError::StagingTimeout {
            path: workbook.path().to_path_buf(),
            seconds: timeout.as_secs(),
        }),
        Err(RecvTimeoutError::Disconnected) => Err(ImportError::Staging(
            "main sheet reader stopped without a result".to_string(),
        )),
    }
}

/// Relationship sheet, best effort: running out of time means Absent
pub(crate) fn locate_relationships_within(
    workbook: &Workbook,
    main_sheet: &str,
    options: &StagingOptions,
) -> RelationshipTable {
    let reader = workbook.clone();
    let exclude = main_sheet.to_string();
    match run_with_timeout(options.relationship_timeout, move || {
        RelationshipTable::locate(&reader, &exclude)
    }) {
        Ok(table) => table,
        Err(_) => {
            warn!(
                "⏱️  Relationship sheet reading timeout ({}s)",
                options.relationship_timeout.as_secs()
            );
            RelationshipTable::Absent("read timed out".to_string())
        }
    }
}

/// Run `task` on its own thread and wait at most `timeout` for it.
/// A timed-out task is left to finish in the background.
fn run_with_timeout<T, F>(timeout: Duration, task: F) -> std::result::Result<T, RecvTimeoutError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(task());
    });
    rx.recv_timeout(timeout)
}

fn read_manifest(path: &Path, source_sha256: &str) -> Option<StagingManifest> {
    let text = std::fs::read_to_string(path).ok()?;
    let manifest: StagingManifest = serde_json::from_str(&text).ok()?;
    let usable = manifest.source_sha256 == source_sha256
        && manifest.main_path.exists()
        && manifest.relationship_path.exists();
    usable.then_some(manifest)
}

fn warn_if_large(size_mb: f64, format: SourceFormat) {
    let slow = format.is_slow();
    if size_mb > 25.0 {
        let estimate = if slow { "30-40 minutes" } else { "15-25 minutes" };
        warn!(
            "⚠️  Large file detected ({:.1} MB) - processing may take {}",
            size_mb, estimate
        );
    } else if size_mb > 15.0 {
        let estimate = if slow { "15-25 minutes" } else { "8-15 minutes" };
        info!(
            "📊 Medium file size ({:.1} MB) - processing may take {}",
            size_mb, estimate
        );
    } else if size_mb > 5.0 {
        let estimate = if slow { "5-10 minutes" } else { "3-8 minutes" };
        info!(
            "📊 Processing {} file ({:.1} MB) - estimated time: {}",
            format.label(),
            size_mb,
            estimate
        );
    }
}

// ============================================================================
// PARQUET I/O
// ============================================================================

/// Write a sheet as all-text Parquet (Snappy).
///
/// Unnamed and repeated headers are not staged; row lookups only ever see
/// the first column of a given name.
pub fn write_sheet(sheet: &Sheet, path: &Path) -> Result<()> {
    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(sheet.headers().len());

    for header in sheet.headers() {
        if header.is_empty() || !seen.insert(header.as_str()) {
            continue;
        }
        let values: Vec<Option<String>> = match sheet.column(header) {
            Some(cells) => cells.map(CellValue::to_text).collect(),
            None => Vec::new(),
        };
        columns.push(Column::new(header.as_str().into(), values));
    }

    let mut df = DataFrame::new(columns)?;
    let mut file = File::create(path)?;
    ParquetWriter::new(&mut file)
        .with_compression(ParquetCompression::Snappy)
        .finish(&mut df)?;
    Ok(())
}

/// Read a staged Parquet file back into a sheet
pub fn read_sheet(path: &Path, name: &str) -> Result<Sheet> {
    let file = File::open(path).map_err(|e| ImportError::SourceUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let df = ParquetReader::new(file).finish()?;

    let headers: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let mut rows: Vec<Vec<CellValue>> = vec![Vec::with_capacity(headers.len()); df.height()];

    for column in df.get_columns() {
        let values = column.cast(&DataType::String)?;
        for (row, value) in rows.iter_mut().zip(values.str()?.iter()) {
            row.push(value.map(CellValue::text).unwrap_or_default());
        }
    }

    Ok(Sheet::new(name, headers, rows))
}

/// Main sheet from a staged file
pub fn load_main_sheet(path: &Path) -> Result<Sheet> {
    read_sheet(path, "main")
}

/// Relationship table from a staged file; any problem means Absent
pub fn load_relationship_table(path: &Path) -> RelationshipTable {
    match read_sheet(path, "relationships") {
        Ok(sheet) => RelationshipTable::from_sheet(sheet),
        Err(e) => RelationshipTable::Absent(format!("staged relationship file unreadable: {}", e)),
    }
}

// ============================================================================
// VALIDATION / INFO
// ============================================================================

/// Check staged files are readable and carry the required columns.
/// An empty relationship file is accepted as is.
pub fn validate_staged(main_path: &Path, relationship_path: &Path) -> Result<()> {
    let main = read_sheet(main_path, "main")?;
    let missing = main.missing_columns(MAIN_REQUIRED);
    if !missing.is_empty() {
        return Err(ImportError::Staging(format!(
            "main staged file missing required columns: {:?}",
            missing
        )));
    }

    let relationships = read_sheet(relationship_path, "relationships")?;
    if !relationships.is_empty() {
        let missing = relationships.missing_columns(RELATIONSHIP_REQUIRED);
        if !missing.is_empty() {
            return Err(ImportError::Staging(format!(
                "relationship staged file missing required columns: {:?}",
                missing
            )));
        }
    }

    info!("✓ Staged files validation passed");
    Ok(())
}

pub fn staged_info(path: &Path) -> Result<StagedInfo> {
    let sheet = read_sheet(path, "staged")?;
    Ok(StagedInfo {
        rows: sheet.len(),
        columns: sheet.headers().len(),
        column_names: sheet.headers().to_vec(),
        size_bytes: std::fs::metadata(path)?.len(),
    })
}
