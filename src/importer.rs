// 🚚 Import Orchestrator
//
// One monthly extract in, one period of normalized data out:
//
//   validate period → stage (optional) → discover schema → rows → dual registrations
//
// Rows run in source order, each in its own transaction. A row that fails
// costs only itself; a run fails only on bad parameters, an unreadable
// source, a staging/schema timeout or a broken store.

use crate::associations::{self, AssociationCounts};
use crate::db::{begin_row_transaction, open_database};
use crate::entities::{Brand, Location, Provider};
use crate::error::{ImportError, Result};
use crate::parser::{parse_bool, parse_extract_name};
use crate::reconciliation::{reconcile, RelationshipTable};
use crate::schema::{scan_headers, CategoryMapping, LegacyBandMapping};
use crate::staging::{self, StagingOptions, StagingStats};
use crate::status::{ImportPhase, StatusStore};
use crate::temporal::{
    create_time_varying_record, get_or_create_affiliation, get_or_create_period, validate_period,
    LocationPeriodData,
};
use crate::workbook::{Row, Sheet, Workbook};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ============================================================================
// REQUEST / OPTIONS
// ============================================================================

/// Where the extract comes from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ImportSource {
    /// `mm_yyyy.<ext>` spreadsheet or CSV
    Spreadsheet(PathBuf),
    /// Parquet files produced by `staging::convert`
    Staged {
        main: PathBuf,
        relationship: PathBuf,
    },
}

impl ImportSource {
    pub fn path(&self) -> &Path {
        match self {
            ImportSource::Spreadsheet(path) => path,
            ImportSource::Staged { main, .. } => main,
        }
    }

    /// File name the period is named after. Staged files drop their
    /// `_main` suffix so `08_2025_main.parquet` still reads as 08/2025.
    pub fn extract_name(&self) -> String {
        match self {
            ImportSource::Spreadsheet(path) => file_name_of(path),
            ImportSource::Staged { main, .. } => {
                let name = file_name_of(main);
                match Path::new(&name).file_stem().and_then(|s| s.to_str()) {
                    Some(stem) if stem.ends_with("_main") => {
                        format!("{}.parquet", stem.trim_end_matches("_main"))
                    }
                    _ => name,
                }
            }
        }
    }

    fn size_mb(&self) -> f64 {
        std::fs::metadata(self.path())
            .map(|m| m.len() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRequest {
    pub source: ImportSource,
    /// Explicit period; overrides the file name when given
    pub year: Option<i32>,
    pub month: Option<u32>,
    /// Some(true): care homes only, Some(false): everything else
    pub care_home_filter: Option<bool>,
    /// Convert spreadsheets to Parquet before reading them
    pub use_staging: bool,
}

impl ImportRequest {
    pub fn spreadsheet(path: impl Into<PathBuf>) -> Self {
        ImportRequest {
            source: ImportSource::Spreadsheet(path.into()),
            year: None,
            month: None,
            care_home_filter: None,
            use_staging: true,
        }
    }

    pub fn staged(main: impl Into<PathBuf>, relationship: impl Into<PathBuf>) -> Self {
        ImportRequest {
            source: ImportSource::Staged {
                main: main.into(),
                relationship: relationship.into(),
            },
            year: None,
            month: None,
            care_home_filter: None,
            use_staging: false,
        }
    }

    pub fn with_period(mut self, year: i32, month: u32) -> Self {
        self.year = Some(year);
        self.month = Some(month);
        self
    }

    pub fn with_care_home_filter(mut self, filter: Option<bool>) -> Self {
        self.care_home_filter = filter;
        self
    }

    /// (year, month) for this run, validated
    pub fn period(&self) -> Result<(i32, u32)> {
        let name = self.source.extract_name();
        let from_name = parse_extract_name(&name);
        let year = self.year.or(from_name.map(|(_, y)| y));
        let month = self.month.or(from_name.map(|(m, _)| m));

        match (year, month) {
            (Some(year), Some(month)) => {
                validate_period(year, month)?;
                Ok((year, month))
            }
            _ => Err(ImportError::InvalidParameter(format!(
                "cannot determine period: '{}' is not named mm_yyyy and no year/month given",
                name
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub staging: StagingOptions,
    pub schema_timeout: Duration,
    /// Rows between progress reports
    pub progress_interval: usize,
    pub legacy_band_mapping: LegacyBandMapping,
}

// ============================================================================
// RESULTS
// ============================================================================

/// What happened to one main-sheet row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Imported,
    Skipped(String),
    Failed(String),
}

/// Writes one row made, counted only once its transaction commits
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct RowChanges {
    provider_created: bool,
    location_created: bool,
    brand_created: bool,
    affiliation_created: bool,
    period_data_created: bool,
    associations: AssociationCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportStats {
    pub run_id: String,
    pub file_name: String,
    pub year: i32,
    pub month: u32,
    pub period_id: i64,

    pub periods_created: usize,
    pub providers_created: usize,
    pub locations_created: usize,
    pub brands_created: usize,
    pub provider_brands_created: usize,
    pub location_period_data_created: usize,
    pub definitions_created: usize,
    pub associations_created: AssociationCounts,
    pub dual_registrations_processed: usize,
    pub dual_registration_links_created: usize,

    pub rows_total: usize,
    pub rows_imported: usize,
    pub rows_skipped: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,

    pub records_processed: usize,
    pub import_time_seconds: f64,
    pub records_per_second: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging: Option<StagingStats>,
}

impl ImportStats {
    fn absorb(&mut self, changes: &RowChanges) {
        self.providers_created += changes.provider_created as usize;
        self.locations_created += changes.location_created as usize;
        self.brands_created += changes.brand_created as usize;
        self.provider_brands_created += changes.affiliation_created as usize;
        self.location_period_data_created += changes.period_data_created as usize;
        self.associations_created.merge(changes.associations);
    }

    fn record(&mut self, line: usize, outcome: RowOutcome) {
        match outcome {
            RowOutcome::Imported => self.rows_imported += 1,
            RowOutcome::Skipped(reason) => {
                debug!("Row {} skipped: {}", line, reason);
                self.rows_skipped += 1;
            }
            RowOutcome::Failed(message) => {
                let message = format!("Row {}: {}", line, message);
                error!("❌ {}", message);
                self.errors.push(message);
                self.rows_failed += 1;
            }
        }
    }
}

/// Sheets an import reads, whatever their origin
struct LoadedExtract {
    main: Sheet,
    relationship: RelationshipTable,
    source_sha256: Option<String>,
    staging: Option<StagingStats>,
}

// ============================================================================
// IMPORTER
// ============================================================================

pub struct Importer<'a> {
    conn: &'a Connection,
    options: ImportOptions,
    status: Arc<dyn StatusStore>,
}

impl<'a> Importer<'a> {
    pub fn new(conn: &'a Connection, options: ImportOptions, status: Arc<dyn StatusStore>) -> Self {
        Importer {
            conn,
            options,
            status,
        }
    }

    /// Register a new run with the status store and return its id
    pub fn begin(&self, request: &ImportRequest) -> String {
        begin_run(self.status.as_ref(), request)
    }

    /// Import under a fresh run id
    pub fn run(&self, request: &ImportRequest) -> Result<ImportStats> {
        let run_id = self.begin(request);
        self.run_as(&run_id, request)
    }

    /// Import under a run id from `begin`. Failures are written to the
    /// status store before being returned.
    pub fn run_as(&self, run_id: &str, request: &ImportRequest) -> Result<ImportStats> {
        match self.execute(run_id, request) {
            Ok(stats) => {
                let summary = serde_json::to_value(&stats)?;
                self.report(|s| s.complete(run_id, summary));
                Ok(stats)
            }
            Err(e) => {
                error!("Import failed: {}", e);
                self.report(|s| s.fail(run_id, &e));
                Err(e)
            }
        }
    }

    fn execute(&self, run_id: &str, request: &ImportRequest) -> Result<ImportStats> {
        let started = Instant::now();
        let (year, month) = request.period()?;
        let file_name = request.source.extract_name();
        info!("📥 Importing {} as {}-{:02}", file_name, year, month);

        let mut stats = ImportStats {
            run_id: run_id.to_string(),
            file_name: file_name.clone(),
            year,
            month,
            ..ImportStats::default()
        };

        // Staging conversion
        self.phase(run_id, ImportPhase::StagingConversion, "Reading extract", 5);
        let extract = self.load(request)?;
        stats.staging = extract.staging.clone();
        self.complete_phase(run_id, ImportPhase::StagingConversion);

        let period = get_or_create_period(
            self.conn,
            year,
            month,
            &file_name,
            extract.source_sha256.as_deref(),
        )?;
        stats.periods_created = period.was_created() as usize;
        let period_id = period.value().period_id;
        stats.period_id = period_id;

        // Schema discovery
        self.phase(run_id, ImportPhase::SchemaDiscovery, "Discovering categorical columns", 20);
        let mapping = scan_headers(
            self.conn,
            extract.main.headers(),
            &self.options.legacy_band_mapping,
            self.options.schema_timeout,
        )?;
        stats.definitions_created = mapping.definitions_created();
        self.complete_phase(run_id, ImportPhase::SchemaDiscovery);

        // Rows
        let main = apply_care_home_filter(extract.main.without_blank_rows(), request.care_home_filter);
        self.import_rows(run_id, &main, period_id, &mapping, &mut stats)?;

        // Dual registrations
        self.phase(
            run_id,
            ImportPhase::RelationshipReconciliation,
            "Processing dual registrations",
            92,
        );
        let outcome = reconcile(self.conn, &extract.relationship, period_id)?;
        stats.dual_registrations_processed = outcome.pairs_processed;
        stats.dual_registration_links_created = outcome.links_created;
        stats.errors.extend(outcome.errors);
        self.complete_phase(run_id, ImportPhase::RelationshipReconciliation);

        stats.import_time_seconds = started.elapsed().as_secs_f64();
        stats.records_per_second = if stats.import_time_seconds > 0.0 {
            stats.records_processed as f64 / stats.import_time_seconds
        } else {
            0.0
        };

        info!(
            "✅ Import complete: {} rows imported, {} skipped, {} failed in {:.1}s ({:.1} rec/sec)",
            stats.rows_imported,
            stats.rows_skipped,
            stats.rows_failed,
            stats.import_time_seconds,
            stats.records_per_second
        );
        if !stats.errors.is_empty() {
            warn!("⚠️  Errors encountered: {}", stats.errors.len());
        }
        Ok(stats)
    }

    fn load(&self, request: &ImportRequest) -> Result<LoadedExtract> {
        match &request.source {
            ImportSource::Spreadsheet(path) if request.use_staging => {
                let staged = staging::convert(path, &self.options.staging)?;
                Ok(LoadedExtract {
                    main: staging::load_main_sheet(&staged.main_path)?,
                    relationship: staging::load_relationship_table(&staged.relationship_path),
                    source_sha256: Some(staged.source_sha256),
                    staging: Some(staged.stats),
                })
            }
            ImportSource::Spreadsheet(path) => {
                let workbook = Workbook::open(path)?;
                let main = staging::read_main_sheet_within(&workbook, &self.options.staging)?;
                let relationship = staging::locate_relationships_within(
                    &workbook,
                    &main.name,
                    &self.options.staging,
                );
                Ok(LoadedExtract {
                    main,
                    relationship,
                    source_sha256: Some(staging::file_sha256(path)?),
                    staging: None,
                })
            }
            ImportSource::Staged { main, relationship } => {
                if !main.exists() {
                    return Err(ImportError::SourceUnreadable {
                        path: main.clone(),
                        reason: "staged main file not found".to_string(),
                    });
                }
                Ok(LoadedExtract {
                    main: staging::load_main_sheet(main)?,
                    relationship: staging::load_relationship_table(relationship),
                    source_sha256: None,
                    staging: None,
                })
            }
        }
    }

    fn import_rows(
        &self,
        run_id: &str,
        sheet: &Sheet,
        period_id: i64,
        mapping: &CategoryMapping,
        stats: &mut ImportStats,
    ) -> Result<()> {
        let total = sheet.len();
        stats.rows_total = total;
        self.phase(
            run_id,
            ImportPhase::RowProcessing,
            &format!("Processing {} records", total),
            25,
        );

        let started = Instant::now();
        let interval = self.options.progress_interval.max(1);

        for row in sheet.rows() {
            let tx = begin_row_transaction(self.conn)?;
            let outcome = match import_row(&tx, &row, period_id, mapping) {
                Ok((RowOutcome::Imported, changes)) => {
                    tx.commit()?;
                    stats.absorb(&changes);
                    RowOutcome::Imported
                }
                Ok((outcome, _)) => {
                    tx.rollback()?;
                    outcome
                }
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => {
                    tx.rollback()?;
                    RowOutcome::Failed(e.to_string())
                }
            };
            stats.record(row.line_number(), outcome);
            stats.records_processed += 1;

            let done = stats.records_processed;
            if done % interval == 0 || done == total {
                let rate = done as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
                info!("   📝 Processed {}/{} records ({:.1} rec/sec)", done, total, rate);
                let progress = 25 + (done * 65 / total.max(1)) as u8;
                self.phase(
                    run_id,
                    ImportPhase::RowProcessing,
                    &format!("Processed {}/{} records", done, total),
                    progress,
                );
            }
        }

        self.complete_phase(run_id, ImportPhase::RowProcessing);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Status reporting is best effort: a status write never fails an import
    // ------------------------------------------------------------------------

    fn report(&self, update: impl FnOnce(&dyn StatusStore) -> Result<()>) {
        if let Err(e) = update(self.status.as_ref()) {
            warn!("Could not update import status: {}", e);
        }
    }

    fn phase(&self, run_id: &str, phase: ImportPhase, step: &str, progress: u8) {
        self.report(|s| s.update_phase(run_id, phase, step, Some(progress)));
    }

    fn complete_phase(&self, run_id: &str, phase: ImportPhase) {
        self.report(|s| s.complete_phase(run_id, phase));
    }
}

fn begin_run(status: &dyn StatusStore, request: &ImportRequest) -> String {
    match status.start(&request.source.extract_name(), request.source.size_mb()) {
        Ok(run_id) => run_id,
        Err(e) => {
            warn!("Could not record import start: {}", e);
            uuid::Uuid::new_v4().to_string()
        }
    }
}

/// Keep care homes, non-care homes, or everything
fn apply_care_home_filter(sheet: Sheet, filter: Option<bool>) -> Sheet {
    match filter {
        None => sheet,
        Some(care_homes) => {
            let filtered =
                sheet.retain_rows(|row| (parse_bool(row.get("Care home?")) == Some(true)) == care_homes);
            info!(
                "Filtered to {} {} records",
                filtered.len(),
                if care_homes { "care home" } else { "non-care home" }
            );
            filtered
        }
    }
}

/// Provider → brand → location → period data → associations for one row
fn import_row(
    conn: &Connection,
    row: &Row<'_>,
    period_id: i64,
    mapping: &CategoryMapping,
) -> Result<(RowOutcome, RowChanges)> {
    let mut changes = RowChanges::default();

    let Some(provider) = Provider::from_row(row) else {
        return Ok((RowOutcome::Skipped("no Provider ID".to_string()), changes));
    };
    let provider = Provider::resolve(conn, provider)?;
    changes.provider_created = provider.was_created();
    let provider_id = provider.into_inner().provider_id;

    if let Some(brand) = Brand::from_row(row) {
        let brand = Brand::resolve(conn, brand)?;
        changes.brand_created = brand.was_created();
        changes.affiliation_created =
            get_or_create_affiliation(conn, &provider_id, &brand.value().brand_id, period_id)?;
    }

    let Some(location) = Location::from_row(row, &provider_id) else {
        return Ok((RowOutcome::Skipped("no Location ID".to_string()), changes));
    };
    let location = Location::resolve(conn, location)?;
    changes.location_created = location.was_created();
    let location_id = location.into_inner().location_id;

    let period_data =
        create_time_varying_record(conn, &location_id, period_id, LocationPeriodData::from_row(row))?;
    changes.period_data_created = period_data.was_created();

    changes.associations = associations::materialize(conn, row, mapping, &location_id, period_id)?;

    Ok((RowOutcome::Imported, changes))
}

// ============================================================================
// DETACHED RUNS
// ============================================================================

/// A run executing on its own thread
pub struct ImportHandle {
    pub run_id: String,
    handle: JoinHandle<Result<ImportStats>>,
}

impl ImportHandle {
    pub fn join(self) -> Result<ImportStats> {
        self.handle
            .join()
            .map_err(|_| ImportError::Status(format!("import worker for run {} panicked", self.run_id)))?
    }
}

/// Start an import on a worker thread with its own connection.
///
/// The run id is registered before the thread starts, so the caller can poll
/// the status store immediately.
pub fn spawn_import(
    db_path: PathBuf,
    busy_timeout: Duration,
    options: ImportOptions,
    request: ImportRequest,
    status: Arc<dyn StatusStore>,
) -> Result<ImportHandle> {
    validate_request(&request)?;
    let run_id = begin_run(status.as_ref(), &request);
    let worker_run_id = run_id.clone();

    let handle = thread::Builder::new()
        .name(format!("import-{}", &run_id[..8.min(run_id.len())]))
        .spawn(move || {
            let conn = match open_database(&db_path, busy_timeout) {
                Ok(conn) => conn,
                Err(e) => {
                    if let Err(status_err) = status.fail(&worker_run_id, &e) {
                        warn!("Could not update import status: {}", status_err);
                    }
                    return Err(e);
                }
            };
            let importer = Importer::new(&conn, options, status);
            importer.run_as(&worker_run_id, &request)
        })?;

    Ok(ImportHandle { run_id, handle })
}

/// Parameter checks that do not need the store
pub fn validate_request(request: &ImportRequest) -> Result<()> {
    request.period().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::{setup_database, table_counts};
    use crate::error::FailureKind;
    use crate::parser::CellValue;
    use crate::status::{MemoryStatusStore, RunState};

    fn options(dir: &Path) -> ImportOptions {
        let mut config = Config::default();
        config.staging_dir = dir.to_path_buf();
        config.import_options()
    }

    fn store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn write_csv(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    const EXTRACT: &str = "\
Location ID,Provider ID,Location Name,Provider Name,Care home?,Brand ID,Brand Name,Regulated activity - Personal care,Service type - Care home service without nursing
1-101,1-100,Oak House,Oak Care Ltd,Y,BD1,Oak Group,Y,Y
1-102,1-100,Elm House,Oak Care Ltd,N,-,-,N,
,1-100,No Id House,Oak Care Ltd,Y,-,-,Y,Y
1-201,,Orphan House,,Y,-,-,Y,Y
";

    #[test]
    fn test_period_from_name_and_override() {
        let request = ImportRequest::spreadsheet("/tmp/08_2025.ods");
        assert_eq!(request.period().unwrap(), (2025, 8));

        let request = ImportRequest::spreadsheet("/tmp/08_2025.ods").with_period(2024, 3);
        assert_eq!(request.period().unwrap(), (2024, 3));

        let request = ImportRequest::staged("/tmp/06_2024_main.parquet", "/tmp/06_2024_dual.parquet");
        assert_eq!(request.source.extract_name(), "06_2024.parquet");
        assert_eq!(request.period().unwrap(), (2024, 6));

        let err = ImportRequest::spreadsheet("/tmp/latest.xlsx").period().unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Parameter);
    }

    #[test]
    fn test_invalid_period_fails_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let conn = store();
        let status = Arc::new(MemoryStatusStore::new());
        let importer = Importer::new(&conn, options(dir.path()), status.clone());

        // The file does not exist: the parameter check must fire first
        for (year, month) in [(2031, 8), (2025, 13)] {
            let request = ImportRequest::spreadsheet(dir.path().join("missing.csv"))
                .with_period(year, month);
            let run_id = importer.begin(&request);
            let err = importer.run_as(&run_id, &request).unwrap_err();
            assert!(matches!(err, ImportError::InvalidParameter(_)));

            let record = status.get(&run_id).unwrap().unwrap();
            assert_eq!(record.state, RunState::Failed);
            assert_eq!(record.failure_kind, Some(FailureKind::Parameter));
        }
        assert_eq!(table_counts(&conn).unwrap().periods, 0);
    }

    #[test]
    fn test_rows_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "08_2025.csv", EXTRACT);
        let conn = store();
        let importer = Importer::new(&conn, options(dir.path()), Arc::new(MemoryStatusStore::new()));

        let stats = importer.run(&ImportRequest::spreadsheet(&path)).unwrap();
        assert_eq!(stats.rows_total, 4);
        assert_eq!(stats.rows_imported, 2);
        assert_eq!(stats.rows_skipped, 2);
        assert_eq!(stats.rows_failed, 0);
        assert_eq!(stats.providers_created, 1);
        assert_eq!(stats.locations_created, 2);
        assert_eq!(stats.brands_created, 1);
        assert_eq!(stats.provider_brands_created, 1);
        assert_eq!(stats.associations_created.total(), 2);
        assert_eq!(stats.dual_registrations_processed, 0);
        assert!(stats.staging.is_some());

        // Skipped row's writes are rolled back with it
        let counts = table_counts(&conn).unwrap();
        assert_eq!(counts.providers, 1);
        assert_eq!(counts.locations, 2);
    }

    #[test]
    fn test_direct_read_is_time_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut body = String::from("Location ID,Provider ID,Location Name,Provider Name\n");
        for i in 0..20_000 {
            body.push_str(&format!("1-{},1-100,House {},Oak Care Ltd\n", i, i));
        }
        let path = write_csv(dir.path(), "08_2025.csv", &body);

        let conn = store();
        let status = Arc::new(MemoryStatusStore::new());
        let mut options = options(dir.path());
        options.staging.xlsx_timeout = Duration::ZERO;
        let importer = Importer::new(&conn, options, status.clone());

        let mut request = ImportRequest::spreadsheet(&path);
        request.use_staging = false;
        let run_id = importer.begin(&request);
        let err = importer.run_as(&run_id, &request).unwrap_err();
        assert!(matches!(err, ImportError::StagingTimeout { .. }));
        assert_eq!(err.failure_kind(), FailureKind::Timeout);

        let record = status.get(&run_id).unwrap().unwrap();
        assert_eq!(record.state, RunState::Failed);
        assert_eq!(record.failure_kind, Some(FailureKind::Timeout));
        assert_eq!(table_counts(&conn).unwrap().locations, 0);
    }

    #[test]
    fn test_care_home_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "08_2025.csv", EXTRACT);
        let conn = store();
        let importer = Importer::new(&conn, options(dir.path()), Arc::new(MemoryStatusStore::new()));

        let request = ImportRequest::spreadsheet(&path).with_care_home_filter(Some(false));
        let stats = importer.run(&request).unwrap();
        assert_eq!(stats.rows_total, 1);
        assert_eq!(stats.rows_imported, 1);
        assert_eq!(stats.brands_created, 0);

        let sheet = Sheet::new(
            "main",
            vec!["Care home?".to_string()],
            vec![vec![CellValue::text("Y")], vec![CellValue::text("N")], vec![CellValue::Empty]],
        );
        assert_eq!(apply_care_home_filter(sheet.clone(), Some(true)).len(), 1);
        assert_eq!(apply_care_home_filter(sheet.clone(), Some(false)).len(), 2);
        assert_eq!(apply_care_home_filter(sheet, None).len(), 3);
    }

    #[test]
    fn test_status_follows_phases() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "08_2025.csv", EXTRACT);
        let conn = store();
        let status = Arc::new(MemoryStatusStore::new());
        let importer = Importer::new(&conn, options(dir.path()), status.clone());

        let request = ImportRequest::spreadsheet(&path);
        let run_id = importer.begin(&request);
        importer.run_as(&run_id, &request).unwrap();

        let record = status.get(&run_id).unwrap().unwrap();
        assert_eq!(record.state, RunState::Completed);
        assert_eq!(record.phase, ImportPhase::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.file_type, "CSV");
        let stats = record.stats.unwrap();
        assert_eq!(stats["rows_imported"], 2);
    }

    #[test]
    fn test_missing_source_fails_run() {
        let dir = tempfile::tempdir().unwrap();
        let conn = store();
        let status = Arc::new(MemoryStatusStore::new());
        let importer = Importer::new(&conn, options(dir.path()), status.clone());

        let request = ImportRequest::spreadsheet(dir.path().join("08_2025.xlsx"));
        let run_id = importer.begin(&request);
        let err = importer.run_as(&run_id, &request).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Source);
        assert_eq!(status.get(&run_id).unwrap().unwrap().state, RunState::Failed);
    }

    #[test]
    fn test_spawned_import_uses_own_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_csv(dir.path(), "09_2025.csv", EXTRACT);
        let db_path = dir.path().join("cqc.db");
        let status = Arc::new(MemoryStatusStore::new());

        let handle = spawn_import(
            db_path.clone(),
            Duration::from_secs(5),
            options(dir.path()),
            ImportRequest::spreadsheet(&path),
            status.clone(),
        )
        .unwrap();
        let run_id = handle.run_id.clone();
        let stats = handle.join().unwrap();
        assert_eq!(stats.run_id, run_id);
        assert_eq!(stats.rows_imported, 2);

        let conn = open_database(&db_path, Duration::from_secs(5)).unwrap();
        assert_eq!(table_counts(&conn).unwrap().locations, 2);
        assert_eq!(status.get(&run_id).unwrap().unwrap().state, RunState::Completed);
    }
}
