// End-to-end imports: spreadsheet and staged sources into a fresh store

use chrono::NaiveDate;
use cqc_import::reconciliation::{links_for_period, RELATIONSHIP_COLUMNS};
use cqc_import::staging::write_sheet;
use cqc_import::temporal::list_periods;
use cqc_import::{
    open_database, table_counts, CellValue, Config, FailureKind, ImportError, ImportRequest,
    ImportStats, Importer, MemoryStatusStore, Sheet,
};
use rusqlite::types::Value;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const HEADERS: &[&str] = &[
    "Location ID",
    "Provider ID",
    "Location Name",
    "Provider Name",
    "Location HSCA start date",
    "Location Postal Code",
    "Location Telephone Number",
    "Location Latitude",
    "Care home?",
    "Care homes beds",
    "Publication Date",
    "Brand ID",
    "Brand Name",
    "Regulated activity - Personal care",
    "Service user band - Dementia",
];

const CSV_EXTRACT: &str = "\
Location ID,Provider ID,Location Name,Provider Name,Location HSCA start date,Location Postal Code,Location Telephone Number,Location Latitude,Care home?,Care homes beds,Publication Date,Brand ID,Brand Name,Regulated activity - Personal care,Service user band - Dementia
L1,P1,Oak House,Oak Care Ltd,01/08/2025,SW1A 1AA,2071234567,51.5,Y,40,1 August 2025,BD1,Oak Group,Y,Y
L2,P1,Oak House Nursing,Oak Care Ltd,2025-08-01,007,-,*,N,-,not a date,BD1,Oak Group,N,
";

fn config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.database_path = dir.join("cqc.db");
    config.staging_dir = dir.join("staging");
    config.status_dir = dir.join("status");
    config
}

fn open(config: &Config) -> Connection {
    open_database(&config.database_path, Duration::from_secs(5)).unwrap()
}

fn run(conn: &Connection, config: &Config, request: &ImportRequest) -> Result<ImportStats, ImportError> {
    Importer::new(conn, config.import_options(), Arc::new(MemoryStatusStore::new())).run(request)
}

fn csv_extract(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("08_2025.csv");
    std::fs::write(&path, CSV_EXTRACT).unwrap();
    path
}

/// The CSV extract with the typed cells a spreadsheet reader would produce
fn typed_main_sheet() -> Sheet {
    let aug_first = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
    Sheet::new(
        "HSCA_Active_Locations",
        HEADERS.iter().map(|h| h.to_string()).collect(),
        vec![
            vec![
                CellValue::text("L1"),
                CellValue::text("P1"),
                CellValue::text("Oak House"),
                CellValue::text("Oak Care Ltd"),
                CellValue::Date(aug_first),
                CellValue::text("SW1A 1AA"),
                CellValue::Number(2071234567.0),
                CellValue::Number(51.5),
                CellValue::Bool(true),
                CellValue::Number(40.0),
                CellValue::Number(45870.0),
                CellValue::text("BD1"),
                CellValue::text("Oak Group"),
                CellValue::text("Y"),
                CellValue::Bool(true),
            ],
            vec![
                CellValue::text("L2"),
                CellValue::text("P1"),
                CellValue::text("Oak House Nursing"),
                CellValue::text("Oak Care Ltd"),
                CellValue::text("2025-08-01"),
                CellValue::text("007"),
                CellValue::text("-"),
                CellValue::text("*"),
                CellValue::Bool(false),
                CellValue::text("-"),
                CellValue::text("not a date"),
                CellValue::text("BD1"),
                CellValue::text("Oak Group"),
                CellValue::text("N"),
                CellValue::Empty,
            ],
        ],
    )
}

fn relationship_sheet(headers: &[&str], rows: Vec<Vec<&str>>) -> Sheet {
    Sheet::new(
        "Dual_Registrations",
        headers.iter().map(|h| h.to_string()).collect(),
        rows.into_iter()
            .map(|r| r.into_iter().map(CellValue::text).collect())
            .collect(),
    )
}

fn stage(dir: &TempDir, relationships: &Sheet) -> ImportRequest {
    let main = dir.path().join("08_2025_main.parquet");
    let dual = dir.path().join("08_2025_dual.parquet");
    write_sheet(&typed_main_sheet(), &main).unwrap();
    write_sheet(relationships, &dual).unwrap();
    ImportRequest::staged(main, dual)
}

fn no_relationships() -> Sheet {
    Sheet::empty("Dual_Registrations", RELATIONSHIP_COLUMNS)
}

/// Every row of the tables a period writes, in a comparable form
fn dump(conn: &Connection) -> Vec<String> {
    let queries = [
        "SELECT * FROM providers ORDER BY provider_id",
        "SELECT * FROM locations ORDER BY location_id",
        "SELECT * FROM brands ORDER BY brand_id",
        "SELECT location_id, is_dormant, is_care_home, registered_manager, care_homes_beds,
                latest_overall_rating, publication_date, is_inherited_rating
         FROM location_period_data ORDER BY location_id",
        "SELECT lc.location_id, cd.kind, cd.name FROM location_categories lc
         JOIN categorical_definitions cd ON cd.definition_id = lc.definition_id
         ORDER BY 1, 2, 3",
        "SELECT provider_id, brand_id FROM provider_brands ORDER BY 1, 2",
    ];

    let mut rows = Vec::new();
    for sql in queries {
        let mut stmt = conn.prepare(sql).unwrap();
        // Insert timestamps differ between stores
        let columns: Vec<usize> = stmt
            .column_names()
            .iter()
            .enumerate()
            .filter(|(_, name)| **name != "created_at")
            .map(|(i, _)| i)
            .collect();
        let mut result = stmt.query([]).unwrap();
        while let Some(row) = result.next().unwrap() {
            let values: Vec<Value> = columns.iter().map(|&i| row.get(i).unwrap()).collect();
            rows.push(format!("{:?}", values));
        }
    }
    rows
}

#[test]
fn test_reimport_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let conn = open(&config);
    let request = ImportRequest::spreadsheet(csv_extract(&dir));

    let first = run(&conn, &config, &request).unwrap();
    assert_eq!(first.rows_imported, 2);
    assert_eq!(first.providers_created, 1);
    assert_eq!(first.locations_created, 2);
    assert_eq!(first.brands_created, 1);
    assert_eq!(first.provider_brands_created, 1);
    assert_eq!(first.associations_created.total(), 2);
    let counts = table_counts(&conn).unwrap();
    let snapshot = dump(&conn);

    let second = run(&conn, &config, &request).unwrap();
    assert_eq!(second.rows_imported, 2);
    assert_eq!(second.periods_created, 0);
    assert_eq!(second.providers_created, 0);
    assert_eq!(second.locations_created, 0);
    assert_eq!(second.location_period_data_created, 0);
    assert_eq!(second.associations_created.total(), 0);
    assert_eq!(table_counts(&conn).unwrap(), counts);
    assert_eq!(dump(&conn), snapshot);
}

#[test]
fn test_parsed_values_reach_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let conn = open(&config);
    run(&conn, &config, &ImportRequest::spreadsheet(csv_extract(&dir))).unwrap();

    let (postal, phone, start): (String, String, NaiveDate) = conn
        .query_row(
            "SELECT postal_code, telephone_number, hsca_start_date FROM locations WHERE location_id = 'L1'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert_eq!(postal, "SW1A 1AA");
    assert_eq!(phone, "02071234567");
    assert_eq!(start, NaiveDate::from_ymd_opt(2025, 8, 1).unwrap());

    let postal: String = conn
        .query_row("SELECT postal_code FROM locations WHERE location_id = 'L2'", [], |r| r.get(0))
        .unwrap();
    assert_eq!(postal, "007");

    let (beds, published): (Option<i64>, Option<NaiveDate>) = conn
        .query_row(
            "SELECT care_homes_beds, publication_date FROM location_period_data WHERE location_id = 'L2'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .unwrap();
    assert_eq!(beds, None);
    assert_eq!(published, None);

    // Only the true flags left associations behind
    let flagged: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT location_id FROM location_categories ORDER BY location_id")
            .unwrap();
        let ids = stmt.query_map([], |r| r.get(0)).unwrap();
        ids.collect::<rusqlite::Result<Vec<String>>>().unwrap()
    };
    assert_eq!(flagged, vec!["L1", "L1"]);
}

#[test]
fn test_staged_and_direct_imports_agree() {
    let direct_dir = tempfile::tempdir().unwrap();
    let direct_config = config(direct_dir.path());
    let direct = open(&direct_config);
    let mut request = ImportRequest::spreadsheet(csv_extract(&direct_dir));
    request.use_staging = false;
    run(&direct, &direct_config, &request).unwrap();

    let staged_dir = tempfile::tempdir().unwrap();
    let staged_config = config(staged_dir.path());
    let staged = open(&staged_config);
    let stats = run(&staged, &staged_config, &stage(&staged_dir, &no_relationships())).unwrap();
    assert_eq!(stats.rows_imported, 2);

    assert_eq!(dump(&direct), dump(&staged));
    assert_eq!(table_counts(&direct).unwrap(), table_counts(&staged).unwrap());
}

#[test]
fn test_dual_registration_is_mirrored() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let conn = open(&config);
    let relationships = relationship_sheet(
        RELATIONSHIP_COLUMNS,
        vec![vec!["L1", "L2", "Dual registration", "01/04/2020", "Y"]],
    );
    let request = stage(&dir, &relationships);

    let stats = run(&conn, &config, &request).unwrap();
    assert_eq!(stats.dual_registrations_processed, 1);
    assert_eq!(stats.dual_registration_links_created, 2);

    let period_id = stats.period_id;
    let links = links_for_period(&conn, period_id).unwrap();
    assert_eq!(links.len(), 2);
    assert_eq!((links[0].location_id.as_str(), links[0].linked_location_id.as_str()), ("L1", "L2"));
    assert!(links[0].is_primary);
    assert_eq!((links[1].location_id.as_str(), links[1].linked_location_id.as_str()), ("L2", "L1"));
    assert!(!links[1].is_primary);

    let again = run(&conn, &config, &request).unwrap();
    assert_eq!(again.dual_registration_links_created, 0);
    assert_eq!(links_for_period(&conn, period_id).unwrap().len(), 2);
}

#[test]
fn test_malformed_relationship_sheet_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let conn = open(&config);
    let relationships = relationship_sheet(&["Something", "Else"], vec![vec!["L1", "L2"]]);

    let stats = run(&conn, &config, &stage(&dir, &relationships)).unwrap();
    assert_eq!(stats.rows_imported, 2);
    assert_eq!(stats.dual_registrations_processed, 0);
    assert_eq!(table_counts(&conn).unwrap().dual_registrations, 0);
}

#[test]
fn test_out_of_range_period_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let conn = open(&config);

    for (year, month) in [(2031, 8), (2025, 13)] {
        let request = stage(&dir, &no_relationships()).with_period(year, month);
        let err = run(&conn, &config, &request).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Parameter);
    }
    assert!(list_periods(&conn).unwrap().is_empty());
    assert_eq!(table_counts(&conn).unwrap().locations, 0);
}

#[test]
fn test_each_month_is_its_own_period() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let conn = open(&config);

    let august = stage(&dir, &no_relationships());
    let september = stage(&dir, &no_relationships()).with_period(2025, 9);
    run(&conn, &config, &august).unwrap();
    let stats = run(&conn, &config, &september).unwrap();

    // Static entities are shared, time-varying data is per period
    assert_eq!(stats.locations_created, 0);
    assert_eq!(stats.location_period_data_created, 2);
    let labels: Vec<String> = list_periods(&conn).unwrap().iter().map(|p| p.label()).collect();
    assert_eq!(labels, vec!["2025-08", "2025-09"]);
}
