// 🗄️ Relational Store - SQLite + WAL
//
// Identity tables (brands, providers, locations) are keyed by the extract's
// natural keys. Everything that varies month to month hangs off a period.

use crate::error::{ImportError, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Open (or create) the store and make sure the schema exists
pub fn open_database(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    setup_database(&conn)?;
    debug!("Opened store at {}", path.display());
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL for crash recovery and concurrent readers
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    // ==========================================================================
    // Identity tables (created once, never updated)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS brands (
            brand_id TEXT PRIMARY KEY,
            brand_name TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS providers (
            provider_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            hsca_start_date TEXT,
            companies_house_number TEXT,
            charity_number TEXT,
            type_sector TEXT,
            inspection_directorate TEXT,
            primary_inspection_category TEXT,
            ownership_type TEXT,
            telephone_number TEXT,
            web_address TEXT,
            street_address TEXT,
            address_line_2 TEXT,
            city TEXT,
            county TEXT,
            postal_code TEXT,
            paf_id TEXT,
            uprn_id TEXT,
            local_authority TEXT,
            region TEXT,
            nhs_region TEXT,
            latitude REAL,
            longitude REAL,
            parliamentary_constituency TEXT,
            nominated_individual_name TEXT,
            main_partner_name TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS locations (
            location_id TEXT PRIMARY KEY,
            provider_id TEXT NOT NULL REFERENCES providers(provider_id),
            name TEXT NOT NULL,
            hsca_start_date TEXT,
            ods_code TEXT,
            telephone_number TEXT,
            web_address TEXT,
            type_sector TEXT,
            inspection_directorate TEXT,
            primary_inspection_category TEXT,
            region TEXT,
            nhs_region TEXT,
            local_authority TEXT,
            onspd_ccg_code TEXT,
            onspd_ccg TEXT,
            commissioning_ccg_code TEXT,
            commissioning_ccg TEXT,
            street_address TEXT,
            address_line_2 TEXT,
            city TEXT,
            county TEXT,
            postal_code TEXT,
            paf_id TEXT,
            uprn_id TEXT,
            latitude REAL,
            longitude REAL,
            parliamentary_constituency TEXT,
            also_known_as TEXT,
            specialisms TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Periods and per-period facts
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS data_periods (
            period_id INTEGER PRIMARY KEY AUTOINCREMENT,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            file_name TEXT NOT NULL,
            file_sha256 TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (year, month)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS location_period_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            location_id TEXT NOT NULL REFERENCES locations(location_id),
            period_id INTEGER NOT NULL REFERENCES data_periods(period_id),
            is_dormant INTEGER,
            is_care_home INTEGER,
            registered_manager TEXT,
            care_homes_beds INTEGER,
            latest_overall_rating TEXT,
            publication_date TEXT,
            is_inherited_rating INTEGER,
            UNIQUE (location_id, period_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categorical_definitions (
            definition_id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (kind, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS location_categories (
            location_id TEXT NOT NULL REFERENCES locations(location_id),
            definition_id INTEGER NOT NULL REFERENCES categorical_definitions(definition_id),
            period_id INTEGER NOT NULL REFERENCES data_periods(period_id),
            PRIMARY KEY (location_id, definition_id, period_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS provider_brands (
            provider_id TEXT NOT NULL REFERENCES providers(provider_id),
            brand_id TEXT NOT NULL REFERENCES brands(brand_id),
            period_id INTEGER NOT NULL REFERENCES data_periods(period_id),
            PRIMARY KEY (provider_id, brand_id, period_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dual_registrations (
            location_id TEXT NOT NULL REFERENCES locations(location_id),
            linked_location_id TEXT NOT NULL REFERENCES locations(location_id),
            period_id INTEGER NOT NULL REFERENCES data_periods(period_id),
            relationship_type TEXT,
            relationship_start_date TEXT,
            is_primary INTEGER NOT NULL,
            PRIMARY KEY (location_id, linked_location_id, period_id)
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_locations_provider ON locations(provider_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_period_data_period ON location_period_data(period_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_categories_period ON location_categories(period_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_dual_period ON dual_registrations(period_id)",
        [],
    )?;

    Ok(())
}

/// True for UNIQUE / PRIMARY KEY conflicts, the signal for "someone else
/// created it first"
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Per-row write transaction.
///
/// IMMEDIATE takes the write lock (waiting up to the busy timeout) before the
/// first read, so a get-or-create never reads a snapshot older than another
/// writer's committed insert.
pub fn begin_row_transaction(conn: &Connection) -> Result<Transaction<'_>> {
    Ok(Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?)
}

// ============================================================================
// STORE STATISTICS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub brands: i64,
    pub providers: i64,
    pub locations: i64,
    pub periods: i64,
    pub location_period_records: i64,
    pub categorical_definitions: i64,
    pub location_categories: i64,
    pub provider_brands: i64,
    pub dual_registrations: i64,
}

/// Row counts for every table
pub fn table_counts(conn: &Connection) -> Result<StoreCounts> {
    let count = |table: &str| -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
            row.get(0)
        })
        .map_err(ImportError::from)
    };

    Ok(StoreCounts {
        brands: count("brands")?,
        providers: count("providers")?,
        locations: count("locations")?,
        periods: count("data_periods")?,
        location_period_records: count("location_period_data")?,
        categorical_definitions: count("categorical_definitions")?,
        location_categories: count("location_categories")?,
        provider_brands: count("provider_brands")?,
        dual_registrations: count("dual_registrations")?,
    })
}
