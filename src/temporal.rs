// ⏰ Period Snapshots - one extract = one (year, month) period
//
// Time is explicit: every fact that can change between extracts is stored
// against the period it was observed in, never by overwriting the entity.
//
//   data_periods           (year, month) unique
//   location_period_data   (location, period) unique
//   provider_brands        (provider, brand, period) unique

use crate::entities::{get_or_create, Resolved};
use crate::error::{ImportError, Result};
use crate::parser::{parse_bool, parse_date, parse_integer, parse_text, validate_date};
use crate::workbook::Row;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2030;

// ============================================================================
// PERIOD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub period_id: i64,
    pub year: i32,
    pub month: u32,
    pub file_name: String,
    /// SHA-256 of the source file, when known
    pub file_sha256: Option<String>,
}

impl Period {
    pub fn label(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }
}

/// Reject out-of-range periods before anything touches the store
pub fn validate_period(year: i32, month: u32) -> Result<()> {
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(ImportError::InvalidParameter(format!(
            "invalid year {}: must be between {} and {}",
            year, MIN_YEAR, MAX_YEAR
        )));
    }
    if !(1..=12).contains(&month) {
        return Err(ImportError::InvalidParameter(format!(
            "invalid month {}: must be between 1 and 12",
            month
        )));
    }
    Ok(())
}

fn period_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Period> {
    Ok(Period {
        period_id: row.get("period_id")?,
        year: row.get("year")?,
        month: row.get("month")?,
        file_name: row.get("file_name")?,
        file_sha256: row.get("file_sha256")?,
    })
}

pub fn find_period(conn: &Connection, year: i32, month: u32) -> Result<Option<Period>> {
    let period = conn
        .query_row(
            "SELECT period_id, year, month, file_name, file_sha256
             FROM data_periods WHERE year = ?1 AND month = ?2",
            params![year, month],
            period_from_row,
        )
        .optional()?;
    Ok(period)
}

/// Period for (year, month). An existing period keeps its original file name.
pub fn get_or_create_period(
    conn: &Connection,
    year: i32,
    month: u32,
    file_name: &str,
    file_sha256: Option<&str>,
) -> Result<Resolved<Period>> {
    validate_period(year, month)?;
    let key = format!("{}-{:02}", year, month);

    get_or_create(
        "period",
        &key,
        || find_period(conn, year, month),
        || {
            conn.execute(
                "INSERT INTO data_periods (year, month, file_name, file_sha256)
                 VALUES (?1, ?2, ?3, ?4)",
                params![year, month, file_name, file_sha256],
            )?;
            info!("Created data period: {}-{:02}", year, month);
            Ok(Period {
                period_id: conn.last_insert_rowid(),
                year,
                month,
                file_name: file_name.to_string(),
                file_sha256: file_sha256.map(str::to_string),
            })
        },
    )
}

/// All periods, oldest first
pub fn list_periods(conn: &Connection) -> Result<Vec<Period>> {
    let mut stmt = conn.prepare(
        "SELECT period_id, year, month, file_name, file_sha256
         FROM data_periods ORDER BY year, month",
    )?;
    let periods = stmt
        .query_map([], period_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(periods)
}

// ============================================================================
// TIME-VARYING LOCATION DATA
// ============================================================================

/// Facts about a location that are only true for one period
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPeriodData {
    pub is_dormant: Option<bool>,
    pub is_care_home: Option<bool>,
    pub registered_manager: Option<String>,
    pub care_homes_beds: Option<i64>,
    pub latest_overall_rating: Option<String>,
    pub publication_date: Option<NaiveDate>,
    pub is_inherited_rating: Option<bool>,
}

impl LocationPeriodData {
    pub fn from_row(row: &Row<'_>) -> LocationPeriodData {
        LocationPeriodData {
            is_dormant: parse_bool(row.get("Dormant (Y/N)")),
            is_care_home: parse_bool(row.get("Care home?")),
            registered_manager: parse_text(row.get("Registered manager"), true),
            care_homes_beds: parse_integer(row.get("Care homes beds")),
            latest_overall_rating: parse_text(row.get("Location Latest Overall Rating"), true),
            publication_date: validate_date(
                parse_date(row.get("Publication Date")),
                "publication_date",
            ),
            is_inherited_rating: parse_bool(row.get("Inherited Rating (Y/N)")),
        }
    }
}

pub fn find_time_varying_record(
    conn: &Connection,
    location_id: &str,
    period_id: i64,
) -> Result<Option<LocationPeriodData>> {
    let record = conn
        .query_row(
            "SELECT is_dormant, is_care_home, registered_manager, care_homes_beds,
                    latest_overall_rating, publication_date, is_inherited_rating
             FROM location_period_data WHERE location_id = ?1 AND period_id = ?2",
            params![location_id, period_id],
            |row| {
                Ok(LocationPeriodData {
                    is_dormant: row.get(0)?,
                    is_care_home: row.get(1)?,
                    registered_manager: row.get(2)?,
                    care_homes_beds: row.get(3)?,
                    latest_overall_rating: row.get(4)?,
                    publication_date: row.get(5)?,
                    is_inherited_rating: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

/// One record per (location, period); an existing record is left untouched
pub fn create_time_varying_record(
    conn: &Connection,
    location_id: &str,
    period_id: i64,
    data: LocationPeriodData,
) -> Result<Resolved<LocationPeriodData>> {
    let key = format!("{}@{}", location_id, period_id);
    get_or_create(
        "location period data",
        &key,
        || find_time_varying_record(conn, location_id, period_id),
        || {
            conn.execute(
                "INSERT INTO location_period_data (
                    location_id, period_id, is_dormant, is_care_home, registered_manager,
                    care_homes_beds, latest_overall_rating, publication_date, is_inherited_rating
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    location_id,
                    period_id,
                    data.is_dormant,
                    data.is_care_home,
                    data.registered_manager,
                    data.care_homes_beds,
                    data.latest_overall_rating,
                    data.publication_date,
                    data.is_inherited_rating,
                ],
            )?;
            Ok(data)
        },
    )
}

// ============================================================================
// PROVIDER-BRAND AFFILIATION
// ============================================================================

/// Record that `provider_id` traded under `brand_id` in `period_id`.
/// Returns true when the affiliation was new.
pub fn get_or_create_affiliation(
    conn: &Connection,
    provider_id: &str,
    brand_id: &str,
    period_id: i64,
) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO provider_brands (provider_id, brand_id, period_id)
         VALUES (?1, ?2, ?3)",
        params![provider_id, brand_id, period_id],
    )?;
    Ok(inserted > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::parser::CellValue;
    use crate::workbook::Sheet;

    fn store() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO providers (provider_id, name) VALUES ('1-100', 'Oak Care Ltd');
             INSERT INTO locations (location_id, provider_id, name) VALUES ('1-101', '1-100', 'Oak House');
             INSERT INTO brands (brand_id, brand_name) VALUES ('BD001', 'Acme Care');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_period_validation() {
        assert!(validate_period(2025, 8).is_ok());
        assert!(matches!(
            validate_period(2031, 1),
            Err(ImportError::InvalidParameter(_))
        ));
        assert!(matches!(
            validate_period(2025, 13),
            Err(ImportError::InvalidParameter(_))
        ));
        assert!(validate_period(1999, 12).is_err());
        assert!(validate_period(2025, 0).is_err());
    }

    #[test]
    fn test_period_is_unique_per_month() {
        let conn = store();
        let first = get_or_create_period(&conn, 2025, 8, "08_2025.ods", Some("abc")).unwrap();
        assert!(first.was_created());

        let second = get_or_create_period(&conn, 2025, 8, "08_2025.xlsx", None).unwrap();
        assert!(!second.was_created());
        assert_eq!(second.value().period_id, first.value().period_id);
        assert_eq!(second.value().file_name, "08_2025.ods");

        get_or_create_period(&conn, 2025, 7, "07_2025.ods", None).unwrap();
        let labels: Vec<String> = list_periods(&conn).unwrap().iter().map(Period::label).collect();
        assert_eq!(labels, vec!["2025-07", "2025-08"]);
    }

    #[test]
    fn test_time_varying_record_first_write_wins() {
        let conn = store();
        let period = get_or_create_period(&conn, 2025, 8, "08_2025.ods", None)
            .unwrap()
            .into_inner();

        let sheet = Sheet::new(
            "main",
            vec![
                "Care home?".to_string(),
                "Care homes beds".to_string(),
                "Dormant (Y/N)".to_string(),
                "Publication Date".to_string(),
            ],
            vec![vec![
                CellValue::text("Y"),
                CellValue::Number(40.0),
                CellValue::text("*"),
                CellValue::text("14/03/2024"),
            ]],
        );
        let data = LocationPeriodData::from_row(&sheet.rows().next().unwrap());
        assert_eq!(data.is_care_home, Some(true));
        assert_eq!(data.care_homes_beds, Some(40));
        assert_eq!(data.is_dormant, None);

        let created = create_time_varying_record(&conn, "1-101", period.period_id, data.clone())
            .unwrap();
        assert!(created.was_created());

        let changed = LocationPeriodData {
            care_homes_beds: Some(12),
            ..data.clone()
        };
        let existing =
            create_time_varying_record(&conn, "1-101", period.period_id, changed).unwrap();
        assert!(!existing.was_created());
        assert_eq!(existing.into_inner(), data);
    }

    #[test]
    fn test_affiliation_once_per_period() {
        let conn = store();
        let period = get_or_create_period(&conn, 2025, 8, "08_2025.ods", None)
            .unwrap()
            .into_inner();
        assert!(get_or_create_affiliation(&conn, "1-100", "BD001", period.period_id).unwrap());
        assert!(!get_or_create_affiliation(&conn, "1-100", "BD001", period.period_id).unwrap());
    }
}
