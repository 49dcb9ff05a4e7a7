// ⚖️ Dual-Registration Reconciler
//
// Some locations are registered twice (e.g. a care home run jointly by two
// providers). The relationship sheet lists each pair once; the store holds
// both directions for the period:
//
//   A → B  is_primary = x
//   B → A  is_primary = !x
//
// The sheet is optional. A missing or malformed sheet yields zero links and
// never fails the import.

use crate::db::begin_row_transaction;
use crate::entities::Location;
use crate::error::Result;
use crate::parser::{parse_bool, parse_date, parse_flag, parse_primary_key, parse_text, CellValue};
use crate::workbook::{Row, Sheet, Workbook};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Columns without which the sheet is not a relationship table
pub const RELATIONSHIP_REQUIRED: &[&str] = &["Location ID", "Linked Organisation ID"];

/// Full column set, also used for empty staged files
pub const RELATIONSHIP_COLUMNS: &[&str] = &[
    "Location ID",
    "Linked Organisation ID",
    "Relationship",
    "Relationship Start Date",
    "Primary ID",
];

// ============================================================================
// RELATIONSHIP TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RelationshipTable {
    Present(Sheet),
    /// Not available; the reason is only for logs
    Absent(String),
}

impl RelationshipTable {
    /// Validate a candidate sheet against the relationship column signature
    pub fn from_sheet(sheet: Sheet) -> RelationshipTable {
        let missing = sheet.missing_columns(RELATIONSHIP_REQUIRED);
        if !missing.is_empty() {
            return RelationshipTable::Absent(format!(
                "sheet '{}' is missing columns {:?}",
                sheet.name, missing
            ));
        }
        let sheet = sheet.without_blank_rows();
        if sheet.is_empty() {
            return RelationshipTable::Absent(format!("sheet '{}' has no rows", sheet.name));
        }
        RelationshipTable::Present(sheet)
    }

    /// Find the relationship sheet in a workbook by its columns
    pub fn locate(workbook: &Workbook, main_sheet: &str) -> RelationshipTable {
        match workbook.find_sheet_with_columns(RELATIONSHIP_REQUIRED, Some(main_sheet)) {
            Ok(Some(sheet)) => RelationshipTable::from_sheet(sheet),
            Ok(None) => RelationshipTable::Absent("no relationship sheet".to_string()),
            Err(e) => RelationshipTable::Absent(format!("could not read workbook sheets: {}", e)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelationshipTable::Present(sheet) => sheet.len(),
            RelationshipTable::Absent(_) => 0,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, RelationshipTable::Present(_))
    }
}

// ============================================================================
// DUAL REGISTRATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DualRegistration {
    pub location_id: String,
    pub linked_location_id: String,
    pub period_id: i64,
    pub relationship_type: Option<String>,
    pub relationship_start_date: Option<NaiveDate>,
    pub is_primary: bool,
}

impl DualRegistration {
    /// Insert unless this direction already exists for the period
    fn insert_if_absent(&self, conn: &Connection) -> Result<bool> {
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO dual_registrations (
                location_id, linked_location_id, period_id,
                relationship_type, relationship_start_date, is_primary
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                self.location_id,
                self.linked_location_id,
                self.period_id,
                self.relationship_type,
                self.relationship_start_date,
                self.is_primary,
            ],
        )?;
        Ok(inserted > 0)
    }

    fn mirrored(&self) -> DualRegistration {
        DualRegistration {
            location_id: self.linked_location_id.clone(),
            linked_location_id: self.location_id.clone(),
            is_primary: !self.is_primary,
            ..self.clone()
        }
    }
}

pub fn links_for_period(conn: &Connection, period_id: i64) -> Result<Vec<DualRegistration>> {
    let mut stmt = conn.prepare(
        "SELECT location_id, linked_location_id, period_id, relationship_type,
                relationship_start_date, is_primary
         FROM dual_registrations WHERE period_id = ?1
         ORDER BY location_id, linked_location_id",
    )?;
    let links = stmt
        .query_map(params![period_id], |row| {
            Ok(DualRegistration {
                location_id: row.get(0)?,
                linked_location_id: row.get(1)?,
                period_id: row.get(2)?,
                relationship_type: row.get(3)?,
                relationship_start_date: row.get(4)?,
                is_primary: row.get(5)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(links)
}

/// Primary indicator for `location_id`.
///
/// Y/N style values are read as flags. Anything else is taken as the id of
/// the primary location.
fn is_primary(cell: &CellValue, location_id: &str) -> bool {
    if let Some(flag) = parse_bool(cell) {
        return flag;
    }
    if parse_flag(cell) {
        return true;
    }
    parse_primary_key(cell, "Primary ID")
        .map(|primary| primary == location_id)
        .unwrap_or(false)
}

// ============================================================================
// RECONCILIATION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    /// Pairs whose two locations both resolved
    pub pairs_processed: usize,
    /// Directed links newly written
    pub links_created: usize,
    pub rows_skipped: usize,
    pub errors: Vec<String>,
}

enum PairOutcome {
    Linked { created: usize },
    Skipped(String),
}

/// Materialize every pair in `table` for `period_id`.
///
/// Each pair runs in its own transaction. Only store-level breakage is returned
/// as an error; anything else costs one row.
pub fn reconcile(
    conn: &Connection,
    table: &RelationshipTable,
    period_id: i64,
) -> Result<ReconciliationOutcome> {
    let mut outcome = ReconciliationOutcome::default();

    let sheet = match table {
        RelationshipTable::Present(sheet) => sheet,
        RelationshipTable::Absent(reason) => {
            info!("No dual registrations to process: {}", reason);
            return Ok(outcome);
        }
    };

    for row in sheet.rows() {
        let tx = begin_row_transaction(conn)?;
        match reconcile_row(&tx, &row, period_id) {
            Ok(PairOutcome::Linked { created }) => {
                tx.commit()?;
                outcome.pairs_processed += 1;
                outcome.links_created += created;
            }
            Ok(PairOutcome::Skipped(reason)) => {
                tx.rollback()?;
                debug!("Relationship row {}: {}", row.line_number(), reason);
                outcome.rows_skipped += 1;
            }
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                tx.rollback()?;
                warn!("Failed to process relationship row {}: {}", row.line_number(), e);
                outcome
                    .errors
                    .push(format!("Relationship row {}: {}", row.line_number(), e));
            }
        }
    }

    info!(
        "✓ Processed {} dual registration pairs from {} rows",
        outcome.pairs_processed,
        sheet.len()
    );
    Ok(outcome)
}

fn reconcile_row(conn: &Connection, row: &Row<'_>, period_id: i64) -> Result<PairOutcome> {
    let (Some(location_id), Some(linked_id)) = (
        parse_primary_key(row.get("Location ID"), "Location ID"),
        parse_primary_key(row.get("Linked Organisation ID"), "Linked Organisation ID"),
    ) else {
        return Ok(PairOutcome::Skipped("missing location ids".to_string()));
    };

    if location_id == linked_id {
        return Ok(PairOutcome::Skipped(format!("self-link {}", location_id)));
    }
    for id in [&location_id, &linked_id] {
        if !Location::exists(conn, id)? {
            return Ok(PairOutcome::Skipped(format!("unknown location {}", id)));
        }
    }

    let forward = DualRegistration {
        is_primary: is_primary(row.get("Primary ID"), &location_id),
        relationship_type: parse_text(row.get("Relationship"), true),
        relationship_start_date: parse_date(row.get("Relationship Start Date")),
        location_id,
        linked_location_id: linked_id,
        period_id,
    };
    let backward = forward.mirrored();

    let created = [&forward, &backward]
        .iter()
        .map(|link| link.insert_if_absent(conn))
        .collect::<Result<Vec<bool>>>()?
        .into_iter()
        .filter(|c| *c)
        .count();

    info!(
        "✓ Dual registration {} <-> {} ({})",
        forward.location_id,
        forward.linked_location_id,
        forward.relationship_type.as_deref().unwrap_or("unspecified")
    );
    Ok(PairOutcome::Linked { created })
}
