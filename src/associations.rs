// 🔗 Association Materializer
//
// Sparse storage of categorical flags: a (location, definition, period) row
// exists only when the cell parsed to true. False, blank, "*" and garbage all
// leave nothing behind.

use crate::error::Result;
use crate::parser::parse_bool;
use crate::schema::{CategoryKind, CategoryMapping};
use crate::workbook::Row;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// Newly created associations, per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationCounts {
    pub regulated_activities: usize,
    pub service_types: usize,
    pub service_user_bands: usize,
}

impl AssociationCounts {
    pub fn record(&mut self, kind: CategoryKind) {
        match kind {
            CategoryKind::RegulatedActivity => self.regulated_activities += 1,
            CategoryKind::ServiceType => self.service_types += 1,
            CategoryKind::ServiceUserBand => self.service_user_bands += 1,
        }
    }

    pub fn merge(&mut self, other: AssociationCounts) {
        self.regulated_activities += other.regulated_activities;
        self.service_types += other.service_types;
        self.service_user_bands += other.service_user_bands;
    }

    pub fn total(&self) -> usize {
        self.regulated_activities + self.service_types + self.service_user_bands
    }
}

/// Store every flag the row sets for `location_id` in `period_id`
pub fn materialize(
    conn: &Connection,
    row: &Row<'_>,
    mapping: &CategoryMapping,
    location_id: &str,
    period_id: i64,
) -> Result<AssociationCounts> {
    let mut counts = AssociationCounts::default();

    for column in mapping.columns() {
        if parse_bool(row.get(&column.header)) != Some(true) {
            continue;
        }
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO location_categories (location_id, definition_id, period_id)
             VALUES (?1, ?2, ?3)",
            params![location_id, column.definition_id, period_id],
        )?;
        if inserted > 0 {
            counts.record(column.kind);
        }
    }

    Ok(counts)
}

/// Definition ids flagged for a location in a period
pub fn definitions_for(conn: &Connection, location_id: &str, period_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT definition_id FROM location_categories
         WHERE location_id = ?1 AND period_id = ?2 ORDER BY definition_id",
    )?;
    let ids = stmt
        .query_map(params![location_id, period_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(ids)
}
