// 📐 Schema Scanner - discover categorical flag columns from headers
//
// Extract headers such as "Regulated activity - Personal care" are not known
// ahead of time. Each matching header becomes (or reuses) a row in
// categorical_definitions, and the resulting mapping drives association
// materialization for every row of the file.

use crate::entities::{get_or_create, Resolved};
use crate::error::{ImportError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// ============================================================================
// CATEGORY KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    RegulatedActivity,
    ServiceType,
    ServiceUserBand,
}

impl CategoryKind {
    pub const ALL: [CategoryKind; 3] = [
        CategoryKind::RegulatedActivity,
        CategoryKind::ServiceType,
        CategoryKind::ServiceUserBand,
    ];

    /// Header prefix that marks a column of this kind
    pub fn prefix(&self) -> &'static str {
        match self {
            CategoryKind::RegulatedActivity => "Regulated activity - ",
            CategoryKind::ServiceType => "Service type - ",
            CategoryKind::ServiceUserBand => "Service user band - ",
        }
    }

    /// Value stored in categorical_definitions.kind
    pub fn as_str(&self) -> &'static str {
        match self {
            CategoryKind::RegulatedActivity => "regulated_activity",
            CategoryKind::ServiceType => "service_type",
            CategoryKind::ServiceUserBand => "service_user_band",
        }
    }

    /// Kind and display name for a header, if it carries a known prefix
    pub fn classify(header: &str) -> Option<(CategoryKind, String)> {
        CategoryKind::ALL.iter().find_map(|kind| {
            header
                .strip_prefix(kind.prefix())
                .map(|rest| rest.trim())
                .filter(|rest| !rest.is_empty())
                .map(|rest| (*kind, rest.to_string()))
        })
    }
}

// ============================================================================
// LEGACY SERVICE USER BANDS
// ============================================================================

/// Older extracts used age bands that were later merged or withdrawn.
///
/// ```toml
/// [legacy_band_mapping]
/// drop = ["Children 0-3 years"]
///
/// [legacy_band_mapping.rename]
/// "Younger adults" = "Adults 18-65 years"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LegacyBandMapping {
    pub rename: BTreeMap<String, String>,
    pub drop: Vec<String>,
}

impl LegacyBandMapping {
    /// Target band name, or None when the band is dropped
    pub fn apply(&self, name: &str) -> Option<String> {
        if self.drop.iter().any(|d| d == name) {
            return None;
        }
        Some(self.rename.get(name).cloned().unwrap_or_else(|| name.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        self.rename.is_empty() && self.drop.is_empty()
    }
}

// ============================================================================
// CATEGORY REGISTRY
// ============================================================================

pub fn find_definition(conn: &Connection, kind: CategoryKind, name: &str) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT definition_id FROM categorical_definitions WHERE kind = ?1 AND name = ?2",
            params![kind.as_str(), name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Definition id for (kind, name), created on first sight
pub fn get_or_create_definition(
    conn: &Connection,
    kind: CategoryKind,
    name: &str,
) -> Result<Resolved<i64>> {
    get_or_create(
        "categorical definition",
        name,
        || find_definition(conn, kind, name),
        || {
            conn.execute(
                "INSERT INTO categorical_definitions (kind, name) VALUES (?1, ?2)",
                params![kind.as_str(), name],
            )?;
            info!("📝 Created {}: {}", kind.as_str(), name);
            Ok(conn.last_insert_rowid())
        },
    )
}

/// Every known definition of one kind, by name
pub fn list_definitions(conn: &Connection, kind: CategoryKind) -> Result<Vec<(i64, String)>> {
    let mut stmt = conn.prepare(
        "SELECT definition_id, name FROM categorical_definitions WHERE kind = ?1 ORDER BY name",
    )?;
    let rows = stmt
        .query_map(params![kind.as_str()], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// ============================================================================
// CATEGORY MAPPING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryColumn {
    pub header: String,
    pub kind: CategoryKind,
    pub definition_id: i64,
}

/// Header → definition for one extract file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryMapping {
    columns: Vec<CategoryColumn>,
    definitions_created: usize,
}

impl CategoryMapping {
    pub fn columns(&self) -> &[CategoryColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn count(&self, kind: CategoryKind) -> usize {
        self.columns.iter().filter(|c| c.kind == kind).count()
    }

    pub fn definitions_created(&self) -> usize {
        self.definitions_created
    }

    pub fn get(&self, header: &str) -> Option<&CategoryColumn> {
        self.columns.iter().find(|c| c.header == header)
    }
}

/// Scan a header row and register every categorical column.
///
/// Runs under a deadline; running past it is a fatal `SchemaTimeout`.
pub fn scan_headers(
    conn: &Connection,
    headers: &[String],
    legacy: &LegacyBandMapping,
    timeout: Duration,
) -> Result<CategoryMapping> {
    let started = Instant::now();
    let mut mapping = CategoryMapping::default();
    let mut seen: HashMap<(CategoryKind, String), i64> = HashMap::new();

    for header in headers {
        if started.elapsed() >= timeout {
            return Err(ImportError::SchemaTimeout {
                seconds: timeout.as_secs(),
            });
        }

        let Some((kind, name)) = CategoryKind::classify(header) else {
            continue;
        };

        let name = if kind == CategoryKind::ServiceUserBand {
            match legacy.apply(&name) {
                Some(target) => target,
                None => {
                    debug!("Dropping legacy service user band column: {}", header);
                    continue;
                }
            }
        } else {
            name
        };

        let definition_id = match seen.get(&(kind, name.clone())) {
            Some(id) => *id,
            None => {
                let resolved = get_or_create_definition(conn, kind, &name)?;
                if resolved.was_created() {
                    mapping.definitions_created += 1;
                }
                let id = resolved.into_inner();
                seen.insert((kind, name), id);
                id
            }
        };

        mapping.columns.push(CategoryColumn {
            header: header.clone(),
            kind,
            definition_id,
        });
    }

    info!(
        "🔍 Discovered {} regulated activities, {} service types, {} service user bands",
        mapping.count(CategoryKind::RegulatedActivity),
        mapping.count(CategoryKind::ServiceType),
        mapping.count(CategoryKind::ServiceUserBand)
    );
    Ok(mapping)
}
