// 🏷️ Brand Entity
//
// A brand groups providers. Identity is the extract's Brand ID; the name is
// captured on first sight and never revised.

use super::{get_or_create, Resolved};
use crate::error::Result;
use crate::parser::{parse_primary_key, parse_text};
use crate::workbook::Row;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brand {
    pub brand_id: String,
    pub brand_name: String,
}

impl Brand {
    /// Brand columns of a row. `None` when the row carries no usable
    /// Brand ID ("-" is the extract's way of saying "no brand").
    pub fn from_row(row: &Row<'_>) -> Option<Brand> {
        let brand_id = parse_primary_key(row.get("Brand ID"), "Brand ID")?;
        let brand_name = parse_text(row.get("Brand Name"), false)
            .unwrap_or_else(|| format!("Brand {}", brand_id));
        Some(Brand {
            brand_id,
            brand_name,
        })
    }

    pub fn find(conn: &Connection, brand_id: &str) -> Result<Option<Brand>> {
        let brand = conn
            .query_row(
                "SELECT brand_id, brand_name FROM brands WHERE brand_id = ?1",
                params![brand_id],
                |row| {
                    Ok(Brand {
                        brand_id: row.get(0)?,
                        brand_name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(brand)
    }

    pub fn resolve(conn: &Connection, brand: Brand) -> Result<Resolved<Brand>> {
        let key = brand.brand_id.clone();
        get_or_create(
            "brand",
            &key,
            || Brand::find(conn, &key),
            || {
                conn.execute(
                    "INSERT INTO brands (brand_id, brand_name) VALUES (?1, ?2)",
                    params![brand.brand_id, brand.brand_name],
                )?;
                info!("Created brand: {}", brand.brand_id);
                Ok(brand)
            },
        )
    }
}
