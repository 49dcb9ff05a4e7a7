// 📍 Location Entity
//
// Static location attributes. Time-varying facts (ratings, beds, dormancy)
// live in location_period_data instead; see temporal.rs.

use super::{get_or_create, Resolved};
use crate::error::Result;
use crate::parser::{
    parse_categorical, parse_date, parse_decimal, parse_primary_key, parse_telephone, parse_text,
};
use crate::workbook::Row;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: String,
    pub provider_id: String,
    pub name: String,
    pub hsca_start_date: Option<NaiveDate>,
    pub ods_code: Option<String>,
    pub telephone_number: Option<String>,
    pub web_address: Option<String>,
    pub type_sector: Option<String>,
    pub inspection_directorate: Option<String>,
    pub primary_inspection_category: Option<String>,
    pub region: Option<String>,
    pub nhs_region: Option<String>,
    pub local_authority: Option<String>,
    pub onspd_ccg_code: Option<String>,
    pub onspd_ccg: Option<String>,
    pub commissioning_ccg_code: Option<String>,
    pub commissioning_ccg: Option<String>,
    pub street_address: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub postal_code: Option<String>,
    pub paf_id: Option<String>,
    pub uprn_id: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub parliamentary_constituency: Option<String>,
    pub also_known_as: Option<String>,
    pub specialisms: Option<String>,
}

impl Location {
    /// Location columns of a row, owned by `provider_id`.
    /// `None` when Location ID is unusable.
    pub fn from_row(row: &Row<'_>, provider_id: &str) -> Option<Location> {
        let location_id = parse_primary_key(row.get("Location ID"), "Location ID")?;
        let text = |header: &str| parse_text(row.get(header), true);
        let code = |header: &str| parse_categorical(row.get(header));

        Some(Location {
            provider_id: provider_id.to_string(),
            name: parse_text(row.get("Location Name"), false)
                .unwrap_or_else(|| format!("Location {}", location_id)),
            hsca_start_date: parse_date(row.get("Location HSCA start date")),
            ods_code: code("Location ODS Code"),
            telephone_number: parse_telephone(row.get("Location Telephone Number")),
            web_address: text("Location Web Address"),
            type_sector: text("Location Type/Sector"),
            inspection_directorate: text("Location Inspection Directorate"),
            primary_inspection_category: text("Location Primary Inspection Category"),
            region: text("Location Region"),
            nhs_region: text("Location NHS Region"),
            local_authority: text("Location Local Authority"),
            onspd_ccg_code: code("Location ONSPD CCG Code"),
            onspd_ccg: text("Location ONSPD CCG"),
            commissioning_ccg_code: code("Location Commissioning CCG Code"),
            commissioning_ccg: text("Location Commissioning CCG"),
            street_address: text("Location Street Address"),
            address_line_2: text("Location Address Line 2"),
            city: text("Location City"),
            county: text("Location County"),
            postal_code: code("Location Postal Code"),
            paf_id: code("Location PAF ID"),
            uprn_id: code("Location UPRN ID"),
            latitude: parse_decimal(row.get("Location Latitude")),
            longitude: parse_decimal(row.get("Location Longitude")),
            parliamentary_constituency: text("Location Parliamentary Constituency"),
            also_known_as: text("Location Also Known As"),
            specialisms: text("Location Specialisms"),
            location_id,
        })
    }

    pub fn find(conn: &Connection, location_id: &str) -> Result<Option<Location>> {
        let location = conn
            .query_row(
                "SELECT * FROM locations WHERE location_id = ?1",
                params![location_id],
                |row| {
                    Ok(Location {
                        location_id: row.get("location_id")?,
                        provider_id: row.get("provider_id")?,
                        name: row.get("name")?,
                        hsca_start_date: row.get("hsca_start_date")?,
                        ods_code: row.get("ods_code")?,
                        telephone_number: row.get("telephone_number")?,
                        web_address: row.get("web_address")?,
                        type_sector: row.get("type_sector")?,
                        inspection_directorate: row.get("inspection_directorate")?,
                        primary_inspection_category: row.get("primary_inspection_category")?,
                        region: row.get("region")?,
                        nhs_region: row.get("nhs_region")?,
                        local_authority: row.get("local_authority")?,
                        onspd_ccg_code: row.get("onspd_ccg_code")?,
                        onspd_ccg: row.get("onspd_ccg")?,
                        commissioning_ccg_code: row.get("commissioning_ccg_code")?,
                        commissioning_ccg: row.get("commissioning_ccg")?,
                        street_address: row.get("street_address")?,
                        address_line_2: row.get("address_line_2")?,
                        city: row.get("city")?,
                        county: row.get("county")?,
                        postal_code: row.get("postal_code")?,
                        paf_id: row.get("paf_id")?,
                        uprn_id: row.get("uprn_id")?,
                        latitude: row.get("latitude")?,
                        longitude: row.get("longitude")?,
                        parliamentary_constituency: row.get("parliamentary_constituency")?,
                        also_known_as: row.get("also_known_as")?,
                        specialisms: row.get("specialisms")?,
                    })
                },
            )
            .optional()?;
        Ok(location)
    }

    /// Existence check used by relationship reconciliation
    pub fn exists(conn: &Connection, location_id: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM locations WHERE location_id = ?1",
                params![location_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn resolve(conn: &Connection, location: Location) -> Result<Resolved<Location>> {
        let key = location.location_id.clone();
        get_or_create(
            "location",
            &key,
            || Location::find(conn, &key),
            || {
                location.insert(conn)?;
                info!("Created location: {}", location.location_id);
                Ok(location)
            },
        )
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO locations (
                location_id, provider_id, name, hsca_start_date, ods_code, telephone_number,
                web_address, type_sector, inspection_directorate, primary_inspection_category,
                region, nhs_region, local_authority, onspd_ccg_code, onspd_ccg,
                commissioning_ccg_code, commissioning_ccg, street_address, address_line_2, city,
                county, postal_code, paf_id, uprn_id, latitude, longitude,
                parliamentary_constituency, also_known_as, specialisms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                      ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)",
            params![
                self.location_id,
                self.provider_id,
                self.name,
                self.hsca_start_date,
                self.ods_code,
                self.telephone_number,
                self.web_address,
                self.type_sector,
                self.inspection_directorate,
                self.primary_inspection_category,
                self.region,
                self.nhs_region,
                self.local_authority,
                self.onspd_ccg_code,
                self.onspd_ccg,
                self.commissioning_ccg_code,
                self.commissioning_ccg,
                self.street_address,
                self.address_line_2,
                self.city,
                self.county,
                self.postal_code,
                self.paf_id,
                self.uprn_id,
                self.latitude,
                self.longitude,
                self.parliamentary_constituency,
                self.also_known_as,
                self.specialisms,
            ],
        )
    }
}
