// 🏢 Provider Entity
//
// Static provider attributes as of the first extract that mentioned the
// provider. Later extracts never overwrite them.

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
pub struct Provider {
    pub provider_id: String,
    pub name: String,
    pub hsca_start_date: Option<NaiveDate>,
    pub companies_house_number: Option<String>,
    pub charity_number: Option<String>,
    pub type_sector: Option<String>,
    pub inspection_directorate: Option<String>,
    pub primary_inspection_category: Option<String>,
    pub ownership_type: Option<String>,
    pub telephone_number: Option<String>,
    pub web_address: Option<String>,
    pub street_address: Option<String>,
    pub address_line_2: Option<String>,
    pub city: Option<String>,
    pub county: Option<String>,
    pub postal_code: Option<String>,
    pub paf_id: Option<String>,
    pub uprn_id: Option<String>,
    pub local_authority: Option<String>,
    pub region: Option<String>,
    pub nhs_region: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub parliamentary_constituency: Option<String>,
    pub nominated_individual_name: Option<String>,
    pub main_partner_name: Option<String>,
}

const SELECT_PROVIDER: &str = "SELECT provider_id, name, hsca_start_date, companies_house_number,
        charity_number, type_sector, inspection_directorate, primary_inspection_category,
        ownership_type, telephone_number, web_address, street_address, address_line_2, city,
        county, postal_code, paf_id, uprn_id, local_authority, region, nhs_region, latitude,
        longitude, parliamentary_constituency, nominated_individual_name, main_partner_name
    FROM providers WHERE provider_id = ?1";

impl Provider {
    /// Provider columns of a row; `None` when Provider ID is unusable
    pub fn from_row(row: &Row<'_>) -> Option<Provider> {
        let provider_id = parse_primary_key(row.get("Provider ID"), "Provider ID")?;
        let text = |header: &str| parse_text(row.get(header), true);

        Some(Provider {
            name: parse_text(row.get("Provider Name"), false)
                .unwrap_or_else(|| format!("Provider {}", provider_id)),
            hsca_start_date: parse_date(row.get("Provider HSCA start date")),
            companies_house_number: text("Provider Companies House Number"),
            charity_number: text("Provider Charity Number"),
            type_sector: text("Provider Type/Sector"),
            inspection_directorate: text("Provider Inspection Directorate"),
            primary_inspection_category: text("Provider Primary Inspection Category"),
            ownership_type: text("Provider Ownership Type"),
            telephone_number: parse_telephone(row.get("Provider Telephone Number")),
            web_address: text("Provider Web Address"),
            street_address: text("Provider Street Address"),
            address_line_2: text("Provider Address Line 2"),
            city: text("Provider City"),
            county: text("Provider County"),
            postal_code: parse_categorical(row.get("Provider Postal Code")),
            paf_id: parse_categorical(row.get("Provider PAF ID")),
            uprn_id: parse_categorical(row.get("Provider UPRN ID")),
            local_authority: text("Provider Local Authority"),
            region: text("Provider Region"),
            nhs_region: text("Provider NHS Region"),
            latitude: parse_decimal(row.get("Provider Latitude")),
            longitude: parse_decimal(row.get("Provider Longitude")),
            parliamentary_constituency: text("Provider Parliamentary Constituency"),
            nominated_individual_name: text("Provider Nominated Individual Name"),
            main_partner_name: text("Provider Main Partner Name"),
            provider_id,
        })
    }

    pub fn find(conn: &Connection, provider_id: &str) -> Result<Option<Provider>> {
        let provider = conn
            .query_row(SELECT_PROVIDER, params![provider_id], |row| {
                Ok(Provider {
                    provider_id: row.get("provider_id")?,
                    name: row.get("name")?,
                    hsca_start_date: row.get("hsca_start_date")?,
                    companies_house_number: row.get("companies_house_number")?,
                    charity_number: row.get("charity_number")?,
                    type_sector: row.get("type_sector")?,
                    inspection_directorate: row.get("inspection_directorate")?,
                    primary_inspection_category: row.get("primary_inspection_category")?,
                    ownership_type: row.get("ownership_type")?,
                    telephone_number: row.get("telephone_number")?,
                    web_address: row.get("web_address")?,
                    street_address: row.get("street_address")?,
                    address_line_2: row.get("address_line_2")?,
                    city: row.get("city")?,
                    county: row.get("county")?,
                    postal_code: row.get("postal_code")?,
                    paf_id: row.get("paf_id")?,
                    uprn_id: row.get("uprn_id")?,
                    local_authority: row.get("local_authority")?,
                    region: row.get("region")?,
                    nhs_region: row.get("nhs_region")?,
                    latitude: row.get("latitude")?,
                    longitude: row.get("longitude")?,
                    parliamentary_constituency: row.get("parliamentary_constituency")?,
                    nominated_individual_name: row.get("nominated_individual_name")?,
                    main_partner_name: row.get("main_partner_name")?,
                })
            })
            .optional()?;
        Ok(provider)
    }

    pub fn resolve(conn: &Connection, provider: Provider) -> Result<Resolved<Provider>> {
        let key = provider.provider_id.clone();
        get_or_create(
            "provider",
            &key,
            || Provider::find(conn, &key),
            || {
                provider.insert(conn)?;
                info!("Created provider: {}", provider.provider_id);
                Ok(provider)
            },
        )
    }

    fn insert(&self, conn: &Connection) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO providers (
                provider_id, name, hsca_start_date, companies_house_number, charity_number,
                type_sector, inspection_directorate, primary_inspection_category, ownership_type,
                telephone_number, web_address, street_address, address_line_2, city, county,
                postal_code, paf_id, uprn_id, local_authority, region, nhs_region, latitude,
                longitude, parliamentary_constituency, nominated_individual_name, main_partner_name
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                      ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26)",
            params![
                self.provider_id,
                self.name,
                self.hsca_start_date,
                self.companies_house_number,
                self.charity_number,
                self.type_sector,
                self.inspection_directorate,
                self.primary_inspection_category,
                self.ownership_type,
                self.telephone_number,
                self.web_address,
                self.street_address,
                self.address_line_2,
                self.city,
                self.county,
                self.postal_code,
                self.paf_id,
                self.uprn_id,
                self.local_authority,
                self.region,
                self.nhs_region,
                self.latitude,
                self.longitude,
                self.parliamentary_constituency,
                self.nominated_individual_name,
                self.main_partner_name,
            ],
        )
    }
}
