// ⚙️ Configuration
//
// Every field has a default, so a missing cqc-import.toml is fine. A file that
// exists but does not parse is an error.

use crate::importer::ImportOptions;
use crate::schema::LegacyBandMapping;
use crate::staging::StagingOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = "cqc-import.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub staging_dir: PathBuf,
    pub status_dir: PathBuf,
    /// Preferred main sheet; sheets are also found by column signature
    pub main_sheet: String,
    pub timeouts: Timeouts,
    /// Rows between progress reports
    pub progress_interval: usize,
    pub busy_timeout_secs: u64,
    /// Reuse staged Parquet when the source hash is unchanged
    pub reuse_staged: bool,
    pub log_level: String,
    pub legacy_band_mapping: LegacyBandMapping,
}

/// Seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub staging_ods: u64,
    pub staging_xlsx: u64,
    pub relationship_sheet: u64,
    pub schema_discovery: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            staging_ods: 1200,
            staging_xlsx: 600,
            relationship_sheet: 300,
            schema_discovery: 120,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("data/cqc.db"),
            staging_dir: PathBuf::from("data/staging"),
            status_dir: PathBuf::from("data/import_status"),
            main_sheet: "HSCA_Active_Locations".to_string(),
            timeouts: Timeouts::default(),
            progress_interval: 500,
            busy_timeout_secs: 30,
            reuse_staged: true,
            log_level: "info".to_string(),
            legacy_band_mapping: LegacyBandMapping::default(),
        }
    }
}

impl Config {
    /// Load `path`, or `cqc-import.toml` in the working directory.
    /// An explicit path must exist; the default one may not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        if !path.exists() {
            if required {
                anyhow::bail!("config file not found: {}", path.display());
            }
            debug!("No {} found, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Config::from_toml(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    pub fn staging_options(&self) -> StagingOptions {
        StagingOptions {
            output_dir: self.staging_dir.clone(),
            main_sheet: self.main_sheet.clone(),
            ods_timeout: Duration::from_secs(self.timeouts.staging_ods),
            xlsx_timeout: Duration::from_secs(self.timeouts.staging_xlsx),
            relationship_timeout: Duration::from_secs(self.timeouts.relationship_sheet),
            reuse: self.reuse_staged,
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        ImportOptions {
            staging: self.staging_options(),
            schema_timeout: Duration::from_secs(self.timeouts.schema_discovery),
            progress_interval: self.progress_interval,
            legacy_band_mapping: self.legacy_band_mapping.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml(
            r#"
database_path = "/var/lib/cqc/cqc.db"

[timeouts]
staging_ods = 1800

[legacy_band_mapping]
drop = ["Children 0-3 years"]

[legacy_band_mapping.rename]
"Younger adults" = "Adults 18-65 years"
"#,
        )
        .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/cqc/cqc.db"));
        assert_eq!(config.timeouts.staging_ods, 1800);
        assert_eq!(config.timeouts.staging_xlsx, 600);
        assert_eq!(config.main_sheet, "HSCA_Active_Locations");
        assert_eq!(
            config.legacy_band_mapping.apply("Younger adults"),
            Some("Adults 18-65 years".to_string())
        );
        assert_eq!(config.legacy_band_mapping.apply("Children 0-3 years"), None);

        let staging = config.staging_options();
        assert_eq!(staging.ods_timeout, Duration::from_secs(1800));
        assert_eq!(staging.relationship_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_bad_toml_is_an_error() {
        assert!(Config::from_toml("progress_interval = \"often\"").is_err());
    }
}
