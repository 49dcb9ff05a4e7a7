// CQC Import - Core Library
// Exposes all modules for use in the CLI, an API layer, and tests

pub mod associations;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod importer;
pub mod logging;
pub mod parser;
pub mod reconciliation;
pub mod schema;
pub mod staging;
pub mod status;
pub mod temporal;
pub mod workbook;

// Re-export commonly used types
pub use config::Config;
pub use db::{open_database, setup_database, table_counts, StoreCounts};
pub use entities::{Brand, Location, Provider, Resolved};
pub use error::{FailureKind, ImportError, Result};
pub use importer::{
    spawn_import, ImportHandle, ImportOptions, ImportRequest, ImportSource, ImportStats,
    Importer, RowOutcome,
};
pub use parser::CellValue;
pub use reconciliation::{DualRegistration, ReconciliationOutcome, RelationshipTable};
pub use schema::{CategoryKind, CategoryMapping, LegacyBandMapping};
pub use staging::{StagedExtract, StagingOptions, StagingStats};
pub use status::{
    ImportPhase, JsonFileStatusStore, MemoryStatusStore, RunState, StatusRecord, StatusStore,
};
pub use temporal::{LocationPeriodData, Period};
pub use workbook::{Sheet, SourceFormat, Workbook};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
