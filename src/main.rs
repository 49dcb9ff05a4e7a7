use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cqc_import::logging::init_logging;
use cqc_import::staging::{self, staged_info, validate_staged};
use cqc_import::temporal::list_periods;
use cqc_import::{
    open_database, table_counts, Config, ImportRequest, ImportStats, Importer,
    JsonFileStatusStore, StatusStore,
};

#[derive(Parser)]
#[command(name = "cqc-import")]
#[command(about = "Import monthly CQC extracts into a period-versioned SQLite store")]
#[command(version)]
struct Cli {
    /// Config file (default: ./cqc-import.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overrides the config file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import an mm_yyyy.<ext> extract (ods, xlsx, xls, xlsb, csv)
    Import {
        file: PathBuf,
        #[command(flatten)]
        period: PeriodArgs,
        /// Read the spreadsheet directly instead of staging it as Parquet first
        #[arg(long)]
        no_staging: bool,
    },
    /// Import previously staged Parquet files
    ImportStaged {
        main: PathBuf,
        relationship: PathBuf,
        #[command(flatten)]
        period: PeriodArgs,
    },
    /// Convert an extract to staged Parquet files without importing
    Stage {
        file: PathBuf,
        /// Output directory, overrides the config file
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Check staged files carry the columns an import needs
    ValidateStaged { main: PathBuf, relationship: PathBuf },
    /// Show the status record of an import run
    Status { run_id: String },
    /// Row counts and imported periods
    Stats,
}

#[derive(Args)]
struct PeriodArgs {
    /// Overrides the year in the file name
    #[arg(long)]
    year: Option<i32>,
    /// Overrides the month in the file name
    #[arg(long)]
    month: Option<u32>,
    /// Only rows with "Care home?" = Y
    #[arg(long, conflicts_with = "non_care_homes")]
    care_homes: bool,
    /// Only rows that are not care homes
    #[arg(long)]
    non_care_homes: bool,
}

impl PeriodArgs {
    fn apply(&self, mut request: ImportRequest) -> ImportRequest {
        request.year = self.year;
        request.month = self.month;
        request.care_home_filter = match (self.care_homes, self.non_care_homes) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        request
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    init_logging(&config.log_level);

    match cli.command {
        Commands::Import {
            file,
            period,
            no_staging,
        } => {
            let mut request = period.apply(ImportRequest::spreadsheet(file));
            request.use_staging = !no_staging;
            run_import(&config, &request)
        }
        Commands::ImportStaged {
            main,
            relationship,
            period,
        } => run_import(&config, &period.apply(ImportRequest::staged(main, relationship))),
        Commands::Stage { file, output_dir } => run_stage(&config, &file, output_dir),
        Commands::ValidateStaged { main, relationship } => run_validate(&main, &relationship),
        Commands::Status { run_id } => run_status(&config, &run_id),
        Commands::Stats => run_stats(&config),
    }
}

fn run_import(config: &Config, request: &ImportRequest) -> Result<()> {
    println!("🗄️  CQC Import - {}", request.source.path().display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let conn = open_database(&config.database_path, config.busy_timeout())
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
    let status: Arc<dyn StatusStore> = Arc::new(JsonFileStatusStore::new(&config.status_dir)?);
    let importer = Importer::new(&conn, config.import_options(), status);

    let run_id = importer.begin(request);
    println!("🆔 Run: {}", run_id);

    let stats = importer.run_as(&run_id, request)?;
    print_stats(&stats);
    Ok(())
}

fn print_stats(stats: &ImportStats) {
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("📅 Period: {}-{:02} (ID {})", stats.year, stats.month, stats.period_id);
    println!("✓ Rows imported: {}/{}", stats.rows_imported, stats.rows_total);
    println!("✓ Rows skipped: {}", stats.rows_skipped);
    println!("✓ Rows failed: {}", stats.rows_failed);
    println!("🏢 Providers created: {}", stats.providers_created);
    println!("🏠 Locations created: {}", stats.locations_created);
    println!("🏷️  Brands created: {}", stats.brands_created);
    println!("📝 Category definitions created: {}", stats.definitions_created);
    println!(
        "🔗 Associations: {} activities, {} service types, {} user bands",
        stats.associations_created.regulated_activities,
        stats.associations_created.service_types,
        stats.associations_created.service_user_bands
    );
    println!("👥 Dual registrations: {}", stats.dual_registrations_processed);
    println!(
        "⏱️  {:.1}s ({:.1} records/sec)",
        stats.import_time_seconds, stats.records_per_second
    );

    if !stats.errors.is_empty() {
        println!("\n⚠️  {} errors:", stats.errors.len());
        for error in stats.errors.iter().take(10) {
            println!("   {}", error);
        }
        if stats.errors.len() > 10 {
            println!("   ... and {} more", stats.errors.len() - 10);
        }
    }
}

fn run_stage(config: &Config, file: &Path, output_dir: Option<PathBuf>) -> Result<()> {
    println!("📦 Staging {}", file.display());

    let mut options = config.staging_options();
    if let Some(dir) = output_dir {
        options.output_dir = dir;
    }
    let staged = staging::convert(file, &options)?;

    println!(
        "✓ Main: {} ({} rows, {} columns)",
        staged.main_path.display(),
        staged.stats.main_rows,
        staged.stats.main_columns
    );
    println!(
        "✓ Dual registrations: {} ({} rows)",
        staged.relationship_path.display(),
        staged.stats.relationship_rows
    );
    println!("✓ SHA-256: {}", staged.source_sha256);
    if staged.stats.reused {
        println!("♻️  Reused existing staged files");
    }
    Ok(())
}

fn run_validate(main: &Path, relationship: &Path) -> Result<()> {
    validate_staged(main, relationship)?;
    for path in [main, relationship] {
        let info = staged_info(path)?;
        println!(
            "✓ {}: {} rows, {} columns, {} bytes",
            path.display(),
            info.rows,
            info.columns,
            info.size_bytes
        );
    }
    println!("✅ Staged files are valid");
    Ok(())
}

fn run_status(config: &Config, run_id: &str) -> Result<()> {
    let store = JsonFileStatusStore::new(&config.status_dir)?;
    match store.get(run_id)? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => {
            eprintln!("❌ No import run {}", run_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

fn run_stats(config: &Config) -> Result<()> {
    let conn = open_database(&config.database_path, config.busy_timeout())?;
    let counts = table_counts(&conn)?;

    println!("📊 Store: {}", config.database_path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Providers:               {}", counts.providers);
    println!("Locations:               {}", counts.locations);
    println!("Brands:                  {}", counts.brands);
    println!("Periods:                 {}", counts.periods);
    println!("Location period records: {}", counts.location_period_records);
    println!("Category definitions:    {}", counts.categorical_definitions);
    println!("Location categories:     {}", counts.location_categories);
    println!("Provider brands:         {}", counts.provider_brands);
    println!("Dual registrations:      {}", counts.dual_registrations);

    let periods = list_periods(&conn)?;
    if !periods.is_empty() {
        println!("\n📅 Periods:");
        for period in periods {
            println!("   {} ({})", period.label(), period.file_name);
        }
    }
    Ok(())
}
