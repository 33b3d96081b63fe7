use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use payer_groups::{
    ingest_workbook, merge_groups, setup_database, Config, PayerStore, VERSION,
};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "payer-groups")]
#[command(about = "Resolve raw payer names from spreadsheets into canonical payer groups")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a workbook and merge its payers into the database
    Ingest {
        /// Workbook to read (.xlsx, .xls, .ods)
        workbook: PathBuf,

        /// SQLite database
        #[arg(long, default_value = "payers.db")]
        db: PathBuf,

        /// JSON configuration (thresholds, known groups, column names)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List payer groups with payer and detail counts
    Groups {
        #[arg(long, default_value = "payers.db")]
        db: PathBuf,

        /// Also list each group's payers by display name
        #[arg(long)]
        payers: bool,

        /// Print groups with nested payers as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write every detail row as CSV to stdout
    Details {
        #[arg(long, default_value = "payers.db")]
        db: PathBuf,
    },

    /// Move all payers of one group into another and delete the source
    Merge {
        #[arg(long)]
        source: i64,

        #[arg(long)]
        target: i64,

        #[arg(long, default_value = "payers.db")]
        db: PathBuf,
    },

    /// Set (or clear with an empty name) a payer's display name
    PrettyName {
        #[arg(long)]
        payer: i64,

        #[arg(long)]
        name: String,

        #[arg(long, default_value = "payers.db")]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            workbook,
            db,
            config,
            json,
        } => run_ingest(&workbook, &db, config.as_deref(), json),
        Commands::Groups { db, payers, json } => run_groups(&db, payers, json),
        Commands::Details { db } => run_details(&db),
        Commands::Merge { source, target, db } => run_merge(&db, source, target),
        Commands::PrettyName { payer, name, db } => run_pretty_name(&db, payer, &name),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn).context("Failed to set up database schema")?;
    Ok(conn)
}

fn run_ingest(workbook: &Path, db: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    let config = match config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let mut conn = open_db(db)?;
    let report = ingest_workbook(&mut conn, workbook, &config)
        .with_context(|| format!("Ingestion of {} failed", workbook.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("📥 payer-groups {}", VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Run:      {}", report.run_id);
    println!("Source:   {} (sha256 {})", report.source.display(), report.source_sha256);
    for sheet in &report.sheets {
        println!("  • {:<30} {:?}", sheet.sheet, sheet.outcome);
    }
    for sheet in &report.excluded {
        println!("  • {:<30} excluded", sheet);
    }
    println!("Records:  {}", report.records_loaded);
    for (rule, count) in &report.rule_counts {
        println!("  {:<14} {}", rule, count);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {}", report.summary());

    Ok(())
}

fn run_groups(db: &Path, payers: bool, json: bool) -> Result<()> {
    let conn = open_db(db)?;
    let groups = conn.list_groups_with_payers_and_details()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&groups)?);
        return Ok(());
    }

    println!("{:>6}  {:<40} {:>7} {:>8}", "ID", "GROUP", "PAYERS", "DETAILS");
    for g in &groups {
        println!(
            "{:>6}  {:<40} {:>7} {:>8}",
            g.group.id,
            g.group.name,
            g.payer_count(),
            g.detail_count()
        );
        if payers {
            for p in &g.payers {
                println!(
                    "{:>6}    └ {:<36} {:>16}",
                    p.payer.id,
                    p.payer.display_name(),
                    p.details.len()
                );
            }
        }
    }
    println!("\n{} groups", groups.len());

    Ok(())
}

fn run_details(db: &Path) -> Result<()> {
    let conn = open_db(db)?;
    let details = conn.list_details()?;

    let mut writer = csv::Writer::from_writer(std::io::stdout());
    for detail in &details {
        writer.serialize(detail)?;
    }
    writer.flush()?;

    Ok(())
}

fn run_merge(db: &Path, source: i64, target: i64) -> Result<()> {
    let mut conn = open_db(db)?;
    let moved = merge_groups(&mut conn, source, target)
        .with_context(|| format!("Failed to merge group {} into {}", source, target))?;

    println!("✅ Merged group {} into {} ({} payers moved)", source, target, moved);
    Ok(())
}

fn run_pretty_name(db: &Path, payer: i64, name: &str) -> Result<()> {
    let conn = open_db(db)?;
    let pretty_name = Some(name).filter(|n| !n.trim().is_empty());
    conn.set_pretty_name(payer, pretty_name)
        .with_context(|| format!("Failed to update payer {}", payer))?;

    match pretty_name {
        Some(n) => println!("✅ Payer {} will display as '{}'", payer, n.trim()),
        None => println!("✅ Payer {} display name cleared", payer),
    }
    Ok(())
}
