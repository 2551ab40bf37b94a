//! sqlite-pg-port CLI - resumable SQLite to PostgreSQL data port.

mod progress;

use clap::Parser;
use sqlite_pg_port::{Config, PortError, Porter};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "sqlite-pg-port")]
#[command(about = "Port a SQLite database to PostgreSQL, resumably")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the source SQLite database path
    #[arg(long)]
    sqlite_database: Option<PathBuf>,

    /// Override rows per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Suppress per-table progress lines on stderr
    #[arg(long)]
    quiet: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), PortError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(PortError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Apply overrides
    if let Some(path) = cli.sqlite_database {
        config.source.database = path;
    }
    if let Some(batch) = cli.batch_size {
        config.port.batch_size = Some(batch);
    }
    config.validate()?;

    let porter = if cli.quiet {
        Porter::new(config)
    } else {
        Porter::with_progress(config, Arc::new(progress::TerminalProgress::new()))
    };

    let report = porter.run().await?;

    if cli.output_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\nPort completed!");
        println!("  Run ID: {}", report.run_id);
        println!("  Duration: {:.2}s", report.elapsed_secs);
        println!("  Tables: {}", report.tables_ported);
        println!("  Rows: {}", report.rows_ported);
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
