//! Root Reconciliation (rhizo-rc) - Main entry point
//!
//! Reads per-session root observations, reconciles them into one record per
//! physical root and writes the result as a JSON or TSV report.

use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rhizo_common::config::{load_config, ReportFormat, CONFIG_ENV_VAR};
use rhizo_rc::prompt::query_yes_no;
use rhizo_rc::{writer_for, FieldSchema, JsonSource, Reconciler, ReportHeader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for rhizo-rc
#[derive(Parser, Debug)]
#[command(name = "rhizo-rc")]
#[command(about = "Reconcile root-tube observations into per-root records")]
#[command(version)]
struct Args {
    /// Source document with observation (and optional synthesis) records
    #[arg(short, long)]
    source: PathBuf,

    /// Report file to write
    #[arg(short, long)]
    output: PathBuf,

    /// Report format, overriding the config file
    #[arg(short, long)]
    format: Option<ReportFormat>,

    /// Config file
    #[arg(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Overwrite an existing report without asking
    #[arg(short, long)]
    yes: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref()).context("Failed to load configuration")?;

    // RUST_LOG wins over --verbose, which wins over the config file
    let level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    info!(
        "Starting rhizo-rc v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let schema = FieldSchema::with_custom_fields(&config.custom_fields)
        .context("Invalid custom field configuration")?;

    if !args.source.is_file() {
        bail!("Specified source is not a file: {}", args.source.display());
    }

    if args.output.exists() && !args.yes {
        warn!(path = %args.output.display(), "Specified output file already exists");
        let stdin = io::stdin();
        let overwrite = query_yes_no(
            "Do you want to overwrite that file?",
            false,
            &mut stdin.lock(),
            &mut io::stdout(),
        )?;
        if !overwrite {
            bail!("Not overwriting {}", args.output.display());
        }
    }

    let source = JsonSource::open(&args.source)
        .with_context(|| format!("Failed to read source {}", args.source.display()))?;
    let reconciler = Reconciler::new(schema);
    let summary = reconciler.run(&source)?;

    info!(
        tubes = summary.tubes.len(),
        roots = summary.root_count(),
        skipped = summary.skipped.len(),
        finalize_failures = summary.finalize_failures(),
        unfinalized = summary.unfinalized(),
        "Reconciliation complete"
    );
    for number in &summary.skipped {
        warn!(tube = %number, "Tube skipped");
    }
    if summary.tubes.is_empty() {
        bail!("Was unable to get any tube data");
    }

    let format = args.format.unwrap_or(config.report.format);
    let header = ReportHeader::from_schema(reconciler.schema());
    let writer = writer_for(format, &args.output, &config.report);
    writer
        .write(&summary.tubes, &header)
        .with_context(|| format!("Failed to write report {}", args.output.display()))?;

    info!(path = %args.output.display(), %format, "Done processing all data");
    Ok(())
}
