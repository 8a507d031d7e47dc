// Command line entry point: train or score a batch of transactions, or prepare the SQLite store.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use fraud_scoring::config::PipelineConfig;
use fraud_scoring::storage::{self, Location, PredictionSink};
use fraud_scoring::{pipeline, RunMode};

const DEFAULT_DB_PATH: &str = "transactions.db";
const DEFAULT_TABLE: &str = "transactions";
const DEFAULT_OUTPUT_DB: &str = "fraud_predictions.db";
const DEFAULT_OUTPUT_TABLE: &str = "predictions";

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SourceKind {
    Csv,
    Db,
}

#[derive(Parser)]
#[command(name = "fraud_scoring", version, about = "Batch fraud scoring with a decision tree")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train on labeled input or score unlabeled input
    Run {
        /// CSV file, or SQLite database with --source=db
        input: PathBuf,

        #[arg(long, value_enum, default_value = "csv")]
        source: SourceKind,

        /// Table to read from when --source=db
        #[arg(long, default_value = DEFAULT_TABLE)]
        table: String,

        /// Also write predictions to a SQLite table
        #[arg(long)]
        write_db: bool,

        #[arg(long, default_value = DEFAULT_OUTPUT_DB)]
        output_db: PathBuf,

        #[arg(long, default_value = DEFAULT_OUTPUT_TABLE)]
        output_table: String,

        /// Directory for the report, ROC plot and prediction files
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Fitted pipeline file
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Fraud probability cutoff
        #[arg(long)]
        threshold: Option<f64>,

        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Create the transactions table
    InitDb {
        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,

        #[arg(long, default_value = DEFAULT_TABLE)]
        table: String,
    },
    /// Replace a transactions table with the rows of a CSV file
    ImportCsv {
        csv: PathBuf,

        #[arg(long, default_value = DEFAULT_DB_PATH)]
        db: PathBuf,

        #[arg(long, default_value = DEFAULT_TABLE)]
        table: String,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fraud_scoring=info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            input,
            source,
            table,
            write_db,
            output_db,
            output_table,
            output_dir,
            artifact,
            threshold,
            config,
        } => {
            let mut config = PipelineConfig::load(config.as_deref())?;
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            if let Some(artifact) = artifact {
                config.output.artifact = artifact;
            }
            if let Some(threshold) = threshold {
                config.threshold = threshold;
            }
            config.validate()?;

            let source = match source {
                SourceKind::Csv => Location::csv(input),
                SourceKind::Db => Location::sqlite(input, table),
            };
            let sink = write_db.then(|| Location::sqlite(output_db, output_table));

            info!(%source, threshold = config.threshold, "Starting run");
            let summary = pipeline::run(
                &source,
                &config,
                sink.as_ref().map(|s| s as &dyn PredictionSink),
            )
            .with_context(|| format!("Run over {source} failed"))?;

            match summary.mode {
                RunMode::Train => info!("Model and predictions saved."),
                RunMode::Score => info!("Unlabeled predictions saved."),
            }
            if let Some(sink) = &sink {
                info!(%sink, "Predictions also written to database");
            }
        }
        Command::InitDb { db, table } => {
            storage::init_transactions_table(&db, &table)
                .with_context(|| format!("Failed to create table `{table}`"))?;
        }
        Command::ImportCsv { csv, db, table } => {
            let rows = storage::import_csv(&csv, &db, &table)
                .with_context(|| format!("Failed to import {}", csv.display()))?;
            info!(rows, table = %table, db = %db.display(), "Import complete");
        }
    }

    Ok(())
}
