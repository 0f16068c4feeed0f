//! Feedstage - CSV feed importer

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedstage_common::config::{single_ascii_byte, Config};
use feedstage_common::logging::{init_logging, LogLevel};
use feedstage_ingest::db::{create_pool, run_migrations};
use feedstage_ingest::{ImportOptions, Pipeline, RecordType, RunReport, SourceMetadata};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "feedstage")]
#[command(author, version, about = "Staged CSV feed importer")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "FEEDSTAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a CSV feed of the given record type
    Import {
        /// CSV file to import
        file: PathBuf,

        /// Record type (area, strain)
        #[arg(value_name = "TYPE")]
        record_type: RecordType,

        /// Field delimiter (defaults to import.delimiter)
        #[arg(long)]
        delimiter: Option<String>,

        /// Quote character (defaults to import.quote)
        #[arg(long)]
        quotechar: Option<String>,

        /// Submitter recorded on the source
        #[arg(long, default_value = "")]
        submitted_by: String,

        /// Rows per batch (defaults to import.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Process the pending rows of an interrupted import
    Resume {
        /// Source id printed by the interrupted import
        source_id: i64,
    },

    /// Apply database migrations
    Migrate,

    /// List supported record types
    Types,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.verbose {
        config.logging.level = LogLevel::Debug;
    }
    let _guard = init_logging(&config.logging)?;

    match cli.command {
        Command::Import {
            file,
            record_type,
            delimiter,
            quotechar,
            submitted_by,
            batch_size,
        } => {
            let delimiter = delimiter.unwrap_or_else(|| config.import.delimiter.clone());
            let quote = quotechar.unwrap_or_else(|| config.import.quote.clone());
            let options = ImportOptions {
                delimiter: single_ascii_byte("--delimiter", &delimiter)?,
                quote: single_ascii_byte("--quotechar", &quote)?,
                metadata: SourceMetadata {
                    filename: display_name(&file),
                    submitted_by,
                    ..Default::default()
                },
            };

            let reader = tokio::fs::File::open(&file)
                .await
                .with_context(|| format!("Failed to open {}", file.display()))?;

            let pool = create_pool(&config.database).await?;
            let pipeline =
                Pipeline::new(pool).with_batch_size(batch_size.unwrap_or(config.import.batch_size));

            info!(file = %file.display(), record_type = %record_type, "Importing feed");
            let report = pipeline.run(record_type, reader, &options).await?;
            print_report(&report);
        },
        Command::Resume { source_id } => {
            let pool = create_pool(&config.database).await?;
            let report = Pipeline::new(pool)
                .with_batch_size(config.import.batch_size)
                .resume(source_id)
                .await?;
            print_report(&report);
        },
        Command::Migrate => {
            let pool = create_pool(&config.database).await?;
            run_migrations(&pool).await?;
            println!("Migrations applied");
        },
        Command::Types => {
            for record_type in RecordType::ALL {
                let descriptor = record_type.descriptor();
                println!(
                    "{:<8} staging={:<12} table={:<10} key={}",
                    record_type.tag(),
                    descriptor.staging_table,
                    descriptor.table,
                    descriptor.key_field().name
                );
            }
        },
    }

    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_report(report: &RunReport) {
    println!("source:   {}", report.source_id);
    println!("staged:   {}", report.rows_staged);
    println!(
        "inserted: {} ({} failed validation)",
        report.inserts.rows_inserted, report.inserts.rows_failed
    );
    println!(
        "deleted:  {} ({} not found)",
        report.deletes.rows_deleted, report.deletes.rows_missing
    );
}
