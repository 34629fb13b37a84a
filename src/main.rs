use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;

use statement_ingest::{
    init_logging, AmountFormat, Config, Direction, ImportSummary, Ingestor, SqliteStore,
    TransactionFilter, TransactionStore,
};

#[derive(Parser, Debug)]
#[command(name = "statement-ingest", version, about = "Import bank statement CSVs into a deduplicated store")]
struct Cli {
    /// SQLite database file (defaults to $DATABASE_PATH or transactions.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Separator convention of the amounts: brazilian (1.234,56) or international (1,234.56)
    #[arg(long, global = true)]
    amount_format: Option<AmountFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a single CSV file
    Import {
        #[arg(long)]
        owner: String,
        /// Statement origin tag (defaults to $UPLOAD_SOURCE or "nubank")
        #[arg(long)]
        source: Option<String>,
        file: PathBuf,
    },
    /// Import every *.csv file in a directory
    Scan {
        #[arg(long)]
        owner: String,
        /// Statement origin tag (defaults to $DEFAULT_SOURCE or "import")
        #[arg(long)]
        source: Option<String>,
        dir: PathBuf,
    },
    /// List stored transactions for an owner, newest first
    List {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        from: Option<NaiveDate>,
        #[arg(long)]
        to: Option<NaiveDate>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        direction: Option<Direction>,
        /// Case-insensitive text to look for in description or category
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        offset: Option<usize>,
    },
}

fn main() -> Result<()> {
    init_logging("statement_ingest=info");

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }
    if let Some(format) = cli.amount_format {
        config.amount_format = format;
    }

    let store = SqliteStore::open(&config.database_path).with_context(|| {
        format!("Failed to open database {}", config.database_path.display())
    })?;
    let ingestor = Ingestor::new(store, config.parse_options());

    match cli.command {
        Command::Import { owner, source, file } => {
            let source = source.unwrap_or_else(|| config.upload_source.clone());
            let data = fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = ingestor
                .import_file(&owner, &data, &source)
                .with_context(|| format!("Failed to import {}", file.display()))?;
            print_summary(&summary)?;
        }
        Command::Scan { owner, source, dir } => {
            let source = source.unwrap_or_else(|| config.default_source.clone());
            let summary = ingestor
                .import_directory(&owner, &dir, &source)
                .with_context(|| format!("Failed to scan {}", dir.display()))?;
            print_summary(&summary)?;
        }
        Command::List {
            owner,
            from,
            to,
            category,
            direction,
            search,
            limit,
            offset,
        } => {
            let filter = TransactionFilter {
                start: from,
                end: to,
                category,
                direction,
                search,
                limit,
                offset,
            };
            list_transactions(ingestor.store(), &owner, &filter)?;
        }
    }

    Ok(())
}

fn print_summary(summary: &ImportSummary) -> Result<()> {
    eprintln!("✓ {}", summary.message());
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

fn list_transactions<S: TransactionStore>(
    store: &S,
    owner: &str,
    filter: &TransactionFilter,
) -> Result<()> {
    let total = store.count_by_owner(owner, filter)?;
    let transactions = store.find_by_owner(owner, filter)?;

    for stored in &transactions {
        let tx = &stored.transaction;
        println!(
            "{}  {:<6}  {:>12.2}  {:<20}  {}",
            tx.occurred_on,
            tx.direction.as_str(),
            tx.amount,
            tx.category,
            tx.description
        );
    }
    eprintln!("✓ Showing {} of {} transactions", transactions.len(), total);

    Ok(())
}
