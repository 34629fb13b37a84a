// Statement Ingest - Core Library
// CSV bank statements → canonical transactions → deduplicated store
// Exposes all modules for use in the CLI, the API server, and tests

pub mod config;
pub mod db;
pub mod error;
pub mod fields;
pub mod ingest;
pub mod normalizer;
pub mod schema;

// Re-export commonly used types
pub use config::{init_logging, Config};
pub use db::{
    CanonicalTransaction, SqliteStore, StoredTransaction, TransactionFilter, TransactionStore,
    UpsertOutcome, setup_database,
};
pub use error::{IngestError, RowError, RowErrorKind, StoreError};
pub use fields::{parse_amount, parse_date, AmountFormat, Direction, ParsedAmount};
pub use ingest::{ErrorLog, ImportSummary, Ingestor, ParseOptions, MAX_REPORTED_ERRORS};
pub use normalizer::{RowNormalizer, UNCATEGORIZED};
pub use schema::{detect_schema, sniff_delimiter, Role, SchemaMapping};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
