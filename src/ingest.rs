// 📥 Batch Ingestor - file / directory → normalized rows → store upserts
// Best-effort per row: nothing here is transactional across rows

use csv::ReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::db::{TransactionStore, UpsertOutcome};
use crate::error::{IngestError, RowError, RowErrorKind};
use crate::fields::AmountFormat;
use crate::normalizer::RowNormalizer;
use crate::schema::{detect_schema, sniff_delimiter};

/// How many row errors a summary keeps verbatim
pub const MAX_REPORTED_ERRORS: usize = 5;

// ============================================================================
// BOUNDED ERROR LOG
// ============================================================================

/// Keeps the first `capacity` messages and only counts the rest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorLog {
    entries: Vec<String>,
    capacity: usize,
    overflow: usize,
}

impl ErrorLog {
    pub fn with_capacity(capacity: usize) -> Self {
        ErrorLog {
            entries: Vec::with_capacity(capacity),
            capacity,
            overflow: 0,
        }
    }

    pub fn push(&mut self, message: String) {
        if self.entries.len() < self.capacity {
            self.entries.push(message);
        } else {
            self.overflow += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.entries.len() + self.overflow
    }

    pub fn into_parts(self) -> (Vec<String>, usize) {
        (self.entries, self.overflow)
    }
}

impl Default for ErrorLog {
    fn default() -> Self {
        ErrorLog::with_capacity(MAX_REPORTED_ERRORS)
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

/// Aggregate result of one import call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    /// Rows inserted or updated; unchanged rows are not counted
    pub processed_count: usize,
    /// Data rows read, header excluded, failures included
    pub total_row_count: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// At most `MAX_REPORTED_ERRORS` messages
    pub errors: Vec<String>,
    /// Errors beyond the reported ones
    pub additional_errors: usize,
    /// Directory mode only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_processed: Option<usize>,
}

impl ImportSummary {
    /// Rows that normalized successfully, whatever the store did with them
    pub fn normalized_count(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    pub fn message(&self) -> String {
        let mut message = match self.files_processed {
            Some(files) => format!(
                "Successfully processed {} files and imported {} transactions",
                files, self.processed_count
            ),
            None => format!(
                "Successfully imported {} of {} transactions",
                self.processed_count, self.total_row_count
            ),
        };
        if self.additional_errors > 0 {
            message.push_str(&format!(" and {} more errors", self.additional_errors));
        }
        message
    }
}

/// Running per-file / per-batch counters
#[derive(Debug, Default)]
struct Tally {
    total_rows: usize,
    inserted: usize,
    updated: usize,
    unchanged: usize,
}

impl Tally {
    fn absorb(&mut self, other: &Tally) {
        self.total_rows += other.total_rows;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
    }

    fn normalized(&self) -> usize {
        self.inserted + self.updated + self.unchanged
    }

    fn into_summary(self, errors: ErrorLog, files_processed: Option<usize>) -> ImportSummary {
        let (errors, additional_errors) = errors.into_parts();
        ImportSummary {
            processed_count: self.inserted + self.updated,
            total_row_count: self.total_rows,
            inserted: self.inserted,
            updated: self.updated,
            unchanged: self.unchanged,
            errors,
            additional_errors,
            files_processed,
        }
    }
}

// ============================================================================
// INGESTOR
// ============================================================================

/// Parsing knobs that vary between statement exports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    pub amount_format: AmountFormat,
}

/// Drives imports against an injected store
pub struct Ingestor<S: TransactionStore> {
    store: S,
    options: ParseOptions,
}

impl<S: TransactionStore> Ingestor<S> {
    pub fn new(store: S, options: ParseOptions) -> Self {
        Ingestor { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Import one CSV file held in memory.
    ///
    /// Schema failures are returned as errors; row failures land in the
    /// summary.
    pub fn import_file(
        &self,
        owner_id: &str,
        data: &[u8],
        source: &str,
    ) -> Result<ImportSummary, IngestError> {
        let mut errors = ErrorLog::default();
        let tally = self.ingest_bytes(owner_id, data, source, &mut errors, None)?;

        let summary = tally.into_summary(errors, None);
        info!(
            owner_id,
            source,
            processed = summary.processed_count,
            total = summary.total_row_count,
            "{}",
            summary.message()
        );
        Ok(summary)
    }

    /// Import every `*.csv` directly inside `dir`, in file-name order.
    ///
    /// Unreadable or unrecognized files are skipped; they show up in the
    /// error list but never fail the batch.
    pub fn import_directory(
        &self,
        owner_id: &str,
        dir: &Path,
        source: &str,
    ) -> Result<ImportSummary, IngestError> {
        let files = list_csv_files(dir)?;
        if files.is_empty() {
            return Err(IngestError::NoCsvFiles {
                dir: dir.to_path_buf(),
            });
        }

        let mut errors = ErrorLog::default();
        let mut batch = Tally::default();
        let mut files_processed = 0;

        for path in &files {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown.csv")
                .to_string();

            let data = match fs::read(path) {
                Ok(data) => data,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unreadable file");
                    errors.push(format!("{}: {}", name, e));
                    continue;
                }
            };

            match self.ingest_bytes(owner_id, &data, source, &mut errors, Some(&name)) {
                Ok(tally) => {
                    if tally.normalized() > 0 {
                        files_processed += 1;
                    }
                    batch.absorb(&tally);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping file");
                    errors.push(format!("{}: {}", name, e));
                }
            }
        }

        let summary = batch.into_summary(errors, Some(files_processed));
        info!(
            owner_id,
            source,
            dir = %dir.display(),
            files = files.len(),
            "{}",
            summary.message()
        );
        Ok(summary)
    }

    /// One file, header first. `file` prefixes error messages in
    /// directory mode.
    fn ingest_bytes(
        &self,
        owner_id: &str,
        data: &[u8],
        source: &str,
        errors: &mut ErrorLog,
        file: Option<&str>,
    ) -> Result<Tally, IngestError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(sniff_delimiter(data))
            .from_reader(data);

        let mut records = reader.records();
        let header = match records.next() {
            Some(header) => header?,
            None => return Err(IngestError::MissingHeader),
        };
        debug!(?header, "CSV headers");

        let mapping = detect_schema(&header.iter().collect::<Vec<_>>())?;
        let normalizer = RowNormalizer::new(mapping, owner_id, source, self.options.amount_format);

        let mut tally = Tally::default();
        let mut record_error = |err: RowError| {
            warn!(error = %err, "Skipping row");
            errors.push(match file {
                Some(name) => format!("{}: {}", name, err),
                None => err.to_string(),
            });
        };

        for (index, result) in records.enumerate() {
            let row_number = index + 1;
            tally.total_rows += 1;

            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    record_error(RowError::new(
                        row_number,
                        RowErrorKind::MalformedRecord(e.to_string()),
                    ));
                    continue;
                }
            };

            let cells: Vec<&str> = record.iter().collect();
            let tx = match normalizer.normalize(&cells, row_number) {
                Ok(tx) => tx,
                Err(err) => {
                    record_error(err);
                    continue;
                }
            };

            match self.store.upsert_by_natural_key(&tx) {
                Ok(UpsertOutcome::Inserted) => {
                    tally.inserted += 1;
                    debug!(row = row_number, "Inserted new transaction");
                }
                Ok(UpsertOutcome::Updated) => {
                    tally.updated += 1;
                    debug!(row = row_number, "Updated existing transaction");
                }
                Ok(UpsertOutcome::Unchanged) => {
                    tally.unchanged += 1;
                    debug!(row = row_number, "Transaction already exists and is identical");
                }
                Err(e) => record_error(RowError::new(
                    row_number,
                    RowErrorKind::StoreWriteFailed(e.to_string()),
                )),
            }
        }

        Ok(tally)
    }
}

fn list_csv_files(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    let entries = fs::read_dir(dir)?.map(|entry| entry.map(|e| e.path()));
    Ok(collect_csv_paths(entries))
}

/// Sorted `*.csv` files among `entries`; entries that fail to read are skipped
fn collect_csv_paths<I>(entries: I) -> Vec<PathBuf>
where
    I: IntoIterator<Item = io::Result<PathBuf>>,
{
    let mut files = Vec::new();
    for entry in entries {
        let path = match entry {
            Ok(path) => path,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if is_csv && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        CanonicalTransaction, SqliteStore, StoreResult, StoredTransaction, TransactionFilter,
    };
    use crate::error::StoreError;
    use crate::fields::Direction;
    use chrono::NaiveDate;

    const NUBANK_HEADER: &str = "Data,Descrição,Valor,Identificador\n";

    fn ingestor() -> Ingestor<SqliteStore> {
        Ingestor::new(SqliteStore::open_in_memory().unwrap(), ParseOptions::default())
    }

    #[test]
    fn test_error_log_caps_entries() {
        let mut log = ErrorLog::with_capacity(2);
        for i in 0..5 {
            log.push(format!("e{}", i));
        }
        assert_eq!(log.total(), 5);
        let (entries, overflow) = log.into_parts();
        assert_eq!(entries, vec!["e0", "e1"]);
        assert_eq!(overflow, 3);
    }

    #[test]
    fn test_end_to_end_nubank_row() {
        let ingestor = ingestor();
        let csv = format!("{}15/03/2024,Grocery Store,-150,50\n", NUBANK_HEADER);

        let summary = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.total_row_count, 1);
        assert!(summary.errors.is_empty());
        assert_eq!(summary.files_processed, None);

        let stored = ingestor
            .store()
            .find_by_owner("u1", &TransactionFilter::default())
            .unwrap();
        assert_eq!(stored.len(), 1);
        let tx = &stored[0].transaction;
        assert_eq!(tx.occurred_on, NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(tx.description, "Grocery Store");
        assert_eq!(tx.amount, 150.0);
        assert_eq!(tx.direction, Direction::Debit);
        assert_eq!(tx.category, "50");
        assert_eq!(tx.source, "nubank");
    }

    #[test]
    fn test_quoted_decimal_comma() {
        let ingestor = ingestor();
        let csv = format!("{}15/03/2024,Grocery Store,\"-150,50\",\n", NUBANK_HEADER);

        ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        let stored = ingestor
            .store()
            .find_by_owner("u1", &TransactionFilter::default())
            .unwrap();
        assert!((stored[0].transaction.amount - 150.50).abs() < 1e-9);
        assert_eq!(stored[0].transaction.category, "Uncategorized");
    }

    #[test]
    fn test_semicolon_delimited_file() {
        let ingestor = ingestor();
        let csv = "Data;Descrição;Valor\n01/02/2024;Padaria;-12,30\n02/02/2024;Pix recebido;1.000,00\n";

        let summary = ingestor.import_file("u1", csv.as_bytes(), "bank").unwrap();
        assert_eq!(summary.processed_count, 2);

        let credits = TransactionFilter {
            direction: Some(Direction::Credit),
            ..Default::default()
        };
        let stored = ingestor.store().find_by_owner("u1", &credits).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].transaction.amount, 1000.0);
    }

    #[test]
    fn test_malformed_row_isolation() {
        let ingestor = ingestor();
        let csv = format!(
            "{}01/03/2024,Coffee,-5,\nnot-a-date,Lunch,-20,\n03/03/2024,Dinner,-40,\n",
            NUBANK_HEADER
        );

        let summary = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(summary.processed_count, 2);
        assert_eq!(summary.total_row_count, 3);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].starts_with("Row 2:"), "{}", summary.errors[0]);
    }

    #[test]
    fn test_undecodable_record_is_row_error() {
        let ingestor = ingestor();
        let mut csv = NUBANK_HEADER.as_bytes().to_vec();
        csv.extend_from_slice(b"01/03/2024,Caf\xe9,-5,\n02/03/2024,Tea,-3,\n");

        let summary = ingestor.import_file("u1", &csv, "nubank").unwrap();
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.total_row_count, 2);
        assert_eq!(summary.errors.len(), 1);
        assert!(
            summary.errors[0].starts_with("Row 1: malformed record"),
            "{}",
            summary.errors[0]
        );

        let stored = ingestor
            .store()
            .find_by_owner("u1", &TransactionFilter::default())
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].transaction.description, "Tea");
    }

    #[test]
    fn test_two_digit_year_row_is_rejected() {
        let ingestor = ingestor();
        let csv = "Data,Descrição,Valor\n15/03/24,Old,-1\n15/03/2024,New,-1\n";

        let summary = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.errors, vec!["Row 1: invalid date '15/03/24'"]);
    }

    #[test]
    fn test_unreadable_directory_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.csv");
        let other = dir.path().join("b.txt");
        fs::write(&good, NUBANK_HEADER).unwrap();
        fs::write(&other, "x").unwrap();

        let entries = vec![
            Ok(other),
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied")),
            Ok(good.clone()),
        ];
        assert_eq!(collect_csv_paths(entries), vec![good]);
    }

    #[test]
    fn test_missing_amount_column_fails_file() {
        let ingestor = ingestor();
        let csv = "Data,Descrição,Identificador\n01/03/2024,Coffee,x\n";

        let err = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap_err();
        assert!(matches!(err, IngestError::SchemaIncomplete { .. }));
        assert_eq!(ingestor.store().verify_count().unwrap(), 0);
    }

    #[test]
    fn test_empty_file_is_missing_header() {
        let err = ingestor().import_file("u1", b"", "nubank").unwrap_err();
        assert!(matches!(err, IngestError::MissingHeader));
    }

    #[test]
    fn test_reimport_is_idempotent() {
        let ingestor = ingestor();
        let csv = format!(
            "{}01/03/2024,Coffee,-5,\n02/03/2024,Lunch,-20,\n03/03/2024,Salary,\"3.000,00\",\n",
            NUBANK_HEADER
        );

        let first = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(first.processed_count, 3);
        assert_eq!(first.inserted, 3);

        let second = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(second.processed_count, 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(ingestor.store().verify_count().unwrap(), 3);
    }

    #[test]
    fn test_duplicate_key_keeps_latest_row() {
        let ingestor = ingestor();
        let csv = format!(
            "{}01/03/2024,Coffee,-5,first\n01/03/2024,Coffee,-5,second\n",
            NUBANK_HEADER
        );

        let summary = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.updated, 1);
        assert_eq!(summary.processed_count, 2);

        let stored = ingestor
            .store()
            .find_by_owner("u1", &TransactionFilter::default())
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].transaction.category, "second");
    }

    #[test]
    fn test_errors_are_capped_at_five() {
        let ingestor = ingestor();
        let mut csv = NUBANK_HEADER.to_string();
        for _ in 0..8 {
            csv.push_str("bad,Coffee,-5,\n");
        }
        csv.push_str("01/03/2024,Coffee,-5,\n");

        let summary = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(summary.errors.len(), MAX_REPORTED_ERRORS);
        assert_eq!(summary.additional_errors, 3);
        assert_eq!(summary.processed_count, 1);
        assert_eq!(summary.total_row_count, 9);
        assert_eq!(
            summary.message(),
            "Successfully imported 1 of 9 transactions and 3 more errors"
        );
    }

    #[test]
    fn test_short_row_reported() {
        let ingestor = ingestor();
        let csv = format!("{}01/03/2024,Coffee\n", NUBANK_HEADER);

        let summary = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(summary.processed_count, 0);
        assert_eq!(summary.errors, vec!["Row 1: expected at least 3 columns, found 2"]);
    }

    /// Store that rejects every write
    struct BrokenStore;

    impl TransactionStore for BrokenStore {
        fn upsert_by_natural_key(&self, _tx: &CanonicalTransaction) -> StoreResult<UpsertOutcome> {
            Err(StoreError::Poisoned)
        }

        fn find_by_owner(
            &self,
            _owner_id: &str,
            _filter: &TransactionFilter,
        ) -> StoreResult<Vec<StoredTransaction>> {
            Ok(Vec::new())
        }

        fn count_by_owner(&self, _owner_id: &str, _filter: &TransactionFilter) -> StoreResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_store_failures_are_row_errors() {
        let ingestor = Ingestor::new(BrokenStore, ParseOptions::default());
        let csv = format!("{}01/03/2024,Coffee,-5,\n02/03/2024,Tea,-3,\n", NUBANK_HEADER);

        let summary = ingestor.import_file("u1", csv.as_bytes(), "nubank").unwrap();
        assert_eq!(summary.processed_count, 0);
        assert_eq!(summary.total_row_count, 2);
        assert_eq!(summary.errors.len(), 2);
        assert!(summary.errors[1].starts_with("Row 2: store write failed"));
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = ImportSummary {
            processed_count: 1,
            total_row_count: 2,
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["processedCount"], 1);
        assert_eq!(json["totalRowCount"], 2);
        assert!(json.get("filesProcessed").is_none());
    }
}
