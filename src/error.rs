// ⚠️ Error taxonomy for the import pipeline
// File-level failures abort one file, row-level failures skip one row

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::Role;

// ============================================================================
// FILE / BATCH LEVEL
// ============================================================================

#[derive(Debug, Error)]
pub enum IngestError {
    /// Header lacks one or more mandatory roles (date, amount, description)
    #[error("CSV format not recognized: missing {} column(s)", format_roles(.missing))]
    SchemaIncomplete { missing: Vec<Role> },

    #[error("CSV file is empty or has no header row")]
    MissingHeader,

    #[error("No CSV files found in {}", .dir.display())]
    NoCsvFiles { dir: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

fn format_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(|r| r.name())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// ROW LEVEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowErrorKind {
    #[error("expected at least {expected} columns, found {found}")]
    RowTooShort { expected: usize, found: usize },

    #[error("invalid date '{0}'")]
    InvalidDate(String),

    #[error("invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("store write failed: {0}")]
    StoreWriteFailed(String),

    #[error("malformed record: {0}")]
    MalformedRecord(String),
}

/// A row-level failure tagged with its 1-based data row number
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Row {row}: {kind}")]
pub struct RowError {
    pub row: usize,
    pub kind: RowErrorKind,
}

impl RowError {
    pub fn new(row: usize, kind: RowErrorKind) -> Self {
        RowError { row, kind }
    }
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_error_display_names_row() {
        let err = RowError::new(2, RowErrorKind::InvalidDate("31/31/2024".to_string()));
        assert_eq!(err.to_string(), "Row 2: invalid date '31/31/2024'");
    }

    #[test]
    fn test_schema_incomplete_lists_roles() {
        let err = IngestError::SchemaIncomplete {
            missing: vec![Role::Date, Role::Amount],
        };
        assert_eq!(
            err.to_string(),
            "CSV format not recognized: missing date, amount column(s)"
        );
    }
}
