use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Mutex;

use crate::error::StoreError;
use crate::fields::Direction;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Canonical, store-ready transaction produced by the import pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalTransaction {
    pub owner_id: String,
    pub occurred_on: NaiveDate,
    pub description: String,
    pub category: String,
    /// Always >= 0; the sign lives in `direction`
    pub amount: f64,
    pub direction: Direction,
    pub source: String,
}

impl CanonicalTransaction {
    /// Digest of the natural key (owner, description, date, amount).
    ///
    /// Fields are length-prefixed so "ab"+"c" and "a"+"bc" never collide.
    /// The amount uses Rust's shortest round-trip rendering, so two rows
    /// parsed from the same text always agree.
    pub fn natural_key(&self) -> String {
        let date = self.occurred_on.format("%Y-%m-%d").to_string();
        let amount = format!("{}", self.amount);

        let mut hasher = Sha256::new();
        for field in [
            self.owner_id.as_str(),
            self.description.as_str(),
            date.as_str(),
            amount.as_str(),
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Mutable fields match, i.e. an upsert would change nothing
    fn same_values(&self, category: &str, direction: Direction, source: &str) -> bool {
        self.category == category && self.direction == direction && self.source == source
    }
}

/// A persisted transaction as returned by queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTransaction {
    /// Stable identity, assigned on first insert
    pub id: String,
    #[serde(flatten)]
    pub transaction: CanonicalTransaction,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome reported by the store for one upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Query filters for owner-scoped reads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionFilter {
    /// Inclusive lower bound
    pub start: Option<NaiveDate>,
    /// Inclusive upper bound
    pub end: Option<NaiveDate>,
    pub category: Option<String>,
    pub direction: Option<Direction>,
    /// Case-insensitive substring over description and category
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

// ============================================================================
// STORE TRAIT
// ============================================================================

/// Durable keyed collection of transactions.
///
/// `upsert_by_natural_key` must be atomic: concurrent imports of the same
/// rows converge to one record without lost updates.
pub trait TransactionStore: Send + Sync {
    fn upsert_by_natural_key(&self, tx: &CanonicalTransaction) -> StoreResult<UpsertOutcome>;

    /// Newest first
    fn find_by_owner(
        &self,
        owner_id: &str,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<StoredTransaction>>;

    /// Number of records matching the filter, ignoring limit/offset
    fn count_by_owner(&self, owner_id: &str, filter: &TransactionFilter) -> StoreResult<usize>;
}

impl<S: TransactionStore + ?Sized> TransactionStore for std::sync::Arc<S> {
    fn upsert_by_natural_key(&self, tx: &CanonicalTransaction) -> StoreResult<UpsertOutcome> {
        (**self).upsert_by_natural_key(tx)
    }

    fn find_by_owner(
        &self,
        owner_id: &str,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<StoredTransaction>> {
        (**self).find_by_owner(owner_id, filter)
    }

    fn count_by_owner(&self, owner_id: &str, filter: &TransactionFilter) -> StoreResult<usize> {
        (**self).count_by_owner(owner_id, filter)
    }
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub fn setup_database(conn: &Connection) -> StoreResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            row_id INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT UNIQUE NOT NULL,
            natural_key TEXT UNIQUE NOT NULL,
            owner_id TEXT NOT NULL,
            occurred_on TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            amount REAL NOT NULL,
            direction TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_owner_date ON transactions(owner_id, occurred_on DESC)",
        [],
    )?;

    Ok(())
}

/// SQLite-backed store. One connection behind a mutex; the process
/// bootstrap opens it and hands it to whoever needs it.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> StoreResult<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }

    /// Total records across all owners
    pub fn verify_count(&self) -> StoreResult<i64> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }
}

const SELECT_COLUMNS: &str = "id, owner_id, occurred_on, description, category, amount,
                              direction, source, created_at, updated_at";

/// WHERE clause and its positional values, shared by find and count
fn filter_clause(owner_id: &str, filter: &TransactionFilter) -> (String, Vec<String>) {
    let mut clause = String::from("owner_id = ?");
    let mut values = vec![owner_id.to_string()];

    if let Some(start) = filter.start {
        clause.push_str(" AND occurred_on >= ?");
        values.push(start.format("%Y-%m-%d").to_string());
    }
    if let Some(end) = filter.end {
        clause.push_str(" AND occurred_on <= ?");
        values.push(end.format("%Y-%m-%d").to_string());
    }
    if let Some(category) = &filter.category {
        clause.push_str(" AND category = ?");
        values.push(category.clone());
    }
    if let Some(direction) = filter.direction {
        clause.push_str(" AND direction = ?");
        values.push(direction.as_str().to_string());
    }
    if let Some(search) = &filter.search {
        clause.push_str(" AND (instr(lower(description), ?) > 0 OR instr(lower(category), ?) > 0)");
        let needle = search.to_lowercase();
        values.push(needle.clone());
        values.push(needle);
    }

    (clause, values)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupt(idx, e.to_string()))
}

fn corrupt(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn row_to_stored(row: &Row) -> rusqlite::Result<StoredTransaction> {
    let occurred_on: String = row.get(2)?;
    let direction: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;

    Ok(StoredTransaction {
        id: row.get(0)?,
        transaction: CanonicalTransaction {
            owner_id: row.get(1)?,
            occurred_on: NaiveDate::parse_from_str(&occurred_on, "%Y-%m-%d")
                .map_err(|e| corrupt(2, e.to_string()))?,
            description: row.get(3)?,
            category: row.get(4)?,
            amount: row.get(5)?,
            direction: direction.parse().map_err(|e| corrupt(6, e))?,
            source: row.get(7)?,
        },
        created_at: parse_timestamp(8, &created_at)?,
        updated_at: parse_timestamp(9, &updated_at)?,
    })
}

impl TransactionStore for SqliteStore {
    fn upsert_by_natural_key(&self, tx: &CanonicalTransaction) -> StoreResult<UpsertOutcome> {
        let key = tx.natural_key();
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        // IMMEDIATE takes the write lock up front, so read-then-write cannot
        // interleave with another connection to the same file
        let db_tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: Option<(String, String, String)> = db_tx
            .query_row(
                "SELECT category, direction, source FROM transactions WHERE natural_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let outcome = match existing {
            None => {
                db_tx.execute(
                    "INSERT INTO transactions (
                        id, natural_key, owner_id, occurred_on, description, category,
                        amount, direction, source, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        key,
                        tx.owner_id,
                        tx.occurred_on.format("%Y-%m-%d").to_string(),
                        tx.description,
                        tx.category,
                        tx.amount,
                        tx.direction.as_str(),
                        tx.source,
                        now,
                    ],
                )?;
                UpsertOutcome::Inserted
            }
            Some((category, direction, source)) => {
                let direction: Direction = direction.parse().map_err(StoreError::Corrupt)?;
                if tx.same_values(&category, direction, &source) {
                    UpsertOutcome::Unchanged
                } else {
                    db_tx.execute(
                        "UPDATE transactions
                         SET category = ?1, direction = ?2, source = ?3, updated_at = ?4
                         WHERE natural_key = ?5",
                        params![tx.category, tx.direction.as_str(), tx.source, now, key],
                    )?;
                    UpsertOutcome::Updated
                }
            }
        };

        db_tx.commit()?;
        Ok(outcome)
    }

    fn find_by_owner(
        &self,
        owner_id: &str,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<StoredTransaction>> {
        let (clause, values) = filter_clause(owner_id, filter);
        let mut sql = format!(
            "SELECT {} FROM transactions WHERE {} ORDER BY occurred_on DESC, row_id ASC",
            SELECT_COLUMNS, clause
        );
        // SQLite needs a LIMIT before OFFSET; -1 means unbounded
        if filter.limit.is_some() || filter.offset.is_some() {
            let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, filter.offset.unwrap_or(0)));
        }

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt = conn.prepare(&sql)?;
        let transactions = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), row_to_stored)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(transactions)
    }

    fn count_by_owner(&self, owner_id: &str, filter: &TransactionFilter) -> StoreResult<usize> {
        let (clause, values) = filter_clause(owner_id, filter);
        let sql = format!("SELECT COUNT(*) FROM transactions WHERE {}", clause);

        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let count: i64 =
            conn.query_row(&sql, rusqlite::params_from_iter(values.iter()), |row| row.get(0))?;

        Ok(count as usize)
    }
}
