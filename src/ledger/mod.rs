//! SQLite-backed store for lots, sales, transactions and accounts.
//!
//! Every operation opens its own connection. Writers run inside
//! `BEGIN IMMEDIATE`, so the database write lock is held from the first read
//! of a lot until commit; readers never take it.

pub(crate) mod lots;
mod schema;
mod transactions;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, TransactionBehavior};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::Result;

pub use transactions::{
    AccountFee, NewAccountFee, NewTransactionRow, SortField, SortOrder, StockAccount,
    TransactionFilter, TransactionRow,
};

pub struct Ledger {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Ledger {
    /// Opens (creating if needed) the ledger database at `path`.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Ledger> {
        let ledger = Ledger {
            path: path.to_path_buf(),
            busy_timeout,
        };
        let conn = ledger.connect()?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.execute_batch(schema::SCHEMA)?;
        debug!(path = %path.display(), "ledger schema ready");
        Ok(ledger)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    /// Runs `f` in a write transaction. Commits when `f` succeeds; any error
    /// rolls back every change `f` made.
    pub fn write<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&LedgerTx<'_>) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let ledger_tx = LedgerTx { tx };
        let value = f(&ledger_tx)?;
        ledger_tx.tx.commit()?;
        Ok(value)
    }

    /// Runs `f` against a consistent snapshot. Nothing is committed.
    pub fn read<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&LedgerTx<'_>) -> Result<T>,
    {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let ledger_tx = LedgerTx { tx };
        // bound so the transaction drops before `conn`
        #[allow(clippy::let_and_return)]
        let value = f(&ledger_tx);
        value
    }
}

/// An open database transaction on the ledger.
pub struct LedgerTx<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl<'c> LedgerTx<'c> {
    fn conn(&self) -> &rusqlite::Transaction<'c> {
        &self.tx
    }
}

pub(crate) fn decimal_sql(value: Decimal) -> String {
    value.normalize().to_string()
}

/// Fixed-width nanosecond text, so text order is chronological order.
pub(crate) fn datetime_sql(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn optional_decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        Decimal::from_str(&t)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}

pub(crate) fn datetime_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_column<T: FromStr<Err = String>>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn stored_dates_sort_chronologically_as_text() {
        let early = datetime_sql(Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap());
        let late = datetime_sql(Utc.with_ymd_and_hms(2024, 10, 1, 0, 0, 0).unwrap());
        assert_eq!(early, "2024-09-01T00:00:00.000000000Z");
        assert!(early < late);

        let second = Utc.with_ymd_and_hms(2024, 9, 1, 10, 0, 0).unwrap();
        let first = datetime_sql(second + chrono::Duration::milliseconds(100));
        let later = datetime_sql(second + chrono::Duration::milliseconds(900));
        assert!(first < later);
    }

    #[test]
    fn decimals_are_stored_without_trailing_zeros() {
        assert_eq!(decimal_sql(dec!(12.500)), "12.5");
        assert_eq!(decimal_sql(dec!(0.00)), "0");
    }

    #[test]
    fn failed_write_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&dir.path().join("ledger.db"), Duration::from_secs(1)).unwrap();

        let result: Result<()> = ledger.write(|tx| {
            tx.insert_account("u1", "acc-1", "Main", None)?;
            Err(LedgerError::validation("boom"))
        });
        assert!(result.is_err());

        let accounts = ledger.read(|tx| tx.accounts_for_user("u1")).unwrap();
        assert!(accounts.is_empty());
    }
}
