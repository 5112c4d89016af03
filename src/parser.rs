use std::io::Read;
use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::service::{parse_date, NewTransaction, TransactionService};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unable to read transaction sheet: {0}")]
    Csv(#[from] csv::Error),

    #[error("row {line}: {source}")]
    Row {
        line: u64,
        #[source]
        source: LedgerError,
    },
}

/// One line of a transaction sheet.
#[derive(Debug, Deserialize)]
struct TransactionRecord {
    date: String,
    account: Option<String>,
    ticker: String,
    #[serde(rename = "type")]
    tx_type: String,
    quantity: Decimal,
    price: Decimal,
    fee: Option<Decimal>,
    tax_rate: Option<Decimal>,
    notes: Option<String>,
}

impl TransactionRecord {
    fn into_transaction(self) -> Result<NewTransaction, LedgerError> {
        Ok(NewTransaction {
            transaction_type: self.tx_type.parse().map_err(LedgerError::Validation)?,
            transaction_date: parse_date(&self.date)?,
            ticker: self.ticker,
            quantity: self.quantity,
            price: self.price,
            fee: self.fee.unwrap_or(Decimal::ZERO),
            tax_rate: self.tax_rate.unwrap_or(Decimal::ZERO),
            stock_account_id: self.account.filter(|a| !a.trim().is_empty()),
            notes: self.notes.filter(|n| !n.is_empty()),
        })
    }
}

/// Feeds a CSV transaction sheet into the ledger, row by row in file order.
pub struct Parser<'a> {
    service: &'a TransactionService,
    user_id: &'a str,
}

impl<'a> Parser<'a> {
    pub fn new(service: &'a TransactionService, user_id: &'a str) -> Parser<'a> {
        Parser { service, user_id }
    }

    pub fn parse_sheet(&mut self, path: &Path) -> Result<usize, ImportError> {
        let file = std::fs::File::open(path).map_err(csv::Error::from)?;
        self.parse_reader(file)
    }

    /// Stops at the first row that fails; rows before it stay recorded.
    pub fn parse_reader<R: Read>(&mut self, source: R) -> Result<usize, ImportError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let headers = reader.headers()?.clone();
        let mut count = 0;
        for result in reader.records() {
            let row = result?;
            let line = row.position().map(|p| p.line()).unwrap_or_default();
            let record: TransactionRecord = row.deserialize(Some(&headers))?;
            self.parse_row(record)
                .map_err(|source| ImportError::Row { line, source })?;
            count += 1;
        }

        info!(user_id = self.user_id, rows = count, "imported transaction sheet");
        Ok(count)
    }

    fn parse_row(&mut self, record: TransactionRecord) -> Result<(), LedgerError> {
        let transaction = record.into_transaction()?;
        let recorded = self.service.record(self.user_id, transaction)?;
        debug!(transaction_id = recorded.transaction.id, "imported row");
        Ok(())
    }
}
