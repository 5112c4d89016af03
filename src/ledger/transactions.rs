use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::accounting::TransactionType;
use crate::error::{LedgerError, Result};
use crate::ledger::{
    datetime_at, datetime_sql, decimal_at, decimal_sql, optional_decimal_at, parse_column,
    LedgerTx,
};

const TRANSACTION_COLUMNS: &str = "id, user_id, stock_account_id, ticker, type, quantity, price, \
     fee, tax_rate, transaction_date, calculated_pl, notes, created_at";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRow {
    pub id: i64,
    pub user_id: String,
    pub stock_account_id: String,
    pub ticker: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub tax_rate: Decimal,
    pub transaction_date: DateTime<Utc>,
    pub calculated_pl: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        stock_account_id: row.get(2)?,
        ticker: row.get(3)?,
        transaction_type: parse_column::<TransactionType>(row, 4)?,
        quantity: decimal_at(row, 5)?,
        price: decimal_at(row, 6)?,
        fee: decimal_at(row, 7)?,
        tax_rate: decimal_at(row, 8)?,
        transaction_date: datetime_at(row, 9)?,
        calculated_pl: optional_decimal_at(row, 10)?,
        notes: row.get(11)?,
        created_at: datetime_at(row, 12)?,
    })
}

#[derive(Clone, Debug)]
pub struct NewTransactionRow<'a> {
    pub user_id: &'a str,
    pub stock_account_id: &'a str,
    pub ticker: &'a str,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub tax_rate: Decimal,
    pub transaction_date: DateTime<Utc>,
    pub calculated_pl: Option<Decimal>,
    pub notes: Option<&'a str>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAccount {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub broker_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<StockAccount> {
    Ok(StockAccount {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        broker_name: row.get(3)?,
        created_at: datetime_at(row, 4)?,
    })
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFee {
    pub id: i64,
    pub user_id: String,
    pub stock_account_id: String,
    pub amount: Decimal,
    pub fee_date: DateTime<Utc>,
    pub description: Option<String>,
    pub is_active: bool,
}

#[derive(Clone, Debug)]
pub struct NewAccountFee {
    pub stock_account_id: String,
    pub amount: Decimal,
    pub fee_date: DateTime<Utc>,
    pub description: Option<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortField {
    TransactionDate,
    Ticker,
    Type,
    Quantity,
    Price,
    CalculatedPl,
    Fee,
    TaxRate,
}

impl SortField {
    fn column(&self) -> &'static str {
        match self {
            SortField::TransactionDate => "transaction_date",
            SortField::Ticker => "ticker",
            SortField::Type => "type",
            SortField::Quantity => "CAST(quantity AS REAL)",
            SortField::Price => "CAST(price AS REAL)",
            SortField::CalculatedPl => "CAST(calculated_pl AS REAL)",
            SortField::Fee => "CAST(fee AS REAL)",
            SortField::TaxRate => "CAST(tax_rate AS REAL)",
        }
    }
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "transactionDate" => Ok(SortField::TransactionDate),
            "ticker" => Ok(SortField::Ticker),
            "type" => Ok(SortField::Type),
            "quantity" => Ok(SortField::Quantity),
            "price" => Ok(SortField::Price),
            "calculatedPl" => Ok(SortField::CalculatedPl),
            "fee" => Ok(SortField::Fee),
            "taxRate" => Ok(SortField::TaxRate),
            other => Err(format!("cannot sort by \"{}\"", other)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Narrowing applied to a transaction listing. `date_to` is exclusive.
#[derive(Clone, Debug, Default)]
pub struct TransactionFilter {
    pub ticker: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub stock_account_id: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
}

impl TransactionFilter {
    fn where_clause(&self, user_id: &str) -> (String, Vec<Box<dyn ToSql>>) {
        let mut clauses = vec!["user_id = ?".to_string()];
        let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(user_id.to_string())];

        if let Some(transaction_type) = self.transaction_type {
            clauses.push("type = ?".to_string());
            values.push(Box::new(transaction_type.as_str()));
        }
        if let Some(account) = &self.stock_account_id {
            clauses.push("stock_account_id = ?".to_string());
            values.push(Box::new(account.clone()));
        }
        if let Some(ticker) = &self.ticker {
            let ticker = ticker.trim().to_uppercase();
            let escaped = escape_like(&ticker);
            // single letters only match as a prefix, longer input anywhere
            let pattern = if ticker.chars().count() >= 2 {
                format!("%{}%", escaped)
            } else {
                format!("{}%", escaped)
            };
            clauses.push("ticker LIKE ? ESCAPE '\\'".to_string());
            values.push(Box::new(pattern));
        }
        if let Some(from) = self.date_from {
            clauses.push("transaction_date >= ?".to_string());
            values.push(Box::new(datetime_sql(from)));
        }
        if let Some(to) = self.date_to {
            clauses.push("transaction_date < ?".to_string());
            values.push(Box::new(datetime_sql(to)));
        }
        if let Some(min) = self.min_price.and_then(|p| p.to_f64()) {
            clauses.push("CAST(price AS REAL) >= ?".to_string());
            values.push(Box::new(min));
        }
        if let Some(max) = self.max_price.and_then(|p| p.to_f64()) {
            clauses.push("CAST(price AS REAL) <= ?".to_string());
            values.push(Box::new(max));
        }

        (clauses.join(" AND "), values)
    }
}

/// Makes `%`, `_` and `\` match literally under `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl<'c> LedgerTx<'c> {
    pub(crate) fn insert_transaction(&self, row: &NewTransactionRow<'_>) -> Result<TransactionRow> {
        let created_at = Utc::now();
        self.conn().execute(
            "INSERT INTO transactions (user_id, stock_account_id, ticker, type, quantity, price, \
             fee, tax_rate, transaction_date, calculated_pl, notes, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                row.user_id,
                row.stock_account_id,
                row.ticker,
                row.transaction_type.as_str(),
                decimal_sql(row.quantity),
                decimal_sql(row.price),
                decimal_sql(row.fee),
                decimal_sql(row.tax_rate),
                datetime_sql(row.transaction_date),
                row.calculated_pl.map(decimal_sql),
                row.notes,
                datetime_sql(created_at),
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        // re-read so the caller sees exactly what is stored
        let stored = self.transaction(id, row.user_id)?;
        stored.ok_or(LedgerError::Persistence(rusqlite::Error::QueryReturnedNoRows))
    }

    /// A transaction of `user_id`; rows of other users are invisible.
    pub fn transaction(&self, id: i64, user_id: &str) -> Result<Option<TransactionRow>> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE id = ?1 AND user_id = ?2",
            TRANSACTION_COLUMNS
        );
        let row = self
            .conn()
            .query_row(&sql, params![id, user_id], transaction_from_row)
            .optional()?;
        Ok(row)
    }

    pub fn list_transactions(
        &self,
        user_id: &str,
        filter: &TransactionFilter,
        sort: SortField,
        order: SortOrder,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<TransactionRow>> {
        let (where_clause, mut values) = filter.where_clause(user_id);
        let sql = format!(
            "SELECT {} FROM transactions WHERE {} ORDER BY {} {}, id DESC LIMIT ? OFFSET ?",
            TRANSACTION_COLUMNS,
            where_clause,
            sort.column(),
            order.keyword(),
        );
        values.push(Box::new(limit as i64));
        values.push(Box::new(offset as i64));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), transaction_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn count_transactions(&self, user_id: &str, filter: &TransactionFilter) -> Result<u64> {
        let (where_clause, values) = filter.where_clause(user_id);
        let sql = format!("SELECT COUNT(*) FROM transactions WHERE {}", where_clause);
        let count: i64 = self
            .conn()
            .query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn insert_account(
        &self,
        user_id: &str,
        account_id: &str,
        name: &str,
        broker_name: Option<&str>,
    ) -> Result<StockAccount> {
        let created_at = Utc::now().trunc_subsecs(0);
        self.conn().execute(
            "INSERT INTO stock_accounts (id, user_id, name, broker_name, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![account_id, user_id, name, broker_name, datetime_sql(created_at)],
        )?;
        Ok(StockAccount {
            id: account_id.to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            broker_name: broker_name.map(str::to_string),
            created_at,
        })
    }

    pub fn account(&self, account_id: &str) -> Result<Option<StockAccount>> {
        let account = self
            .conn()
            .query_row(
                "SELECT id, user_id, name, broker_name, created_at FROM stock_accounts \
                 WHERE id = ?1",
                params![account_id],
                account_from_row,
            )
            .optional()?;
        Ok(account)
    }

    /// Accounts of a user, oldest first.
    pub fn accounts_for_user(&self, user_id: &str) -> Result<Vec<StockAccount>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, user_id, name, broker_name, created_at FROM stock_accounts \
             WHERE user_id = ?1 ORDER BY created_at, rowid",
        )?;
        let accounts = stmt
            .query_map(params![user_id], account_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub fn insert_account_fee(&self, user_id: &str, fee: &NewAccountFee) -> Result<AccountFee> {
        self.conn().execute(
            "INSERT INTO account_fees (user_id, stock_account_id, amount, fee_date, description) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                fee.stock_account_id,
                decimal_sql(fee.amount),
                datetime_sql(fee.fee_date),
                fee.description,
            ],
        )?;
        Ok(AccountFee {
            id: self.conn().last_insert_rowid(),
            user_id: user_id.to_string(),
            stock_account_id: fee.stock_account_id.clone(),
            amount: fee.amount,
            fee_date: fee.fee_date,
            description: fee.description.clone(),
            is_active: true,
        })
    }

    /// Sum of active account fees matching the account and date narrowing of
    /// `filter`.
    pub fn account_fees_total(&self, user_id: &str, filter: &TransactionFilter) -> Result<Decimal> {
        let mut stmt = self.conn().prepare(
            "SELECT amount FROM account_fees \
             WHERE user_id = ?1 AND is_active = 1 \
             AND (?2 IS NULL OR stock_account_id = ?2) \
             AND (?3 IS NULL OR fee_date >= ?3) \
             AND (?4 IS NULL OR fee_date < ?4)",
        )?;
        let amounts = stmt
            .query_map(
                params![
                    user_id,
                    filter.stock_account_id,
                    filter.date_from.map(datetime_sql),
                    filter.date_to.map(datetime_sql),
                ],
                |row| decimal_at(row, 0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(amounts.into_iter().sum())
    }
}
