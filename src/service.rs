//! Records transactions: validation, account resolution, the cost-basis
//! engine and the transaction row, all inside one ledger write.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::accounting::reports::{ProfitStats, RealizedGainsReport};
use crate::accounting::{
    normalize_ticker, Accountant, LotKey, Position, Purchase, PurchaseLot, Sale, SaleConsumption,
    SaleOutcome, SaleRecord, TransactionType,
};
use crate::accounts::{self, AccountLookup, DefaultAccountLookup};
use crate::config::Config;
use crate::error::{LedgerError, Result};
use crate::ledger::{
    AccountFee, Ledger, NewAccountFee, NewTransactionRow, SortField, SortOrder, StockAccount,
    TransactionFilter, TransactionRow,
};

pub const MAX_PAGE_SIZE: u64 = 100;

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(datetime) = DateTime::parse_from_rfc3339(value) {
        return Ok(datetime.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| LedgerError::validation(format!("invalid date \"{}\"", value)))
}

/// Exclusive upper bound covering the whole day `value` falls on.
pub fn end_of_day(value: &str) -> Result<DateTime<Utc>> {
    let start = parse_date(value)?;
    let midnight = start
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(start);
    Ok(midnight + Duration::days(1))
}

/// A transaction as submitted, already decoded into typed fields.
#[derive(Clone, Debug)]
pub struct NewTransaction {
    pub ticker: String,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub tax_rate: Decimal,
    pub transaction_date: DateTime<Utc>,
    pub stock_account_id: Option<String>,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedTransaction {
    #[serde(flatten)]
    pub transaction: TransactionRow,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_lot: Option<PurchaseLot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sale: Option<SaleOutcome>,
}

#[derive(Clone, Debug)]
pub struct TransactionQuery {
    pub filter: TransactionFilter,
    pub sort: SortField,
    pub order: SortOrder,
    pub page: u64,
    pub page_size: u64,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        TransactionQuery {
            filter: TransactionFilter::default(),
            sort: SortField::TransactionDate,
            order: SortOrder::Desc,
            page: 1,
            page_size: 10,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionPage {
    pub transactions: Vec<TransactionRow>,
    pub total_count: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
    pub profit_stats: ProfitStats,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleAudit {
    pub sale: SaleRecord,
    pub consumptions: Vec<SaleConsumption>,
}

pub struct TransactionService {
    ledger: Ledger,
    accountant: Accountant,
    accounts: Box<dyn AccountLookup>,
    rounding_scale: u32,
}

impl TransactionService {
    pub fn new(ledger: Ledger, config: &Config) -> TransactionService {
        TransactionService {
            ledger,
            accountant: Accountant::from_config(config),
            accounts: Box::new(DefaultAccountLookup::new(&config.default_account_name)),
            rounding_scale: config.rounding_scale,
        }
    }

    pub fn with_account_lookup(mut self, accounts: Box<dyn AccountLookup>) -> TransactionService {
        self.accounts = accounts;
        self
    }

    /// Runs the engine and writes the transaction row atomically. On any
    /// error the ledger is left exactly as before.
    pub fn record(&self, user_id: &str, input: NewTransaction) -> Result<RecordedTransaction> {
        let ticker = normalize_ticker(&input.ticker);
        if ticker.is_empty() {
            return Err(LedgerError::validation("ticker is required"));
        }
        if input.tax_rate < Decimal::ZERO || input.tax_rate > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation("tax rate must be between 0 and 100"));
        }

        let recorded = self.ledger.write(|tx| {
            let account_id =
                self.accounts
                    .resolve(tx, user_id, input.stock_account_id.as_deref())?;
            let key = LotKey::new(user_id, &account_id, &ticker);

            let (calculated_pl, purchase_lot, sale) = match input.transaction_type {
                TransactionType::Buy => {
                    let lot = self.accountant.process_buy_transaction(
                        tx,
                        &key,
                        Purchase {
                            quantity: input.quantity,
                            price: input.price,
                            fee: input.fee,
                            datetime: input.transaction_date,
                        },
                    )?;
                    (Decimal::ZERO, Some(lot), None)
                }
                TransactionType::Sell => {
                    let outcome = self.accountant.process_sell_transaction(
                        tx,
                        &key,
                        Sale {
                            quantity: input.quantity,
                            price: input.price,
                            fee: input.fee,
                            tax_rate: input.tax_rate,
                            datetime: input.transaction_date,
                        },
                    )?;
                    (outcome.profit_or_loss, None, Some(outcome))
                }
            };

            let transaction = tx.insert_transaction(&NewTransactionRow {
                user_id,
                stock_account_id: &account_id,
                ticker: &ticker,
                transaction_type: input.transaction_type,
                quantity: input.quantity,
                price: input.price,
                fee: input.fee,
                tax_rate: input.tax_rate,
                transaction_date: input.transaction_date,
                calculated_pl: Some(calculated_pl),
                notes: input.notes.as_deref(),
            })?;

            let purchase_lot = match purchase_lot {
                Some(lot) => {
                    tx.link_lot(lot.id, transaction.id)?;
                    Some(PurchaseLot {
                        transaction_id: Some(transaction.id),
                        ..lot
                    })
                }
                None => None,
            };
            if let Some(outcome) = &sale {
                tx.link_sale(outcome.sale_id, transaction.id)?;
            }

            Ok(RecordedTransaction {
                transaction,
                purchase_lot,
                sale,
            })
        })?;

        info!(
            user_id,
            transaction_id = recorded.transaction.id,
            ticker = %recorded.transaction.ticker,
            kind = %recorded.transaction.transaction_type,
            quantity = %recorded.transaction.quantity,
            calculated_pl = ?recorded.transaction.calculated_pl,
            "recorded transaction"
        );
        Ok(recorded)
    }

    pub fn list(&self, user_id: &str, query: &TransactionQuery) -> Result<TransactionPage> {
        if query.page == 0 {
            return Err(LedgerError::validation("page starts at 1"));
        }
        if query.page_size == 0 || query.page_size > MAX_PAGE_SIZE {
            return Err(LedgerError::validation(format!(
                "page size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        self.ledger.read(|tx| {
            let total_count = tx.count_transactions(user_id, &query.filter)?;
            let transactions = tx.list_transactions(
                user_id,
                &query.filter,
                query.sort,
                query.order,
                (query.page - 1) * query.page_size,
                query.page_size,
            )?;
            let fees = tx.account_fees_total(user_id, &query.filter)?;
            let profit_stats = ProfitStats::calculate(&transactions, fees, self.rounding_scale);

            Ok(TransactionPage {
                transactions,
                total_count,
                page: query.page,
                page_size: query.page_size,
                total_pages: (total_count + query.page_size - 1) / query.page_size,
                profit_stats,
            })
        })
    }

    /// Audit trail of a SELL transaction owned by `user_id`.
    pub fn consumptions(&self, user_id: &str, transaction_id: i64) -> Result<SaleAudit> {
        self.ledger.read(|tx| {
            let transaction = tx
                .transaction(transaction_id, user_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", transaction_id)))?;
            if transaction.transaction_type != TransactionType::Sell {
                return Err(LedgerError::validation("only sell transactions consume lots"));
            }
            let sale = tx.sale_for_transaction(transaction_id)?.ok_or_else(|| {
                LedgerError::Inconsistent(format!("sell {} has no sale record", transaction_id))
            })?;
            let consumptions = tx.consumptions(sale.id)?;
            Ok(SaleAudit { sale, consumptions })
        })
    }

    /// Re-derives the P/L of a recorded SELL from its audit rows.
    pub fn recompute(&self, user_id: &str, transaction_id: i64) -> Result<Decimal> {
        let audit = self.consumptions(user_id, transaction_id)?;
        self.ledger
            .read(|tx| self.accountant.recompute_sale(tx, audit.sale.id))
    }

    pub fn positions(&self, user_id: &str, stock_account_id: Option<&str>) -> Result<Vec<Position>> {
        self.ledger
            .read(|tx| self.accountant.positions(tx, user_id, stock_account_id))
    }

    pub fn lots(
        &self,
        user_id: &str,
        stock_account_id: Option<&str>,
        ticker: Option<&str>,
    ) -> Result<Vec<PurchaseLot>> {
        let ticker = ticker.map(normalize_ticker);
        self.ledger
            .read(|tx| tx.lots(user_id, stock_account_id, ticker.as_deref()))
    }

    pub fn create_account(
        &self,
        user_id: &str,
        name: &str,
        broker_name: Option<&str>,
    ) -> Result<StockAccount> {
        self.ledger
            .write(|tx| accounts::create_account(tx, user_id, name, broker_name))
    }

    pub fn record_account_fee(&self, user_id: &str, fee: NewAccountFee) -> Result<AccountFee> {
        if fee.amount.is_sign_negative() && !fee.amount.is_zero() {
            return Err(LedgerError::validation("account fee must not be negative"));
        }
        self.ledger.write(|tx| {
            let account_id = self
                .accounts
                .resolve(tx, user_id, Some(&fee.stock_account_id))?;
            tx.insert_account_fee(
                user_id,
                &NewAccountFee {
                    stock_account_id: account_id,
                    ..fee.clone()
                },
            )
        })
    }

    /// Realized gains of every sale of `user_id`, one record per consumed lot.
    pub fn realized_gains(&self, user_id: &str) -> Result<RealizedGainsReport> {
        self.ledger.read(|tx| {
            let mut sales = Vec::new();
            for sale in tx.sales_for_user(user_id)? {
                let consumptions = tx.consumptions(sale.id)?;
                sales.push((sale, consumptions));
            }
            Ok(RealizedGainsReport::from_sales(&sales))
        })
    }
}
