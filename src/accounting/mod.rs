pub mod accountant;
pub mod reports;
mod calculation;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use accountant::Accountant;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            other => Err(format!("unknown transaction type \"{}\"", other)),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the sale tax rate is applied to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxRule {
    /// Gross sale value (price x quantity).
    Proceeds,
    /// Net gain after fee and cost basis; losses are not taxed.
    Gain,
}

impl TaxRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxRule::Proceeds => "proceeds",
            TaxRule::Gain => "gain",
        }
    }
}

impl FromStr for TaxRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proceeds" => Ok(TaxRule::Proceeds),
            "gain" => Ok(TaxRule::Gain),
            other => Err(format!("unknown tax rule \"{}\"", other)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LotState {
    Open,
    PartiallyConsumed,
    Exhausted,
}

/// The (user, account, ticker) triple a lot belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LotKey {
    pub user_id: String,
    pub stock_account_id: String,
    pub ticker: String,
}

impl LotKey {
    pub fn new(user_id: &str, stock_account_id: &str, ticker: &str) -> LotKey {
        LotKey {
            user_id: user_id.to_string(),
            stock_account_id: stock_account_id.to_string(),
            ticker: normalize_ticker(ticker),
        }
    }
}

pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseLot {
    pub id: i64,
    pub user_id: String,
    pub stock_account_id: String,
    pub ticker: String,
    pub quantity_original: Decimal,
    pub quantity_remaining: Decimal,
    pub unit_cost: Decimal,
    pub fee: Decimal,
    /// Part of `fee` not yet allocated to any sale.
    pub fee_remaining: Decimal,
    pub acquired_at: DateTime<Utc>,
    pub transaction_id: Option<i64>,
}

impl PurchaseLot {
    pub fn unit_fee(&self) -> Decimal {
        if self.quantity_original.is_zero() {
            Decimal::ZERO
        } else {
            self.fee / self.quantity_original
        }
    }

    pub fn state(&self) -> LotState {
        if self.quantity_remaining.is_zero() {
            LotState::Exhausted
        } else if self.quantity_remaining < self.quantity_original {
            LotState::PartiallyConsumed
        } else {
            LotState::Open
        }
    }

    /// Cost basis still held in this lot, including its unallocated fee.
    pub fn remaining_cost(&self) -> Decimal {
        self.quantity_remaining * self.unit_cost + self.fee_remaining
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Purchase {
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub datetime: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug)]
pub struct Sale {
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    /// Percentage, e.g. `0.1` for 0.1 %.
    pub tax_rate: Decimal,
    pub datetime: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleConsumption {
    pub sale_id: i64,
    pub lot_id: i64,
    pub quantity_consumed: Decimal,
    pub unit_cost: Decimal,
    pub fee_portion: Decimal,
    pub cost_basis_portion: Decimal,
    pub acquired_at: DateTime<Utc>,
}

/// Audit header of one processed sell.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleRecord {
    pub id: i64,
    pub user_id: String,
    pub stock_account_id: String,
    pub ticker: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub tax_rate: Decimal,
    pub tax_rule: TaxRule,
    pub tax_amount: Decimal,
    pub gross_proceeds: Decimal,
    pub cost_basis: Decimal,
    pub profit_or_loss: Decimal,
    /// Decimal places `profit_or_loss` was rounded to when recorded.
    pub rounding_scale: u32,
    pub sold_at: DateTime<Utc>,
    pub transaction_id: Option<i64>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleOutcome {
    pub sale_id: i64,
    pub profit_or_loss: Decimal,
    pub cost_basis: Decimal,
    pub tax_amount: Decimal,
    pub consumptions: Vec<SaleConsumption>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub stock_account_id: String,
    pub ticker: String,
    pub quantity: Decimal,
    pub cost: Decimal,
    pub average_cost: Option<Decimal>,
    pub open_lots: usize,
}
