use std::fs::File;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::accounting::calculation::round;
use crate::accounting::{SaleConsumption, SaleRecord, TransactionType};
use crate::ledger::TransactionRow;

/// Holding periods longer than this count as long-term.
const LONG_TERM_DAYS: i64 = 365;

/// One lot's share of one sale.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RealizedGainRecord {
    sale_id: i64,
    lot_id: i64,
    stock_account_id: String,
    ticker: String,
    datetime_in: DateTime<Utc>,
    datetime_out: DateTime<Utc>,
    quantity: Decimal,
    unit_cost: Decimal,
    cost_basis: Decimal,
    proceeds: Decimal,
    gains: Decimal,
    holding_days: i64,
    long_term: bool,
}

pub struct RealizedGainsReport {
    records: Vec<RealizedGainRecord>,
}

impl RealizedGainsReport {
    pub fn new(records: Vec<RealizedGainRecord>) -> RealizedGainsReport {
        RealizedGainsReport { records }
    }

    /// Splits every sale's net proceeds over the lots it consumed, pro rata
    /// by quantity. The last lot takes the remainder so the parts add up.
    pub fn from_sales(sales: &[(SaleRecord, Vec<SaleConsumption>)]) -> RealizedGainsReport {
        let mut records = Vec::new();
        for (sale, consumptions) in sales {
            let net_proceeds = sale.gross_proceeds - sale.fee - sale.tax_amount;
            let mut allocated = Decimal::ZERO;

            for (i, consumption) in consumptions.iter().enumerate() {
                let proceeds = if i + 1 == consumptions.len() {
                    net_proceeds - allocated
                } else {
                    net_proceeds * consumption.quantity_consumed / sale.quantity
                };
                allocated += proceeds;

                let holding_days = sale
                    .sold_at
                    .signed_duration_since(consumption.acquired_at)
                    .num_days();
                records.push(RealizedGainRecord {
                    sale_id: sale.id,
                    lot_id: consumption.lot_id,
                    stock_account_id: sale.stock_account_id.clone(),
                    ticker: sale.ticker.clone(),
                    datetime_in: consumption.acquired_at,
                    datetime_out: sale.sold_at,
                    quantity: consumption.quantity_consumed,
                    unit_cost: consumption.unit_cost,
                    cost_basis: consumption.cost_basis_portion,
                    proceeds,
                    gains: proceeds - consumption.cost_basis_portion,
                    holding_days,
                    long_term: holding_days > LONG_TERM_DAYS,
                });
            }
        }
        RealizedGainsReport::new(records)
    }

    pub fn records(&self) -> &[RealizedGainRecord] {
        &self.records
    }

    pub fn total_gains(&self) -> Decimal {
        self.records.iter().map(|r| r.gains).sum()
    }

    pub fn write_to<W: Write>(&self, sink: W) -> Result<(), csv::Error> {
        let mut writer = Writer::from_writer(sink);
        for entry in self.records.iter() {
            writer.serialize(entry)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), csv::Error> {
        self.write_to(File::create(path)?)
    }
}

/// Aggregate P/L figures over the SELL rows of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfitStats {
    pub total_profit_loss: Decimal,
    pub gross_profit_loss: Decimal,
    pub account_fees_total: Decimal,
    pub profitable_transactions: usize,
    pub unprofitable_transactions: usize,
    pub break_even_transactions: usize,
    pub total_transactions: usize,
    /// Percentage of sells with a positive P/L.
    pub success_rate: Decimal,
    pub average_profit: Decimal,
    pub total_profit: Decimal,
    pub total_loss: Decimal,
}

impl ProfitStats {
    pub fn calculate(
        transactions: &[TransactionRow],
        account_fees_total: Decimal,
        scale: u32,
    ) -> ProfitStats {
        let profits: Vec<Decimal> = transactions
            .iter()
            .filter(|tx| tx.transaction_type == TransactionType::Sell)
            .map(|tx| tx.calculated_pl.unwrap_or(Decimal::ZERO))
            .collect();

        let gross: Decimal = profits.iter().copied().sum();
        let total = gross - account_fees_total;
        let count = profits.len();

        let profitable = profits.iter().filter(|pl| pl.is_sign_positive() && !pl.is_zero()).count();
        let break_even = profits.iter().filter(|pl| pl.is_zero()).count();
        let unprofitable = count - profitable - break_even;

        let total_profit: Decimal = profits.iter().filter(|pl| **pl > Decimal::ZERO).copied().sum();
        let total_loss: Decimal = profits.iter().filter(|pl| **pl < Decimal::ZERO).copied().sum();

        let (success_rate, average_profit) = if count == 0 {
            (Decimal::ZERO, Decimal::ZERO)
        } else {
            let n = Decimal::from(count);
            (
                Decimal::from(profitable) * Decimal::ONE_HUNDRED / n,
                total / n,
            )
        };

        ProfitStats {
            total_profit_loss: round(total, scale),
            gross_profit_loss: round(gross, scale),
            account_fees_total: round(account_fees_total, scale),
            profitable_transactions: profitable,
            unprofitable_transactions: unprofitable,
            break_even_transactions: break_even,
            total_transactions: count,
            success_rate: round(success_rate, 2),
            average_profit: round(average_profit, scale),
            total_profit: round(total_profit, scale),
            total_loss: round(total_loss, scale),
        }
    }
}
