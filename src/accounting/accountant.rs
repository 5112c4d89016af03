use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::accounting::calculation::inventory::Inventory;
use crate::accounting::calculation::{self, realized_pl, tax_amount};
use crate::accounting::{
    LotKey, Position, Purchase, PurchaseLot, Sale, SaleConsumption, SaleOutcome, TaxRule,
};
use crate::config::Config;
use crate::error::{LedgerError, Result};
use crate::ledger::lots::NewSale;
use crate::ledger::LedgerTx;

/// Largest quantity or price accepted, keeping every product well inside
/// `Decimal` range.
const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// The cost-basis engine. All lot rows are created and consumed here.
#[derive(Clone, Debug)]
pub struct Accountant {
    tax_rule: TaxRule,
    rounding_scale: u32,
}

impl Default for Accountant {
    fn default() -> Self {
        Accountant::new()
    }
}

impl Accountant {
    pub fn new() -> Accountant {
        Accountant {
            tax_rule: TaxRule::Proceeds,
            rounding_scale: 2,
        }
    }

    pub fn from_config(config: &Config) -> Accountant {
        Accountant::new()
            .tax_rule(config.tax_rule)
            .rounding_scale(config.rounding_scale)
    }

    pub fn tax_rule(mut self, tax_rule: TaxRule) -> Accountant {
        self.tax_rule = tax_rule;
        self
    }

    pub fn rounding_scale(mut self, rounding_scale: u32) -> Accountant {
        self.rounding_scale = rounding_scale;
        self
    }

    /// Records a purchase as a new lot. Purchases never realize P/L.
    pub fn process_buy_transaction(
        &self,
        tx: &LedgerTx<'_>,
        key: &LotKey,
        purchase: Purchase,
    ) -> Result<PurchaseLot> {
        validate_key(key)?;
        validate_amount("quantity", purchase.quantity, false)?;
        validate_amount("price", purchase.price, true)?;
        validate_amount("fee", purchase.fee, true)?;

        let lot = tx.insert_lot(key, &purchase)?;
        debug!(
            lot_id = lot.id,
            ticker = %key.ticker,
            quantity = %lot.quantity_original,
            unit_cost = %lot.unit_cost,
            "opened purchase lot"
        );
        Ok(lot)
    }

    /// Consumes open lots oldest first and realizes the P/L of `sale`.
    ///
    /// Nothing is written unless the open lots cover the whole quantity.
    pub fn process_sell_transaction(
        &self,
        tx: &LedgerTx<'_>,
        key: &LotKey,
        sale: Sale,
    ) -> Result<SaleOutcome> {
        validate_key(key)?;
        validate_amount("quantity", sale.quantity, false)?;
        validate_amount("price", sale.price, true)?;
        validate_amount("fee", sale.fee, true)?;
        validate_amount("tax rate", sale.tax_rate, true)?;
        if sale.tax_rate > Decimal::ONE_HUNDRED {
            return Err(LedgerError::validation("tax rate must not exceed 100 percent"));
        }

        let mut inventory = Inventory::new(tx.open_lots(key)?);
        let draws = inventory.withdraw(sale.quantity).map_err(|shortfall| {
            warn!(
                ticker = %key.ticker,
                requested = %shortfall.requested,
                available = %shortfall.available,
                "sell exceeds open lots"
            );
            LedgerError::InsufficientInventory {
                ticker: key.ticker.clone(),
                requested: shortfall.requested,
                available: shortfall.available,
            }
        })?;

        let cost_basis: Decimal = draws.iter().map(|draw| draw.cost_basis()).sum();
        let gross_proceeds = sale.price * sale.quantity;
        let tax = tax_amount(self.tax_rule, sale.tax_rate, gross_proceeds, sale.fee, cost_basis);
        let profit_or_loss =
            realized_pl(gross_proceeds, sale.fee, tax, cost_basis, self.rounding_scale);

        let sale_id = tx.insert_sale(&NewSale {
            key,
            quantity: sale.quantity,
            price: sale.price,
            fee: sale.fee,
            tax_rate: sale.tax_rate,
            tax_rule: self.tax_rule,
            tax_amount: tax,
            gross_proceeds,
            cost_basis,
            profit_or_loss,
            rounding_scale: self.rounding_scale,
            sold_at: sale.datetime,
        })?;

        let mut consumptions = Vec::with_capacity(draws.len());
        for draw in &draws {
            let after = draw.lot_after();
            tx.update_lot_remaining(after.id, after.quantity_remaining, after.fee_remaining)?;

            let consumption = SaleConsumption {
                sale_id,
                lot_id: draw.lot.id,
                quantity_consumed: draw.quantity,
                unit_cost: draw.lot.unit_cost,
                fee_portion: draw.fee_portion,
                cost_basis_portion: draw.cost_basis(),
                acquired_at: draw.lot.acquired_at,
            };
            tx.insert_consumption(&consumption)?;
            debug!(
                sale_id,
                lot_id = draw.lot.id,
                quantity = %draw.quantity,
                remaining = %after.quantity_remaining,
                "consumed lot"
            );
            consumptions.push(consumption);
        }

        info!(
            sale_id,
            ticker = %key.ticker,
            quantity = %sale.quantity,
            lots = consumptions.len(),
            profit_or_loss = %profit_or_loss,
            "realized sale"
        );

        Ok(SaleOutcome {
            sale_id,
            profit_or_loss,
            cost_basis,
            tax_amount: tax,
            consumptions,
        })
    }

    /// Re-derives the P/L of a recorded sale from its consumption rows, at
    /// the scale the sale was recorded with.
    pub fn recompute_sale(&self, tx: &LedgerTx<'_>, sale_id: i64) -> Result<Decimal> {
        let sale = tx
            .sale(sale_id)?
            .ok_or_else(|| LedgerError::validation(format!("sale {} does not exist", sale_id)))?;
        let consumptions = tx.consumptions(sale_id)?;

        let consumed: Decimal = consumptions.iter().map(|c| c.quantity_consumed).sum();
        if consumed != sale.quantity {
            return Err(LedgerError::Inconsistent(format!(
                "sale {} sold {} shares but its lots account for {}",
                sale_id, sale.quantity, consumed
            )));
        }

        let cost_basis: Decimal = consumptions.iter().map(|c| c.cost_basis_portion).sum();
        let tax = tax_amount(sale.tax_rule, sale.tax_rate, sale.gross_proceeds, sale.fee, cost_basis);
        Ok(realized_pl(
            sale.gross_proceeds,
            sale.fee,
            tax,
            cost_basis,
            sale.rounding_scale,
        ))
    }

    /// Remaining quantity and weighted average cost of one holding.
    pub fn position(&self, tx: &LedgerTx<'_>, key: &LotKey) -> Result<Position> {
        let lots = tx.open_lots(key)?;
        Ok(summarize(&key.stock_account_id, &key.ticker, &lots, self.rounding_scale))
    }

    /// Every holding of a user with shares left, by account then ticker.
    pub fn positions(
        &self,
        tx: &LedgerTx<'_>,
        user_id: &str,
        stock_account_id: Option<&str>,
    ) -> Result<Vec<Position>> {
        let mut grouped: BTreeMap<(String, String), Vec<PurchaseLot>> = BTreeMap::new();
        for lot in tx.lots(user_id, stock_account_id, None)? {
            if lot.quantity_remaining.is_zero() {
                continue;
            }
            grouped
                .entry((lot.stock_account_id.clone(), lot.ticker.clone()))
                .or_default()
                .push(lot);
        }

        Ok(grouped
            .iter()
            .map(|((account, ticker), lots)| summarize(account, ticker, lots, self.rounding_scale))
            .collect())
    }
}

fn summarize(account: &str, ticker: &str, lots: &[PurchaseLot], scale: u32) -> Position {
    let quantity: Decimal = lots.iter().map(|lot| lot.quantity_remaining).sum();
    let cost: Decimal = lots.iter().map(|lot| lot.remaining_cost()).sum();
    let average_cost = if quantity.is_zero() {
        None
    } else {
        Some(calculation::round(cost / quantity, scale + 4))
    };
    Position {
        stock_account_id: account.to_string(),
        ticker: ticker.to_string(),
        quantity,
        cost: calculation::round(cost, scale),
        average_cost,
        open_lots: lots.len(),
    }
}

fn validate_key(key: &LotKey) -> Result<()> {
    if key.user_id.trim().is_empty() {
        return Err(LedgerError::validation("user id is required"));
    }
    if key.stock_account_id.trim().is_empty() {
        return Err(LedgerError::validation("stock account is required"));
    }
    if key.ticker.is_empty() {
        return Err(LedgerError::validation("ticker is required"));
    }
    Ok(())
}

fn validate_amount(field: &str, value: Decimal, zero_allowed: bool) -> Result<()> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(LedgerError::validation(format!("{} must not be negative", field)));
    }
    if value.is_zero() && !zero_allowed {
        return Err(LedgerError::validation(format!("{} must be greater than zero", field)));
    }
    if value > MAX_AMOUNT {
        return Err(LedgerError::validation(format!("{} is out of range", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::Ledger;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn ledger() -> (tempfile::TempDir, Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::open(&dir.path().join("ledger.db"), Duration::from_secs(5)).unwrap();
        (dir, ledger)
    }

    fn purchase(day: u32, quantity: Decimal, price: Decimal, fee: Decimal) -> Purchase {
        Purchase {
            quantity,
            price,
            fee,
            datetime: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap(),
        }
    }

    fn sale(day: u32, quantity: Decimal, price: Decimal, fee: Decimal, tax_rate: Decimal) -> Sale {
        Sale {
            quantity,
            price,
            fee,
            tax_rate,
            datetime: Utc.with_ymd_and_hms(2024, 2, day, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn max_amount_is_one_trillion() {
        assert_eq!(MAX_AMOUNT, dec!(1_000_000_000_000));
    }

    #[test]
    fn buy_opens_a_full_lot() {
        let (_dir, ledger) = ledger();
        let key = LotKey::new("u1", "acc", "vnm");
        let accountant = Accountant::new();

        let lot = ledger
            .write(|tx| accountant.process_buy_transaction(tx, &key, purchase(1, dec!(100), dec!(10), dec!(5))))
            .unwrap();

        assert_eq!(lot.ticker, "VNM");
        assert_eq!(lot.quantity_remaining, dec!(100));
        assert_eq!(lot.fee_remaining, dec!(5));
        let open = ledger.read(|tx| tx.open_lots(&key)).unwrap();
        assert_eq!(open, vec![lot]);
    }

    #[test]
    fn buy_rejects_non_positive_quantity() {
        let (_dir, ledger) = ledger();
        let key = LotKey::new("u1", "acc", "VNM");
        let accountant = Accountant::new();

        let err = ledger
            .write(|tx| accountant.process_buy_transaction(tx, &key, purchase(1, dec!(0), dec!(10), dec!(0))))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = ledger
            .write(|tx| accountant.process_buy_transaction(tx, &key, purchase(1, dec!(5), dec!(-1), dec!(0))))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn sell_realizes_proceeds_minus_fifo_cost() {
        let (_dir, ledger) = ledger();
        let key = LotKey::new("u1", "acc", "FPT");
        let accountant = Accountant::new();

        ledger
            .write(|tx| {
                accountant.process_buy_transaction(tx, &key, purchase(1, dec!(100), dec!(10), dec!(0)))?;
                accountant.process_buy_transaction(tx, &key, purchase(2, dec!(50), dec!(12), dec!(0)))
            })
            .unwrap();

        let outcome = ledger
            .write(|tx| accountant.process_sell_transaction(tx, &key, sale(1, dec!(120), dec!(15), dec!(0), dec!(0))))
            .unwrap();

        // 120 * 15 - (100 * 10 + 20 * 12)
        assert_eq!(outcome.profit_or_loss, dec!(560));
        assert_eq!(outcome.consumptions.len(), 2);
        assert_eq!(outcome.consumptions[0].quantity_consumed, dec!(100));
        assert_eq!(outcome.consumptions[1].quantity_consumed, dec!(20));
    }

    #[test]
    fn purchase_fee_is_part_of_cost_and_sale_costs_reduce_proceeds() {
        let (_dir, ledger) = ledger();
        let key = LotKey::new("u1", "acc", "MWG");
        let accountant = Accountant::new();

        ledger
            .write(|tx| accountant.process_buy_transaction(tx, &key, purchase(1, dec!(100), dec!(10), dec!(20))))
            .unwrap();
        let outcome = ledger
            .write(|tx| accountant.process_sell_transaction(tx, &key, sale(1, dec!(40), dec!(20), dec!(8), dec!(0.1))))
            .unwrap();

        // gross 800, tax 0.8, cost 40 * 10 + 20 * 40 / 100 = 408
        assert_eq!(outcome.tax_amount, dec!(0.8));
        assert_eq!(outcome.cost_basis, dec!(408));
        assert_eq!(outcome.profit_or_loss, dec!(383.20));
    }

    #[test]
    fn gain_rule_taxes_net_gain() {
        let (_dir, ledger) = ledger();
        let key = LotKey::new("u1", "acc", "SSI");
        let accountant = Accountant::new().tax_rule(TaxRule::Gain).rounding_scale(0);

        ledger
            .write(|tx| accountant.process_buy_transaction(tx, &key, purchase(1, dec!(10), dec!(100), dec!(0))))
            .unwrap();
        let outcome = ledger
            .write(|tx| accountant.process_sell_transaction(tx, &key, sale(1, dec!(10), dec!(150), dec!(0), dec!(20))))
            .unwrap();

        assert_eq!(outcome.tax_amount, dec!(100));
        assert_eq!(outcome.profit_or_loss, dec!(400));
    }

    #[test]
    fn recompute_matches_recorded_pl() {
        let (_dir, ledger) = ledger();
        let key = LotKey::new("u1", "acc", "HPG");
        let accountant = Accountant::new();

        ledger
            .write(|tx| {
                accountant.process_buy_transaction(tx, &key, purchase(1, dec!(3), dec!(33.33), dec!(1)))?;
                accountant.process_buy_transaction(tx, &key, purchase(3, dec!(7), dec!(21.17), dec!(2.5)))
            })
            .unwrap();
        let outcome = ledger
            .write(|tx| accountant.process_sell_transaction(tx, &key, sale(2, dec!(5), dec!(30.01), dec!(0.37), dec!(0.1))))
            .unwrap();

        let recomputed = ledger.read(|tx| accountant.recompute_sale(tx, outcome.sale_id)).unwrap();
        assert_eq!(recomputed, outcome.profit_or_loss);
    }

    #[test]
    fn recompute_of_unknown_sale_is_a_validation_error() {
        let (_dir, ledger) = ledger();
        let err = ledger.read(|tx| Accountant::new().recompute_sale(tx, 42)).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn position_reports_weighted_average_cost() {
        let (_dir, ledger) = ledger();
        let key = LotKey::new("u1", "acc", "VCB");
        let accountant = Accountant::new();

        ledger
            .write(|tx| {
                accountant.process_buy_transaction(tx, &key, purchase(1, dec!(100), dec!(10), dec!(0)))?;
                accountant.process_buy_transaction(tx, &key, purchase(2, dec!(100), dec!(20), dec!(0)))?;
                accountant.process_sell_transaction(tx, &key, sale(1, dec!(50), dec!(30), dec!(0), dec!(0)))
            })
            .unwrap();

        let position = ledger.read(|tx| accountant.position(tx, &key)).unwrap();
        assert_eq!(position.quantity, dec!(150));
        assert_eq!(position.cost, dec!(2500));
        assert_eq!(position.average_cost, Some(dec!(16.666667)));
        assert_eq!(position.open_lots, 2);
    }

    #[test]
    fn positions_skip_sold_out_holdings() {
        let (_dir, ledger) = ledger();
        let accountant = Accountant::new();
        let vnm = LotKey::new("u1", "acc", "VNM");
        let fpt = LotKey::new("u1", "acc", "FPT");

        ledger
            .write(|tx| {
                accountant.process_buy_transaction(tx, &vnm, purchase(1, dec!(10), dec!(10), dec!(0)))?;
                accountant.process_buy_transaction(tx, &fpt, purchase(1, dec!(10), dec!(10), dec!(0)))?;
                accountant.process_sell_transaction(tx, &vnm, sale(1, dec!(10), dec!(11), dec!(0), dec!(0)))
            })
            .unwrap();

        let positions = ledger.read(|tx| accountant.positions(tx, "u1", None)).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].ticker, "FPT");
    }
}
