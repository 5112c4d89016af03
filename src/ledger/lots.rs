use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::accounting::{LotKey, Purchase, PurchaseLot, SaleConsumption, SaleRecord, TaxRule};
use crate::error::Result;
use crate::ledger::{datetime_at, datetime_sql, decimal_at, decimal_sql, parse_column, LedgerTx};

const LOT_COLUMNS: &str = "id, user_id, stock_account_id, ticker, quantity_original, \
     quantity_remaining, unit_cost, fee, fee_remaining, acquired_at, transaction_id";

const SALE_COLUMNS: &str = "id, user_id, stock_account_id, ticker, quantity, price, fee, \
     tax_rate, tax_rule, tax_amount, gross_proceeds, cost_basis, profit_or_loss, rounding_scale, \
     sold_at, transaction_id";

fn lot_from_row(row: &Row<'_>) -> rusqlite::Result<PurchaseLot> {
    Ok(PurchaseLot {
        id: row.get(0)?,
        user_id: row.get(1)?,
        stock_account_id: row.get(2)?,
        ticker: row.get(3)?,
        quantity_original: decimal_at(row, 4)?,
        quantity_remaining: decimal_at(row, 5)?,
        unit_cost: decimal_at(row, 6)?,
        fee: decimal_at(row, 7)?,
        fee_remaining: decimal_at(row, 8)?,
        acquired_at: datetime_at(row, 9)?,
        transaction_id: row.get(10)?,
    })
}

fn sale_from_row(row: &Row<'_>) -> rusqlite::Result<SaleRecord> {
    Ok(SaleRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        stock_account_id: row.get(2)?,
        ticker: row.get(3)?,
        quantity: decimal_at(row, 4)?,
        price: decimal_at(row, 5)?,
        fee: decimal_at(row, 6)?,
        tax_rate: decimal_at(row, 7)?,
        tax_rule: parse_column::<TaxRule>(row, 8)?,
        tax_amount: decimal_at(row, 9)?,
        gross_proceeds: decimal_at(row, 10)?,
        cost_basis: decimal_at(row, 11)?,
        profit_or_loss: decimal_at(row, 12)?,
        rounding_scale: row.get(13)?,
        sold_at: datetime_at(row, 14)?,
        transaction_id: row.get(15)?,
    })
}

/// Sale header fields as computed by the engine, before the row exists.
pub(crate) struct NewSale<'a> {
    pub key: &'a LotKey,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub tax_rate: Decimal,
    pub tax_rule: TaxRule,
    pub tax_amount: Decimal,
    pub gross_proceeds: Decimal,
    pub cost_basis: Decimal,
    pub profit_or_loss: Decimal,
    pub rounding_scale: u32,
    pub sold_at: chrono::DateTime<chrono::Utc>,
}

impl<'c> LedgerTx<'c> {
    pub(crate) fn insert_lot(&self, key: &LotKey, purchase: &Purchase) -> Result<PurchaseLot> {
        self.conn().execute(
            "INSERT INTO purchase_lots (user_id, stock_account_id, ticker, quantity_original, \
             quantity_remaining, unit_cost, fee, fee_remaining, acquired_at) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?6, ?6, ?7)",
            params![
                key.user_id,
                key.stock_account_id,
                key.ticker,
                decimal_sql(purchase.quantity),
                decimal_sql(purchase.price),
                decimal_sql(purchase.fee),
                datetime_sql(purchase.datetime),
            ],
        )?;
        let id = self.conn().last_insert_rowid();
        Ok(PurchaseLot {
            id,
            user_id: key.user_id.clone(),
            stock_account_id: key.stock_account_id.clone(),
            ticker: key.ticker.clone(),
            quantity_original: purchase.quantity,
            quantity_remaining: purchase.quantity,
            unit_cost: purchase.price,
            fee: purchase.fee,
            fee_remaining: purchase.fee,
            acquired_at: purchase.datetime,
            transaction_id: None,
        })
    }

    /// Lots with shares left, oldest first.
    pub fn open_lots(&self, key: &LotKey) -> Result<Vec<PurchaseLot>> {
        let sql = format!(
            "SELECT {} FROM purchase_lots \
             WHERE user_id = ?1 AND stock_account_id = ?2 AND ticker = ?3 AND exhausted = 0 \
             ORDER BY acquired_at, id",
            LOT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let lots = stmt
            .query_map(params![key.user_id, key.stock_account_id, key.ticker], lot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(lots)
    }

    /// Every lot of a user, exhausted ones included, optionally narrowed to
    /// one account and/or ticker.
    pub fn lots(
        &self,
        user_id: &str,
        stock_account_id: Option<&str>,
        ticker: Option<&str>,
    ) -> Result<Vec<PurchaseLot>> {
        let sql = format!(
            "SELECT {} FROM purchase_lots \
             WHERE user_id = ?1 AND (?2 IS NULL OR stock_account_id = ?2) \
             AND (?3 IS NULL OR ticker = ?3) \
             ORDER BY stock_account_id, ticker, acquired_at, id",
            LOT_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let lots = stmt
            .query_map(params![user_id, stock_account_id, ticker], lot_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(lots)
    }

    pub(crate) fn update_lot_remaining(
        &self,
        lot_id: i64,
        quantity_remaining: Decimal,
        fee_remaining: Decimal,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE purchase_lots SET quantity_remaining = ?2, fee_remaining = ?3, exhausted = ?4 \
             WHERE id = ?1",
            params![
                lot_id,
                decimal_sql(quantity_remaining),
                decimal_sql(fee_remaining),
                quantity_remaining.is_zero(),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn link_lot(&self, lot_id: i64, transaction_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE purchase_lots SET transaction_id = ?2 WHERE id = ?1",
            params![lot_id, transaction_id],
        )?;
        Ok(())
    }

    pub(crate) fn insert_sale(&self, sale: &NewSale<'_>) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO sales (user_id, stock_account_id, ticker, quantity, price, fee, tax_rate, \
             tax_rule, tax_amount, gross_proceeds, cost_basis, profit_or_loss, rounding_scale, sold_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                sale.key.user_id,
                sale.key.stock_account_id,
                sale.key.ticker,
                decimal_sql(sale.quantity),
                decimal_sql(sale.price),
                decimal_sql(sale.fee),
                decimal_sql(sale.tax_rate),
                sale.tax_rule.as_str(),
                decimal_sql(sale.tax_amount),
                decimal_sql(sale.gross_proceeds),
                decimal_sql(sale.cost_basis),
                decimal_sql(sale.profit_or_loss),
                sale.rounding_scale,
                datetime_sql(sale.sold_at),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub(crate) fn link_sale(&self, sale_id: i64, transaction_id: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE sales SET transaction_id = ?2 WHERE id = ?1",
            params![sale_id, transaction_id],
        )?;
        Ok(())
    }

    pub fn sale(&self, sale_id: i64) -> Result<Option<SaleRecord>> {
        let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLUMNS);
        let sale = self
            .conn()
            .query_row(&sql, params![sale_id], sale_from_row)
            .optional()?;
        Ok(sale)
    }

    pub fn sale_for_transaction(&self, transaction_id: i64) -> Result<Option<SaleRecord>> {
        let sql = format!("SELECT {} FROM sales WHERE transaction_id = ?1", SALE_COLUMNS);
        let sale = self
            .conn()
            .query_row(&sql, params![transaction_id], sale_from_row)
            .optional()?;
        Ok(sale)
    }

    pub fn sales_for_user(&self, user_id: &str) -> Result<Vec<SaleRecord>> {
        let sql = format!(
            "SELECT {} FROM sales WHERE user_id = ?1 ORDER BY sold_at, id",
            SALE_COLUMNS
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let sales = stmt
            .query_map(params![user_id], sale_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sales)
    }

    pub(crate) fn insert_consumption(&self, consumption: &SaleConsumption) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sale_consumptions (sale_id, lot_id, quantity_consumed, unit_cost, \
             fee_portion, cost_basis_portion) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                consumption.sale_id,
                consumption.lot_id,
                decimal_sql(consumption.quantity_consumed),
                decimal_sql(consumption.unit_cost),
                decimal_sql(consumption.fee_portion),
                decimal_sql(consumption.cost_basis_portion),
            ],
        )?;
        Ok(())
    }

    /// Consumption rows of a sale in the order the lots were drawn.
    pub fn consumptions(&self, sale_id: i64) -> Result<Vec<SaleConsumption>> {
        let mut stmt = self.conn().prepare(
            "SELECT c.sale_id, c.lot_id, c.quantity_consumed, c.unit_cost, c.fee_portion, \
             c.cost_basis_portion, l.acquired_at \
             FROM sale_consumptions c JOIN purchase_lots l ON l.id = c.lot_id \
             WHERE c.sale_id = ?1 ORDER BY c.id",
        )?;
        let consumptions = stmt
            .query_map(params![sale_id], |row| {
                Ok(SaleConsumption {
                    sale_id: row.get(0)?,
                    lot_id: row.get(1)?,
                    quantity_consumed: decimal_at(row, 2)?,
                    unit_cost: decimal_at(row, 3)?,
                    fee_portion: decimal_at(row, 4)?,
                    cost_basis_portion: decimal_at(row, 5)?,
                    acquired_at: datetime_at(row, 6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(consumptions)
    }
}
