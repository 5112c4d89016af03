use std::collections::VecDeque;

use rust_decimal::Decimal;

use crate::accounting::PurchaseLot;

/// One slice taken out of a lot by a withdrawal.
#[derive(Clone, Debug, PartialEq)]
pub struct Draw {
    pub lot: PurchaseLot,
    pub quantity: Decimal,
    pub fee_portion: Decimal,
}

impl Draw {
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.lot.unit_cost + self.fee_portion
    }

    /// The lot as it looks after this draw.
    pub fn lot_after(&self) -> PurchaseLot {
        PurchaseLot {
            quantity_remaining: self.lot.quantity_remaining - self.quantity,
            fee_remaining: self.lot.fee_remaining - self.fee_portion,
            ..self.lot.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shortfall {
    pub requested: Decimal,
    pub available: Decimal,
}

/// Open lots of one (user, account, ticker), oldest layer at the front.
pub struct Inventory {
    layers: VecDeque<PurchaseLot>,
}

impl Inventory {
    pub fn new(mut lots: Vec<PurchaseLot>) -> Inventory {
        lots.retain(|lot| lot.quantity_remaining > Decimal::ZERO);
        lots.sort_by(|a, b| a.acquired_at.cmp(&b.acquired_at).then(a.id.cmp(&b.id)));
        Inventory {
            layers: lots.into(),
        }
    }

    pub fn available(&self) -> Decimal {
        self.layers.iter().map(|layer| layer.quantity_remaining).sum()
    }

    /// Takes `amount_to_withdraw` layer by layer, oldest first.
    ///
    /// Either the whole amount is drawn or nothing is: on shortfall the
    /// inventory is left exactly as it was.
    pub fn withdraw(&mut self, amount_to_withdraw: Decimal) -> Result<Vec<Draw>, Shortfall> {
        let available = self.available();
        if amount_to_withdraw > available {
            return Err(Shortfall {
                requested: amount_to_withdraw,
                available,
            });
        }

        let mut res: Vec<Draw> = Vec::new();
        let mut remaining = amount_to_withdraw;
        let mut touched = 0;

        for layer in self.layers.iter() {
            if remaining.is_zero() {
                break;
            }
            // see how much we can take
            let quantity = remaining.min(layer.quantity_remaining);
            let exhausts = quantity == layer.quantity_remaining;

            // the draw that empties a lot takes whatever fee is left, so the
            // allocations of one lot always add up to its fee
            let fee_portion = if exhausts {
                layer.fee_remaining
            } else {
                layer.fee * quantity / layer.quantity_original
            };

            res.push(Draw {
                lot: layer.clone(),
                quantity,
                fee_portion,
            });
            remaining -= quantity;
            touched += 1;
        }

        if !remaining.is_zero() {
            return Err(Shortfall {
                requested: amount_to_withdraw,
                available,
            });
        }

        // commit the draws to the layers, drop the ones that ran dry
        for (layer, draw) in self.layers.iter_mut().zip(res.iter()).take(touched) {
            *layer = draw.lot_after();
        }
        while let Some(front) = self.layers.front() {
            if front.quantity_remaining.is_zero() {
                self.layers.pop_front();
            } else {
                break;
            }
        }

        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn lot(id: i64, day: u32, quantity: Decimal, unit_cost: Decimal, fee: Decimal) -> PurchaseLot {
        PurchaseLot {
            id,
            user_id: "u1".to_string(),
            stock_account_id: "acc".to_string(),
            ticker: "HPG".to_string(),
            quantity_original: quantity,
            quantity_remaining: quantity,
            unit_cost,
            fee,
            fee_remaining: fee,
            acquired_at: Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap(),
            transaction_id: None,
        }
    }

    #[test]
    fn withdraws_oldest_layer_first() {
        let mut inventory = Inventory::new(vec![
            lot(2, 5, dec!(50), dec!(12), dec!(0)),
            lot(1, 1, dec!(100), dec!(10), dec!(0)),
        ]);

        let draws = inventory.withdraw(dec!(120)).unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!((draws[0].lot.id, draws[0].quantity), (1, dec!(100)));
        assert_eq!((draws[1].lot.id, draws[1].quantity), (2, dec!(20)));
        assert_eq!(inventory.available(), dec!(30));
    }

    #[test]
    fn same_day_lots_fall_back_to_creation_order() {
        let mut inventory = Inventory::new(vec![
            lot(9, 1, dec!(10), dec!(20), dec!(0)),
            lot(4, 1, dec!(10), dec!(10), dec!(0)),
        ]);

        let draws = inventory.withdraw(dec!(5)).unwrap();
        assert_eq!(draws[0].lot.id, 4);
    }

    #[test]
    fn shortfall_leaves_layers_untouched() {
        let mut inventory = Inventory::new(vec![
            lot(1, 1, dec!(100), dec!(10), dec!(0)),
            lot(2, 2, dec!(50), dec!(12), dec!(0)),
        ]);

        let err = inventory.withdraw(dec!(200)).unwrap_err();
        assert_eq!(err.requested, dec!(200));
        assert_eq!(err.available, dec!(150));
        assert_eq!(inventory.available(), dec!(150));
    }

    #[test]
    fn fee_allocations_sum_to_lot_fee() {
        let mut inventory = Inventory::new(vec![lot(1, 1, dec!(3), dec!(10), dec!(10))]);

        let mut allocated = Decimal::ZERO;
        for _ in 0..3 {
            let draws = inventory.withdraw(dec!(1)).unwrap();
            allocated += draws[0].fee_portion;
        }
        assert_eq!(allocated, dec!(10));
        assert_eq!(inventory.available(), Decimal::ZERO);
    }

    #[test]
    fn cost_basis_includes_fee_portion() {
        let mut inventory = Inventory::new(vec![lot(1, 1, dec!(100), dec!(10), dec!(20))]);
        let draws = inventory.withdraw(dec!(25)).unwrap();
        assert_eq!(draws[0].fee_portion, dec!(5));
        assert_eq!(draws[0].cost_basis(), dec!(255));
    }
}
