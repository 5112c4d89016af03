pub mod inventory;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::accounting::TaxRule;

const HUNDRED: Decimal = Decimal::ONE_HUNDRED;

/// Sale tax under `rule`. `tax_rate` is a percentage.
pub fn tax_amount(
    rule: TaxRule,
    tax_rate: Decimal,
    gross_proceeds: Decimal,
    fee: Decimal,
    cost_basis: Decimal,
) -> Decimal {
    let taxable = match rule {
        TaxRule::Proceeds => gross_proceeds,
        TaxRule::Gain => (gross_proceeds - fee - cost_basis).max(Decimal::ZERO),
    };
    taxable * tax_rate / HUNDRED
}

/// Realized P/L of a sale, rounded half away from zero to `scale` places.
pub fn realized_pl(
    gross_proceeds: Decimal,
    fee: Decimal,
    tax: Decimal,
    cost_basis: Decimal,
    scale: u32,
) -> Decimal {
    round(gross_proceeds - fee - tax - cost_basis, scale)
}

pub fn round(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}
