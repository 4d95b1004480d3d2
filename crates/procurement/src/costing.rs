//! Currency revaluation and freight apportionment.
//!
//! Both algorithms are pure mutations over already-loaded lines: the
//! lifecycle decides *when* they run, these functions decide *what* the
//! numbers become. Both are idempotent — re-running with identical inputs
//! yields identical results, derived fields are overwritten, never
//! accumulated.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kontor_core::ValueObject;

use crate::line::OrderLine;

/// Recompute home-currency cost fields on every line for a new exchange
/// rate. A previously applied loss share is preserved additively.
pub fn revalue_lines(lines: &mut [OrderLine], exchange_rate: Decimal) {
    for line in lines.iter_mut() {
        line.revalue(exchange_rate);
    }
}

/// Order-level aggregates produced by one apportionment run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreightTotals {
    pub total_weight_kg: Decimal,
    pub total_shipping_cost: Decimal,
}

impl ValueObject for FreightTotals {}

/// Distribute a per-kilogram shipping rate across lines by weight.
///
/// Weight per line is `(unit_weight_g + extra_weight_per_unit_g) × quantity
/// / 1000`, where quantity is the received quantity once known, else the
/// ordered quantity. A line whose computed weight is zero falls back to an
/// equal split of `declared_total_weight_kg` when the order carries one.
pub fn apportion_freight(
    lines: &mut [OrderLine],
    rate_per_kg: Decimal,
    declared_total_weight_kg: Option<Decimal>,
) -> FreightTotals {
    let equal_split = match (declared_total_weight_kg, lines.len()) {
        (Some(total), count) if count > 0 => Some(total / Decimal::from(count as u32)),
        _ => None,
    };

    let mut totals = FreightTotals {
        total_weight_kg: Decimal::ZERO,
        total_shipping_cost: Decimal::ZERO,
    };

    for line in lines.iter_mut() {
        let quantity = Decimal::from(line.effective_quantity());
        let mut weight_kg =
            (line.unit_weight_g + line.extra_weight_per_unit_g) * quantity / Decimal::ONE_THOUSAND;

        if weight_kg == Decimal::ZERO {
            if let Some(split) = equal_split {
                weight_kg = split;
            }
        }

        line.shipping_rate_per_kg = rate_per_kg;
        line.shipping_cost = weight_kg * rate_per_kg;
        line.recompute_final_cost();

        totals.total_weight_kg += weight_kg;
        totals.total_shipping_cost += line.shipping_cost;
    }

    totals
}
