//! Cost model for a purchase order line.
//!
//! Derived fields (`home_unit_price`, `line_total`, `shipping_cost`,
//! `loss_share`, `final_unit_cost`) are recomputed by the costing
//! algorithms, never set by callers once the order leaves draft.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kontor_core::{DomainError, DomainResult, ProductId, ValueObject};

/// Input shape for one order line, supplied at creation or draft replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSpec {
    pub product_id: ProductId,
    /// Unit price in the supplier's currency.
    pub supplier_unit_price: Decimal,
    pub ordered_quantity: u32,
    /// Unit weight in grams.
    pub unit_weight_g: Decimal,
    /// Packaging allowance per unit, in grams.
    pub extra_weight_per_unit_g: Decimal,
}

impl ValueObject for LineSpec {}

impl LineSpec {
    pub fn validate(&self) -> DomainResult<()> {
        if self.supplier_unit_price < Decimal::ZERO {
            return Err(DomainError::validation("unit price must be non-negative"));
        }
        if self.unit_weight_g < Decimal::ZERO || self.extra_weight_per_unit_g < Decimal::ZERO {
            return Err(DomainError::validation("weights must be non-negative"));
        }
        Ok(())
    }
}

/// One purchase order line with its derived cost fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub product_id: ProductId,

    /// Unit price in the supplier's currency.
    pub supplier_unit_price: Decimal,
    pub ordered_quantity: u32,

    /// `supplier_unit_price × exchange_rate` (home currency, derived).
    pub home_unit_price: Decimal,
    /// `home_unit_price × ordered_quantity` (home currency, derived).
    pub line_total: Decimal,

    pub unit_weight_g: Decimal,
    pub extra_weight_per_unit_g: Decimal,
    pub shipping_rate_per_kg: Decimal,
    /// Home-currency freight share, derived by apportionment.
    pub shipping_cost: Decimal,

    /// Redistributed loss component. Additive: survives revaluation.
    pub loss_share: Decimal,
    /// `line_total + shipping_cost + loss_share` — the landed cost used for
    /// inventory valuation.
    pub final_unit_cost: Decimal,

    pub received_quantity: Option<u32>,
    pub lost_quantity: u32,
    /// Set on completion; consumed by the external inventory service.
    pub stocked_quantity: Option<u32>,
}

impl OrderLine {
    pub fn from_spec(line_no: u32, spec: &LineSpec, exchange_rate: Decimal) -> Self {
        let mut line = Self {
            line_no,
            product_id: spec.product_id,
            supplier_unit_price: spec.supplier_unit_price,
            ordered_quantity: spec.ordered_quantity,
            home_unit_price: Decimal::ZERO,
            line_total: Decimal::ZERO,
            unit_weight_g: spec.unit_weight_g,
            extra_weight_per_unit_g: spec.extra_weight_per_unit_g,
            shipping_rate_per_kg: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            loss_share: Decimal::ZERO,
            final_unit_cost: Decimal::ZERO,
            received_quantity: None,
            lost_quantity: 0,
            stocked_quantity: None,
        };
        line.revalue(exchange_rate);
        line
    }

    /// Line subtotal in the supplier's currency.
    pub fn supplier_subtotal(&self) -> Decimal {
        self.supplier_unit_price * Decimal::from(self.ordered_quantity)
    }

    /// Quantity used for weight computations: received once known.
    pub fn effective_quantity(&self) -> u32 {
        self.received_quantity.unwrap_or(self.ordered_quantity)
    }

    /// Recompute price-derived fields from the given exchange rate.
    pub(crate) fn revalue(&mut self, exchange_rate: Decimal) {
        self.home_unit_price = self.supplier_unit_price * exchange_rate;
        self.line_total = self.home_unit_price * Decimal::from(self.ordered_quantity);
        self.recompute_final_cost();
    }

    pub(crate) fn recompute_final_cost(&mut self) {
        self.final_unit_cost = self.line_total + self.shipping_cost + self.loss_share;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(price: i64, quantity: u32) -> LineSpec {
        LineSpec {
            product_id: ProductId::new(),
            supplier_unit_price: Decimal::from(price),
            ordered_quantity: quantity,
            unit_weight_g: Decimal::from(200),
            extra_weight_per_unit_g: Decimal::from(50),
        }
    }

    #[test]
    fn from_spec_derives_home_prices() {
        let line = OrderLine::from_spec(1, &spec(10, 50), Decimal::from(15));

        assert_eq!(line.home_unit_price, Decimal::from(150));
        assert_eq!(line.line_total, Decimal::from(7500));
        assert_eq!(line.final_unit_cost, Decimal::from(7500));
        assert_eq!(line.supplier_subtotal(), Decimal::from(500));
    }

    #[test]
    fn negative_price_fails_validation() {
        let mut s = spec(10, 5);
        s.supplier_unit_price = Decimal::from(-1);
        assert!(s.validate().is_err());
    }

    #[test]
    fn negative_weight_fails_validation() {
        let mut s = spec(10, 5);
        s.extra_weight_per_unit_g = Decimal::from(-1);
        assert!(s.validate().is_err());
    }

    #[test]
    fn effective_quantity_prefers_received() {
        let mut line = OrderLine::from_spec(1, &spec(10, 50), Decimal::ONE);
        assert_eq!(line.effective_quantity(), 50);
        line.received_quantity = Some(42);
        assert_eq!(line.effective_quantity(), 42);
    }
}
