//! Receiving reconciliation and loss adjustment.
//!
//! Two distinct paths:
//! - **Receipt reconciliation** compares ordered vs. received per line,
//!   computes loss percentages and the supplier refund for lines whose own
//!   loss exceeds the threshold.
//! - **Explicit loss marking** redistributes the marked lines' lost value
//!   across surviving stock instead of refunding; it never touches the
//!   supplier credit ledger.

use std::collections::HashSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kontor_core::{DomainError, DomainResult, ValueObject};

use crate::line::OrderLine;

/// A line whose own loss percentage exceeds this contributes to the refund.
/// Evaluated strictly per line, never on the order-wide average.
pub const REFUND_THRESHOLD_PCT: Decimal = Decimal::TEN;

/// Received quantity reported for one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReceipt {
    pub line_no: u32,
    pub received_quantity: u32,
}

impl ValueObject for LineReceipt {}

/// Reconciliation outcome for one line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineReconciliation {
    pub line_no: u32,
    pub ordered_quantity: u32,
    pub received_quantity: u32,
    pub lost_quantity: u32,
    /// Over-receipt: received beyond ordered. Zero loss, zero refund.
    pub found_quantity: u32,
    pub lost_percentage: Decimal,
    /// Home-currency refund contribution (zero unless eligible).
    pub refund: Decimal,
}

/// Full reconciliation outcome for an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub lines: Vec<LineReconciliation>,
    pub total_refund: Decimal,
}

impl ReconciliationReport {
    /// Lines received beyond their ordered quantity (anomalies worth logging).
    pub fn over_received(&self) -> impl Iterator<Item = &LineReconciliation> {
        self.lines.iter().filter(|l| l.found_quantity > 0)
    }
}

/// Compare ordered vs. received for every line of an order.
///
/// Receipts must cover all lines exactly once; reconciliation is an
/// order-level operation, partial receipt reports are rejected.
pub fn reconcile(
    lines: &[OrderLine],
    receipts: &[LineReceipt],
    exchange_rate: Decimal,
) -> DomainResult<ReconciliationReport> {
    let mut seen = HashSet::new();
    for receipt in receipts {
        if !seen.insert(receipt.line_no) {
            return Err(DomainError::validation(format!(
                "duplicate receipt for line {}",
                receipt.line_no
            )));
        }
        if !lines.iter().any(|l| l.line_no == receipt.line_no) {
            return Err(DomainError::validation(format!(
                "receipt for unknown line {}",
                receipt.line_no
            )));
        }
    }

    let mut report = ReconciliationReport {
        lines: Vec::with_capacity(lines.len()),
        total_refund: Decimal::ZERO,
    };

    for line in lines {
        let receipt = receipts
            .iter()
            .find(|r| r.line_no == line.line_no)
            .ok_or_else(|| {
                DomainError::validation(format!("missing receipt for line {}", line.line_no))
            })?;

        let ordered = line.ordered_quantity;
        let received = receipt.received_quantity;
        let lost = ordered.saturating_sub(received);
        let found = received.saturating_sub(ordered);

        let lost_percentage = if ordered == 0 {
            Decimal::ZERO
        } else {
            Decimal::from(lost) / Decimal::from(ordered) * Decimal::ONE_HUNDRED
        };

        let refund = if lost_percentage > REFUND_THRESHOLD_PCT {
            Decimal::from(lost) * line.supplier_unit_price * exchange_rate
        } else {
            Decimal::ZERO
        };

        report.total_refund += refund;
        report.lines.push(LineReconciliation {
            line_no: line.line_no,
            ordered_quantity: ordered,
            received_quantity: received,
            lost_quantity: lost,
            found_quantity: found,
            lost_percentage,
            refund,
        });
    }

    Ok(report)
}

/// Record received/lost quantities on the lines. Infallible companion to
/// [`reconcile`]; inputs are assumed validated.
pub(crate) fn apply_receipts(lines: &mut [OrderLine], receipts: &[LineReceipt]) {
    for receipt in receipts {
        if let Some(line) = lines.iter_mut().find(|l| l.line_no == receipt.line_no) {
            line.received_quantity = Some(receipt.received_quantity);
            line.lost_quantity = line.ordered_quantity.saturating_sub(receipt.received_quantity);
        }
    }
}

/// Explicitly marked loss on one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineLoss {
    pub line_no: u32,
    pub lost_quantity: u32,
}

impl ValueObject for LineLoss {}

pub fn validate_losses(lines: &[OrderLine], losses: &[LineLoss]) -> DomainResult<()> {
    if losses.is_empty() {
        return Err(DomainError::validation("loss marking requires at least one line"));
    }
    let mut seen = HashSet::new();
    for loss in losses {
        if !seen.insert(loss.line_no) {
            return Err(DomainError::validation(format!(
                "duplicate loss entry for line {}",
                loss.line_no
            )));
        }
        let line = lines
            .iter()
            .find(|l| l.line_no == loss.line_no)
            .ok_or_else(|| {
                DomainError::validation(format!("loss entry for unknown line {}", loss.line_no))
            })?;
        if loss.lost_quantity > line.ordered_quantity {
            return Err(DomainError::validation(format!(
                "line {}: lost quantity {} exceeds ordered {}",
                loss.line_no, loss.lost_quantity, line.ordered_quantity
            )));
        }
    }
    Ok(())
}

/// Total home-currency value of the marked losses.
pub fn total_lost_value(lines: &[OrderLine], losses: &[LineLoss]) -> Decimal {
    losses
        .iter()
        .filter_map(|loss| {
            lines
                .iter()
                .find(|l| l.line_no == loss.line_no)
                .map(|line| Decimal::from(loss.lost_quantity) * line.home_unit_price)
        })
        .sum()
}

/// Redistribute the marked lines' lost value across surviving lines.
///
/// Each unmarked line with a positive received quantity absorbs
/// `total_lost_value × (line_total / Σ all line_totals)`. The denominator
/// spans all lines, so value apportioned to non-surviving lines stays
/// unrecovered. Marked lines also get their lost quantity recorded.
pub fn redistribute_loss(lines: &mut [OrderLine], losses: &[LineLoss]) -> Decimal {
    let lost_value = total_lost_value(lines, losses);
    let grand_total: Decimal = lines.iter().map(|l| l.line_total).sum();
    let marked: HashSet<u32> = losses.iter().map(|l| l.line_no).collect();

    if lost_value > Decimal::ZERO && grand_total > Decimal::ZERO {
        for line in lines.iter_mut() {
            if marked.contains(&line.line_no) {
                continue;
            }
            if line.received_quantity.unwrap_or(0) == 0 {
                continue;
            }
            let share_ratio = line.line_total / grand_total;
            line.loss_share += lost_value * share_ratio;
            line.recompute_final_cost();
        }
    }

    for loss in losses {
        if let Some(line) = lines.iter_mut().find(|l| l.line_no == loss.line_no) {
            line.lost_quantity = loss.lost_quantity;
        }
    }

    lost_value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::line::LineSpec;
    use kontor_core::ProductId;

    fn line(line_no: u32, price: i64, quantity: u32, rate: i64) -> OrderLine {
        OrderLine::from_spec(
            line_no,
            &LineSpec {
                product_id: ProductId::new(),
                supplier_unit_price: Decimal::from(price),
                ordered_quantity: quantity,
                unit_weight_g: Decimal::from(100),
                extra_weight_per_unit_g: Decimal::ZERO,
            },
            Decimal::from(rate),
        )
    }

    #[test]
    fn fifteen_percent_loss_is_refund_eligible() {
        let lines = vec![line(1, 10, 100, 15)];
        let receipts = vec![LineReceipt {
            line_no: 1,
            received_quantity: 85,
        }];

        let report = reconcile(&lines, &receipts, Decimal::from(15)).unwrap();
        let rec = &report.lines[0];
        assert_eq!(rec.lost_quantity, 15);
        assert_eq!(rec.lost_percentage, Decimal::from(15));
        assert_eq!(rec.refund, Decimal::from(2250)); // 15 × 10 × 15
        assert_eq!(report.total_refund, Decimal::from(2250));
    }

    #[test]
    fn eight_percent_loss_is_not_eligible() {
        let lines = vec![line(1, 10, 100, 15)];
        let receipts = vec![LineReceipt {
            line_no: 1,
            received_quantity: 92,
        }];

        let report = reconcile(&lines, &receipts, Decimal::from(15)).unwrap();
        assert_eq!(report.lines[0].lost_percentage, Decimal::from(8));
        assert_eq!(report.total_refund, Decimal::ZERO);
    }

    #[test]
    fn exactly_ten_percent_is_not_eligible() {
        let lines = vec![line(1, 10, 100, 15)];
        let receipts = vec![LineReceipt {
            line_no: 1,
            received_quantity: 90,
        }];

        let report = reconcile(&lines, &receipts, Decimal::from(15)).unwrap();
        assert_eq!(report.lines[0].lost_percentage, Decimal::TEN);
        assert_eq!(report.total_refund, Decimal::ZERO);
    }

    #[test]
    fn eligibility_is_per_line_not_order_average() {
        // line 1 loses 20%, line 2 loses nothing: only line 1 refunds.
        let lines = vec![line(1, 5, 100, 15), line(2, 50, 100, 15)];
        let receipts = vec![
            LineReceipt {
                line_no: 1,
                received_quantity: 80,
            },
            LineReceipt {
                line_no: 2,
                received_quantity: 100,
            },
        ];

        let report = reconcile(&lines, &receipts, Decimal::from(15)).unwrap();
        assert_eq!(report.lines[0].refund, Decimal::from(1500)); // 20 × 5 × 15
        assert_eq!(report.lines[1].refund, Decimal::ZERO);
        assert_eq!(report.total_refund, Decimal::from(1500));
    }

    #[test]
    fn over_receipt_has_zero_loss_and_zero_refund() {
        let lines = vec![line(1, 10, 100, 15)];
        let receipts = vec![LineReceipt {
            line_no: 1,
            received_quantity: 110,
        }];

        let report = reconcile(&lines, &receipts, Decimal::from(15)).unwrap();
        let rec = &report.lines[0];
        assert_eq!(rec.lost_quantity, 0);
        assert_eq!(rec.found_quantity, 10);
        assert_eq!(rec.lost_percentage, Decimal::ZERO);
        assert_eq!(rec.refund, Decimal::ZERO);
        assert_eq!(report.over_received().count(), 1);
    }

    #[test]
    fn zero_ordered_quantity_has_zero_loss_percentage() {
        let lines = vec![line(1, 10, 0, 15)];
        let receipts = vec![LineReceipt {
            line_no: 1,
            received_quantity: 0,
        }];

        let report = reconcile(&lines, &receipts, Decimal::from(15)).unwrap();
        assert_eq!(report.lines[0].lost_percentage, Decimal::ZERO);
    }

    #[test]
    fn receipts_must_cover_every_line() {
        let lines = vec![line(1, 10, 100, 15), line(2, 10, 100, 15)];
        let receipts = vec![LineReceipt {
            line_no: 1,
            received_quantity: 100,
        }];

        assert!(reconcile(&lines, &receipts, Decimal::from(15)).is_err());
    }

    #[test]
    fn duplicate_and_unknown_receipts_are_rejected() {
        let lines = vec![line(1, 10, 100, 15)];
        let dup = vec![
            LineReceipt {
                line_no: 1,
                received_quantity: 50,
            },
            LineReceipt {
                line_no: 1,
                received_quantity: 60,
            },
        ];
        assert!(reconcile(&lines, &dup, Decimal::from(15)).is_err());

        let unknown = vec![LineReceipt {
            line_no: 9,
            received_quantity: 50,
        }];
        assert!(reconcile(&lines, &unknown, Decimal::from(15)).is_err());
    }

    #[test]
    fn redistribution_spreads_lost_value_over_survivors() {
        // three lines at rate 1: totals 100, 300, 100 → grand total 500.
        let mut lines = vec![line(1, 10, 10, 1), line(2, 30, 10, 1), line(3, 10, 10, 1)];
        lines[1].received_quantity = Some(10);
        lines[2].received_quantity = Some(10);

        // line 1 fully lost: 10 × 10 = 100 lost value.
        let losses = vec![LineLoss {
            line_no: 1,
            lost_quantity: 10,
        }];
        validate_losses(&lines, &losses).unwrap();
        let lost = redistribute_loss(&mut lines, &losses);

        assert_eq!(lost, Decimal::from(100));
        // line 2 absorbs 100 × 300/500 = 60, line 3 absorbs 100 × 100/500 = 20
        assert_eq!(lines[1].loss_share, Decimal::from(60));
        assert_eq!(lines[2].loss_share, Decimal::from(20));
        assert_eq!(lines[1].final_unit_cost, Decimal::from(360));
        assert_eq!(lines[2].final_unit_cost, Decimal::from(120));
        // the marked line keeps its cost and records the loss
        assert_eq!(lines[0].loss_share, Decimal::ZERO);
        assert_eq!(lines[0].lost_quantity, 10);
    }

    #[test]
    fn lines_without_received_stock_absorb_nothing() {
        let mut lines = vec![line(1, 10, 10, 1), line(2, 30, 10, 1)];
        // line 2 never received anything
        let losses = vec![LineLoss {
            line_no: 1,
            lost_quantity: 10,
        }];
        let lost = redistribute_loss(&mut lines, &losses);

        assert_eq!(lost, Decimal::from(100));
        assert_eq!(lines[1].loss_share, Decimal::ZERO);
    }

    #[test]
    fn marking_more_than_ordered_is_rejected() {
        let lines = vec![line(1, 10, 10, 1)];
        let losses = vec![LineLoss {
            line_no: 1,
            lost_quantity: 11,
        }];
        assert!(validate_losses(&lines, &losses).is_err());
    }
}
