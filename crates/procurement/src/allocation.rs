//! Payment allocation: split a home-currency obligation between supplier
//! credit and a funding account.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kontor_core::ValueObject;

/// How an order's home-currency total is funded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub total: Decimal,
    pub from_supplier_credit: Decimal,
    pub from_funding_account: Decimal,
}

impl ValueObject for PaymentSplit {}

/// Draw as much as possible from supplier credit (when positive), the
/// remainder from the funding account. Always:
/// `from_supplier_credit + from_funding_account == total` and
/// `from_supplier_credit ≤ max(supplier_credit_balance, 0)`.
pub fn split_payment(order_total_home: Decimal, supplier_credit_balance: Decimal) -> PaymentSplit {
    let from_supplier_credit = if supplier_credit_balance > Decimal::ZERO {
        order_total_home.min(supplier_credit_balance)
    } else {
        Decimal::ZERO
    };

    PaymentSplit {
        total: order_total_home,
        from_supplier_credit,
        from_funding_account: order_total_home - from_supplier_credit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn credit_covers_part_of_the_total() {
        let split = split_payment(Decimal::from(7500), Decimal::from(3000));
        assert_eq!(split.from_supplier_credit, Decimal::from(3000));
        assert_eq!(split.from_funding_account, Decimal::from(4500));
    }

    #[test]
    fn credit_covers_the_whole_total() {
        let split = split_payment(Decimal::from(500), Decimal::from(3000));
        assert_eq!(split.from_supplier_credit, Decimal::from(500));
        assert_eq!(split.from_funding_account, Decimal::ZERO);
    }

    #[test]
    fn non_positive_credit_is_ignored() {
        let split = split_payment(Decimal::from(500), Decimal::from(-200));
        assert_eq!(split.from_supplier_credit, Decimal::ZERO);
        assert_eq!(split.from_funding_account, Decimal::from(500));

        let split = split_payment(Decimal::from(500), Decimal::ZERO);
        assert_eq!(split.from_supplier_credit, Decimal::ZERO);
    }

    proptest! {
        #[test]
        fn split_always_sums_to_total(total in 0i64..10_000_000, credit in -1_000_000i64..10_000_000) {
            let total = Decimal::from(total);
            let credit = Decimal::from(credit);
            let split = split_payment(total, credit);

            prop_assert_eq!(split.from_supplier_credit + split.from_funding_account, total);
            prop_assert!(split.from_supplier_credit >= Decimal::ZERO);
            prop_assert!(split.from_funding_account >= Decimal::ZERO);
            prop_assert!(split.from_supplier_credit <= credit.max(Decimal::ZERO));
        }
    }
}
