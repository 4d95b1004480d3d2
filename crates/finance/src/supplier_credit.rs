//! Supplier credit ledger: a running balance a supplier owns on our books,
//! usable to offset payment obligations. Refunds are credited here.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kontor_core::SupplierId;

/// Ledger operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("ledger amount must be non-negative, got {0}")]
    NegativeAmount(Decimal),

    #[error("insufficient supplier credit: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// One memo'd movement on a supplier's credit balance. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Signed amount: positive = credit, negative = debit.
    pub amount: Decimal,
    pub memo: String,
    pub recorded_at: DateTime<Utc>,
}

/// Per-supplier credit balance with memo'd movements.
pub trait SupplierCreditLedger: Send + Sync {
    /// Current balance (zero for suppliers with no movements).
    fn balance(&self, supplier: SupplierId) -> Decimal;

    /// Add to the supplier's credit.
    fn credit(&self, supplier: SupplierId, amount: Decimal, memo: &str) -> Result<(), LedgerError>;

    /// Draw from the supplier's credit. The balance may not go negative.
    fn debit(&self, supplier: SupplierId, amount: Decimal, memo: &str) -> Result<(), LedgerError>;
}

impl<L> SupplierCreditLedger for Arc<L>
where
    L: SupplierCreditLedger + ?Sized,
{
    fn balance(&self, supplier: SupplierId) -> Decimal {
        (**self).balance(supplier)
    }

    fn credit(&self, supplier: SupplierId, amount: Decimal, memo: &str) -> Result<(), LedgerError> {
        (**self).credit(supplier, amount, memo)
    }

    fn debit(&self, supplier: SupplierId, amount: Decimal, memo: &str) -> Result<(), LedgerError> {
        (**self).debit(supplier, amount, memo)
    }
}

/// In-memory supplier credit ledger for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySupplierLedger {
    accounts: RwLock<HashMap<SupplierId, Vec<LedgerEntry>>>,
}

impl InMemorySupplierLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a supplier with an opening balance.
    pub fn with_balance(self, supplier: SupplierId, amount: Decimal) -> Self {
        let _ = self.credit(supplier, amount, "opening balance");
        self
    }

    /// Full movement history for a supplier, oldest first.
    pub fn entries(&self, supplier: SupplierId) -> Vec<LedgerEntry> {
        self.accounts
            .read()
            .ok()
            .and_then(|accounts| accounts.get(&supplier).cloned())
            .unwrap_or_default()
    }

    fn append(
        &self,
        supplier: SupplierId,
        amount: Decimal,
        memo: &str,
    ) -> Result<(), LedgerError> {
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| LedgerError::Unavailable("lock poisoned".to_string()))?;
        accounts.entry(supplier).or_default().push(LedgerEntry {
            amount,
            memo: memo.to_string(),
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

impl SupplierCreditLedger for InMemorySupplierLedger {
    fn balance(&self, supplier: SupplierId) -> Decimal {
        self.accounts
            .read()
            .ok()
            .and_then(|accounts| {
                accounts
                    .get(&supplier)
                    .map(|entries| entries.iter().map(|e| e.amount).sum())
            })
            .unwrap_or(Decimal::ZERO)
    }

    fn credit(&self, supplier: SupplierId, amount: Decimal, memo: &str) -> Result<(), LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount(amount));
        }
        self.append(supplier, amount, memo)
    }

    fn debit(&self, supplier: SupplierId, amount: Decimal, memo: &str) -> Result<(), LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount(amount));
        }
        let available = self.balance(supplier);
        if amount > available {
            return Err(LedgerError::InsufficientBalance {
                requested: amount,
                available,
            });
        }
        self.append(supplier, -amount, memo)
    }
}
