//! Funding account registry: bank-like accounts orders are paid from.
//!
//! Whether an account may go negative is a per-account policy; a rejected
//! draw fails the whole transition that requested it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use kontor_core::FundingAccountId;

/// Funding account operation error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FundingError {
    #[error("unknown funding account {0}")]
    UnknownAccount(FundingAccountId),

    #[error("funding amount must be non-negative, got {0}")]
    NegativeAmount(Decimal),

    #[error("overdraft rejected on {account}: requested {requested}, available {available}")]
    OverdraftRejected {
        account: FundingAccountId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("funding registry unavailable: {0}")]
    Unavailable(String),
}

/// How far below zero an account's balance may go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OverdraftPolicy {
    /// Balance may not go negative.
    Forbidden,
    /// Balance may go down to `-limit`.
    Limit { limit: Decimal },
    /// No floor.
    Unlimited,
}

impl OverdraftPolicy {
    fn permits(&self, balance_after: Decimal) -> bool {
        match self {
            OverdraftPolicy::Forbidden => balance_after >= Decimal::ZERO,
            OverdraftPolicy::Limit { limit } => balance_after >= -*limit,
            OverdraftPolicy::Unlimited => true,
        }
    }
}

/// Registry of funding accounts with balances and overdraft policies.
pub trait FundingAccounts: Send + Sync {
    fn balance(&self, account: FundingAccountId) -> Result<Decimal, FundingError>;

    /// Draw from the account, honoring its overdraft policy.
    fn debit(&self, account: FundingAccountId, amount: Decimal) -> Result<(), FundingError>;

    /// Deposit into the account (also used to compensate a rolled-back draw).
    fn credit(&self, account: FundingAccountId, amount: Decimal) -> Result<(), FundingError>;
}

impl<F> FundingAccounts for Arc<F>
where
    F: FundingAccounts + ?Sized,
{
    fn balance(&self, account: FundingAccountId) -> Result<Decimal, FundingError> {
        (**self).balance(account)
    }

    fn debit(&self, account: FundingAccountId, amount: Decimal) -> Result<(), FundingError> {
        (**self).debit(account, amount)
    }

    fn credit(&self, account: FundingAccountId, amount: Decimal) -> Result<(), FundingError> {
        (**self).credit(account, amount)
    }
}

#[derive(Debug, Clone)]
struct Account {
    balance: Decimal,
    policy: OverdraftPolicy,
}

/// In-memory funding account registry for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryFundingAccounts {
    accounts: RwLock<HashMap<FundingAccountId, Account>>,
}

impl InMemoryFundingAccounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_account(
        &self,
        account: FundingAccountId,
        opening_balance: Decimal,
        policy: OverdraftPolicy,
    ) {
        if let Ok(mut accounts) = self.accounts.write() {
            accounts.insert(
                account,
                Account {
                    balance: opening_balance,
                    policy,
                },
            );
        }
    }
}

impl FundingAccounts for InMemoryFundingAccounts {
    fn balance(&self, account: FundingAccountId) -> Result<Decimal, FundingError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|_| FundingError::Unavailable("lock poisoned".to_string()))?;
        accounts
            .get(&account)
            .map(|a| a.balance)
            .ok_or(FundingError::UnknownAccount(account))
    }

    fn debit(&self, account: FundingAccountId, amount: Decimal) -> Result<(), FundingError> {
        if amount < Decimal::ZERO {
            return Err(FundingError::NegativeAmount(amount));
        }
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| FundingError::Unavailable("lock poisoned".to_string()))?;
        let entry = accounts
            .get_mut(&account)
            .ok_or(FundingError::UnknownAccount(account))?;

        let after = entry.balance - amount;
        if !entry.policy.permits(after) {
            return Err(FundingError::OverdraftRejected {
                account,
                requested: amount,
                available: entry.balance,
            });
        }
        entry.balance = after;
        Ok(())
    }

    fn credit(&self, account: FundingAccountId, amount: Decimal) -> Result<(), FundingError> {
        if amount < Decimal::ZERO {
            return Err(FundingError::NegativeAmount(amount));
        }
        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| FundingError::Unavailable("lock poisoned".to_string()))?;
        let entry = accounts
            .get_mut(&account)
            .ok_or(FundingError::UnknownAccount(account))?;
        entry.balance += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debit_within_balance_succeeds() {
        let registry = InMemoryFundingAccounts::new();
        let account = FundingAccountId::new();
        registry.open_account(account, Decimal::from(10000), OverdraftPolicy::Forbidden);

        registry.debit(account, Decimal::from(4500)).unwrap();
        assert_eq!(registry.balance(account).unwrap(), Decimal::from(5500));
    }

    #[test]
    fn forbidden_policy_rejects_negative_balance() {
        let registry = InMemoryFundingAccounts::new();
        let account = FundingAccountId::new();
        registry.open_account(account, Decimal::from(100), OverdraftPolicy::Forbidden);

        let err = registry.debit(account, Decimal::from(101)).unwrap_err();
        assert!(matches!(err, FundingError::OverdraftRejected { .. }));
        assert_eq!(registry.balance(account).unwrap(), Decimal::from(100));
    }

    #[test]
    fn limit_policy_allows_bounded_overdraft() {
        let registry = InMemoryFundingAccounts::new();
        let account = FundingAccountId::new();
        registry.open_account(
            account,
            Decimal::from(100),
            OverdraftPolicy::Limit {
                limit: Decimal::from(50),
            },
        );

        registry.debit(account, Decimal::from(150)).unwrap();
        assert_eq!(registry.balance(account).unwrap(), Decimal::from(-50));

        let err = registry.debit(account, Decimal::ONE).unwrap_err();
        assert!(matches!(err, FundingError::OverdraftRejected { .. }));
    }

    #[test]
    fn unknown_account_is_an_error() {
        let registry = InMemoryFundingAccounts::new();
        let account = FundingAccountId::new();
        assert!(matches!(
            registry.balance(account),
            Err(FundingError::UnknownAccount(_))
        ));
        assert!(matches!(
            registry.debit(account, Decimal::ONE),
            Err(FundingError::UnknownAccount(_))
        ));
    }
}
