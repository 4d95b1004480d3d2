//! Financial collaborators consumed by the procurement engine.
//!
//! The engine does not own these ledgers; it only draws on them. Each
//! collaborator is a trait plus an in-memory implementation for tests/dev,
//! the same way the event store is modeled in `kontor-infra`.

pub mod funding;
pub mod rates;
pub mod supplier_credit;

pub use funding::{FundingAccounts, FundingError, InMemoryFundingAccounts, OverdraftPolicy};
pub use rates::{CurrencyCode, InMemoryRateRegistry, RateRegistry};
pub use supplier_credit::{
    InMemorySupplierLedger, LedgerEntry, LedgerError, SupplierCreditLedger,
};
