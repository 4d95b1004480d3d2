//! Currency rate registry: named currency → exchange rate to home currency.
//!
//! The registry is global and last-write-wins: revaluing one order updates
//! the rate every subsequent order in that currency inherits.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use kontor_core::{DomainError, DomainResult};

/// Named currency (e.g. "USD", "CNY"). Stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> DomainResult<Self> {
        let code = code.into();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(DomainError::validation(format!(
                "currency code must be non-empty alphabetic, got '{code}'"
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mutable registry of exchange rates (supplier currency → home currency).
pub trait RateRegistry: Send + Sync {
    /// Current rate for a currency, if one has been registered.
    fn rate(&self, currency: &CurrencyCode) -> Option<Decimal>;

    /// Set the rate for a currency. Global effect, last write wins.
    fn set_rate(&self, currency: CurrencyCode, rate: Decimal);
}

impl<R> RateRegistry for Arc<R>
where
    R: RateRegistry + ?Sized,
{
    fn rate(&self, currency: &CurrencyCode) -> Option<Decimal> {
        (**self).rate(currency)
    }

    fn set_rate(&self, currency: CurrencyCode, rate: Decimal) {
        (**self).set_rate(currency, rate)
    }
}

/// In-memory rate registry for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryRateRegistry {
    rates: RwLock<HashMap<CurrencyCode, Decimal>>,
}

impl InMemoryRateRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateRegistry for InMemoryRateRegistry {
    fn rate(&self, currency: &CurrencyCode) -> Option<Decimal> {
        self.rates
            .read()
            .ok()
            .and_then(|rates| rates.get(currency).copied())
    }

    fn set_rate(&self, currency: CurrencyCode, rate: Decimal) {
        if let Ok(mut rates) = self.rates.write() {
            rates.insert(currency, rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> CurrencyCode {
        CurrencyCode::new("usd").unwrap()
    }

    #[test]
    fn codes_are_normalized_uppercase() {
        assert_eq!(usd().as_str(), "USD");
        assert_eq!(usd(), CurrencyCode::new("USD").unwrap());
    }

    #[test]
    fn rejects_non_alphabetic_codes() {
        assert!(CurrencyCode::new("").is_err());
        assert!(CurrencyCode::new("US1").is_err());
    }

    #[test]
    fn last_write_wins() {
        let registry = InMemoryRateRegistry::new();
        assert_eq!(registry.rate(&usd()), None);

        registry.set_rate(usd(), Decimal::from(15));
        registry.set_rate(usd(), Decimal::new(155, 1));
        assert_eq!(registry.rate(&usd()), Some(Decimal::new(155, 1)));
    }
}
