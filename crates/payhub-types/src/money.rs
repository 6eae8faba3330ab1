//! Fixed-precision decimal money, always paired with a currency.
//!
//! Binary floating point is never used for arithmetic (spec.md 4.1):
//! amounts are backed by `rust_decimal::Decimal`, rounded half-up to four
//! fractional digits on every store.

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of fractional digits every persisted amount is rounded to.
pub const SCALE: u32 = 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("currency mismatch: {0} vs {1}")]
    CurrencyMismatch(String, String),
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
    #[error("amount must be positive")]
    NotPositive,
}

/// A monetary amount fixed to four fractional digits, paired with an
/// ISO-4217 currency code.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

/// An upper-cased three-letter ISO-4217 currency code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency([u8; 3]);

impl Currency {
    pub fn parse(code: &str) -> Result<Self, MoneyError> {
        let upper = code.trim().to_uppercase();
        let bytes = upper.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(MoneyError::InvalidAmount(format!(
                "currency must be a 3-letter code, got {code:?}"
            )));
        }
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: constructed only from ASCII-alphabetic bytes in `parse`.
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The default allow-list of active ISO-4217 codes the service will accept.
/// A real deployment would source this from a config table; the list here
/// covers the currencies exercised by the shipped providers and tests.
pub const ACTIVE_CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "CAD", "AUD", "JPY", "CHF", "SEK", "NOK", "DKK",
];

impl Money {
    /// Construct from a decimal string (e.g. `"100.00"`), rounding half-up
    /// to [`SCALE`] fractional digits.
    pub fn parse(amount: &str, currency: &str) -> Result<Self, MoneyError> {
        let currency = Currency::parse(currency)?;
        let decimal = Decimal::from_str(amount.trim())
            .map_err(|e| MoneyError::InvalidAmount(e.to_string()))?;
        Ok(Self::from_decimal(decimal, currency))
    }

    /// Construct from integer minor units (e.g. cents for USD: `10050` ->
    /// `100.50`), assuming two minor-unit digits scaled into the four
    /// persisted fractional digits.
    pub fn from_minor_units(minor: i64, currency: &str) -> Result<Self, MoneyError> {
        let currency = Currency::parse(currency)?;
        let decimal = Decimal::new(minor, 2);
        Ok(Self::from_decimal(decimal, currency))
    }

    /// Zero amount in the given currency (used as an accumulator seed).
    pub fn zero(currency: &str) -> Result<Self, MoneyError> {
        let currency = Currency::parse(currency)?;
        Ok(Self {
            amount: Decimal::ZERO,
            currency,
        })
    }

    fn from_decimal(decimal: Decimal, currency: Currency) -> Self {
        Self {
            amount: decimal.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointAwayFromZero),
            currency,
        }
    }

    pub fn currency(&self) -> &str {
        self.currency.as_str()
    }

    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    pub fn require_positive(&self) -> Result<(), MoneyError> {
        if self.is_positive() {
            Ok(())
        } else {
            Err(MoneyError::NotPositive)
        }
    }

    fn check_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency.to_string(),
                other.currency.to_string(),
            ));
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_same_currency(other)?;
        Ok(Money::from_decimal(self.amount + other.amount, self.currency))
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_same_currency(other)?;
        Ok(Money::from_decimal(self.amount - other.amount, self.currency))
    }

    pub fn multiply(&self, scalar: Decimal) -> Money {
        Money::from_decimal(self.amount * scalar, self.currency)
    }

    pub fn max(&self, other: &Money) -> Result<Money, MoneyError> {
        self.check_same_currency(other)?;
        Ok(if self.amount >= other.amount { *self } else { *other })
    }

    /// Render for persistence/wire format: `N.NNNN`, always four fractional
    /// digits, never scientific notation.
    pub fn to_persisted_string(&self) -> String {
        format!("{:.*}", SCALE as usize, self.amount)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.amount
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.currency == other.currency && self.amount == other.amount
    }
}
impl Eq for Money {}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        self.amount.partial_cmp(&other.amount)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_persisted_string(), self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_rounds_half_up() {
        let m = Money::parse("100.00005", "usd").unwrap();
        assert_eq!(m.to_persisted_string(), "100.0001");
        assert_eq!(m.currency(), "USD");
    }

    #[test]
    fn rejects_bad_currency() {
        assert!(Money::parse("10.00", "US").is_err());
        assert!(Money::parse("10.00", "1234").is_err());
    }

    #[test]
    fn add_requires_same_currency() {
        let a = Money::parse("10.00", "USD").unwrap();
        let b = Money::parse("5.00", "EUR").unwrap();
        assert!(matches!(a.add(&b), Err(MoneyError::CurrencyMismatch(_, _))));
    }

    #[test]
    fn add_subtract_roundtrip() {
        let a = Money::parse("100.00", "USD").unwrap();
        let b = Money::parse("30.00", "USD").unwrap();
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.to_persisted_string(), "130.0000");
        let diff = sum.subtract(&b).unwrap();
        assert_eq!(diff, a);
    }

    #[test]
    fn minor_units_conversion() {
        let m = Money::from_minor_units(10050, "USD").unwrap();
        assert_eq!(m.to_persisted_string(), "100.5000");
    }

    #[test]
    fn zero_is_not_positive() {
        let z = Money::zero("USD").unwrap();
        assert!(!z.is_positive());
        assert!(z.require_positive().is_err());
    }

    #[test]
    fn ordering_same_currency() {
        let a = Money::parse("10.00", "USD").unwrap();
        let b = Money::parse("20.00", "USD").unwrap();
        assert!(a < b);
    }

    #[test]
    fn ordering_cross_currency_is_none() {
        let a = Money::parse("10.00", "USD").unwrap();
        let b = Money::parse("20.00", "EUR").unwrap();
        assert_eq!(a.partial_cmp(&b), None);
    }
}
