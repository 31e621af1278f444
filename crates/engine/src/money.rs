use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Currency, EngineError, ResultEngine};

/// Signed money amount in **integer minor units**, bound to a [`Currency`].
///
/// Use this type for **all** monetary values in the engine (totals, remaining
/// and outstanding balances, allocation amounts) to avoid floating-point
/// drift.
///
/// Arithmetic between two values is only defined when their currencies are
/// equal: `checked_add`/`checked_sub` return
/// [`EngineError::CurrencyMismatch`] otherwise, there is no implicit
/// conversion.
///
/// # Examples
///
/// ```rust
/// use engine::{Currency, Money};
///
/// let amount = Money::new(12_34, Currency::Usd);
/// assert_eq!(amount.amount_minor(), 1234);
/// assert_eq!(amount.to_string(), "12.34 USD");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount_minor: i64,
    currency: Currency,
}

impl Money {
    /// Creates a new amount from integer minor units.
    #[must_use]
    pub const fn new(amount_minor: i64, currency: Currency) -> Self {
        Self {
            amount_minor,
            currency,
        }
    }

    #[must_use]
    pub const fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    /// Returns the raw value in minor units.
    #[must_use]
    pub const fn amount_minor(self) -> i64 {
        self.amount_minor
    }

    #[must_use]
    pub const fn currency(self) -> Currency {
        self.currency
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.amount_minor > 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.amount_minor < 0
    }

    /// Fails with `CurrencyMismatch` unless `other` has the same currency.
    pub fn ensure_same_currency(self, other: Money) -> ResultEngine<()> {
        if self.currency != other.currency {
            return Err(EngineError::CurrencyMismatch(format!(
                "cannot combine {} with {}",
                self.currency.code(),
                other.currency.code()
            )));
        }
        Ok(())
    }

    /// Same-currency addition; fails on currency mismatch or overflow.
    pub fn checked_add(self, rhs: Money) -> ResultEngine<Money> {
        self.ensure_same_currency(rhs)?;
        self.amount_minor
            .checked_add(rhs.amount_minor)
            .map(|amount| Money::new(amount, self.currency))
            .ok_or_else(|| EngineError::InvalidAmount("amount too large".to_string()))
    }

    /// Same-currency subtraction; fails on currency mismatch or overflow.
    pub fn checked_sub(self, rhs: Money) -> ResultEngine<Money> {
        self.ensure_same_currency(rhs)?;
        self.amount_minor
            .checked_sub(rhs.amount_minor)
            .map(|amount| Money::new(amount, self.currency))
            .ok_or_else(|| EngineError::InvalidAmount("amount too large".to_string()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        let per_major = self.currency.minor_per_major().unsigned_abs();
        let major = abs / per_major;
        let digits = usize::from(self.currency.minor_units());
        if digits == 0 {
            return write!(f, "{sign}{major} {}", self.currency.code());
        }
        let minor = abs % per_major;
        write!(f, "{sign}{major}.{minor:0digits$} {}", self.currency.code())
    }
}
