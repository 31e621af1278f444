//! Per-currency statistics over allocatable sources.
//!
//! [`aggregate`] groups sources by currency into a breakdown of original
//! amounts. [`convert`] folds that breakdown into a single display currency
//! using point-in-time rates from a [`RateProvider`]. The converted view is
//! always computed from the breakdown, never from the sources directly, so
//! the two shapes cannot disagree.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::{AllocatableSource, Currency, EngineError, Money, ResultEngine};

/// External collaborator supplying exchange rates.
///
/// `rate(from, to, as_of)` returns how many units of `to` one unit of `from`
/// is worth at `as_of` (major units).
pub trait RateProvider: Send + Sync {
    fn rate(&self, from: Currency, to: Currency, as_of: DateTime<Utc>) -> ResultEngine<Decimal>;
}

/// A fixed rate table, for callers that already hold the rates they want
/// applied (e.g. received in a request body).
///
/// Falls back to the inverse of `to -> from` when `from -> to` is missing.
#[derive(Clone, Debug, Default)]
pub struct StaticRates {
    rates: HashMap<(Currency, Currency), Decimal>,
}

impl StaticRates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_rate(mut self, from: Currency, to: Currency, rate: Decimal) -> Self {
        self.rates.insert((from, to), rate);
        self
    }
}

impl RateProvider for StaticRates {
    fn rate(&self, from: Currency, to: Currency, _as_of: DateTime<Utc>) -> ResultEngine<Decimal> {
        if from == to {
            return Ok(Decimal::ONE);
        }
        if let Some(rate) = self.rates.get(&(from, to)) {
            return Ok(*rate);
        }
        if let Some(inverse) = self.rates.get(&(to, from))
            && !inverse.is_zero()
        {
            return Ok(Decimal::ONE / *inverse);
        }
        Err(EngineError::RateUnavailable(format!("{from} -> {to}")))
    }
}

/// Totals for one currency, in original amounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyTotals {
    pub currency: Currency,
    pub count: u64,
    pub total: Money,
    /// `total - remaining`: applied for credit notes, refunded for payments.
    pub applied: Money,
    pub remaining: Money,
}

/// The breakdown folded into one display currency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedTotals {
    pub currency: Currency,
    pub as_of: DateTime<Utc>,
    pub total: Money,
    pub applied: Money,
    pub remaining: Money,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatistics {
    pub breakdown: Vec<CurrencyTotals>,
    pub converted: Option<ConvertedTotals>,
}

/// Groups sources by currency. Entries are ordered by currency code.
pub fn aggregate(sources: &[AllocatableSource]) -> ResultEngine<Vec<CurrencyTotals>> {
    let mut by_currency: BTreeMap<&'static str, CurrencyTotals> = BTreeMap::new();

    for source in sources {
        let currency = source.currency;
        let entry = by_currency
            .entry(currency.code())
            .or_insert_with(|| CurrencyTotals {
                currency,
                count: 0,
                total: Money::zero(currency),
                applied: Money::zero(currency),
                remaining: Money::zero(currency),
            });
        entry.count += 1;
        entry.total = entry.total.checked_add(source.total)?;
        entry.applied = entry.applied.checked_add(source.applied()?)?;
        entry.remaining = entry.remaining.checked_add(source.remaining)?;
    }

    Ok(by_currency.into_values().collect())
}

/// Converts a breakdown into `display` using rates valid at `as_of`.
///
/// Each currency line is converted separately and rounded half away from zero
/// to the display currency's minor units, then summed. Only `total` and
/// `applied` are rounded; `remaining` is their difference, so
/// `total == applied + remaining` holds in the display currency too.
pub fn convert(
    breakdown: &[CurrencyTotals],
    display: Currency,
    rates: &dyn RateProvider,
    as_of: DateTime<Utc>,
) -> ResultEngine<ConvertedTotals> {
    let mut total = Money::zero(display);
    let mut applied = Money::zero(display);
    let mut remaining = Money::zero(display);

    for line in breakdown {
        let rate = if line.currency == display {
            Decimal::ONE
        } else {
            rates.rate(line.currency, display, as_of)?
        };
        if rate.is_sign_negative() {
            return Err(EngineError::RateUnavailable(format!(
                "negative rate {rate} for {} -> {display}",
                line.currency
            )));
        }
        let line_total = convert_money(line.total, display, rate)?;
        let line_applied = convert_money(line.applied, display, rate)?;
        total = total.checked_add(line_total)?;
        applied = applied.checked_add(line_applied)?;
        remaining = remaining.checked_add(line_total.checked_sub(line_applied)?)?;
    }

    Ok(ConvertedTotals {
        currency: display,
        as_of,
        total,
        applied,
        remaining,
    })
}

/// Converts one amount, rescaling between the two currencies' minor units.
pub fn convert_money(amount: Money, to: Currency, rate: Decimal) -> ResultEngine<Money> {
    let overflow = || EngineError::InvalidAmount("converted amount too large".to_string());

    let major = Decimal::new(
        amount.amount_minor(),
        u32::from(amount.currency().minor_units()),
    );
    let converted = major
        .checked_mul(rate)
        .ok_or_else(overflow)?
        .round_dp_with_strategy(
            u32::from(to.minor_units()),
            RoundingStrategy::MidpointAwayFromZero,
        );
    let minor = converted
        .checked_mul(Decimal::from(to.minor_per_major()))
        .ok_or_else(overflow)?
        .to_i64()
        .ok_or_else(overflow)?;

    Ok(Money::new(minor, to))
}
