//! Allocatable sources.
//!
//! A [`AllocatableSource`] holds a fixed `total` (a credit note once issued,
//! a payment once completed) and a `remaining` balance that the ledger
//! decrements on every allocation and restores on every reversal.
//!
//! Invariant: `0 <= remaining <= total`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Currency, EngineError, Money, ResultEngine,
    util::{model_currency, parse_uuid},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    CreditNote,
    Payment,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CreditNote => "credit_note",
            Self::Payment => "payment",
        }
    }
}

impl TryFrom<&str> for SourceKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "credit_note" => Ok(Self::CreditNote),
            "payment" => Ok(Self::Payment),
            other => Err(EngineError::InvalidId(format!(
                "invalid source kind: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Open,
    Voided,
}

impl SourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Voided => "voided",
        }
    }
}

impl TryFrom<&str> for SourceStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "open" => Ok(Self::Open),
            "voided" => Ok(Self::Voided),
            other => Err(EngineError::InvalidId(format!(
                "invalid source status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatableSource {
    pub id: Uuid,
    pub kind: SourceKind,
    pub reference: Option<String>,
    pub currency: Currency,
    pub total: Money,
    pub remaining: Money,
    pub status: SourceStatus,
    pub issued_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
    /// Compare-and-set counter, bumped on every balance commit.
    pub version: i64,
}

impl AllocatableSource {
    pub fn new(
        kind: SourceKind,
        total: Money,
        reference: Option<String>,
        issued_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if !total.is_positive() {
            return Err(EngineError::InvalidAmount(
                "source total must be > 0".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            reference,
            currency: total.currency(),
            total,
            remaining: total,
            status: SourceStatus::Open,
            issued_at,
            voided_at: None,
            version: 0,
        })
    }

    /// Amount consumed by allocations: `total - remaining`.
    pub fn applied(&self) -> ResultEngine<Money> {
        self.total.checked_sub(self.remaining)
    }

    pub fn is_voided(&self) -> bool {
        self.status == SourceStatus::Voided
    }

    /// Validates a candidate `remaining` against `0 <= remaining <= total`.
    pub(crate) fn check_remaining(&self, remaining: Money) -> ResultEngine<()> {
        self.total.ensure_same_currency(remaining)?;
        if remaining.is_negative() {
            return Err(EngineError::InsufficientSourceBalance(format!(
                "source {} remaining would become {remaining}",
                self.id
            )));
        }
        if remaining.amount_minor() > self.total.amount_minor() {
            return Err(EngineError::InvalidAmount(format!(
                "source {} remaining would exceed total {}",
                self.id, self.total
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "allocation_sources")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: String,
    pub reference: Option<String>,
    pub currency: String,
    pub total_minor: i64,
    pub remaining_minor: i64,
    pub status: String,
    pub version: i64,
    pub issued_at: DateTimeUtc,
    pub voided_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::allocations::Entity")]
    Allocations,
}

impl Related<super::allocations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&AllocatableSource> for ActiveModel {
    fn from(source: &AllocatableSource) -> Self {
        Self {
            id: ActiveValue::Set(source.id.to_string()),
            kind: ActiveValue::Set(source.kind.as_str().to_string()),
            reference: ActiveValue::Set(source.reference.clone()),
            currency: ActiveValue::Set(source.currency.code().to_string()),
            total_minor: ActiveValue::Set(source.total.amount_minor()),
            remaining_minor: ActiveValue::Set(source.remaining.amount_minor()),
            status: ActiveValue::Set(source.status.as_str().to_string()),
            version: ActiveValue::Set(source.version),
            issued_at: ActiveValue::Set(source.issued_at),
            voided_at: ActiveValue::Set(source.voided_at),
        }
    }
}

impl TryFrom<Model> for AllocatableSource {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let currency = model_currency(&model.currency)?;
        Ok(Self {
            id: parse_uuid(&model.id, "source")?,
            kind: SourceKind::try_from(model.kind.as_str())?,
            reference: model.reference,
            currency,
            total: Money::new(model.total_minor, currency),
            remaining: Money::new(model.remaining_minor, currency),
            status: SourceStatus::try_from(model.status.as_str())?,
            issued_at: model.issued_at,
            voided_at: model.voided_at,
            version: model.version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_source_starts_fully_available() {
        let total = Money::new(50_000, Currency::Usd);
        let source =
            AllocatableSource::new(SourceKind::CreditNote, total, None, Utc::now()).unwrap();
        assert_eq!(source.remaining, total);
        assert_eq!(source.applied().unwrap(), Money::zero(Currency::Usd));
        assert!(!source.is_voided());
    }

    #[test]
    fn new_source_rejects_non_positive_total() {
        let err = AllocatableSource::new(
            SourceKind::Payment,
            Money::zero(Currency::Eur),
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidAmount(_)));
    }

    #[test]
    fn remaining_is_bounded_by_total() {
        let source = AllocatableSource::new(
            SourceKind::Payment,
            Money::new(100, Currency::Eur),
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(source.check_remaining(Money::new(0, Currency::Eur)).is_ok());
        assert!(source.check_remaining(Money::new(-1, Currency::Eur)).is_err());
        assert!(source.check_remaining(Money::new(101, Currency::Eur)).is_err());
        assert!(source.check_remaining(Money::new(50, Currency::Usd)).is_err());
    }
}
