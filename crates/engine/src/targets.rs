//! Allocation targets.
//!
//! An [`AllocationTarget`] is an invoice, an expense or a project bucket with
//! an `outstanding` balance that allocations reduce. `amount` is the open
//! balance the target was registered with; it is only used to reconcile
//! `outstanding` against the allocation history.

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
pub enum TargetKind {
    Invoice,
    Expense,
    Project,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Expense => "expense",
            Self::Project => "project",
        }
    }
}

impl TryFrom<&str> for TargetKind {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "invoice" => Ok(Self::Invoice),
            "expense" => Ok(Self::Expense),
            "project" => Ok(Self::Project),
            other => Err(EngineError::InvalidId(format!(
                "invalid target kind: {other}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Open,
    /// Settled by other means; no further allocations accepted.
    Closed,
}

impl TargetStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl TryFrom<&str> for TargetStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(EngineError::InvalidId(format!(
                "invalid target status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationTarget {
    pub id: Uuid,
    pub kind: TargetKind,
    pub reference: Option<String>,
    pub currency: Currency,
    pub amount: Money,
    pub outstanding: Money,
    pub status: TargetStatus,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl AllocationTarget {
    pub fn new(
        kind: TargetKind,
        outstanding: Money,
        reference: Option<String>,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if outstanding.is_negative() {
            return Err(EngineError::InvalidAmount(
                "target outstanding must be >= 0".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            kind,
            reference,
            currency: outstanding.currency(),
            amount: outstanding,
            outstanding,
            status: TargetStatus::Open,
            created_at,
            version: 0,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.status == TargetStatus::Closed
    }

    pub(crate) fn check_outstanding(&self, outstanding: Money) -> ResultEngine<()> {
        self.amount.ensure_same_currency(outstanding)?;
        if outstanding.is_negative() {
            return Err(EngineError::TargetOverAllocation(format!(
                "target {} outstanding would become {outstanding}",
                self.id
            )));
        }
        if outstanding.amount_minor() > self.amount.amount_minor() {
            return Err(EngineError::InvalidAmount(format!(
                "target {} outstanding would exceed {}",
                self.id, self.amount
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "allocation_targets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub kind: String,
    pub reference: Option<String>,
    pub currency: String,
    pub amount_minor: i64,
    pub outstanding_minor: i64,
    pub status: String,
    pub version: i64,
    pub created_at: DateTimeUtc,
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

impl From<&AllocationTarget> for ActiveModel {
    fn from(target: &AllocationTarget) -> Self {
        Self {
            id: ActiveValue::Set(target.id.to_string()),
            kind: ActiveValue::Set(target.kind.as_str().to_string()),
            reference: ActiveValue::Set(target.reference.clone()),
            currency: ActiveValue::Set(target.currency.code().to_string()),
            amount_minor: ActiveValue::Set(target.amount.amount_minor()),
            outstanding_minor: ActiveValue::Set(target.outstanding.amount_minor()),
            status: ActiveValue::Set(target.status.as_str().to_string()),
            version: ActiveValue::Set(target.version),
            created_at: ActiveValue::Set(target.created_at),
        }
    }
}

impl TryFrom<Model> for AllocationTarget {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let currency = model_currency(&model.currency)?;
        Ok(Self {
            id: parse_uuid(&model.id, "target")?,
            kind: TargetKind::try_from(model.kind.as_str())?,
            reference: model.reference,
            currency,
            amount: Money::new(model.amount_minor, currency),
            outstanding: Money::new(model.outstanding_minor, currency),
            status: TargetStatus::try_from(model.status.as_str())?,
            created_at: model.created_at,
            version: model.version,
        })
    }
}
