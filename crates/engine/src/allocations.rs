//! Allocation records.
//!
//! An [`Allocation`] is the application of an amount from one source to one
//! target. Records are append-only: a reversal only bumps `reversed_amount`
//! (and flips `status` once fully reversed), rows are never deleted. The
//! open amount of an allocation is `amount - reversed_amount`.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Currency, EngineError, Money, ResultEngine,
    util::{model_currency, parse_uuid},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    Active,
    Reversed,
}

impl AllocationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Reversed => "reversed",
        }
    }
}

impl TryFrom<&str> for AllocationStatus {
    type Error = EngineError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "active" => Ok(Self::Active),
            "reversed" => Ok(Self::Reversed),
            other => Err(EngineError::InvalidId(format!(
                "invalid allocation status: {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub amount: Money,
    pub reversed_amount: Money,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub reversed_at: Option<DateTime<Utc>>,
    /// Stored form of the caller's key: `allocate:<key>` or `batch:<key>#<index>`.
    pub idempotency_key: Option<String>,
    pub batch_id: Option<Uuid>,
    pub batch_index: Option<i32>,
    pub note: Option<String>,
}

impl Allocation {
    pub fn new(
        source_id: Uuid,
        target_id: Uuid,
        amount: Money,
        created_at: DateTime<Utc>,
    ) -> ResultEngine<Self> {
        if !amount.is_positive() {
            return Err(EngineError::InvalidAmount(
                "allocation amount must be > 0".to_string(),
            ));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            source_id,
            target_id,
            amount,
            reversed_amount: Money::zero(amount.currency()),
            status: AllocationStatus::Active,
            created_at,
            reversed_at: None,
            idempotency_key: None,
            batch_id: None,
            batch_index: None,
            note: None,
        })
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency()
    }

    /// Amount still applied to the target: `amount - reversed_amount`.
    pub fn open_amount(&self) -> ResultEngine<Money> {
        self.amount.checked_sub(self.reversed_amount)
    }

    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "allocations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    pub amount_minor: i64,
    pub reversed_minor: i64,
    pub currency: String,
    pub status: String,
    pub created_at: DateTimeUtc,
    pub reversed_at: Option<DateTimeUtc>,
    pub idempotency_key: Option<String>,
    pub batch_id: Option<String>,
    pub batch_index: Option<i32>,
    pub note: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sources::Entity",
        from = "Column::SourceId",
        to = "super::sources::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Sources,
    #[sea_orm(
        belongs_to = "super::targets::Entity",
        from = "Column::TargetId",
        to = "super::targets::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Targets,
    #[sea_orm(has_many = "super::reversals::Entity")]
    Reversals,
}

impl Related<super::sources::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sources.def()
    }
}

impl Related<super::targets::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Targets.def()
    }
}

impl Related<super::reversals::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reversals.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Allocation> for ActiveModel {
    fn from(allocation: &Allocation) -> Self {
        Self {
            id: ActiveValue::Set(allocation.id.to_string()),
            source_id: ActiveValue::Set(allocation.source_id.to_string()),
            target_id: ActiveValue::Set(allocation.target_id.to_string()),
            amount_minor: ActiveValue::Set(allocation.amount.amount_minor()),
            reversed_minor: ActiveValue::Set(allocation.reversed_amount.amount_minor()),
            currency: ActiveValue::Set(allocation.currency().code().to_string()),
            status: ActiveValue::Set(allocation.status.as_str().to_string()),
            created_at: ActiveValue::Set(allocation.created_at),
            reversed_at: ActiveValue::Set(allocation.reversed_at),
            idempotency_key: ActiveValue::Set(allocation.idempotency_key.clone()),
            batch_id: ActiveValue::Set(allocation.batch_id.map(|id| id.to_string())),
            batch_index: ActiveValue::Set(allocation.batch_index),
            note: ActiveValue::Set(allocation.note.clone()),
        }
    }
}

impl TryFrom<Model> for Allocation {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let currency = model_currency(&model.currency)?;
        let batch_id = model
            .batch_id
            .as_deref()
            .map(|raw| parse_uuid(raw, "batch"))
            .transpose()?;
        Ok(Self {
            id: parse_uuid(&model.id, "allocation")?,
            source_id: parse_uuid(&model.source_id, "source")?,
            target_id: parse_uuid(&model.target_id, "target")?,
            amount: Money::new(model.amount_minor, currency),
            reversed_amount: Money::new(model.reversed_minor, currency),
            status: AllocationStatus::try_from(model.status.as_str())?,
            created_at: model.created_at,
            reversed_at: model.reversed_at,
            idempotency_key: model.idempotency_key,
            batch_id,
            batch_index: model.batch_index,
            note: model.note,
        })
    }
}
