//! Reversal audit records.
//!
//! Every successful `reverse` call writes one [`Reversal`] row, so the
//! history of how an allocation was undone stays replayable.

use chrono::{DateTime, Utc};
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    EngineError, Money,
    util::{model_currency, parse_uuid},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reversal {
    pub id: Uuid,
    pub allocation_id: Uuid,
    pub amount: Money,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "allocation_reversals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub allocation_id: String,
    pub amount_minor: i64,
    pub currency: String,
    pub reason: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::allocations::Entity",
        from = "Column::AllocationId",
        to = "super::allocations::Column::Id",
        on_update = "NoAction",
        on_delete = "NoAction"
    )]
    Allocations,
}

impl Related<super::allocations::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Reversal> for ActiveModel {
    fn from(reversal: &Reversal) -> Self {
        Self {
            id: ActiveValue::Set(reversal.id.to_string()),
            allocation_id: ActiveValue::Set(reversal.allocation_id.to_string()),
            amount_minor: ActiveValue::Set(reversal.amount.amount_minor()),
            currency: ActiveValue::Set(reversal.amount.currency().code().to_string()),
            reason: ActiveValue::Set(reversal.reason.clone()),
            idempotency_key: ActiveValue::Set(reversal.idempotency_key.clone()),
            created_at: ActiveValue::Set(reversal.created_at),
        }
    }
}

impl TryFrom<Model> for Reversal {
    type Error = EngineError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let currency = model_currency(&model.currency)?;
        Ok(Self {
            id: parse_uuid(&model.id, "reversal")?,
            allocation_id: parse_uuid(&model.allocation_id, "allocation")?,
            amount: Money::new(model.amount_minor, currency),
            reason: model.reason,
            idempotency_key: model.idempotency_key,
            created_at: model.created_at,
        })
    }
}
