//! Reversal handler: `reverse` and `void_source`.

use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectionTrait, DatabaseTransaction, PaginatorTrait, QueryFilter, TransactionTrait,
    prelude::*, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    AllocatableSource, Allocation, AllocationStatus, EngineError, Money, ResultEngine,
    ReverseCmd, Reversal, SourceStatus, allocations, reversals, sources,
    util::{ensure_positive, normalize_optional_text},
};

use super::{
    Engine,
    documents::{commit_source_remaining, commit_target_outstanding, load_source, load_target},
    with_tx,
};

pub(crate) async fn load_allocation<C: ConnectionTrait>(
    conn: &C,
    allocation_id: Uuid,
) -> ResultEngine<Allocation> {
    let model = allocations::Entity::find_by_id(allocation_id.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("allocation {allocation_id}")))?;
    Allocation::try_from(model)
}

/// Compare-and-set on the allocation's reversed amount.
async fn commit_allocation_reversal<C: ConnectionTrait>(
    conn: &C,
    previous: &Allocation,
    updated: &Allocation,
) -> ResultEngine<()> {
    let result = allocations::Entity::update_many()
        .col_expr(
            allocations::Column::ReversedMinor,
            Expr::value(updated.reversed_amount.amount_minor()),
        )
        .col_expr(
            allocations::Column::Status,
            Expr::value(updated.status.as_str()),
        )
        .col_expr(
            allocations::Column::ReversedAt,
            Expr::value(updated.reversed_at),
        )
        .filter(allocations::Column::Id.eq(previous.id.to_string()))
        .filter(allocations::Column::ReversedMinor.eq(previous.reversed_amount.amount_minor()))
        .filter(allocations::Column::Status.eq(AllocationStatus::Active.as_str()))
        .exec(conn)
        .await?;
    if result.rows_affected != 1 {
        return Err(EngineError::Conflict(format!(
            "allocation {} changed concurrently",
            previous.id
        )));
    }
    Ok(())
}

/// Amount a reversal request resolves to, given the allocation's open amount.
pub(crate) fn resolve_reversal_amount(
    allocation: &Allocation,
    requested: Option<Money>,
) -> ResultEngine<Money> {
    if !allocation.is_active() {
        return Err(EngineError::AlreadyReversed(format!(
            "allocation {} is already reversed",
            allocation.id
        )));
    }
    let open = allocation.open_amount()?;
    let Some(amount) = requested else {
        return Ok(open);
    };
    if amount.currency() != allocation.currency() {
        return Err(EngineError::CurrencyMismatch(format!(
            "reversal in {}, allocation in {}",
            amount.currency(),
            allocation.currency()
        )));
    }
    ensure_positive(amount, "reversal amount")?;
    if amount.amount_minor() > open.amount_minor() {
        return Err(EngineError::ExcessiveReversal(format!(
            "{amount} exceeds open amount {open} of allocation {}",
            allocation.id
        )));
    }
    Ok(amount)
}

impl Engine {
    /// Reverses part or all of an allocation.
    ///
    /// Without an explicit amount the whole open amount is reversed. The
    /// source's `remaining` and the target's `outstanding` grow by the
    /// reversed amount; once nothing is left open the allocation is marked
    /// reversed. Returns the updated allocation.
    pub async fn reverse(&self, cmd: ReverseCmd) -> ResultEngine<Allocation> {
        if let Some(amount) = cmd.amount {
            ensure_positive(amount, "reversal amount")?;
        }
        let key = normalize_optional_text(cmd.idempotency_key.as_deref());
        let reason = normalize_optional_text(cmd.reason.as_deref());

        let engine = self;
        let cmd = &cmd;
        let key = key.as_deref();
        let reason = reason.as_deref();
        self.retry_on_conflict("reverse", move || engine.reverse_once(cmd, key, reason))
            .await
    }

    async fn reverse_once(
        &self,
        cmd: &ReverseCmd,
        key: Option<&str>,
        reason: Option<&str>,
    ) -> ResultEngine<Allocation> {
        with_tx!(self, |db_tx| {
            self.reverse_in_tx(&db_tx, cmd, key, reason).await
        })
    }

    async fn reverse_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        cmd: &ReverseCmd,
        key: Option<&str>,
        reason: Option<&str>,
    ) -> ResultEngine<Allocation> {
        if let Some(key) = key
            && let Some(existing) = reversals::Entity::find()
                .filter(reversals::Column::IdempotencyKey.eq(key))
                .one(db_tx)
                .await?
        {
            let existing = Reversal::try_from(existing)?;
            if existing.allocation_id != cmd.allocation_id
                || cmd.amount.is_some_and(|amount| amount != existing.amount)
            {
                return Err(EngineError::IdempotencyKeyReused(key.to_string()));
            }
            tracing::debug!(reversal_id = %existing.id, "idempotent reverse replay");
            return load_allocation(db_tx, cmd.allocation_id).await;
        }

        let allocation = load_allocation(db_tx, cmd.allocation_id).await?;
        let amount = resolve_reversal_amount(&allocation, cmd.amount)?;

        let source = load_source(db_tx, allocation.source_id).await?;
        let target = load_target(db_tx, allocation.target_id).await?;
        let new_remaining = source.remaining.checked_add(amount)?;
        source.check_remaining(new_remaining)?;
        let new_outstanding = target.outstanding.checked_add(amount)?;
        target.check_outstanding(new_outstanding)?;

        let mut updated = allocation.clone();
        updated.reversed_amount = updated.reversed_amount.checked_add(amount)?;
        if updated.reversed_amount == updated.amount {
            updated.status = AllocationStatus::Reversed;
            updated.reversed_at = Some(cmd.occurred_at);
        }

        commit_allocation_reversal(db_tx, &allocation, &updated).await?;
        commit_source_remaining(db_tx, source.id, source.version, new_remaining).await?;
        commit_target_outstanding(db_tx, target.id, target.version, new_outstanding).await?;

        let reversal = Reversal {
            id: Uuid::new_v4(),
            allocation_id: allocation.id,
            amount,
            reason: reason.map(ToString::to_string),
            idempotency_key: key.map(ToString::to_string),
            created_at: cmd.occurred_at,
        };
        reversals::ActiveModel::from(&reversal).insert(db_tx).await?;

        tracing::info!(
            allocation_id = %allocation.id,
            reversal_id = %reversal.id,
            amount = %amount,
            fully_reversed = !updated.is_active(),
            "allocation reversed"
        );
        Ok(updated)
    }

    /// Voids a source. Only sources with no active allocation can be voided;
    /// their allocations have to be reversed first.
    pub async fn void_source(
        &self,
        source_id: Uuid,
        voided_at: DateTime<Utc>,
    ) -> ResultEngine<AllocatableSource> {
        let engine = self;
        self.retry_on_conflict("void_source", move || async move {
            with_tx!(engine, |db_tx| {
                let mut source = load_source(&db_tx, source_id).await?;
                if source.is_voided() {
                    return Err(EngineError::SourceClosed(format!(
                        "source {source_id} already voided"
                    )));
                }
                let active = allocations::Entity::find()
                    .filter(allocations::Column::SourceId.eq(source_id.to_string()))
                    .filter(allocations::Column::Status.eq(AllocationStatus::Active.as_str()))
                    .count(&db_tx)
                    .await?;
                if active > 0 {
                    return Err(EngineError::SourceHasActiveAllocations(format!(
                        "source {source_id} has {active} active allocation(s)"
                    )));
                }

                let result = sources::Entity::update_many()
                    .col_expr(sources::Column::Status, Expr::value(SourceStatus::Voided.as_str()))
                    .col_expr(sources::Column::VoidedAt, Expr::value(Some(voided_at)))
                    .col_expr(sources::Column::Version, Expr::value(source.version + 1))
                    .filter(sources::Column::Id.eq(source_id.to_string()))
                    .filter(sources::Column::Version.eq(source.version))
                    .exec(&db_tx)
                    .await?;
                if result.rows_affected != 1 {
                    return Err(EngineError::Conflict(format!(
                        "source {source_id} changed since version {}",
                        source.version
                    )));
                }

                source.status = SourceStatus::Voided;
                source.voided_at = Some(voided_at);
                source.version += 1;
                tracing::info!(%source_id, "source voided");
                Ok(source)
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Currency;

    fn allocation(amount: i64, reversed: i64) -> Allocation {
        let mut allocation = Allocation::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Money::new(amount, Currency::Usd),
            Utc::now(),
        )
        .unwrap();
        allocation.reversed_amount = Money::new(reversed, Currency::Usd);
        allocation
    }

    #[test]
    fn defaults_to_open_amount() {
        let amount = resolve_reversal_amount(&allocation(10_000, 2_500), None).unwrap();
        assert_eq!(amount, Money::new(7_500, Currency::Usd));
    }

    #[test]
    fn rejects_more_than_open_amount() {
        let err = resolve_reversal_amount(
            &allocation(10_000, 2_500),
            Some(Money::new(7_501, Currency::Usd)),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::ExcessiveReversal(_)));
    }

    #[test]
    fn rejects_reversed_allocation() {
        let mut reversed = allocation(10_000, 10_000);
        reversed.status = AllocationStatus::Reversed;
        let err = resolve_reversal_amount(&reversed, None).unwrap_err();
        assert!(matches!(err, EngineError::AlreadyReversed(_)));
    }

    #[test]
    fn rejects_foreign_currency() {
        let err = resolve_reversal_amount(
            &allocation(10_000, 0),
            Some(Money::new(100, Currency::Eur)),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::CurrencyMismatch(_)));
    }
}
