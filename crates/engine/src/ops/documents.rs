//! Source and target access.
//!
//! Snapshots enter the engine through `register_source`/`register_target`;
//! after that the two balance fields are only written through the
//! compare-and-set commits below, which the ledger and the reversal handler
//! call inside their own transaction.

use sea_orm::{
    ConnectionTrait, QueryFilter, QueryOrder, TransactionTrait, prelude::*, sea_query::Expr,
};
use uuid::Uuid;

use crate::{
    AllocatableSource, AllocationTarget, EngineError, Money, NewSource, NewTarget, ResultEngine,
    SourceFilter, TargetKind, TargetStatus, sources, targets,
    util::normalize_optional_text,
};

use super::{Engine, with_tx};

pub(crate) async fn load_source<C: ConnectionTrait>(
    conn: &C,
    source_id: Uuid,
) -> ResultEngine<AllocatableSource> {
    let model = sources::Entity::find_by_id(source_id.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("source {source_id}")))?;
    AllocatableSource::try_from(model)
}

pub(crate) async fn load_target<C: ConnectionTrait>(
    conn: &C,
    target_id: Uuid,
) -> ResultEngine<AllocationTarget> {
    let model = targets::Entity::find_by_id(target_id.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("target {target_id}")))?;
    AllocationTarget::try_from(model)
}

/// Compare-and-set `remaining` on a source read at `expected_version`.
pub(crate) async fn commit_source_remaining<C: ConnectionTrait>(
    conn: &C,
    source_id: Uuid,
    expected_version: i64,
    new_remaining: Money,
) -> ResultEngine<()> {
    let result = sources::Entity::update_many()
        .col_expr(
            sources::Column::RemainingMinor,
            Expr::value(new_remaining.amount_minor()),
        )
        .col_expr(sources::Column::Version, Expr::value(expected_version + 1))
        .filter(sources::Column::Id.eq(source_id.to_string()))
        .filter(sources::Column::Version.eq(expected_version))
        .exec(conn)
        .await?;
    if result.rows_affected != 1 {
        return Err(EngineError::Conflict(format!(
            "source {source_id} changed since version {expected_version}"
        )));
    }
    Ok(())
}

/// Compare-and-set `outstanding` on a target read at `expected_version`.
pub(crate) async fn commit_target_outstanding<C: ConnectionTrait>(
    conn: &C,
    target_id: Uuid,
    expected_version: i64,
    new_outstanding: Money,
) -> ResultEngine<()> {
    let result = targets::Entity::update_many()
        .col_expr(
            targets::Column::OutstandingMinor,
            Expr::value(new_outstanding.amount_minor()),
        )
        .col_expr(targets::Column::Version, Expr::value(expected_version + 1))
        .filter(targets::Column::Id.eq(target_id.to_string()))
        .filter(targets::Column::Version.eq(expected_version))
        .exec(conn)
        .await?;
    if result.rows_affected != 1 {
        return Err(EngineError::Conflict(format!(
            "target {target_id} changed since version {expected_version}"
        )));
    }
    Ok(())
}

async fn commit_target_status<C: ConnectionTrait>(
    conn: &C,
    target_id: Uuid,
    expected_version: i64,
    status: TargetStatus,
) -> ResultEngine<()> {
    let result = targets::Entity::update_many()
        .col_expr(targets::Column::Status, Expr::value(status.as_str()))
        .col_expr(targets::Column::Version, Expr::value(expected_version + 1))
        .filter(targets::Column::Id.eq(target_id.to_string()))
        .filter(targets::Column::Version.eq(expected_version))
        .exec(conn)
        .await?;
    if result.rows_affected != 1 {
        return Err(EngineError::Conflict(format!(
            "target {target_id} changed since version {expected_version}"
        )));
    }
    Ok(())
}

impl Engine {
    /// Registers a source that can now be allocated from, with
    /// `remaining = total`.
    pub async fn register_source(&self, new: NewSource) -> ResultEngine<AllocatableSource> {
        let source = AllocatableSource::new(
            new.kind,
            new.total,
            normalize_optional_text(new.reference.as_deref()),
            new.issued_at,
        )?;
        sources::ActiveModel::from(&source)
            .insert(&self.database)
            .await?;
        tracing::debug!(source_id = %source.id, total = %source.total, "source registered");
        Ok(source)
    }

    /// Registers a target with its current outstanding balance.
    pub async fn register_target(&self, new: NewTarget) -> ResultEngine<AllocationTarget> {
        let target = AllocationTarget::new(
            new.kind,
            new.outstanding,
            normalize_optional_text(new.reference.as_deref()),
            new.created_at,
        )?;
        targets::ActiveModel::from(&target)
            .insert(&self.database)
            .await?;
        tracing::debug!(target_id = %target.id, outstanding = %target.outstanding, "target registered");
        Ok(target)
    }

    pub async fn get_source(&self, source_id: Uuid) -> ResultEngine<AllocatableSource> {
        load_source(&self.database, source_id).await
    }

    pub async fn get_target(&self, target_id: Uuid) -> ResultEngine<AllocationTarget> {
        load_target(&self.database, target_id).await
    }

    /// Marks a target as settled by other means. Closed targets reject
    /// new allocations but still accept reversals.
    pub async fn close_target(&self, target_id: Uuid) -> ResultEngine<AllocationTarget> {
        self.set_target_status(target_id, TargetStatus::Closed).await
    }

    pub async fn reopen_target(&self, target_id: Uuid) -> ResultEngine<AllocationTarget> {
        self.set_target_status(target_id, TargetStatus::Open).await
    }

    async fn set_target_status(
        &self,
        target_id: Uuid,
        status: TargetStatus,
    ) -> ResultEngine<AllocationTarget> {
        let engine = self;
        self.retry_on_conflict("set_target_status", move || async move {
            with_tx!(engine, |db_tx| {
                let mut target = load_target(&db_tx, target_id).await?;
                match (target.status, status) {
                    (TargetStatus::Closed, TargetStatus::Closed) => {
                        Err(EngineError::TargetClosed(format!(
                            "target {target_id} already closed"
                        )))
                    }
                    (TargetStatus::Open, TargetStatus::Open) => Ok(target),
                    _ => {
                        commit_target_status(&db_tx, target_id, target.version, status).await?;
                        target.status = status;
                        target.version += 1;
                        Ok(target)
                    }
                }
            })
        })
        .await
    }

    /// Lists sources matching `filter`, oldest first.
    pub async fn list_sources(&self, filter: &SourceFilter) -> ResultEngine<Vec<AllocatableSource>> {
        let mut query = sources::Entity::find();
        if let Some(kind) = filter.kind {
            query = query.filter(sources::Column::Kind.eq(kind.as_str()));
        }
        if let Some(currency) = filter.currency {
            query = query.filter(sources::Column::Currency.eq(currency.code()));
        }
        if let Some(from) = filter.issued_from {
            query = query.filter(sources::Column::IssuedAt.gte(from));
        }
        if let Some(to) = filter.issued_to {
            query = query.filter(sources::Column::IssuedAt.lt(to));
        }
        if !filter.include_voided {
            query = query.filter(sources::Column::VoidedAt.is_null());
        }

        let models = query
            .order_by_asc(sources::Column::IssuedAt)
            .order_by_asc(sources::Column::Id)
            .all(&self.database)
            .await?;
        models.into_iter().map(AllocatableSource::try_from).collect()
    }

    /// Lists targets, optionally restricted to one kind.
    pub async fn list_targets(&self, kind: Option<TargetKind>) -> ResultEngine<Vec<AllocationTarget>> {
        let mut query = targets::Entity::find();
        if let Some(kind) = kind {
            query = query.filter(targets::Column::Kind.eq(kind.as_str()));
        }
        let models = query
            .order_by_asc(targets::Column::CreatedAt)
            .order_by_asc(targets::Column::Id)
            .all(&self.database)
            .await?;
        models.into_iter().map(AllocationTarget::try_from).collect()
    }
}
