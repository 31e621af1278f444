//! Read-only views over the ledger and balance reconciliation.
//!
//! Allocation records are the source of truth: the `remaining`/`outstanding`
//! counters on sources and targets are caches that `reconcile_balances` can
//! rebuild from them.

use std::collections::HashMap;

use sea_orm::{QueryFilter, QueryOrder, TransactionTrait, prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    AllocatableSource, Allocation, EngineError, Money, ResultEngine, Reversal, allocations,
    reversals, sources, targets,
};

use super::{
    Engine,
    documents::{commit_source_remaining, commit_target_outstanding, load_source, load_target},
    reversal::load_allocation,
    with_tx,
};

/// A source with balances derived from its allocations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub source: AllocatableSource,
    pub applied: Money,
    pub remaining: Money,
    pub active_allocations: u64,
}

/// Sum of open amounts over `allocations`, in `currency`.
fn open_total<'a>(
    currency: crate::Currency,
    allocations: impl IntoIterator<Item = &'a Allocation>,
) -> ResultEngine<Money> {
    allocations
        .into_iter()
        .try_fold(Money::zero(currency), |acc, allocation| {
            acc.checked_add(allocation.open_amount()?)
        })
}

impl Engine {
    pub async fn allocation(&self, allocation_id: Uuid) -> ResultEngine<Allocation> {
        load_allocation(&self.database, allocation_id).await
    }

    /// Reversal audit rows of one allocation, oldest first.
    pub async fn reversals_for(&self, allocation_id: Uuid) -> ResultEngine<Vec<Reversal>> {
        load_allocation(&self.database, allocation_id).await?;
        let models = reversals::Entity::find()
            .filter(reversals::Column::AllocationId.eq(allocation_id.to_string()))
            .order_by_asc(reversals::Column::CreatedAt)
            .order_by_asc(reversals::Column::Id)
            .all(&self.database)
            .await?;
        models.into_iter().map(Reversal::try_from).collect()
    }

    pub async fn list_allocations_for_source(
        &self,
        source_id: Uuid,
    ) -> ResultEngine<Vec<Allocation>> {
        load_source(&self.database, source_id).await?;
        self.allocations_where(allocations::Column::SourceId.eq(source_id.to_string()))
            .await
    }

    pub async fn list_allocations_for_target(
        &self,
        target_id: Uuid,
    ) -> ResultEngine<Vec<Allocation>> {
        load_target(&self.database, target_id).await?;
        self.allocations_where(allocations::Column::TargetId.eq(target_id.to_string()))
            .await
    }

    async fn allocations_where(
        &self,
        condition: sea_orm::sea_query::SimpleExpr,
    ) -> ResultEngine<Vec<Allocation>> {
        let models = allocations::Entity::find()
            .filter(condition)
            .order_by_asc(allocations::Column::CreatedAt)
            .order_by_asc(allocations::Column::BatchIndex)
            .order_by_asc(allocations::Column::Id)
            .all(&self.database)
            .await?;
        models.into_iter().map(Allocation::try_from).collect()
    }

    /// Returns the source with `applied`/`remaining` replayed from its
    /// allocations. A stored counter that disagrees is reported, not fixed.
    pub async fn source_summary(&self, source_id: Uuid) -> ResultEngine<SourceSummary> {
        let source = load_source(&self.database, source_id).await?;
        let allocations = self.list_allocations_for_source(source_id).await?;

        let applied = open_total(source.currency, &allocations)?;
        let remaining = source.total.checked_sub(applied)?;
        if remaining != source.remaining {
            tracing::warn!(
                %source_id,
                stored = %source.remaining,
                replayed = %remaining,
                "source remaining disagrees with its allocations"
            );
        }

        Ok(SourceSummary {
            active_allocations: allocations.iter().filter(|a| a.is_active()).count() as u64,
            source,
            applied,
            remaining,
        })
    }

    /// Rewrites every `remaining`/`outstanding` counter that disagrees with
    /// the allocation records. Returns how many rows were corrected.
    pub async fn reconcile_balances(&self) -> ResultEngine<usize> {
        let engine = self;
        self.retry_on_conflict("reconcile_balances", move || async move {
            with_tx!(engine, |db_tx| {
                let all: Vec<Allocation> = allocations::Entity::find()
                    .all(&db_tx)
                    .await?
                    .into_iter()
                    .map(Allocation::try_from)
                    .collect::<ResultEngine<_>>()?;

                let mut by_source: HashMap<Uuid, Vec<&Allocation>> = HashMap::new();
                let mut by_target: HashMap<Uuid, Vec<&Allocation>> = HashMap::new();
                for allocation in &all {
                    by_source.entry(allocation.source_id).or_default().push(allocation);
                    by_target.entry(allocation.target_id).or_default().push(allocation);
                }

                let mut corrected = 0;
                for model in sources::Entity::find().all(&db_tx).await? {
                    let source = AllocatableSource::try_from(model)?;
                    let applied = open_total(
                        source.currency,
                        by_source.get(&source.id).into_iter().flatten().copied(),
                    )?;
                    let expected = source.total.checked_sub(applied)?;
                    if expected != source.remaining {
                        source.check_remaining(expected)?;
                        tracing::warn!(
                            source_id = %source.id,
                            stored = %source.remaining,
                            replayed = %expected,
                            "correcting source remaining"
                        );
                        commit_source_remaining(&db_tx, source.id, source.version, expected)
                            .await?;
                        corrected += 1;
                    }
                }
                for model in targets::Entity::find().all(&db_tx).await? {
                    let target = crate::AllocationTarget::try_from(model)?;
                    let applied = open_total(
                        target.currency,
                        by_target.get(&target.id).into_iter().flatten().copied(),
                    )?;
                    let expected = target.amount.checked_sub(applied)?;
                    if expected != target.outstanding {
                        target.check_outstanding(expected)?;
                        tracing::warn!(
                            target_id = %target.id,
                            stored = %target.outstanding,
                            replayed = %expected,
                            "correcting target outstanding"
                        );
                        commit_target_outstanding(&db_tx, target.id, target.version, expected)
                            .await?;
                        corrected += 1;
                    }
                }
                Ok::<usize, EngineError>(corrected)
            })
        })
        .await
    }
}
