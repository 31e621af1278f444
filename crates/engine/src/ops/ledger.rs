//! The allocation ledger: `allocate` and `allocate_batch`.
//!
//! Both operations validate against balances read inside the transaction,
//! commit the new balances with compare-and-set and insert the allocation
//! records last. Losing a compare-and-set race aborts the transaction and the
//! whole operation is retried from validation.

use std::collections::HashMap;

use sea_orm::{DatabaseTransaction, QueryFilter, QueryOrder, TransactionTrait, prelude::*};
use uuid::Uuid;

use crate::{
    AllocatableSource, AllocateCmd, Allocation, AllocationItem, AllocationTarget,
    BatchAllocateCmd, EngineError, Money, ResultEngine, allocations,
    util::{ensure_positive, normalize_optional_text},
};

use super::{
    Engine,
    documents::{commit_source_remaining, commit_target_outstanding, load_source, load_target},
    with_tx,
};

/// Checks one allocation against the balances it would draw from.
///
/// `remaining`/`outstanding` are passed separately from the snapshots so a
/// batch can validate against balances already reduced by earlier items.
/// Checks run in a fixed order and the first failure wins: currency, source
/// balance, target balance, then source/target state.
pub(crate) fn validate_allocation(
    source: &AllocatableSource,
    remaining: Money,
    target: &AllocationTarget,
    outstanding: Money,
    amount: Money,
) -> ResultEngine<()> {
    if amount.currency() != source.currency || source.currency != target.currency {
        return Err(EngineError::CurrencyMismatch(format!(
            "amount is {}, source is {}, target is {}",
            amount.currency(),
            source.currency,
            target.currency
        )));
    }
    if amount.amount_minor() > remaining.amount_minor() {
        return Err(EngineError::InsufficientSourceBalance(format!(
            "{amount} exceeds remaining {remaining} of source {}",
            source.id
        )));
    }
    if amount.amount_minor() > outstanding.amount_minor() {
        return Err(EngineError::TargetOverAllocation(format!(
            "{amount} exceeds outstanding {outstanding} of target {}",
            target.id
        )));
    }
    if source.is_voided() {
        return Err(EngineError::SourceClosed(format!(
            "source {} is voided",
            source.id
        )));
    }
    if target.is_closed() {
        return Err(EngineError::TargetClosed(format!(
            "target {} is closed",
            target.id
        )));
    }
    Ok(())
}

async fn find_allocation_by_key(
    db_tx: &DatabaseTransaction,
    key: &str,
) -> ResultEngine<Option<Allocation>> {
    allocations::Entity::find()
        .filter(allocations::Column::IdempotencyKey.eq(key))
        .one(db_tx)
        .await?
        .map(Allocation::try_from)
        .transpose()
}

// Single and batch keys live in separate namespaces of the same column.
fn allocation_key(key: &str) -> String {
    format!("allocate:{key}")
}

fn batch_item_key(key: &str, index: usize) -> String {
    format!("batch:{key}#{index}")
}

/// A replayed request must describe the same allocation.
fn ensure_same_allocation(
    existing: &Allocation,
    source_id: Uuid,
    target_id: Uuid,
    amount: Money,
    key: &str,
) -> ResultEngine<()> {
    if existing.source_id != source_id
        || existing.target_id != target_id
        || existing.amount != amount
    {
        return Err(EngineError::IdempotencyKeyReused(key.to_string()));
    }
    Ok(())
}

/// Running balances of a batch, keyed by id, in first-seen order.
#[derive(Default)]
struct RunningBalances {
    sources: HashMap<Uuid, (AllocatableSource, Money)>,
    source_order: Vec<Uuid>,
    targets: HashMap<Uuid, (AllocationTarget, Money)>,
    target_order: Vec<Uuid>,
}

impl RunningBalances {
    async fn load(&mut self, db_tx: &DatabaseTransaction, item: &AllocationItem) -> ResultEngine<()> {
        if !self.sources.contains_key(&item.source_id) {
            let source = load_source(db_tx, item.source_id).await?;
            let remaining = source.remaining;
            self.sources.insert(item.source_id, (source, remaining));
            self.source_order.push(item.source_id);
        }
        if !self.targets.contains_key(&item.target_id) {
            let target = load_target(db_tx, item.target_id).await?;
            let outstanding = target.outstanding;
            self.targets.insert(item.target_id, (target, outstanding));
            self.target_order.push(item.target_id);
        }
        Ok(())
    }

    fn apply(&mut self, item: &AllocationItem) -> ResultEngine<()> {
        let (source, remaining) = self
            .sources
            .get_mut(&item.source_id)
            .ok_or_else(|| EngineError::NotFound(format!("source {}", item.source_id)))?;
        let (target, outstanding) = self
            .targets
            .get_mut(&item.target_id)
            .ok_or_else(|| EngineError::NotFound(format!("target {}", item.target_id)))?;

        validate_allocation(source, *remaining, target, *outstanding, item.amount)?;

        let new_remaining = remaining.checked_sub(item.amount)?;
        source.check_remaining(new_remaining)?;
        let new_outstanding = outstanding.checked_sub(item.amount)?;
        target.check_outstanding(new_outstanding)?;

        *remaining = new_remaining;
        *outstanding = new_outstanding;
        Ok(())
    }

    async fn commit(&self, db_tx: &DatabaseTransaction) -> ResultEngine<()> {
        for id in &self.source_order {
            if let Some((source, remaining)) = self.sources.get(id)
                && *remaining != source.remaining
            {
                commit_source_remaining(db_tx, source.id, source.version, *remaining).await?;
            }
        }
        for id in &self.target_order {
            if let Some((target, outstanding)) = self.targets.get(id)
                && *outstanding != target.outstanding
            {
                commit_target_outstanding(db_tx, target.id, target.version, *outstanding).await?;
            }
        }
        Ok(())
    }
}

impl Engine {
    /// Allocates `cmd.amount` from a source to a target.
    ///
    /// On success the source's `remaining` and the target's `outstanding` are
    /// both reduced by the amount and the new [`Allocation`] is returned. A
    /// repeated idempotency key returns the allocation it created the first
    /// time, without touching any balance.
    pub async fn allocate(&self, cmd: AllocateCmd) -> ResultEngine<Allocation> {
        ensure_positive(cmd.amount, "allocation amount")?;
        let key = normalize_optional_text(cmd.idempotency_key.as_deref());
        let note = normalize_optional_text(cmd.note.as_deref());

        let engine = self;
        let cmd = &cmd;
        let key = key.as_deref();
        let note = note.as_deref();
        self.retry_on_conflict("allocate", move || engine.allocate_once(cmd, key, note))
            .await
    }

    async fn allocate_once(
        &self,
        cmd: &AllocateCmd,
        key: Option<&str>,
        note: Option<&str>,
    ) -> ResultEngine<Allocation> {
        with_tx!(self, |db_tx| {
            self.allocate_in_tx(&db_tx, cmd, key, note).await
        })
    }

    async fn allocate_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        cmd: &AllocateCmd,
        key: Option<&str>,
        note: Option<&str>,
    ) -> ResultEngine<Allocation> {
        if let Some(key) = key
            && let Some(existing) = find_allocation_by_key(db_tx, &allocation_key(key)).await?
        {
            ensure_same_allocation(&existing, cmd.source_id, cmd.target_id, cmd.amount, key)?;
            tracing::debug!(allocation_id = %existing.id, "idempotent allocate replay");
            return Ok(existing);
        }

        let mut balances = RunningBalances::default();
        let item = AllocationItem {
            source_id: cmd.source_id,
            target_id: cmd.target_id,
            amount: cmd.amount,
        };
        balances.load(db_tx, &item).await?;
        balances.apply(&item)?;
        balances.commit(db_tx).await?;

        let mut allocation =
            Allocation::new(cmd.source_id, cmd.target_id, cmd.amount, cmd.occurred_at)?;
        allocation.idempotency_key = key.map(allocation_key);
        allocation.note = note.map(ToString::to_string);
        allocations::ActiveModel::from(&allocation)
            .insert(db_tx)
            .await?;

        tracing::info!(
            allocation_id = %allocation.id,
            source_id = %allocation.source_id,
            target_id = %allocation.target_id,
            amount = %allocation.amount,
            "allocation created"
        );
        Ok(allocation)
    }

    /// Allocates every item of the batch, or none of them.
    ///
    /// Items are processed in order; each one is validated against the
    /// balances left by the items before it. The first failing item rejects
    /// the whole batch with [`EngineError::BatchRejected`], carrying the
    /// item's index and its own error.
    pub async fn allocate_batch(&self, cmd: BatchAllocateCmd) -> ResultEngine<Vec<Allocation>> {
        if cmd.items.is_empty() {
            return Err(EngineError::InvalidAmount(
                "batch must contain at least one item".to_string(),
            ));
        }
        for (index, item) in cmd.items.iter().enumerate() {
            ensure_positive(item.amount, "allocation amount").map_err(|reason| {
                EngineError::BatchRejected {
                    index,
                    reason: Box::new(reason),
                }
            })?;
        }
        let key = normalize_optional_text(cmd.idempotency_key.as_deref());
        let note = normalize_optional_text(cmd.note.as_deref());

        let engine = self;
        let cmd = &cmd;
        let key = key.as_deref();
        let note = note.as_deref();
        self.retry_on_conflict("allocate_batch", move || {
            engine.allocate_batch_once(cmd, key, note)
        })
        .await
    }

    async fn allocate_batch_once(
        &self,
        cmd: &BatchAllocateCmd,
        key: Option<&str>,
        note: Option<&str>,
    ) -> ResultEngine<Vec<Allocation>> {
        with_tx!(self, |db_tx| {
            self.allocate_batch_in_tx(&db_tx, cmd, key, note).await
        })
    }

    async fn allocate_batch_in_tx(
        &self,
        db_tx: &DatabaseTransaction,
        cmd: &BatchAllocateCmd,
        key: Option<&str>,
        note: Option<&str>,
    ) -> ResultEngine<Vec<Allocation>> {
        if let Some(key) = key
            && let Some(first) = find_allocation_by_key(db_tx, &batch_item_key(key, 0)).await?
        {
            let existing = self.batch_allocations(db_tx, &first).await?;
            if existing.len() != cmd.items.len() {
                return Err(EngineError::IdempotencyKeyReused(key.to_string()));
            }
            for (allocation, item) in existing.iter().zip(&cmd.items) {
                ensure_same_allocation(
                    allocation,
                    item.source_id,
                    item.target_id,
                    item.amount,
                    key,
                )?;
            }
            tracing::debug!(batch_len = existing.len(), "idempotent batch replay");
            return Ok(existing);
        }

        let mut balances = RunningBalances::default();
        for (index, item) in cmd.items.iter().enumerate() {
            let step = match balances.load(db_tx, item).await {
                Ok(()) => balances.apply(item),
                Err(err) => Err(err),
            };
            if let Err(reason) = step {
                if matches!(reason, EngineError::Database(_)) {
                    return Err(reason);
                }
                tracing::info!(index, "batch rejected: {reason}");
                return Err(EngineError::BatchRejected {
                    index,
                    reason: Box::new(reason),
                });
            }
        }
        balances.commit(db_tx).await?;

        let batch_id = Uuid::new_v4();
        let mut created = Vec::with_capacity(cmd.items.len());
        for (index, item) in cmd.items.iter().enumerate() {
            let mut allocation =
                Allocation::new(item.source_id, item.target_id, item.amount, cmd.occurred_at)?;
            allocation.batch_id = Some(batch_id);
            allocation.batch_index = Some(i32::try_from(index).map_err(|_| {
                EngineError::InvalidAmount("batch too large".to_string())
            })?);
            allocation.idempotency_key = key.map(|key| batch_item_key(key, index));
            allocation.note = note.map(ToString::to_string);
            allocations::ActiveModel::from(&allocation)
                .insert(db_tx)
                .await?;
            created.push(allocation);
        }

        tracing::info!(%batch_id, items = created.len(), "batch allocation created");
        Ok(created)
    }

    async fn batch_allocations(
        &self,
        db_tx: &DatabaseTransaction,
        first: &Allocation,
    ) -> ResultEngine<Vec<Allocation>> {
        let Some(batch_id) = first.batch_id else {
            return Ok(vec![first.clone()]);
        };
        let models = allocations::Entity::find()
            .filter(allocations::Column::BatchId.eq(batch_id.to_string()))
            .order_by_asc(allocations::Column::BatchIndex)
            .all(db_tx)
            .await?;
        models.into_iter().map(Allocation::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{Currency, SourceKind, SourceStatus, TargetKind, TargetStatus};

    fn usd(minor: i64) -> Money {
        Money::new(minor, Currency::Usd)
    }

    fn source(total: i64) -> AllocatableSource {
        AllocatableSource::new(SourceKind::CreditNote, usd(total), None, Utc::now()).unwrap()
    }

    fn target(outstanding: Money) -> AllocationTarget {
        AllocationTarget::new(TargetKind::Invoice, outstanding, None, Utc::now()).unwrap()
    }

    #[test]
    fn accepts_amount_within_both_balances() {
        let s = source(50_000);
        let t = target(usd(30_000));
        assert!(validate_allocation(&s, s.remaining, &t, t.outstanding, usd(20_000)).is_ok());
        assert!(validate_allocation(&s, s.remaining, &t, t.outstanding, usd(30_000)).is_ok());
    }

    #[test]
    fn currency_is_checked_before_balances() {
        let s = source(100);
        let t = target(Money::new(100, Currency::Eur));
        let err = validate_allocation(&s, s.remaining, &t, t.outstanding, usd(1_000_000)).unwrap_err();
        assert!(matches!(err, EngineError::CurrencyMismatch(_)));
    }

    #[test]
    fn source_balance_is_checked_before_target_balance() {
        let s = source(100);
        let t = target(usd(50));
        let err = validate_allocation(&s, s.remaining, &t, t.outstanding, usd(150)).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientSourceBalance(_)));
        let err = validate_allocation(&s, s.remaining, &t, t.outstanding, usd(80)).unwrap_err();
        assert!(matches!(err, EngineError::TargetOverAllocation(_)));
    }

    #[test]
    fn closed_states_are_checked_last() {
        let mut s = source(100);
        s.status = SourceStatus::Voided;
        let mut t = target(usd(100));
        t.status = TargetStatus::Closed;

        let err = validate_allocation(&s, s.remaining, &t, t.outstanding, usd(10)).unwrap_err();
        assert!(matches!(err, EngineError::SourceClosed(_)));

        s.status = SourceStatus::Open;
        let err = validate_allocation(&s, s.remaining, &t, t.outstanding, usd(10)).unwrap_err();
        assert!(matches!(err, EngineError::TargetClosed(_)));
    }

    #[test]
    fn running_balances_reject_cumulative_overdraw() {
        let s = source(10_000);
        let t1 = target(usd(10_000));
        let t2 = target(usd(10_000));
        let mut balances = RunningBalances::default();
        balances.sources.insert(s.id, (s.clone(), s.remaining));
        balances.targets.insert(t1.id, (t1.clone(), t1.outstanding));
        balances.targets.insert(t2.id, (t2.clone(), t2.outstanding));

        let first = AllocationItem {
            source_id: s.id,
            target_id: t1.id,
            amount: usd(4_000),
        };
        let second = AllocationItem {
            source_id: s.id,
            target_id: t2.id,
            amount: usd(7_000),
        };
        balances.apply(&first).unwrap();
        let err = balances.apply(&second).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientSourceBalance(_)));
    }
}
