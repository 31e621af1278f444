use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};

use engine::{
    AllocatableSource, AllocateCmd, AllocationStatus, AllocationTarget, BatchAllocateCmd,
    Conversion, Currency, Engine, EngineError, ErrorKind, Money, NewSource, NewTarget, ReverseCmd,
    SourceFilter, SourceKind, StaticRates, TargetKind,
};
use migration::MigratorTrait;
use uuid::Uuid;

async fn engine_with_db() -> (Engine, DatabaseConnection) {
    // One connection: concurrent callers queue on the pool like writers on
    // a single SQLite file. In-memory data also lives only as long as it.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db.clone())
        .build()
        .await
        .unwrap();
    (engine, db)
}

fn usd(minor: i64) -> Money {
    Money::new(minor, Currency::Usd)
}

async fn credit_note(engine: &Engine, total: Money) -> AllocatableSource {
    engine
        .register_source(NewSource::new(SourceKind::CreditNote, total))
        .await
        .unwrap()
}

async fn invoice(engine: &Engine, outstanding: Money) -> AllocationTarget {
    engine
        .register_target(NewTarget::new(TargetKind::Invoice, outstanding))
        .await
        .unwrap()
}

/// `source.total == source.remaining + Σ open allocation amounts`
async fn assert_conserved(engine: &Engine, source_id: Uuid) {
    let source = engine.get_source(source_id).await.unwrap();
    let open = engine
        .list_allocations_for_source(source_id)
        .await
        .unwrap()
        .iter()
        .map(|a| a.amount.amount_minor() - a.reversed_amount.amount_minor())
        .sum::<i64>();
    assert_eq!(
        source.total.amount_minor(),
        source.remaining.amount_minor() + open
    );
}

#[tokio::test]
async fn credit_note_applied_to_invoice() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(50_000)).await;
    let target = invoice(&engine, usd(30_000)).await;

    let allocation = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(20_000)))
        .await
        .unwrap();
    assert_eq!(allocation.status, AllocationStatus::Active);
    assert_eq!(allocation.amount, usd(20_000));

    let source = engine.get_source(source.id).await.unwrap();
    let target = engine.get_target(target.id).await.unwrap();
    assert_eq!(source.remaining, usd(30_000));
    assert_eq!(target.outstanding, usd(10_000));
    assert_conserved(&engine, source.id).await;
}

#[tokio::test]
async fn over_allocation_leaves_state_unchanged() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(50_000)).await;
    let target = invoice(&engine, usd(30_000)).await;
    engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(20_000)))
        .await
        .unwrap();

    let err = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(15_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TargetOverAllocation(_)));

    let source = engine.get_source(source.id).await.unwrap();
    let target = engine.get_target(target.id).await.unwrap();
    assert_eq!(source.remaining, usd(30_000));
    assert_eq!(target.outstanding, usd(10_000));
    assert_eq!(
        engine
            .list_allocations_for_source(source.id)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn source_balance_checked_before_target_balance() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(1_000)).await;
    let target = invoice(&engine, usd(500)).await;

    let err = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(2_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientSourceBalance(_)));
}

#[tokio::test]
async fn rejects_non_positive_and_unknown() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(1_000)).await;
    let target = invoice(&engine, usd(1_000)).await;

    let err = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(_)));

    let err = engine
        .allocate(AllocateCmd::new(Uuid::new_v4(), target.id, usd(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));

    let err = engine
        .allocate(AllocateCmd::new(source.id, Uuid::new_v4(), usd(100)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn cross_currency_allocation_is_rejected() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, Money::new(10_000, Currency::Eur)).await;

    let err = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(1_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CurrencyMismatch(_)));

    let source = engine.get_source(source.id).await.unwrap();
    assert_eq!(source.remaining, usd(10_000));
}

#[tokio::test]
async fn payment_refund_then_reversal_restores_exactly() {
    let (engine, _db) = engine_with_db().await;
    let payment = engine
        .register_source(NewSource::new(SourceKind::Payment, usd(10_000)).reference("PAY-1"))
        .await
        .unwrap();
    let refund = engine
        .register_target(NewTarget::new(TargetKind::Expense, usd(10_000)).reference("RF-1"))
        .await
        .unwrap();

    let allocation = engine
        .allocate(AllocateCmd::new(payment.id, refund.id, usd(4_000)))
        .await
        .unwrap();
    assert_eq!(engine.get_source(payment.id).await.unwrap().remaining, usd(6_000));

    let reversed = engine.reverse(ReverseCmd::new(allocation.id)).await.unwrap();
    assert_eq!(reversed.status, AllocationStatus::Reversed);
    assert_eq!(reversed.reversed_amount, usd(4_000));
    assert!(reversed.reversed_at.is_some());

    let payment = engine.get_source(payment.id).await.unwrap();
    let refund = engine.get_target(refund.id).await.unwrap();
    assert_eq!(payment.remaining, usd(10_000));
    assert_eq!(refund.outstanding, usd(10_000));
    assert_conserved(&engine, payment.id).await;

    let err = engine
        .reverse(ReverseCmd::new(allocation.id))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadyReversed(_)));
}

#[tokio::test]
async fn partial_reversals_accumulate() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, usd(10_000)).await;
    let allocation = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(6_000)))
        .await
        .unwrap();

    let partial = engine
        .reverse(
            ReverseCmd::new(allocation.id)
                .amount(usd(2_500))
                .reason("customer dispute"),
        )
        .await
        .unwrap();
    assert_eq!(partial.status, AllocationStatus::Active);
    assert_eq!(partial.reversed_amount, usd(2_500));

    let err = engine
        .reverse(ReverseCmd::new(allocation.id).amount(usd(3_501)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExcessiveReversal(_)));

    let rest = engine.reverse(ReverseCmd::new(allocation.id)).await.unwrap();
    assert_eq!(rest.status, AllocationStatus::Reversed);

    let reversals = engine.reversals_for(allocation.id).await.unwrap();
    assert_eq!(reversals.len(), 2);
    assert_eq!(reversals[0].amount, usd(2_500));
    assert_eq!(reversals[0].reason.as_deref(), Some("customer dispute"));
    assert_eq!(reversals[1].amount, usd(3_500));

    assert_eq!(engine.get_source(source.id).await.unwrap().remaining, usd(10_000));
    assert_eq!(engine.get_target(target.id).await.unwrap().outstanding, usd(10_000));
}

#[tokio::test]
async fn batch_is_all_or_nothing() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let first = invoice(&engine, usd(10_000)).await;
    let second = invoice(&engine, usd(10_000)).await;

    let err = engine
        .allocate_batch(
            BatchAllocateCmd::new()
                .item(source.id, first.id, usd(4_000))
                .item(source.id, second.id, usd(7_000)),
        )
        .await
        .unwrap_err();
    match &err {
        EngineError::BatchRejected { index, reason } => {
            assert_eq!(*index, 1);
            assert!(matches!(**reason, EngineError::InsufficientSourceBalance(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.root_kind(), ErrorKind::InsufficientSourceBalance);

    assert_eq!(engine.get_source(source.id).await.unwrap().remaining, usd(10_000));
    assert_eq!(engine.get_target(first.id).await.unwrap().outstanding, usd(10_000));
    assert!(
        engine
            .list_allocations_for_source(source.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn batch_applies_items_in_order_with_shared_id() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, usd(8_000)).await;

    let created = engine
        .allocate_batch(
            BatchAllocateCmd::new()
                .item(source.id, target.id, usd(5_000))
                .item(source.id, target.id, usd(3_000)),
        )
        .await
        .unwrap();
    assert_eq!(created.len(), 2);
    assert!(created[0].batch_id.is_some());
    assert_eq!(created[0].batch_id, created[1].batch_id);
    assert_eq!(created[1].batch_index, Some(1));

    assert_eq!(engine.get_source(source.id).await.unwrap().remaining, usd(2_000));
    assert_eq!(engine.get_target(target.id).await.unwrap().outstanding, usd(0));

    // The target is exhausted now, so a third item over it must fail.
    let err = engine
        .allocate_batch(BatchAllocateCmd::new().item(source.id, target.id, usd(1)))
        .await
        .unwrap_err();
    assert_eq!(err.root_kind(), ErrorKind::TargetOverAllocation);
}

#[tokio::test]
async fn concurrent_allocations_never_overdraw() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let first = invoice(&engine, usd(10_000)).await;
    let second = invoice(&engine, usd(10_000)).await;

    let (a, b) = tokio::join!(
        engine.allocate(AllocateCmd::new(source.id, first.id, usd(6_000))),
        engine.allocate(AllocateCmd::new(source.id, second.id, usd(6_000))),
    );

    let outcomes = [a, b];
    let ok = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok, 1);
    let failed = outcomes.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        failed,
        EngineError::InsufficientSourceBalance(_) | EngineError::Conflict(_)
    ));

    let source = engine.get_source(source.id).await.unwrap();
    assert_eq!(source.remaining, usd(4_000));
    assert_conserved(&engine, source.id).await;
}

#[tokio::test]
async fn idempotent_allocate_returns_first_result() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, usd(10_000)).await;

    let cmd = AllocateCmd::new(source.id, target.id, usd(1_000)).idempotency_key("req-1");
    let first = engine.allocate(cmd.clone()).await.unwrap();
    let second = engine.allocate(cmd).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(engine.get_source(source.id).await.unwrap().remaining, usd(9_000));

    let err = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(2_000)).idempotency_key("req-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IdempotencyKeyReused(_)));
}

#[tokio::test]
async fn idempotent_batch_and_reverse() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, usd(10_000)).await;

    let batch = BatchAllocateCmd::new()
        .item(source.id, target.id, usd(1_000))
        .item(source.id, target.id, usd(2_000))
        .idempotency_key("batch-1");
    let first = engine.allocate_batch(batch.clone()).await.unwrap();
    let replay = engine.allocate_batch(batch).await.unwrap();
    assert_eq!(
        first.iter().map(|a| a.id).collect::<Vec<_>>(),
        replay.iter().map(|a| a.id).collect::<Vec<_>>()
    );
    assert_eq!(engine.get_source(source.id).await.unwrap().remaining, usd(7_000));

    let reverse = ReverseCmd::new(first[0].id).idempotency_key("rev-1");
    engine.reverse(reverse.clone()).await.unwrap();
    engine.reverse(reverse).await.unwrap();
    assert_eq!(engine.reversals_for(first[0].id).await.unwrap().len(), 1);
    assert_eq!(engine.get_source(source.id).await.unwrap().remaining, usd(8_000));
}

#[tokio::test]
async fn single_and_batch_keys_do_not_collide() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, usd(10_000)).await;

    let single = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(1_000)).idempotency_key("k#0"))
        .await
        .unwrap();
    let batch = engine
        .allocate_batch(
            BatchAllocateCmd::new()
                .item(source.id, target.id, usd(1_000))
                .idempotency_key("k"),
        )
        .await
        .unwrap();

    assert_eq!(batch.len(), 1);
    assert_ne!(batch[0].id, single.id);
    assert!(batch[0].batch_id.is_some());
    assert_eq!(engine.get_source(source.id).await.unwrap().remaining, usd(8_000));
}

#[tokio::test]
async fn closed_target_rejects_allocation_but_accepts_reversal() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, usd(10_000)).await;
    let allocation = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(1_000)))
        .await
        .unwrap();

    engine.close_target(target.id).await.unwrap();
    let err = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(1_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TargetClosed(_)));

    engine.reverse(ReverseCmd::new(allocation.id)).await.unwrap();
    let target = engine.get_target(target.id).await.unwrap();
    assert!(target.is_closed());
    assert_eq!(target.outstanding, usd(10_000));

    let reopened = engine.reopen_target(target.id).await.unwrap();
    assert!(!reopened.is_closed());
    engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(1_000)))
        .await
        .unwrap();
}

#[tokio::test]
async fn void_requires_no_active_allocations() {
    let (engine, _db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, usd(10_000)).await;
    let allocation = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(1_000)))
        .await
        .unwrap();

    let err = engine.void_source(source.id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, EngineError::SourceHasActiveAllocations(_)));

    engine.reverse(ReverseCmd::new(allocation.id)).await.unwrap();
    let voided = engine.void_source(source.id, Utc::now()).await.unwrap();
    assert!(voided.is_voided());

    let err = engine.void_source(source.id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, EngineError::SourceClosed(_)));

    let err = engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(1_000)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SourceClosed(_)));
}

#[tokio::test]
async fn summary_and_reconcile_replay_allocations() {
    let (engine, db) = engine_with_db().await;
    let source = credit_note(&engine, usd(10_000)).await;
    let target = invoice(&engine, usd(10_000)).await;
    engine
        .allocate(AllocateCmd::new(source.id, target.id, usd(3_000)))
        .await
        .unwrap();

    let summary = engine.source_summary(source.id).await.unwrap();
    assert_eq!(summary.applied, usd(3_000));
    assert_eq!(summary.remaining, usd(7_000));
    assert_eq!(summary.active_allocations, 1);

    assert_eq!(engine.reconcile_balances().await.unwrap(), 0);

    let backend = db.get_database_backend();
    db.execute(Statement::from_sql_and_values(
        backend,
        "UPDATE allocation_sources SET remaining_minor = ? WHERE id = ?",
        vec![1_i64.into(), source.id.to_string().into()],
    ))
    .await
    .unwrap();

    // The summary replays from allocations, not the stored counter.
    let summary = engine.source_summary(source.id).await.unwrap();
    assert_eq!(summary.remaining, usd(7_000));
    assert_eq!(summary.source.remaining, usd(1));

    assert_eq!(engine.reconcile_balances().await.unwrap(), 1);
    assert_eq!(engine.get_source(source.id).await.unwrap().remaining, usd(7_000));
}

#[tokio::test]
async fn statistics_by_currency_and_converted() {
    let (engine, _db) = engine_with_db().await;
    let usd_note = credit_note(&engine, usd(10_000)).await;
    let usd_target = invoice(&engine, usd(10_000)).await;
    credit_note(&engine, Money::new(5_000, Currency::Eur)).await;
    engine
        .register_source(
            NewSource::new(SourceKind::CreditNote, usd(2_000))
                .issued_at(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()),
        )
        .await
        .unwrap();
    engine
        .allocate(AllocateCmd::new(usd_note.id, usd_target.id, usd(6_000)))
        .await
        .unwrap();

    let filter = SourceFilter {
        issued_from: Some(Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()),
        ..SourceFilter::default()
    };
    let rates = StaticRates::new().with_rate(Currency::Usd, Currency::Eur, Decimal::new(9, 1));
    let stats = engine
        .source_statistics(
            &filter,
            Some(Conversion {
                display: Currency::Eur,
                as_of: Utc::now(),
                rates: &rates,
            }),
        )
        .await
        .unwrap();

    assert_eq!(stats.breakdown.len(), 2);
    let usd_line = stats
        .breakdown
        .iter()
        .find(|line| line.currency == Currency::Usd)
        .unwrap();
    assert_eq!(usd_line.count, 1);
    assert_eq!(usd_line.applied, usd(6_000));
    assert_eq!(usd_line.remaining, usd(4_000));

    let converted = stats.converted.unwrap();
    assert_eq!(converted.total, Money::new(14_000, Currency::Eur));
    assert_eq!(converted.applied, Money::new(5_400, Currency::Eur));

    let err = engine
        .source_statistics(
            &filter,
            Some(Conversion {
                display: Currency::Gbp,
                as_of: Utc::now(),
                rates: &rates,
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RateUnavailable(_)));
}

#[tokio::test]
async fn listings_filter_by_kind_currency_and_period() {
    let (engine, _db) = engine_with_db().await;
    let march = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let april = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();

    let early = engine
        .register_source(NewSource::new(SourceKind::CreditNote, usd(1_000)).issued_at(march))
        .await
        .unwrap();
    let late = engine
        .register_source(
            NewSource::new(SourceKind::Payment, Money::new(2_000, Currency::Eur)).issued_at(april),
        )
        .await
        .unwrap();
    let voided = engine
        .register_source(NewSource::new(SourceKind::CreditNote, usd(500)).issued_at(april))
        .await
        .unwrap();
    engine.void_source(voided.id, april).await.unwrap();

    let all = engine.list_sources(&SourceFilter::default()).await.unwrap();
    assert_eq!(
        all.iter().map(|s| s.id).collect::<Vec<_>>(),
        vec![early.id, late.id]
    );

    let with_voided = SourceFilter {
        include_voided: true,
        ..SourceFilter::default()
    };
    assert_eq!(engine.list_sources(&with_voided).await.unwrap().len(), 3);

    let payments = SourceFilter {
        kind: Some(SourceKind::Payment),
        ..SourceFilter::default()
    };
    let found = engine.list_sources(&payments).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, late.id);

    let usd_in_march = SourceFilter {
        currency: Some(Currency::Usd),
        issued_from: Some(march),
        issued_to: Some(april),
        ..SourceFilter::default()
    };
    let found = engine.list_sources(&usd_in_march).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, early.id);

    invoice(&engine, usd(1_000)).await;
    engine
        .register_target(NewTarget::new(TargetKind::Project, usd(9_000)))
        .await
        .unwrap();
    assert_eq!(engine.list_targets(None).await.unwrap().len(), 2);
    let projects = engine.list_targets(Some(TargetKind::Project)).await.unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].kind, TargetKind::Project);
}
