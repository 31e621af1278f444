//! Initial schema.
//!
//! - `allocation_sources`: credit notes and payments with their `remaining`
//! - `allocation_targets`: invoices, expenses and projects with `outstanding`
//! - `allocations`: the ledger, one row per source -> target movement
//! - `allocation_reversals`: audit rows written by every reversal

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum AllocationSources {
    Table,
    Id,
    Kind,
    Reference,
    Currency,
    TotalMinor,
    RemainingMinor,
    Status,
    Version,
    IssuedAt,
    VoidedAt,
}

#[derive(Iden)]
enum AllocationTargets {
    Table,
    Id,
    Kind,
    Reference,
    Currency,
    AmountMinor,
    OutstandingMinor,
    Status,
    Version,
    CreatedAt,
}

#[derive(Iden)]
enum Allocations {
    Table,
    Id,
    SourceId,
    TargetId,
    AmountMinor,
    ReversedMinor,
    Currency,
    Status,
    CreatedAt,
    ReversedAt,
    IdempotencyKey,
    BatchId,
    BatchIndex,
    Note,
}

#[derive(Iden)]
enum AllocationReversals {
    Table,
    Id,
    AllocationId,
    AmountMinor,
    Currency,
    Reason,
    IdempotencyKey,
    CreatedAt,
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AllocationSources::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AllocationSources::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AllocationSources::Kind).string().not_null())
                    .col(ColumnDef::new(AllocationSources::Reference).string())
                    .col(ColumnDef::new(AllocationSources::Currency).string().not_null())
                    .col(
                        ColumnDef::new(AllocationSources::TotalMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AllocationSources::RemainingMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AllocationSources::Status).string().not_null())
                    .col(
                        ColumnDef::new(AllocationSources::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AllocationSources::IssuedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AllocationSources::VoidedAt).timestamp())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocation_sources-currency-issued_at")
                    .table(AllocationSources::Table)
                    .col(AllocationSources::Currency)
                    .col(AllocationSources::IssuedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AllocationTargets::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AllocationTargets::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AllocationTargets::Kind).string().not_null())
                    .col(ColumnDef::new(AllocationTargets::Reference).string())
                    .col(ColumnDef::new(AllocationTargets::Currency).string().not_null())
                    .col(
                        ColumnDef::new(AllocationTargets::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AllocationTargets::OutstandingMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AllocationTargets::Status).string().not_null())
                    .col(
                        ColumnDef::new(AllocationTargets::Version)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(AllocationTargets::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Allocations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Allocations::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Allocations::SourceId).string().not_null())
                    .col(ColumnDef::new(Allocations::TargetId).string().not_null())
                    .col(
                        ColumnDef::new(Allocations::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Allocations::ReversedMinor)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Allocations::Currency).string().not_null())
                    .col(ColumnDef::new(Allocations::Status).string().not_null())
                    .col(ColumnDef::new(Allocations::CreatedAt).timestamp().not_null())
                    .col(ColumnDef::new(Allocations::ReversedAt).timestamp())
                    .col(ColumnDef::new(Allocations::IdempotencyKey).string())
                    .col(ColumnDef::new(Allocations::BatchId).string())
                    .col(ColumnDef::new(Allocations::BatchIndex).integer())
                    .col(ColumnDef::new(Allocations::Note).string())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-allocations-source_id")
                            .from(Allocations::Table, Allocations::SourceId)
                            .to(AllocationSources::Table, AllocationSources::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-allocations-target_id")
                            .from(Allocations::Table, Allocations::TargetId)
                            .to(AllocationTargets::Table, AllocationTargets::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocations-source_id")
                    .table(Allocations::Table)
                    .col(Allocations::SourceId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocations-target_id")
                    .table(Allocations::Table)
                    .col(Allocations::TargetId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocations-batch_id")
                    .table(Allocations::Table)
                    .col(Allocations::BatchId)
                    .col(Allocations::BatchIndex)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocations-idempotency_key")
                    .table(Allocations::Table)
                    .col(Allocations::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AllocationReversals::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AllocationReversals::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AllocationReversals::AllocationId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AllocationReversals::AmountMinor)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AllocationReversals::Currency)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AllocationReversals::Reason).string())
                    .col(ColumnDef::new(AllocationReversals::IdempotencyKey).string())
                    .col(
                        ColumnDef::new(AllocationReversals::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk-allocation_reversals-allocation_id")
                            .from(AllocationReversals::Table, AllocationReversals::AllocationId)
                            .to(Allocations::Table, Allocations::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocation_reversals-allocation_id")
                    .table(AllocationReversals::Table)
                    .col(AllocationReversals::AllocationId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx-allocation_reversals-idempotency_key")
                    .table(AllocationReversals::Table)
                    .col(AllocationReversals::IdempotencyKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AllocationReversals::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Allocations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AllocationTargets::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AllocationSources::Table).to_owned())
            .await?;
        Ok(())
    }
}
