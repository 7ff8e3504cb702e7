//! Migration to create the concurrency slot tables.
//!
//! `concurrency_slots` holds one row per active slot with its expiry.
//! `concurrency_slot_guards` holds one row per (user, operation) that admission
//! locks to serialise concurrent starts.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ConcurrencySlots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConcurrencySlots::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ConcurrencySlots::UserId).uuid().not_null())
                    .col(ColumnDef::new(ConcurrencySlots::Operation).text().not_null())
                    .col(
                        ColumnDef::new(ConcurrencySlots::AcquiredAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ConcurrencySlots::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_concurrency_slots_user_operation_expires")
                    .table(ConcurrencySlots::Table)
                    .col(ConcurrencySlots::UserId)
                    .col(ConcurrencySlots::Operation)
                    .col(ConcurrencySlots::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ConcurrencySlotGuards::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConcurrencySlotGuards::UserId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConcurrencySlotGuards::Operation)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConcurrencySlotGuards::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(ConcurrencySlotGuards::UserId)
                            .col(ConcurrencySlotGuards::Operation),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConcurrencySlotGuards::Table).to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_concurrency_slots_user_operation_expires")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(ConcurrencySlots::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ConcurrencySlots {
    Table,
    Id,
    UserId,
    Operation,
    AcquiredAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
enum ConcurrencySlotGuards {
    Table,
    UserId,
    Operation,
    CreatedAt,
}
