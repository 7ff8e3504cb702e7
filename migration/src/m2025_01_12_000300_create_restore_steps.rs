//! Migration to create the restore_steps table.
//!
//! Steps are append-only; `(restore_operation_id, position)` is unique so the
//! recorded order is stable.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RestoreSteps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RestoreSteps::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(RestoreSteps::RestoreOperationId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(RestoreSteps::TenantId).uuid().not_null())
                    .col(ColumnDef::new(RestoreSteps::UserId).uuid().not_null())
                    .col(ColumnDef::new(RestoreSteps::Position).integer().not_null())
                    .col(ColumnDef::new(RestoreSteps::Name).text().not_null())
                    .col(
                        ColumnDef::new(RestoreSteps::Result)
                            .text()
                            .not_null()
                            .default("todo"),
                    )
                    .col(ColumnDef::new(RestoreSteps::Detail).text().null())
                    .col(
                        ColumnDef::new(RestoreSteps::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RestoreSteps::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_restore_steps_operation_id")
                            .from(RestoreSteps::Table, RestoreSteps::RestoreOperationId)
                            .to(RestoreOperations::Table, RestoreOperations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_restore_steps_operation_position")
                    .table(RestoreSteps::Table)
                    .col(RestoreSteps::RestoreOperationId)
                    .col(RestoreSteps::Position)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_restore_steps_operation_position")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(RestoreSteps::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum RestoreSteps {
    Table,
    Id,
    RestoreOperationId,
    TenantId,
    UserId,
    Position,
    Name,
    Result,
    Detail,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum RestoreOperations {
    Table,
    Id,
}
