//! Migration to create the restore_operations table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(RestoreOperations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(RestoreOperations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(RestoreOperations::TenantId).uuid().not_null())
                    .col(ColumnDef::new(RestoreOperations::UserId).uuid().not_null())
                    .col(ColumnDef::new(RestoreOperations::ExportId).uuid().not_null())
                    .col(
                        ColumnDef::new(RestoreOperations::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(RestoreOperations::Options)
                            .json_binary()
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        ColumnDef::new(RestoreOperations::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(counter(RestoreOperations::LocationCount))
                    .col(counter(RestoreOperations::AreaCount))
                    .col(counter(RestoreOperations::CommodityCount))
                    .col(counter(RestoreOperations::ImageCount))
                    .col(counter(RestoreOperations::InvoiceCount))
                    .col(counter(RestoreOperations::ManualCount))
                    .col(
                        ColumnDef::new(RestoreOperations::BinaryDataSize)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(counter(RestoreOperations::ErrorCount))
                    .col(ColumnDef::new(RestoreOperations::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(RestoreOperations::LeaseExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RestoreOperations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(RestoreOperations::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(RestoreOperations::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_restore_operations_export_id")
                            .from(RestoreOperations::Table, RestoreOperations::ExportId)
                            .to(Exports::Table, Exports::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_restore_operations_tenant_id")
                            .from(RestoreOperations::Table, RestoreOperations::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_restore_operations_status_created_at")
                    .table(RestoreOperations::Table)
                    .col(RestoreOperations::Status)
                    .col(RestoreOperations::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_restore_operations_export_id")
                    .table(RestoreOperations::Table)
                    .col(RestoreOperations::ExportId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_restore_operations_export_id")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_restore_operations_status_created_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(RestoreOperations::Table).to_owned())
            .await
    }
}

fn counter(column: RestoreOperations) -> ColumnDef {
    ColumnDef::new(column)
        .integer()
        .not_null()
        .default(0)
        .to_owned()
}

#[derive(DeriveIden)]
enum RestoreOperations {
    Table,
    Id,
    TenantId,
    UserId,
    ExportId,
    Description,
    Options,
    Status,
    LocationCount,
    AreaCount,
    CommodityCount,
    ImageCount,
    InvoiceCount,
    ManualCount,
    BinaryDataSize,
    ErrorCount,
    ErrorMessage,
    LeaseExpiresAt,
    CreatedAt,
    StartedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum Exports {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
