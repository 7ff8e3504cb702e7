//! Migration to create the exports table.
//!
//! Exports are background jobs. Workers claim `pending` rows by flipping them
//! to `in_progress`, so the status/created_at index backs the claim query.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Exports::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Exports::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Exports::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Exports::UserId).uuid().not_null())
                    .col(ColumnDef::new(Exports::ExportType).text().not_null())
                    .col(
                        ColumnDef::new(Exports::IncludeFileData)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Exports::SelectedItems)
                            .json_binary()
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        ColumnDef::new(Exports::Description)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Exports::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(Exports::FilePath).text().null())
                    .col(ColumnDef::new(Exports::FileId).uuid().null())
                    .col(ColumnDef::new(Exports::FileSize).big_integer().null())
                    .col(count_column(Exports::LocationCount))
                    .col(count_column(Exports::AreaCount))
                    .col(count_column(Exports::CommodityCount))
                    .col(count_column(Exports::ImageCount))
                    .col(count_column(Exports::InvoiceCount))
                    .col(count_column(Exports::ManualCount))
                    .col(
                        ColumnDef::new(Exports::BinaryDataSize)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Exports::ErrorMessage).text().null())
                    .col(
                        ColumnDef::new(Exports::LeaseExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Exports::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Exports::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Exports::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_exports_tenant_id")
                            .from(Exports::Table, Exports::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_exports_status_created_at")
                    .table(Exports::Table)
                    .col(Exports::Status)
                    .col(Exports::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_exports_tenant_user")
                    .table(Exports::Table)
                    .col(Exports::TenantId)
                    .col(Exports::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_exports_tenant_user").to_owned())
            .await?;

        manager
            .drop_index(
                Index::drop()
                    .name("idx_exports_status_created_at")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Exports::Table).to_owned())
            .await
    }
}

fn count_column(column: Exports) -> ColumnDef {
    ColumnDef::new(column)
        .integer()
        .not_null()
        .default(0)
        .to_owned()
}

#[derive(DeriveIden)]
enum Exports {
    Table,
    Id,
    TenantId,
    UserId,
    ExportType,
    IncludeFileData,
    SelectedItems,
    Description,
    Status,
    FilePath,
    FileId,
    FileSize,
    LocationCount,
    AreaCount,
    CommodityCount,
    ImageCount,
    InvoiceCount,
    ManualCount,
    BinaryDataSize,
    ErrorMessage,
    LeaseExpiresAt,
    CreatedAt,
    CompletedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
