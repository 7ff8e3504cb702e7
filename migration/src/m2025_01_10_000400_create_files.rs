//! Migration to create the files table.
//!
//! A file row describes a blob in storage. `linked_entity_type` and
//! `linked_entity_id` are both null for orphaned files.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Files::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Files::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Files::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Files::UserId).uuid().not_null())
                    .col(ColumnDef::new(Files::Title).text().not_null())
                    .col(
                        ColumnDef::new(Files::OriginalPath)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Files::BlobKey).text().not_null())
                    .col(
                        ColumnDef::new(Files::MimeType)
                            .text()
                            .not_null()
                            .default("application/octet-stream"),
                    )
                    .col(
                        ColumnDef::new(Files::SizeBytes)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Files::Category).text().not_null())
                    .col(ColumnDef::new(Files::LinkedEntityType).text().null())
                    .col(ColumnDef::new(Files::LinkedEntityId).uuid().null())
                    .col(
                        ColumnDef::new(Files::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_files_tenant_id")
                            .from(Files::Table, Files::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_files_linked_entity")
                    .table(Files::Table)
                    .col(Files::LinkedEntityType)
                    .col(Files::LinkedEntityId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_files_tenant_user")
                    .table(Files::Table)
                    .col(Files::TenantId)
                    .col(Files::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_files_tenant_user").to_owned())
            .await?;

        manager
            .drop_index(Index::drop().name("idx_files_linked_entity").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Files::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Files {
    Table,
    Id,
    TenantId,
    UserId,
    Title,
    OriginalPath,
    BlobKey,
    MimeType,
    SizeBytes,
    Category,
    LinkedEntityType,
    LinkedEntityId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}
