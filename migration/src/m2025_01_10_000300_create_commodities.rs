//! Migration to create the commodities table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commodities::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Commodities::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Commodities::TenantId).uuid().not_null())
                    .col(ColumnDef::new(Commodities::UserId).uuid().not_null())
                    .col(ColumnDef::new(Commodities::AreaId).uuid().not_null())
                    .col(ColumnDef::new(Commodities::Name).text().not_null())
                    .col(
                        ColumnDef::new(Commodities::ShortName)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Commodities::CommodityType)
                            .text()
                            .not_null()
                            .default("other"),
                    )
                    .col(
                        ColumnDef::new(Commodities::Count)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(Commodities::Status)
                            .text()
                            .not_null()
                            .default("in_use"),
                    )
                    .col(ColumnDef::new(Commodities::OriginalPrice).double().null())
                    .col(
                        ColumnDef::new(Commodities::OriginalPriceCurrency)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(Commodities::SerialNumber).text().null())
                    .col(ColumnDef::new(Commodities::Comments).text().null())
                    .col(
                        ColumnDef::new(Commodities::Draft)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Commodities::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Commodities::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commodities_tenant_id")
                            .from(Commodities::Table, Commodities::TenantId)
                            .to(Tenants::Table, Tenants::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commodities_area_id")
                            .from(Commodities::Table, Commodities::AreaId)
                            .to(Areas::Table, Areas::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commodities_tenant_user_area")
                    .table(Commodities::Table)
                    .col(Commodities::TenantId)
                    .col(Commodities::UserId)
                    .col(Commodities::AreaId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_commodities_tenant_user_area")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(Commodities::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Commodities {
    Table,
    Id,
    TenantId,
    UserId,
    AreaId,
    Name,
    ShortName,
    CommodityType,
    Count,
    Status,
    OriginalPrice,
    OriginalPriceCurrency,
    SerialNumber,
    Comments,
    Draft,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tenants {
    Table,
    Id,
}

#[derive(DeriveIden)]
enum Areas {
    Table,
    Id,
}
