//! Create offer table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Offer::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Offer::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Offer::PartnerId).string_len(32).not_null())
                    .col(ColumnDef::new(Offer::Title).string_len(256).not_null())
                    .col(
                        ColumnDef::new(Offer::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Offer::QuantityTotal).integer().not_null())
                    .col(
                        ColumnDef::new(Offer::QuantityAvailable)
                            .integer()
                            .not_null()
                            .check(Expr::col(Offer::QuantityAvailable).gte(0)),
                    )
                    .col(ColumnDef::new(Offer::OriginalPrice).big_integer().not_null())
                    .col(ColumnDef::new(Offer::SmartPrice).big_integer().not_null())
                    .col(
                        ColumnDef::new(Offer::PickupStart)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Offer::PickupEnd)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Offer::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Offer::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(Offer::UpdatedAt).timestamp_with_time_zone())
                    .to_owned(),
            )
            .await?;

        // Index: partner_id (for partner dashboards)
        manager
            .create_index(
                Index::create()
                    .name("idx_offer_partner_id")
                    .table(Offer::Table)
                    .col(Offer::PartnerId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Offer::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Offer {
    Table,
    Id,
    PartnerId,
    Title,
    Status,
    QuantityTotal,
    QuantityAvailable,
    OriginalPrice,
    SmartPrice,
    PickupStart,
    PickupEnd,
    ExpiresAt,
    CreatedAt,
    UpdatedAt,
}
