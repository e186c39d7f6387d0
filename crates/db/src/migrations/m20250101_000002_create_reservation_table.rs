//! Create reservation table migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Reservation::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Reservation::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Reservation::CustomerId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Reservation::PartnerId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Reservation::OfferId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Reservation::Quantity)
                            .integer()
                            .not_null()
                            .check(Expr::col(Reservation::Quantity).gt(0)),
                    )
                    .col(
                        ColumnDef::new(Reservation::QrCode)
                            .string_len(16)
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Reservation::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Reservation::TotalPrice)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Reservation::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Reservation::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Reservation::PickedUpAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Reservation::CancelledAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Reservation::ForgivenessStatus)
                            .string_len(16)
                            .not_null()
                            .default("not_requested"),
                    )
                    .col(
                        ColumnDef::new(Reservation::ForgivenessRequestedAt)
                            .timestamp_with_time_zone(),
                    )
                    .col(ColumnDef::new(Reservation::ForgivenessReason).text())
                    .col(
                        ColumnDef::new(Reservation::ForgivenessDecidedAt)
                            .timestamp_with_time_zone(),
                    )
                    .col(ColumnDef::new(Reservation::ForgivenessMessage).text())
                    .col(ColumnDef::new(Reservation::UpdatedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reservation_offer")
                            .from(Reservation::Table, Reservation::OfferId)
                            .to(Offer::Table, Offer::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: (customer_id, status) (for the one-active-reservation rule and listings)
        manager
            .create_index(
                Index::create()
                    .name("idx_reservation_customer_status")
                    .table(Reservation::Table)
                    .col(Reservation::CustomerId)
                    .col(Reservation::Status)
                    .to_owned(),
            )
            .await?;

        // Index: partner_id (for forgiveness inbox)
        manager
            .create_index(
                Index::create()
                    .name("idx_reservation_partner_id")
                    .table(Reservation::Table)
                    .col(Reservation::PartnerId)
                    .to_owned(),
            )
            .await?;

        // Partial index for the missed-pickup sweep
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_reservation_active_expires_at
                ON reservation (expires_at)
                WHERE status = 'active';
                ",
            )
            .await?;

        // Partial index for forgiveness expiry
        manager
            .get_connection()
            .execute_unprepared(
                r"
                CREATE INDEX IF NOT EXISTS idx_reservation_forgiveness_pending
                ON reservation (forgiveness_requested_at)
                WHERE forgiveness_status = 'pending';
                ",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Reservation::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Reservation {
    Table,
    Id,
    CustomerId,
    PartnerId,
    OfferId,
    Quantity,
    QrCode,
    Status,
    TotalPrice,
    CreatedAt,
    ExpiresAt,
    PickedUpAt,
    CancelledAt,
    ForgivenessStatus,
    ForgivenessRequestedAt,
    ForgivenessReason,
    ForgivenessDecidedAt,
    ForgivenessMessage,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Offer {
    Table,
    Id,
}
