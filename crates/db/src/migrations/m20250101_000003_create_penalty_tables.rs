//! Create penalty tables migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserPenalty::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserPenalty::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserPenalty::UserId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(UserPenalty::PenaltyType)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserPenalty::Reason).text().not_null())
                    .col(
                        ColumnDef::new(UserPenalty::ReservationId)
                            .string_len(32)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(UserPenalty::OfferId).string_len(32).not_null())
                    .col(
                        ColumnDef::new(UserPenalty::PartnerId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserPenalty::OffenseNumber)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserPenalty::EndsAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(UserPenalty::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(UserPenalty::Acknowledged)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(UserPenalty::LiftedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(UserPenalty::LiftReason).string_len(16))
                    .col(ColumnDef::new(UserPenalty::PointsSpent).big_integer())
                    .col(
                        ColumnDef::new(UserPenalty::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_user_penalty_reservation")
                            .from(UserPenalty::Table, UserPenalty::ReservationId)
                            .to(Reservation::Table, Reservation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Offense numbers are gapless per user
        manager
            .create_index(
                Index::create()
                    .name("idx_user_penalty_user_offense")
                    .table(UserPenalty::Table)
                    .col(UserPenalty::UserId)
                    .col(UserPenalty::OffenseNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: (user_id, is_active) (for the blocked check)
        manager
            .create_index(
                Index::create()
                    .name("idx_user_penalty_user_active")
                    .table(UserPenalty::Table)
                    .col(UserPenalty::UserId)
                    .col(UserPenalty::IsActive)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PenaltyOffenseHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PenaltyOffenseHistory::UserId)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PenaltyOffenseHistory::OffenseCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PenaltyOffenseHistory::TotalPenaltiesReceived)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PenaltyOffenseHistory::LastOffenseAt)
                            .timestamp_with_time_zone(),
                    )
                    .col(
                        ColumnDef::new(PenaltyOffenseHistory::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PenaltyOffenseHistory::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserPenalty::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserPenalty {
    Table,
    Id,
    UserId,
    PenaltyType,
    Reason,
    ReservationId,
    OfferId,
    PartnerId,
    OffenseNumber,
    EndsAt,
    IsActive,
    Acknowledged,
    LiftedAt,
    LiftReason,
    PointsSpent,
    CreatedAt,
}

#[derive(DeriveIden)]
enum PenaltyOffenseHistory {
    Table,
    UserId,
    OffenseCount,
    TotalPenaltiesReceived,
    LastOffenseAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Reservation {
    Table,
    Id,
}
