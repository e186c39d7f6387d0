//! Create points ledger tables migration.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(UserPoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserPoints::UserId)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(UserPoints::Balance)
                            .big_integer()
                            .not_null()
                            .default(0)
                            .check(Expr::col(UserPoints::Balance).gte(0)),
                    )
                    .col(
                        ColumnDef::new(UserPoints::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PointTransaction::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PointTransaction::Id)
                            .string_len(32)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PointTransaction::UserId)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PointTransaction::Change)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PointTransaction::Reason)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(ColumnDef::new(PointTransaction::ReferenceId).string_len(32))
                    .col(
                        ColumnDef::new(PointTransaction::BalanceBefore)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PointTransaction::BalanceAfter)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PointTransaction::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Index: user_id (for transaction history)
        manager
            .create_index(
                Index::create()
                    .name("idx_point_transaction_user_id")
                    .table(PointTransaction::Table)
                    .col(PointTransaction::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PointTransaction::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserPoints::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum UserPoints {
    Table,
    UserId,
    Balance,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PointTransaction {
    Table,
    Id,
    UserId,
    Change,
    Reason,
    ReferenceId,
    BalanceBefore,
    BalanceAfter,
    CreatedAt,
}
