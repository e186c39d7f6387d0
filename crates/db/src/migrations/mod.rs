//! Database migrations.
//!
//! Schema migrations for the database.

#![allow(missing_docs)]

use sea_orm_migration::prelude::*;

mod m20250101_000001_create_offer_table;
mod m20250101_000002_create_reservation_table;
mod m20250101_000003_create_penalty_tables;
mod m20250101_000004_create_points_tables;
mod m20250101_000005_create_notification_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_offer_table::Migration),
            Box::new(m20250101_000002_create_reservation_table::Migration),
            Box::new(m20250101_000003_create_penalty_tables::Migration),
            Box::new(m20250101_000004_create_points_tables::Migration),
            Box::new(m20250101_000005_create_notification_table::Migration),
        ]
    }
}
