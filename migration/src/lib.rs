//! Database migrations for the stockpile pipeline.
//!
//! One migration per table, applied in dependency order.

pub use sea_orm_migration::prelude::*;

mod m2024_01_01_000001_create_tenants;
mod m2025_01_10_000100_create_locations;
mod m2025_01_10_000200_create_areas;
mod m2025_01_10_000300_create_commodities;
mod m2025_01_10_000400_create_files;
mod m2025_01_12_000100_create_exports;
mod m2025_01_12_000200_create_restore_operations;
mod m2025_01_12_000300_create_restore_steps;
mod m2025_01_14_000100_create_concurrency_slots;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2024_01_01_000001_create_tenants::Migration),
            Box::new(m2025_01_10_000100_create_locations::Migration),
            Box::new(m2025_01_10_000200_create_areas::Migration),
            Box::new(m2025_01_10_000300_create_commodities::Migration),
            Box::new(m2025_01_10_000400_create_files::Migration),
            Box::new(m2025_01_12_000100_create_exports::Migration),
            Box::new(m2025_01_12_000200_create_restore_operations::Migration),
            Box::new(m2025_01_12_000300_create_restore_steps::Migration),
            Box::new(m2025_01_14_000100_create_concurrency_slots::Migration),
        ]
    }
}
