//! Database migrations for the review apps service.

pub use sea_orm_migration::prelude::*;

mod m2024_01_01_000001_create_hooks;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m2024_01_01_000001_create_hooks::Migration)]
    }
}
