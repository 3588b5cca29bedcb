//! Database migrations for the Integrations API.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_07_10_000100_create_integrations;
mod m2026_07_10_000200_create_token_records;
mod m2026_07_10_000300_create_authorization_states;
mod m2026_07_10_000400_create_consent_records;
mod m2026_07_10_000500_create_audit_entries;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_07_10_000100_create_integrations::Migration),
            Box::new(m2026_07_10_000200_create_token_records::Migration),
            Box::new(m2026_07_10_000300_create_authorization_states::Migration),
            Box::new(m2026_07_10_000400_create_consent_records::Migration),
            Box::new(m2026_07_10_000500_create_audit_entries::Migration),
        ]
    }
}
