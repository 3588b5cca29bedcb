//! Test utilities for database-backed tests.
//!
//! Uses a tempfile-backed SQLite database per test: in-memory SQLite hands
//! each pooled connection its own empty database, so a real file is the
//! reliable option.

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
use tempfile::NamedTempFile;

/// Sets up a file-backed SQLite database with all migrations applied.
/// Keep the returned file handle alive for the duration of the test.
pub async fn setup_test_db() -> Result<(Arc<DatabaseConnection>, NamedTempFile)> {
    let db_file = NamedTempFile::new()?;
    let db_url = format!("sqlite:{}?mode=rwc", db_file.path().display());

    let db = Database::connect(db_url).await?;
    Migrator::up(&db, None).await?;

    Ok((Arc::new(db), db_file))
}
