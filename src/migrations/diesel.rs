// Diesel migration runner for PostgreSQL
// Uses embedded migrations from diesel_migrations crate
// Note: diesel_migrations requires sync connections, not async

use crate::db::diesel_pool::MIGRATIONS;
use diesel::Connection;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use std::error::Error;
use tracing::{debug, info};

/// Run all pending Diesel migrations
/// Returns the number of migrations applied
pub async fn run_migrations() -> Result<usize, Box<dyn Error + Send + Sync>> {
    let config = crate::app_config::config();
    info!(
        "Starting migration process (environment: {})...",
        config.environment
    );

    // Migrations need a sync connection; run them on the blocking pool
    let database_url = config.database.url.clone();

    let applied_migrations =
        tokio::task::spawn_blocking(move || -> Result<usize, Box<dyn Error + Send + Sync>> {
            debug!("Establishing sync connection for migrations...");

            let mut conn = PgConnection::establish(&database_url)
                .map_err(|e| format!("Failed to establish sync connection: {}", e))?;

            let pending = conn
                .pending_migrations(MIGRATIONS)
                .map_err(|e| format!("Failed to check pending migrations: {}", e))?;

            if pending.is_empty() {
                info!("No pending migrations");
                return Ok(0);
            }

            let count = pending.len();
            for migration in &pending {
                info!("Applying migration: {}", migration.name());
            }

            conn.run_pending_migrations(MIGRATIONS)
                .map_err(|e| format!("Failed to run migrations: {}", e))?;

            Ok(count)
        })
        .await
        .map_err(|e| format!("Migration task panicked: {}", e))??;

    info!("Applied {} migration(s)", applied_migrations);
    Ok(applied_migrations)
}
