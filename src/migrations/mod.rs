// Migration orchestrator
// Embedded in the application binary for distroless container compatibility

pub mod diesel;

pub use diesel::run_migrations;

/// Whether embedded migrations should run at startup
pub fn should_run_migrations() -> bool {
    std::env::var("DISABLE_EMBEDDED_MIGRATIONS")
        .map(|v| v.to_lowercase() != "true")
        .unwrap_or(true)
}
