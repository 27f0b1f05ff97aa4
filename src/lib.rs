// Library exports for the ARC backend core
// This file exposes modules and functions for library consumers

pub mod app;
pub mod app_config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod migrations;
pub mod models;
pub mod realtime;
pub mod schema;
pub mod services;
pub mod utils;

// Re-export commonly used types
pub use app::AppState;
pub use app_config::{AppConfig, CONFIG};
pub use db::{DieselPool, DieselDatabaseConfig};
pub use middleware::{auth_middleware, AuthenticatedSession};
pub use models::{Invite, Platform, PublicUser, Session, User};
pub use realtime::{Hub, SUBPROTOCOL};
pub use services::{
    AccessClaims, AccessTokenManager, InviteService, IssuedSession, LoginThrottle,
    SessionService, TokenHasher,
};
pub use utils::ApiError;

// Re-export handler route builders
pub use handlers::{auth_routes, protected_auth_routes, user_routes};

use std::sync::Arc;
use tracing::info;

// Library initialization function for external consumers and the binary
pub async fn initialize_app_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // Load environment
    dotenv::dotenv().ok();

    // Initialize config (loads all env vars ONCE)
    let config = app_config::config();

    // Initialize database pool
    info!("Initializing database pool...");
    let db_config = db::DieselDatabaseConfig::default();
    let diesel_pool = db::create_diesel_pool(db_config).await?;

    // Run embedded migrations if enabled
    if migrations::should_run_migrations() {
        info!("Running embedded migrations...");
        migrations::run_migrations()
            .await
            .map_err(|e| format!("Migration failed: {}", e))?;
    }

    // Token digests and signed access tokens
    let hasher = TokenHasher::from_config()?;
    let tokens = AccessTokenManager::from_config();

    // Services
    let sessions = Arc::new(SessionService::new(
        diesel_pool.clone(),
        hasher.clone(),
        tokens,
    ));
    let invites = Arc::new(InviteService::new(diesel_pool.clone(), hasher.clone()));
    let throttle = Arc::new(LoginThrottle::from_config());

    let captcha: Arc<dyn services::CaptchaVerifier> = if config.captcha.enabled {
        Arc::new(services::HttpCaptchaVerifier::new(
            config.captcha.verify_url.clone(),
            config.captcha.secret.clone(),
        ))
    } else {
        Arc::new(services::NoopCaptchaVerifier)
    };

    // Realtime gateway state
    let hub = Arc::new(Hub::new());
    let messages: Arc<dyn realtime::MessageStore> =
        Arc::new(realtime::PgMessageStore::new(diesel_pool.clone()));
    let membership: Arc<dyn realtime::MembershipStore> =
        Arc::new(realtime::PgMembershipStore::new(diesel_pool.clone()));

    Ok(AppState {
        config: Arc::new(config.clone()),
        diesel_pool,
        sessions,
        invites,
        throttle,
        captcha,
        hub,
        messages,
        membership,
        started_at: chrono::Utc::now(),
    })
}
