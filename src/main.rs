// Module declarations
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

// Re-export CONFIG for use in other modules
pub use app_config::CONFIG;

use axum::{extract::DefaultBodyLimit, middleware as axum_middleware, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    app::AppState,
    db::mask_connection_string,
    handlers::{auth_routes, protected_auth_routes, user_routes},
    services::{
        AccessTokenManager, CaptchaVerifier, HttpCaptchaVerifier, InviteService, LoginThrottle,
        NoopCaptchaVerifier, SessionService, TokenHasher,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Handle version flag for container health checks - must be FIRST
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("arc-backend-core v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arc_backend_core=debug,axum=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize centralized config (loads all env vars ONCE)
    let config = crate::app_config::config();
    let bind_address = config.bind_address.clone();
    info!("Starting ARC backend core on {}", bind_address);
    info!(
        "Database URL: {}",
        mask_connection_string(&config.database.url)
    );

    // Initialize database pool
    let db_config = db::DieselDatabaseConfig::default();
    let diesel_pool = db::create_diesel_pool(db_config)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;

    // Run embedded migrations
    if crate::migrations::should_run_migrations() {
        crate::migrations::run_migrations()
            .await
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
    } else {
        info!("Embedded migrations disabled - using external migration scripts");
    }

    // Token digests; startup fails here when the keyed-mode policy is unmet
    let hasher = TokenHasher::from_config()?;
    let tokens = AccessTokenManager::from_config();

    let sessions = Arc::new(SessionService::new(
        diesel_pool.clone(),
        hasher.clone(),
        tokens,
    ));
    let invites = Arc::new(InviteService::new(diesel_pool.clone(), hasher.clone()));
    let throttle = Arc::new(LoginThrottle::from_config());

    let captcha: Arc<dyn CaptchaVerifier> = if config.captcha.enabled {
        info!("Captcha gate: ENABLED");
        Arc::new(HttpCaptchaVerifier::new(
            config.captcha.verify_url.clone(),
            config.captcha.secret.clone(),
        ))
    } else {
        Arc::new(NoopCaptchaVerifier)
    };

    let hub = Arc::new(realtime::Hub::new());
    let messages: Arc<dyn realtime::MessageStore> =
        Arc::new(realtime::PgMessageStore::new(diesel_pool.clone()));
    let membership: Arc<dyn realtime::MembershipStore> =
        Arc::new(realtime::PgMembershipStore::new(diesel_pool.clone()));

    // Create shared application state
    let app_state = AppState {
        config: Arc::new(config.clone()),
        diesel_pool: diesel_pool.clone(),
        sessions,
        invites,
        throttle,
        captcha,
        hub,
        messages,
        membership,
        started_at: chrono::Utc::now(),
    };

    // Expired-row sweeper
    services::spawn_sweeper(diesel_pool.clone(), config.sweep_interval_secs);

    // Build the application router
    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ws", get(realtime::ws_handler))
        .nest(
            "/auth",
            auth_routes().merge(protected_auth_routes(app_state.clone())),
        )
        .merge(user_routes(app_state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(middleware::cors_middleware))
                .layer(axum_middleware::from_fn(middleware::no_store_middleware))
                .layer(DefaultBodyLimit::max(config.max_body_bytes)),
        )
        .with_state(app_state);

    // Bind and serve with ConnectInfo for client IP resolution
    let addr: SocketAddr = bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
