// Health endpoint: database liveness plus process uptime

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::{app::AppState, db::check_diesel_health};

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut overall_healthy = true;
    let timestamp = chrono::Utc::now().to_rfc3339();
    let uptime_secs = (chrono::Utc::now() - state.started_at).num_seconds();

    let postgres_health = match check_diesel_health(&state.diesel_pool).await {
        Ok(_) => json!({
            "status": "healthy",
            "error": null
        }),
        Err(e) => {
            overall_healthy = false;
            json!({
                "status": "unhealthy",
                "error": format!("Database connection failed: {}", e)
            })
        },
    };

    let response = json!({
        "status": if overall_healthy { "healthy" } else { "degraded" },
        "service": "arc-backend-core",
        "timestamp": timestamp,
        "uptime_seconds": uptime_secs,
        "components": {
            "postgresql": postgres_health
        }
    });

    if overall_healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
