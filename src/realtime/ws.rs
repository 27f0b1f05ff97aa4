// Websocket upgrade: origin enforcement, token resolution, subprotocol
//
// Origin and authentication are decided before the upgrade completes (403
// and 401 respectively). The arc.realtime.v1 subprotocol is required; a
// socket negotiated without it is closed with a protocol error.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use chrono::Utc;
use std::net::SocketAddr;
use tracing::{debug, warn};

use crate::app::AppState;
use crate::realtime::client::{run_connection, ConnIdentity};
use crate::realtime::envelope::SUBPROTOCOL;

const CLOSE_PROTOCOL_ERROR: u16 = 1002;

/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    jar: CookieJar,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    let limits = &state.config.realtime;

    if limits.require_origin {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok());
        match origin {
            Some(origin) if origin_allowed(origin, &limits.allowed_origins) => {},
            Some(origin) => {
                debug!("websocket origin denied: {}", origin);
                return StatusCode::FORBIDDEN.into_response();
            },
            None => {
                debug!("websocket origin header missing");
                return StatusCode::FORBIDDEN.into_response();
            },
        }
    }

    let identity = if limits.require_auth {
        let token = match resolve_token(&headers, &params, &jar, limits) {
            Some(token) => token,
            None => return StatusCode::UNAUTHORIZED.into_response(),
        };
        if token.len() > limits.max_token_len {
            return StatusCode::UNAUTHORIZED.into_response();
        }

        let now = Utc::now();
        let claims = match state.sessions.validate_access_token(&token, now).await {
            Ok(claims) => claims,
            Err(e) => {
                debug!("websocket auth rejected: {}", e);
                return StatusCode::UNAUTHORIZED.into_response();
            },
        };

        // Best-effort: a non-active session here already passed validation
        // a moment ago, so the result is deliberately ignored
        let _ = state.sessions.touch_session(&claims.sid, now).await;

        ConnIdentity {
            user_id: claims.sub,
            session_id: claims.sid,
        }
    } else {
        ConnIdentity {
            user_id: format!("dev-{}", addr.ip()),
            session_id: String::new(),
        }
    };

    ws.protocols([SUBPROTOCOL])
        .max_message_size(limits.max_frame_bytes)
        .max_frame_size(limits.max_frame_bytes)
        .on_upgrade(move |socket| handle_upgraded(socket, state, identity))
}

async fn handle_upgraded(mut socket: WebSocket, state: AppState, identity: ConnIdentity) {
    let negotiated = socket
        .protocol()
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if negotiated.as_deref() != Some(SUBPROTOCOL) {
        warn!("websocket subprotocol missing or mismatched: {:?}", negotiated);
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_PROTOCOL_ERROR,
                reason: "subprotocol required".into(),
            })))
            .await;
        return;
    }

    run_connection(socket, state, identity).await;
}

/// Access token from bearer header, configured query parameter, or
/// configured cookie, in that order
fn resolve_token(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    jar: &CookieJar,
    limits: &crate::app_config::RealtimeConfig,
) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    if let Some(token) = params.get(&limits.token_query_param) {
        if !token.is_empty() {
            return Some(token.clone());
        }
    }

    if let Some(cookie_name) = &limits.token_cookie {
        if let Some(cookie) = jar.get(cookie_name) {
            if !cookie.value().is_empty() {
                return Some(cookie.value().to_string());
            }
        }
    }

    None
}

/// Allow-list matching: exact origin string or host-only
fn origin_allowed(origin: &str, allowed: &[String]) -> bool {
    if allowed.iter().any(|entry| entry == origin) {
        return true;
    }

    let Ok(parsed) = url::Url::parse(origin) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };

    allowed.iter().any(|entry| entry == host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_exact_match() {
        let allowed = vec!["https://app.example.com".to_string()];
        assert!(origin_allowed("https://app.example.com", &allowed));
        assert!(!origin_allowed("https://evil.example.com", &allowed));
    }

    #[test]
    fn test_origin_host_only_match() {
        let allowed = vec!["app.example.com".to_string()];
        assert!(origin_allowed("https://app.example.com", &allowed));
        assert!(origin_allowed("http://app.example.com", &allowed));
        assert!(!origin_allowed("https://example.com", &allowed));
    }

    #[test]
    fn test_empty_allow_list_denies() {
        assert!(!origin_allowed("https://app.example.com", &[]));
    }
}
