// Authentication handlers for the ARC backend core
// Login, refresh rotation, logout, invites, and the /me endpoint
//
// Request bodies are parsed strictly: unknown fields and trailing content
// are rejected, and every failure path on login emits an audit row. Every
// login failure returns the identical invalid_credentials body, and unknown
// identifiers still run a full dummy-hash verification.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use axum_extra::{
    extract::cookie::{Cookie, CookieJar, SameSite},
    headers::UserAgent,
    TypedHeader,
};
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::net::SocketAddr;
use validator::Validate;

use crate::{
    app::AppState,
    app_config::{AppConfig, SameSitePolicy},
    middleware::auth::AuthenticatedSession,
    models::{
        audit::{self, login_failure, AuditRecord, NewAuditRecord},
        invite::Invite,
        session::{DeviceInfo, Platform, Session, REASON_LOGOUT},
        user::{NewUserSpec, PublicUser, User, UserError},
    },
    services::{
        session::{IssuedSession, SessionServiceError},
        InviteServiceError,
    },
    utils::{
        dummy_verify, new_csrf_token, normalize_email, normalize_username, resolve_client_ip,
        verify_password, ApiError,
    },
};
use crate::services::token_hash::digest_eq;

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
    pub platform: Option<String>,
    pub captcha: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub remember_me: bool,
    pub platform: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateInviteRequest {
    pub expires_in_seconds: Option<i64>,
    pub max_uses: Option<i32>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RevokeInviteRequest {
    pub invite_id: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConsumeInviteRequest {
    pub invite_token: String,
    pub username: Option<String>,
    pub email: Option<String>,
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
    pub platform: Option<String>,
    pub captcha: Option<String>,
}

/// New-account passwords need 8..=128 chars with some mixture; existing
/// logins are never policed here
fn validate_password_strength(password: &str) -> Result<(), validator::ValidationError> {
    if password.chars().count() < 8 {
        return Err(validator::ValidationError::new("password_too_short"));
    }
    if password.chars().count() > 128 {
        return Err(validator::ValidationError::new("password_too_long"));
    }

    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_other = password.chars().any(|c| !c.is_alphabetic());
    if !has_letter || !has_other {
        return Err(validator::ValidationError::new("password_too_simple"));
    }

    Ok(())
}

/// Session bundle on the wire; refresh_token is omitted in cookie mode
#[derive(Debug, Serialize)]
pub struct SessionPayload {
    pub session_id: String,
    pub platform: String,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user: PublicUser,
    pub session: SessionPayload,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub session: SessionPayload,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct CreateInviteResponse {
    pub invite_id: String,
    pub invite_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ConsumeInviteResponse {
    pub user: PublicUser,
    pub session: SessionPayload,
    pub invite_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub current: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionInfo>,
}

// =============================================================================
// HELPERS
// =============================================================================

/// Strict JSON parsing: body size is capped by the router layer; unknown
/// fields fail via deny_unknown_fields; trailing content fails via end()
fn parse_strict<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    let mut de = serde_json::Deserializer::from_slice(body);
    let value = T::deserialize(&mut de).map_err(|_| ApiError::InvalidJson)?;
    de.end().map_err(|_| ApiError::InvalidJson)?;
    Ok(value)
}

/// Exactly one of username/email, normalized for throttling and lookup
fn resolve_identifier(
    username: Option<&str>,
    email: Option<&str>,
) -> Result<(String, bool), ApiError> {
    let username = username.map(str::trim).filter(|s| !s.is_empty());
    let email = email.map(str::trim).filter(|s| !s.is_empty());

    match (username, email) {
        (Some(name), None) => Ok((normalize_username(name), false)),
        (None, Some(addr)) => Ok((normalize_email(addr), true)),
        _ => Err(ApiError::InvalidRequest(
            "exactly one of username or email is required".to_string(),
        )),
    }
}

async fn write_audit(state: &AppState, record: NewAuditRecord) {
    match state.diesel_pool.get().await {
        Ok(mut conn) => {
            if let Err(e) = AuditRecord::insert(&mut conn, record).await {
                tracing::warn!("audit insert failed: {}", e);
            }
        },
        Err(e) => tracing::warn!("audit insert skipped, no connection: {}", e),
    }
}

fn audit_event(
    action: &str,
    user_id: Option<&str>,
    session_id: Option<&str>,
    ip: &str,
    user_agent: Option<&str>,
    meta: Option<serde_json::Value>,
    now: DateTime<Utc>,
) -> NewAuditRecord {
    NewAuditRecord {
        action: action.to_string(),
        user_id: user_id.map(str::to_string),
        session_id: session_id.map(str::to_string),
        created_at: now,
        ip: Some(ip.to_string()),
        user_agent: user_agent.map(str::to_string),
        meta,
    }
}

fn to_same_site(policy: &SameSitePolicy) -> SameSite {
    match policy {
        SameSitePolicy::Strict => SameSite::Strict,
        SameSitePolicy::Lax => SameSite::Lax,
        SameSitePolicy::None => SameSite::None,
    }
}

fn build_cookie(
    config: &AppConfig,
    name: String,
    value: String,
    http_only: bool,
    max_age_secs: i64,
) -> Cookie<'static> {
    let mut builder = Cookie::build((name, value))
        .path(config.cookie.path.clone())
        .secure(config.cookie.secure)
        .http_only(http_only)
        .same_site(to_same_site(&config.cookie.same_site))
        .max_age(time::Duration::seconds(max_age_secs));

    if let Some(domain) = &config.cookie.domain {
        builder = builder.domain(domain.clone());
    }

    builder.build()
}

/// Whether this request/platform combination rides the cookie transport
fn uses_cookie_transport(config: &AppConfig, platform: Platform) -> bool {
    config.cookie.enabled && platform == Platform::Web
}

/// Attach refresh + CSRF cookies and strip the refresh token from the body
fn apply_cookie_transport(
    config: &AppConfig,
    jar: CookieJar,
    session: &mut SessionPayload,
    now: DateTime<Utc>,
) -> CookieJar {
    let refresh_token = match session.refresh_token.take() {
        Some(token) => token,
        None => return jar,
    };

    let max_age = (session.refresh_expires_at - now).num_seconds().max(0);
    let refresh_cookie = build_cookie(
        config,
        config.cookie.refresh_name.clone(),
        refresh_token,
        true,
        max_age,
    );
    let csrf_cookie = build_cookie(
        config,
        config.cookie.csrf_name.clone(),
        new_csrf_token(),
        false,
        max_age,
    );

    jar.add(refresh_cookie).add(csrf_cookie)
}

/// Expire both auth cookies
fn clear_cookie_transport(config: &AppConfig, jar: CookieJar) -> CookieJar {
    let refresh = build_cookie(config, config.cookie.refresh_name.clone(), String::new(), true, -1);
    let csrf = build_cookie(config, config.cookie.csrf_name.clone(), String::new(), false, -1);
    jar.add(refresh).add(csrf)
}

fn session_payload(issued: IssuedSession) -> SessionPayload {
    SessionPayload {
        session_id: issued.session_id,
        platform: issued.platform,
        access_token: issued.access_token,
        access_expires_at: issued.access_expires_at,
        refresh_token: Some(issued.refresh_token),
        refresh_expires_at: issued.refresh_expires_at,
    }
}

/// Captcha gate: missing token, rejected token, and verifier failure all
/// surface the same captcha_invalid code
async fn enforce_captcha(
    state: &AppState,
    token: Option<&str>,
    client_ip: &str,
) -> Result<(), ApiError> {
    if !state.config.captcha.enabled {
        return Ok(());
    }

    let token = token.ok_or(ApiError::CaptchaInvalid)?;
    match state.captcha.verify(token, Some(client_ip)).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::CaptchaInvalid),
        Err(e) => {
            tracing::warn!("captcha verifier failed: {}", e);
            Err(ApiError::CaptchaInvalid)
        },
    }
}

// =============================================================================
// AUTHENTICATION HANDLERS
// =============================================================================

/// POST /auth/login - verify credentials and issue a session
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    user_agent: Option<TypedHeader<UserAgent>>,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let now = Utc::now();
    let ip = resolve_client_ip(&headers, addr, state.config.trust_proxy);
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.to_string());

    let request: LoginRequest = match parse_strict(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let (identifier, is_email) =
        match resolve_identifier(request.username.as_deref(), request.email.as_deref()) {
            Ok(resolved) => resolved,
            Err(e) => return e.into_response(),
        };
    let platform = Platform::from(request.platform.as_deref().unwrap_or("unknown"));

    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("no database connection for login: {}", e);
            return ApiError::DbUnavailable.into_response();
        },
    };

    // Progressive throttling: IP window first, then identifier lockout
    match state.throttle.check_login_ip(&mut conn, &ip, now).await {
        Ok(Some(retry)) => {
            return ApiError::RateLimited {
                retry_after_seconds: retry.seconds,
            }
            .into_response();
        },
        Ok(None) => {},
        Err(e) => {
            tracing::error!("login throttle check failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    }
    match state
        .throttle
        .check_login_identifier(&mut conn, &identifier, now)
        .await
    {
        Ok(Some(retry)) => {
            return ApiError::RateLimited {
                retry_after_seconds: retry.seconds,
            }
            .into_response();
        },
        Ok(None) => {},
        Err(e) => {
            tracing::error!("login throttle check failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    }

    if let Err(e) = enforce_captcha(&state, request.captcha.as_deref(), &ip).await {
        write_audit(
            &state,
            login_failure(&identifier, "captcha_invalid", None, &ip, user_agent.as_deref(), now),
        )
        .await;
        return e.into_response();
    }

    let lookup = if is_email {
        User::find_auth_by_email(&mut conn, &identifier).await
    } else {
        User::find_auth_by_username(&mut conn, &identifier).await
    };

    let (user, password_hash) = match lookup {
        Ok(found) => found,
        Err(UserError::NotFound) => {
            // Burn the same work as a real verification so unknown
            // identifiers are not distinguishable by response time
            dummy_verify(&request.password);
            write_audit(
                &state,
                login_failure(&identifier, "not_found", None, &ip, user_agent.as_deref(), now),
            )
            .await;
            return ApiError::InvalidCredentials.into_response();
        },
        Err(e) => {
            tracing::error!("login lookup failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    };

    match verify_password(&request.password, &password_hash) {
        Ok(true) => {},
        Ok(false) => {
            write_audit(
                &state,
                login_failure(
                    &identifier,
                    "bad_password",
                    Some(&user.id),
                    &ip,
                    user_agent.as_deref(),
                    now,
                ),
            )
            .await;
            return ApiError::InvalidCredentials.into_response();
        },
        Err(e) => {
            tracing::error!("password verification failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    }

    if state.config.require_email_verification
        && !(user.email.is_some() && user.email_verified_at.is_some())
    {
        write_audit(
            &state,
            login_failure(
                &identifier,
                "email_not_verified",
                Some(&user.id),
                &ip,
                user_agent.as_deref(),
                now,
            ),
        )
        .await;
        return ApiError::EmailNotVerified.into_response();
    }

    drop(conn);

    let device = DeviceInfo {
        user_agent: user_agent.clone(),
        client_ip: Some(ip.clone()),
    };
    let issued = match state
        .sessions
        .issue_session(&user.id, platform, request.remember_me, device, now)
        .await
    {
        Ok(issued) => issued,
        Err(e) => {
            tracing::error!("session issuance failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    };

    write_audit(
        &state,
        audit_event(
            audit::LOGIN_SUCCESS,
            Some(&user.id),
            Some(&issued.session_id),
            &ip,
            user_agent.as_deref(),
            Some(serde_json::json!({ "identifier": identifier })),
            now,
        ),
    )
    .await;

    let mut session = session_payload(issued);
    if uses_cookie_transport(&state.config, platform) {
        let jar = apply_cookie_transport(&state.config, jar, &mut session, now);
        return (
            jar,
            Json(LoginResponse {
                user: user.to_public(),
                session,
            }),
        )
            .into_response();
    }

    Json(LoginResponse {
        user: user.to_public(),
        session,
    })
    .into_response()
}

/// POST /auth/refresh - rotate a refresh token
pub async fn refresh_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    user_agent: Option<TypedHeader<UserAgent>>,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let now = Utc::now();
    let ip = resolve_client_ip(&headers, addr, state.config.trust_proxy);
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.to_string());

    let request: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        match parse_strict(&body) {
            Ok(request) => request,
            Err(e) => return e.into_response(),
        }
    };
    let platform = Platform::from(request.platform.as_deref().unwrap_or("unknown"));

    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("no database connection for refresh: {}", e);
            return ApiError::DbUnavailable.into_response();
        },
    };

    match state.throttle.check_refresh_ip(&mut conn, &ip, now).await {
        Ok(Some(retry)) => {
            return ApiError::RefreshRateLimited {
                retry_after_seconds: retry.seconds,
            }
            .into_response();
        },
        Ok(None) => {},
        Err(e) => {
            tracing::error!("refresh throttle check failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    }
    drop(conn);

    // Resolve the token: body first, then the cookie transport (which
    // demands a matching double-submit CSRF header)
    let mut via_cookie = false;
    let refresh_plain = match request.refresh_token {
        Some(token) if !token.is_empty() => token,
        _ if state.config.cookie.enabled => {
            let csrf_cookie = jar
                .get(&state.config.cookie.csrf_name)
                .map(|c| c.value().to_string());
            let csrf_header = headers
                .get("x-csrf-token")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            match (csrf_cookie, csrf_header) {
                (Some(cookie_value), Some(header_value))
                    if digest_eq(&cookie_value, &header_value) => {},
                _ => return ApiError::CsrfInvalid.into_response(),
            }

            match jar.get(&state.config.cookie.refresh_name) {
                Some(cookie) => {
                    via_cookie = true;
                    cookie.value().to_string()
                },
                None => {
                    return ApiError::InvalidRequest(
                        "refresh token not provided".to_string(),
                    )
                    .into_response();
                },
            }
        },
        _ => {
            return ApiError::InvalidRequest("refresh token not provided".to_string())
                .into_response();
        },
    };

    let issued = match state.sessions.rotate_refresh(&refresh_plain, now).await {
        Ok(issued) => issued,
        Err(SessionServiceError::RefreshReuseDetected) => {
            write_audit(
                &state,
                audit_event(
                    audit::REFRESH_REUSE_DETECTED,
                    None,
                    None,
                    &ip,
                    user_agent.as_deref(),
                    None,
                    now,
                ),
            )
            .await;
            return ApiError::RefreshReuseDetected.into_response();
        },
        Err(
            SessionServiceError::SessionRevoked
            | SessionServiceError::SessionExpired
            | SessionServiceError::SessionNotFound,
        ) => {
            write_audit(
                &state,
                audit_event(
                    audit::REFRESH_FAILED,
                    None,
                    None,
                    &ip,
                    user_agent.as_deref(),
                    Some(serde_json::json!({ "reason": "not_active" })),
                    now,
                ),
            )
            .await;
            return ApiError::SessionNotActive.into_response();
        },
        Err(e) => {
            tracing::error!("refresh rotation failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    };

    write_audit(
        &state,
        audit_event(
            audit::REFRESH_SUCCESS,
            Some(&issued.user_id),
            Some(&issued.session_id),
            &ip,
            user_agent.as_deref(),
            None,
            now,
        ),
    )
    .await;

    let mut session = session_payload(issued);
    if via_cookie || uses_cookie_transport(&state.config, platform) {
        let jar = apply_cookie_transport(&state.config, jar, &mut session, now);
        return (jar, Json(RefreshResponse { session })).into_response();
    }

    Json(RefreshResponse { session }).into_response()
}

/// POST /auth/logout - revoke the calling session
pub async fn logout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    user_agent: Option<TypedHeader<UserAgent>>,
    auth: AuthenticatedSession,
    jar: CookieJar,
) -> Response {
    let now = Utc::now();
    let ip = resolve_client_ip(&headers, addr, state.config.trust_proxy);
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.to_string());

    if let Err(e) = state
        .sessions
        .revoke_session(&auth.session_id, REASON_LOGOUT, now)
        .await
    {
        tracing::error!("logout revocation failed: {}", e);
        return ApiError::ServerError.into_response();
    }

    write_audit(
        &state,
        audit_event(
            audit::LOGOUT,
            Some(&auth.user_id),
            Some(&auth.session_id),
            &ip,
            user_agent.as_deref(),
            None,
            now,
        ),
    )
    .await;

    if state.config.cookie.enabled {
        let jar = clear_cookie_transport(&state.config, jar);
        return (jar, StatusCode::NO_CONTENT).into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

/// POST /auth/logout_all - revoke every session of the calling user
pub async fn logout_all(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    user_agent: Option<TypedHeader<UserAgent>>,
    auth: AuthenticatedSession,
    jar: CookieJar,
) -> Response {
    let now = Utc::now();
    let ip = resolve_client_ip(&headers, addr, state.config.trust_proxy);
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.to_string());

    let revoked = match state.sessions.revoke_all(&auth.user_id, now).await {
        Ok(count) => count,
        Err(e) => {
            tracing::error!("logout_all revocation failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    };

    write_audit(
        &state,
        audit_event(
            audit::LOGOUT_ALL,
            Some(&auth.user_id),
            Some(&auth.session_id),
            &ip,
            user_agent.as_deref(),
            Some(serde_json::json!({ "revoked": revoked })),
            now,
        ),
    )
    .await;

    if state.config.cookie.enabled {
        let jar = clear_cookie_transport(&state.config, jar);
        return (jar, StatusCode::NO_CONTENT).into_response();
    }
    StatusCode::NO_CONTENT.into_response()
}

/// GET /me - the calling user
pub async fn get_current_user(
    State(state): State<AppState>,
    auth: AuthenticatedSession,
) -> Response {
    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("no database connection for /me: {}", e);
            return ApiError::DbUnavailable.into_response();
        },
    };

    match User::find_by_id(&mut conn, &auth.user_id).await {
        Ok(user) => Json(MeResponse {
            user: user.to_public(),
        })
        .into_response(),
        Err(UserError::NotFound) => ApiError::Unauthorized.into_response(),
        Err(e) => {
            tracing::error!("/me lookup failed: {}", e);
            ApiError::ServerError.into_response()
        },
    }
}

/// GET /auth/sessions - the caller's active sessions
pub async fn list_sessions(
    State(state): State<AppState>,
    auth: AuthenticatedSession,
) -> Response {
    let now = Utc::now();
    let sessions = match state.sessions.list_sessions(&auth.user_id, now).await {
        Ok(sessions) => sessions,
        Err(e) => {
            tracing::error!("session listing failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    };

    let sessions = sessions
        .into_iter()
        .map(|s: Session| SessionInfo {
            current: s.id == auth.session_id,
            session_id: s.id,
            platform: s.platform,
            created_at: s.created_at,
            last_used_at: s.last_used_at,
            expires_at: s.expires_at,
        })
        .collect();

    Json(SessionsResponse { sessions }).into_response()
}

// =============================================================================
// INVITE HANDLERS
// =============================================================================

/// POST /auth/invites/create - mint an invite token (shown exactly once)
pub async fn create_invite(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    user_agent: Option<TypedHeader<UserAgent>>,
    auth: AuthenticatedSession,
    body: Bytes,
) -> Response {
    let now = Utc::now();
    let ip = resolve_client_ip(&headers, addr, state.config.trust_proxy);
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.to_string());

    let request: CreateInviteRequest = if body.is_empty() {
        CreateInviteRequest::default()
    } else {
        match parse_strict(&body) {
            Ok(request) => request,
            Err(e) => return e.into_response(),
        }
    };

    let options = crate::services::CreateInviteOptions {
        expires_in: request.expires_in_seconds.map(Duration::seconds),
        max_uses: request.max_uses,
        note: crate::utils::trim_optional_field(request.note.as_ref()),
    };

    let (invite, token) = match state
        .invites
        .create_invite(Some(&auth.user_id), options, now)
        .await
    {
        Ok(created) => created,
        Err(InviteServiceError::InvalidInput(msg)) => {
            return ApiError::InvalidRequest(msg).into_response();
        },
        Err(e) => {
            tracing::error!("invite creation failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    };

    write_audit(
        &state,
        audit_event(
            audit::INVITE_CREATED,
            Some(&auth.user_id),
            Some(&auth.session_id),
            &ip,
            user_agent.as_deref(),
            Some(serde_json::json!({ "invite_id": invite.id, "max_uses": invite.max_uses })),
            now,
        ),
    )
    .await;

    Json(CreateInviteResponse {
        invite_id: invite.id,
        invite_token: token,
        expires_at: invite.expires_at,
    })
    .into_response()
}

/// POST /auth/invites/revoke - idempotent revocation by the creator
pub async fn revoke_invite(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    user_agent: Option<TypedHeader<UserAgent>>,
    auth: AuthenticatedSession,
    body: Bytes,
) -> Response {
    let now = Utc::now();
    let ip = resolve_client_ip(&headers, addr, state.config.trust_proxy);
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.to_string());

    let request: RevokeInviteRequest = match parse_strict(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    let mut conn = match state.diesel_pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!("no database connection for invite revoke: {}", e);
            return ApiError::DbUnavailable.into_response();
        },
    };

    match Invite::find_by_id(&mut conn, &request.invite_id).await {
        Ok(invite) if invite.created_by.as_deref() == Some(auth.user_id.as_str()) => {},
        Ok(_) | Err(crate::models::InviteError::NotFound) => {
            return ApiError::InvalidInvite.into_response();
        },
        Err(e) => {
            tracing::error!("invite lookup failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    }
    drop(conn);

    if let Err(e) = state.invites.revoke_invite(&request.invite_id, now).await {
        tracing::error!("invite revocation failed: {}", e);
        return ApiError::ServerError.into_response();
    }

    write_audit(
        &state,
        audit_event(
            audit::INVITE_REVOKED,
            Some(&auth.user_id),
            Some(&auth.session_id),
            &ip,
            user_agent.as_deref(),
            Some(serde_json::json!({ "invite_id": request.invite_id })),
            now,
        ),
    )
    .await;

    StatusCode::NO_CONTENT.into_response()
}

/// POST /auth/invites/consume - atomic signup: consume invite, create the
/// user, and issue the first session
pub async fn consume_invite(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    user_agent: Option<TypedHeader<UserAgent>>,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let now = Utc::now();
    let ip = resolve_client_ip(&headers, addr, state.config.trust_proxy);
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.to_string());

    let request: ConsumeInviteRequest = match parse_strict(&body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    if request.invite_token.is_empty() {
        return ApiError::InvalidRequest("invite_token is required".to_string()).into_response();
    }
    if request.validate().is_err() {
        return ApiError::InvalidRequest("password does not meet requirements".to_string())
            .into_response();
    }
    if let Err(e) = resolve_identifier(request.username.as_deref(), request.email.as_deref()) {
        return e.into_response();
    }
    let platform = Platform::from(request.platform.as_deref().unwrap_or("unknown"));

    if let Err(e) = enforce_captcha(&state, request.captcha.as_deref(), &ip).await {
        return e.into_response();
    }

    let spec = NewUserSpec {
        username: request.username,
        email: request.email,
        password: request.password,
        display_name: None,
    };
    let device = DeviceInfo {
        user_agent: user_agent.clone(),
        client_ip: Some(ip.clone()),
    };
    let session_ttl = state.sessions.refresh_ttl_for(platform, request.remember_me);

    let signup = match state
        .invites
        .consume_and_signup(&request.invite_token, spec, session_ttl, platform, device, now)
        .await
    {
        Ok(signup) => signup,
        Err(InviteServiceError::NotFound | InviteServiceError::NotActive) => {
            return ApiError::InvalidInvite.into_response();
        },
        Err(InviteServiceError::Conflict(field)) => {
            return ApiError::Conflict(field).into_response();
        },
        Err(InviteServiceError::InvalidInput(msg)) => {
            return ApiError::InvalidRequest(msg).into_response();
        },
        Err(e) => {
            tracing::error!("invite consumption failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    };

    let issued = match state
        .sessions
        .issued_from(&signup.session, signup.refresh_token, now)
    {
        Ok(issued) => issued,
        Err(e) => {
            tracing::error!("access token issuance failed: {}", e);
            return ApiError::ServerError.into_response();
        },
    };

    write_audit(
        &state,
        audit_event(
            audit::INVITE_CONSUMED,
            Some(&signup.user.id),
            Some(&issued.session_id),
            &ip,
            user_agent.as_deref(),
            Some(serde_json::json!({ "invite_id": signup.invite_id })),
            now,
        ),
    )
    .await;

    let mut session = session_payload(issued);
    if uses_cookie_transport(&state.config, platform) {
        let jar = apply_cookie_transport(&state.config, jar, &mut session, now);
        return (
            jar,
            Json(ConsumeInviteResponse {
                user: signup.user.to_public(),
                session,
                invite_id: signup.invite_id,
            }),
        )
            .into_response();
    }

    Json(ConsumeInviteResponse {
        user: signup.user.to_public(),
        session,
        invite_id: signup.invite_id,
    })
    .into_response()
}
