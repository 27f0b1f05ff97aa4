// API-facing error handling with stable machine-readable codes
// Services return kind-tagged errors; this maps them onto the HTTP contract

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use thiserror::Error;

/// Request-level errors with stable wire codes
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Malformed JSON body")]
    InvalidJson,

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Session is not active")]
    SessionNotActive,

    #[error("Refresh token reuse detected")]
    RefreshReuseDetected,

    #[error("Missing or mismatched CSRF token")]
    CsrfInvalid,

    #[error("Captcha verification failed")]
    CaptchaInvalid,

    #[error("Email address is not verified")]
    EmailNotVerified,

    #[error("Conflict on {0}")]
    Conflict(String),

    #[error("Invite is not valid")]
    InvalidInvite,

    #[error("Too many attempts")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Too many refresh attempts")]
    RefreshRateLimited { retry_after_seconds: u64 },

    #[error("Internal server error")]
    ServerError,

    #[error("Server is busy")]
    ServerBusy,

    #[error("Database unavailable")]
    DbUnavailable,
}

/// Wire shape: {"error":{"code":"<stable_code>","message":"<human>"}}
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidJson | ApiError::InvalidRequest(_) | ApiError::InvalidInvite => {
                StatusCode::BAD_REQUEST
            },
            ApiError::InvalidCredentials
            | ApiError::Unauthorized
            | ApiError::SessionNotActive
            | ApiError::RefreshReuseDetected => StatusCode::UNAUTHORIZED,
            ApiError::CsrfInvalid | ApiError::CaptchaInvalid | ApiError::EmailNotVerified => {
                StatusCode::FORBIDDEN
            },
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::RateLimited { .. } | ApiError::RefreshRateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            },
            ApiError::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServerBusy | ApiError::DbUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::InvalidJson => "invalid_json",
            ApiError::InvalidRequest(_) => "invalid_request",
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::Unauthorized => "unauthorized",
            ApiError::SessionNotActive => "session_not_active",
            ApiError::RefreshReuseDetected => "refresh_reuse_detected",
            ApiError::CsrfInvalid => "csrf_invalid",
            ApiError::CaptchaInvalid => "captcha_invalid",
            ApiError::EmailNotVerified => "email_not_verified",
            ApiError::Conflict(_) => "conflict",
            ApiError::InvalidInvite => "invalid_invite",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::RefreshRateLimited { .. } => "refresh_rate_limited",
            ApiError::ServerError => "server_error",
            ApiError::ServerBusy => "server_busy",
            ApiError::DbUnavailable => "db_unavailable",
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited {
                retry_after_seconds,
            }
            | ApiError::RefreshRateLimited {
                retry_after_seconds,
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.to_string(),
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = self.retry_after() {
            if let Ok(value) = seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_and_code_table() {
        assert_eq!(
            ApiError::InvalidCredentials.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::InvalidCredentials.error_code(), "invalid_credentials");
        assert_eq!(ApiError::CsrfInvalid.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Conflict("username".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::InvalidInvite.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::RateLimited {
                retry_after_seconds: 60
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_retry_after_surfaces_only_on_throttle() {
        assert_eq!(
            ApiError::RateLimited {
                retry_after_seconds: 42
            }
            .retry_after(),
            Some(42)
        );
        assert_eq!(ApiError::InvalidCredentials.retry_after(), None);
    }
}
