// Centralized configuration management for the ARC backend core
// Load ALL env vars ONCE at startup; secure defaults, fail fast on policy violations

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Global application configuration loaded once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    // For tests, load .env file first
    #[cfg(test)]
    dotenv::dotenv().ok();

    AppConfig::from_env().expect("Failed to load configuration")
});

/// Access the global configuration
pub fn config() -> &'static AppConfig {
    &CONFIG
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Server
    pub bind_address: String,
    pub environment: Environment,
    pub trust_proxy: bool,
    pub max_body_bytes: usize,
    pub cors_allowed_origins: Vec<String>,
    pub sweep_interval_secs: u64,
    pub require_email_verification: bool,

    // Nested sections
    pub database: DatabaseConfig,
    pub access_token: AccessTokenConfig,
    pub token_hash: TokenHashConfig,
    pub session: SessionConfig,
    pub throttle: ThrottleConfig,
    pub cookie: CookieConfig,
    pub captcha: CaptchaConfig,
    pub realtime: RealtimeConfig,
}

/// Environment type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Environment {
    Development,
    Test,
    Staging,
    Production,
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Environment::Development,
            "test" => Environment::Test,
            "staging" | "stage" => Environment::Staging,
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
    pub max_lifetime: u64,
}

/// Signed access-token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenConfig {
    pub secret: String,
    pub ttl_secs: u64,
    pub issuer: String,
    pub clock_skew_secs: u64,
}

/// Refresh/invite token digest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenHashConfig {
    pub secret: Option<String>,
    pub require_keyed: bool,
}

/// Session lifetime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub refresh_ttl_web_days: i64,
    pub refresh_ttl_native_days: i64,
    pub refresh_ttl_native_short_days: i64,
    pub default_ttl_days: i64,
    pub max_ttl_days: i64,
}

/// Login/refresh throttling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub login_ip_max: i64,
    pub login_ip_window_secs: i64,
    pub login_user_max: i64,
    pub login_user_window_secs: i64,
    pub short_threshold: i64,
    pub short_window_secs: i64,
    pub long_threshold: i64,
    pub long_window_secs: i64,
    pub severe_threshold: i64,
    pub severe_window_secs: i64,
    pub refresh_max: i64,
    pub refresh_window_secs: i64,
}

/// Web-cookie transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CookieConfig {
    pub enabled: bool,
    pub refresh_name: String,
    pub csrf_name: String,
    pub secure: bool,
    pub same_site: SameSitePolicy,
    pub domain: Option<String>,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

impl From<String> for SameSitePolicy {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "lax" => SameSitePolicy::Lax,
            "none" => SameSitePolicy::None,
            _ => SameSitePolicy::Strict,
        }
    }
}

/// Captcha gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaConfig {
    pub enabled: bool,
    pub verify_url: String,
    pub secret: String,
}

/// Realtime gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    pub allowed_origins: Vec<String>,
    pub require_origin: bool,
    pub require_auth: bool,
    pub require_membership: bool,
    pub token_query_param: String,
    pub token_cookie: Option<String>,
    pub max_token_len: usize,
    pub send_queue_capacity: usize,
    pub rate_limit_events: u32,
    pub rate_limit_window_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub heartbeat_timeout_secs: u64,
    pub read_idle_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub max_frame_bytes: usize,
    pub history_default_limit: i64,
    pub history_max_limit: i64,
    pub dev_insecure: bool,
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Helper function to get required env var
        let get_required = |key: &str| -> Result<String, ConfigError> {
            env::var(key).map_err(|_| ConfigError::MissingVar(key.to_string()))
        };

        // Helper function to get optional env var with default
        let get_or_default = |key: &str, default: &str| -> String {
            env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let parse_u64_or_default = |key: &str, default: &str| -> Result<u64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u64".to_string())
            })
        };

        let parse_i64_or_default = |key: &str, default: &str| -> Result<i64, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid i64".to_string())
            })
        };

        let parse_u32_or_default = |key: &str, default: &str| -> Result<u32, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid u32".to_string())
            })
        };

        let parse_usize_or_default = |key: &str, default: &str| -> Result<usize, ConfigError> {
            get_or_default(key, default).parse().map_err(|_| {
                ConfigError::InvalidValue(key.to_string(), "not a valid usize".to_string())
            })
        };

        let parse_bool_or_default = |key: &str, default: &str| -> bool {
            get_or_default(key, default).to_lowercase() == "true"
        };

        let split_csv = |raw: String| -> Vec<String> {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let environment = Environment::from(get_or_default("ENVIRONMENT", "development"));

        // Access-token secret validation
        let access_secret = get_required("ACCESS_TOKEN_SECRET")?;
        if access_secret.len() < 32 {
            return Err(ConfigError::InvalidValue(
                "ACCESS_TOKEN_SECRET".to_string(),
                "Secret must be at least 32 characters long".to_string(),
            ));
        }

        // Token-hash keyed-mode policy: when required, a short or absent
        // secret is a startup failure, never a silent fallback
        let token_hash_secret = env::var("TOKEN_HASH_SECRET").ok();
        let token_hash_require_keyed = parse_bool_or_default("TOKEN_HASH_REQUIRE_KEYED", "false");
        if token_hash_require_keyed {
            match &token_hash_secret {
                Some(secret) if secret.len() >= 32 => {},
                Some(secret) => {
                    return Err(ConfigError::InvalidValue(
                        "TOKEN_HASH_SECRET".to_string(),
                        format!(
                            "keyed token hashing requires at least 32 bytes (current: {})",
                            secret.len()
                        ),
                    ));
                },
                None => {
                    return Err(ConfigError::MissingVar("TOKEN_HASH_SECRET".to_string()));
                },
            }
        }

        let database = DatabaseConfig {
            url: get_required("DATABASE_URL")?,
            max_connections: parse_u32_or_default("DATABASE_MAX_CONNECTIONS", "50")?,
            min_connections: parse_u32_or_default("DATABASE_MIN_CONNECTIONS", "5")?,
            connect_timeout: parse_u64_or_default("DATABASE_CONNECT_TIMEOUT", "30")?,
            idle_timeout: parse_u64_or_default("DATABASE_IDLE_TIMEOUT", "600")?,
            max_lifetime: parse_u64_or_default("DATABASE_MAX_LIFETIME", "1800")?,
        };

        let access_token = AccessTokenConfig {
            secret: access_secret,
            ttl_secs: parse_u64_or_default("ACCESS_TOKEN_TTL_SECS", "900")?,
            issuer: get_or_default("ACCESS_TOKEN_ISSUER", "arc"),
            clock_skew_secs: parse_u64_or_default("ACCESS_CLOCK_SKEW_SECS", "30")?,
        };

        let token_hash = TokenHashConfig {
            secret: token_hash_secret,
            require_keyed: token_hash_require_keyed,
        };

        let session = SessionConfig {
            refresh_ttl_web_days: parse_i64_or_default("REFRESH_TTL_WEB_DAYS", "7")?,
            refresh_ttl_native_days: parse_i64_or_default("REFRESH_TTL_NATIVE_DAYS", "60")?,
            refresh_ttl_native_short_days: parse_i64_or_default(
                "REFRESH_TTL_NATIVE_SHORT_DAYS",
                "14",
            )?,
            default_ttl_days: parse_i64_or_default("SESSION_DEFAULT_TTL_DAYS", "30")?,
            max_ttl_days: parse_i64_or_default("SESSION_MAX_TTL_DAYS", "180")?,
        };

        let throttle = ThrottleConfig {
            login_ip_max: parse_i64_or_default("LOGIN_IP_MAX", "20")?,
            login_ip_window_secs: parse_i64_or_default("LOGIN_IP_WINDOW_SECS", "300")?,
            login_user_max: parse_i64_or_default("LOGIN_USER_MAX", "60")?,
            login_user_window_secs: parse_i64_or_default("LOGIN_USER_WINDOW_SECS", "3600")?,
            short_threshold: parse_i64_or_default("LOCKOUT_SHORT_THRESHOLD", "5")?,
            short_window_secs: parse_i64_or_default("LOCKOUT_SHORT_SECS", "300")?,
            long_threshold: parse_i64_or_default("LOCKOUT_LONG_THRESHOLD", "10")?,
            long_window_secs: parse_i64_or_default("LOCKOUT_LONG_SECS", "1800")?,
            severe_threshold: parse_i64_or_default("LOCKOUT_SEVERE_THRESHOLD", "20")?,
            severe_window_secs: parse_i64_or_default("LOCKOUT_SEVERE_SECS", "7200")?,
            refresh_max: parse_i64_or_default("REFRESH_RATE_MAX", "30")?,
            refresh_window_secs: parse_i64_or_default("REFRESH_RATE_WINDOW_SECS", "60")?,
        };

        // SameSite=None only makes sense on Secure cookies; force the pairing
        let same_site = SameSitePolicy::from(get_or_default("COOKIE_SAME_SITE", "strict"));
        let cookie_secure =
            parse_bool_or_default("COOKIE_SECURE", "true") || same_site == SameSitePolicy::None;

        let cookie = CookieConfig {
            enabled: parse_bool_or_default("COOKIE_AUTH_ENABLED", "false"),
            refresh_name: get_or_default("COOKIE_REFRESH_NAME", "arc_refresh"),
            csrf_name: get_or_default("COOKIE_CSRF_NAME", "arc_csrf"),
            secure: cookie_secure,
            same_site,
            domain: env::var("COOKIE_DOMAIN").ok(),
            path: get_or_default("COOKIE_PATH", "/"),
        };

        let captcha = CaptchaConfig {
            enabled: parse_bool_or_default("CAPTCHA_ENABLED", "false"),
            verify_url: get_or_default("CAPTCHA_VERIFY_URL", ""),
            secret: get_or_default("CAPTCHA_SECRET", ""),
        };

        let send_queue_capacity =
            parse_usize_or_default("WS_SEND_QUEUE_CAPACITY", "256")?.max(32);

        let realtime = RealtimeConfig {
            allowed_origins: split_csv(get_or_default("WS_ALLOWED_ORIGINS", "")),
            require_origin: parse_bool_or_default("WS_REQUIRE_ORIGIN", "true"),
            require_auth: parse_bool_or_default("WS_REQUIRE_AUTH", "true"),
            require_membership: parse_bool_or_default("WS_REQUIRE_MEMBERSHIP", "true"),
            token_query_param: get_or_default("WS_TOKEN_QUERY_PARAM", "access_token"),
            token_cookie: env::var("WS_TOKEN_COOKIE").ok(),
            max_token_len: parse_usize_or_default("WS_MAX_TOKEN_LEN", "8192")?,
            send_queue_capacity,
            rate_limit_events: parse_u32_or_default("WS_RATE_LIMIT_EVENTS", "120")?,
            rate_limit_window_secs: parse_u64_or_default("WS_RATE_LIMIT_WINDOW_SECS", "10")?,
            heartbeat_interval_secs: parse_u64_or_default("WS_HEARTBEAT_INTERVAL_SECS", "25")?,
            heartbeat_timeout_secs: parse_u64_or_default("WS_HEARTBEAT_TIMEOUT_SECS", "5")?,
            read_idle_timeout_secs: parse_u64_or_default("WS_READ_IDLE_TIMEOUT_SECS", "120")?,
            write_timeout_secs: parse_u64_or_default("WS_WRITE_TIMEOUT_SECS", "5")?,
            max_frame_bytes: parse_usize_or_default("WS_MAX_FRAME_BYTES", "65536")?,
            history_default_limit: parse_i64_or_default("WS_HISTORY_DEFAULT_LIMIT", "50")?,
            history_max_limit: parse_i64_or_default("WS_HISTORY_MAX_LIMIT", "200")?,
            dev_insecure: parse_bool_or_default("WS_DEV_INSECURE", "false"),
        };

        Ok(AppConfig {
            bind_address: get_or_default("BIND_ADDRESS", "0.0.0.0:8080"),
            environment,
            trust_proxy: parse_bool_or_default("TRUST_PROXY", "false"),
            max_body_bytes: parse_usize_or_default("MAX_BODY_BYTES", "1048576")?,
            cors_allowed_origins: split_csv(get_or_default("CORS_ALLOWED_ORIGINS", "")),
            sweep_interval_secs: parse_u64_or_default("SWEEP_INTERVAL_SECS", "3600")?,
            require_email_verification: parse_bool_or_default(
                "REQUIRE_EMAIL_VERIFICATION",
                "false",
            ),
            database,
            access_token,
            token_hash,
            session,
            throttle,
            cookie,
            captcha,
            realtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(
            Environment::from("production".to_string()),
            Environment::Production
        );
        assert_eq!(Environment::from("prod".to_string()), Environment::Production);
        assert_eq!(
            Environment::from("anything-else".to_string()),
            Environment::Development
        );
    }

    #[test]
    fn test_same_site_parsing() {
        assert_eq!(SameSitePolicy::from("lax".to_string()), SameSitePolicy::Lax);
        assert_eq!(SameSitePolicy::from("none".to_string()), SameSitePolicy::None);
        assert_eq!(
            SameSitePolicy::from("garbage".to_string()),
            SameSitePolicy::Strict
        );
    }
}
