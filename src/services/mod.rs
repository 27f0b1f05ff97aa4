// Services module for the ARC backend core
// Business logic layer over the database models

pub mod access_token;
pub mod captcha;
pub mod invite;
pub mod login_throttle;
pub mod session;
pub mod sweeper;
pub mod token_hash;

// Re-export commonly used services
pub use access_token::{AccessClaims, AccessTokenError, AccessTokenManager};
pub use captcha::{CaptchaError, CaptchaVerifier, HttpCaptchaVerifier, NoopCaptchaVerifier};
pub use invite::{CreateInviteOptions, InviteService, InviteServiceError};
pub use login_throttle::{LoginThrottle, RetryAfter, ThrottleError};
pub use session::{IssuedSession, SessionService, SessionServiceError};
pub use sweeper::spawn_sweeper;
pub use token_hash::{digest_eq, TokenHasher, TokenHashError, DIGEST_HEX_LEN};
