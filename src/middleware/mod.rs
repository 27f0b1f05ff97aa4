// Middleware modules for the ARC backend core

pub mod auth;
pub mod auth_middleware;
pub mod cors;

pub use auth::AuthenticatedSession;
pub use auth_middleware::auth_middleware;
pub use cors::{cors_middleware, no_store_middleware};
