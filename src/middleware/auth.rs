// Authenticated request identity resolved from a bearer access token

use serde::{Deserialize, Serialize};

/// The (user, session) pair a validated access token resolves to.
/// Injected into request extensions by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedSession {
    pub user_id: String,
    pub session_id: String,
}
