// Application state and configuration
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    app_config::AppConfig,
    db::DieselPool,
    realtime::hub::Hub,
    realtime::store::{MembershipStore, MessageStore},
    services::{CaptchaVerifier, InviteService, LoginThrottle, SessionService},
};

// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: DieselPool,
    pub sessions: Arc<SessionService>,
    pub invites: Arc<InviteService>,
    pub throttle: Arc<LoginThrottle>,
    pub captcha: Arc<dyn CaptchaVerifier>,
    pub hub: Arc<Hub>,
    pub messages: Arc<dyn MessageStore>,
    pub membership: Arc<dyn MembershipStore>,
    pub started_at: DateTime<Utc>,
}
