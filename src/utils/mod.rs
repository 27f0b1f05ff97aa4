// Utility modules for the ARC backend core

pub mod api_error;
pub mod client_ip;
pub mod ids;
pub mod password;
pub mod validation;

pub use api_error::ApiError;
pub use client_ip::resolve_client_ip;
pub use ids::{new_csrf_token, new_id, new_opaque_token, new_server_msg_id};
pub use password::{dummy_verify, hash_password, verify_password, PasswordError};
pub use validation::{
    is_valid_email, is_valid_username, normalize_email, normalize_username, trim_optional_field,
};
