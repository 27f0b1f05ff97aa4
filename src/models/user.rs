// User and credential database models
// A user is a security principal with at least one of username/email;
// case-folded normalized columns carry the uniqueness constraints

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::schema::{user_credentials, users};
use crate::utils::{
    hash_password, is_valid_email, is_valid_username, new_id, normalize_email,
    normalize_username, PasswordError,
};

/// Errors for user operations
#[derive(thiserror::Error, Debug)]
pub enum UserError {
    #[error("Database error: {0}")]
    Database(diesel::result::Error),

    #[error("User not found")]
    NotFound,

    #[error("Conflict on {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Password hashing failed: {0}")]
    Password(#[from] PasswordError),
}

impl From<diesel::result::Error> for UserError {
    fn from(err: diesel::result::Error) -> Self {
        match &err {
            diesel::result::Error::NotFound => UserError::NotFound,
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                match info.constraint_name() {
                    Some("users_username_normalized_key") => {
                        UserError::Conflict("username".to_string())
                    },
                    Some("users_email_normalized_key") => UserError::Conflict("email".to_string()),
                    _ => UserError::Database(err),
                }
            },
            _ => UserError::Database(err),
        }
    }
}

/// User database model
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub username_normalized: Option<String>,
    pub email: Option<String>,
    pub email_normalized: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub email_verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
struct NewUser {
    id: String,
    username: Option<String>,
    username_normalized: Option<String>,
    email: Option<String>,
    email_normalized: Option<String>,
    display_name: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = user_credentials)]
struct NewCredential {
    user_id: String,
    password_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Inputs for creating a user
#[derive(Debug, Clone)]
pub struct NewUserSpec {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
    pub display_name: Option<String>,
}

/// The user projection returned on the wire (never includes credentials)
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub created_at: DateTime<Utc>,
    pub email_verified: bool,
}

impl User {
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            display_name: self.display_name.clone(),
            bio: self.bio.clone(),
            created_at: self.created_at,
            email_verified: self.email_verified_at.is_some(),
        }
    }

    /// Create a user with credential row in one transaction.
    /// Fails Conflict(username|email) on normalized-form uniqueness violations.
    pub async fn create(
        conn: &mut AsyncPgConnection,
        spec: NewUserSpec,
        now: DateTime<Utc>,
    ) -> Result<User, UserError> {
        let user_id = new_id();
        conn.transaction::<_, UserError, _>(|tx| {
            Box::pin(
                async move { User::insert_with_credential(tx, user_id, spec, now).await },
            )
        })
        .await
    }

    /// Insert user + credential rows using a pre-allocated id. Callers that
    /// need additional work in the same transaction (invite consumption)
    /// invoke this directly.
    pub async fn insert_with_credential(
        conn: &mut AsyncPgConnection,
        user_id: String,
        spec: NewUserSpec,
        now: DateTime<Utc>,
    ) -> Result<User, UserError> {
        let username = spec.username.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let email = spec.email.as_deref().map(str::trim).filter(|s| !s.is_empty());

        if username.is_none() && email.is_none() {
            return Err(UserError::InvalidInput(
                "at least one of username or email is required".to_string(),
            ));
        }
        if let Some(name) = username {
            if !is_valid_username(name) {
                return Err(UserError::InvalidInput("invalid username".to_string()));
            }
        }
        if let Some(addr) = email {
            if !is_valid_email(addr) {
                return Err(UserError::InvalidInput("invalid email".to_string()));
            }
        }
        if spec.password.is_empty() {
            return Err(UserError::InvalidInput("password is required".to_string()));
        }

        let password_hash = hash_password(&spec.password)?;

        let new_user = NewUser {
            id: user_id,
            username: username.map(str::to_string),
            username_normalized: username.map(normalize_username),
            email: email.map(str::to_string),
            email_normalized: email.map(normalize_email),
            display_name: spec.display_name.clone(),
            created_at: now,
        };

        let user: User = diesel::insert_into(users::table)
            .values(&new_user)
            .get_result(conn)
            .await?;

        let credential = NewCredential {
            user_id: user.id.clone(),
            password_hash,
            created_at: now,
            updated_at: now,
        };

        diesel::insert_into(user_credentials::table)
            .values(&credential)
            .execute(conn)
            .await?;

        Ok(user)
    }

    pub async fn find_by_id(
        conn: &mut AsyncPgConnection,
        user_id: &str,
    ) -> Result<User, UserError> {
        users::table
            .find(user_id)
            .select(User::as_select())
            .first(conn)
            .await
            .map_err(Into::into)
    }

    /// Case-insensitive auth lookup by username; returns the password verifier
    pub async fn find_auth_by_username(
        conn: &mut AsyncPgConnection,
        username: &str,
    ) -> Result<(User, String), UserError> {
        let normalized = normalize_username(username);
        users::table
            .inner_join(user_credentials::table)
            .filter(users::username_normalized.eq(&normalized))
            .select((User::as_select(), user_credentials::password_hash))
            .first(conn)
            .await
            .map_err(Into::into)
    }

    /// Case-insensitive auth lookup by email; returns the password verifier
    pub async fn find_auth_by_email(
        conn: &mut AsyncPgConnection,
        email: &str,
    ) -> Result<(User, String), UserError> {
        let normalized = normalize_email(email);
        users::table
            .inner_join(user_credentials::table)
            .filter(users::email_normalized.eq(&normalized))
            .select((User::as_select(), user_credentials::password_hash))
            .first(conn)
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: "01J0000000000000000000USER".to_string(),
            username: Some("Alice".to_string()),
            username_normalized: Some("alice".to_string()),
            email: Some("Alice@Example.com".to_string()),
            email_normalized: Some("alice@example.com".to_string()),
            display_name: Some("Alice".to_string()),
            bio: None,
            created_at: Utc::now(),
            email_verified_at: None,
        }
    }

    #[test]
    fn test_public_projection_hides_normalized_forms() {
        let user = sample_user();
        let public = user.to_public();

        let json = serde_json::to_value(&public).unwrap();
        assert_eq!(json["username"], "Alice");
        assert!(json.get("username_normalized").is_none());
        assert_eq!(json["email_verified"], false);
    }

    #[test]
    fn test_public_projection_reports_verification() {
        let mut user = sample_user();
        user.email_verified_at = Some(Utc::now());

        assert!(user.to_public().email_verified);
    }
}
