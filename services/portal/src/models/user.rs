//! Account model and related payloads

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Account entity
///
/// Serialization includes the credential hash; it is used only for
/// the archive snapshot taken before an admin delete. API responses
/// go through [`UserResponse`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub is_approved: bool,
    pub membership_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Whether the account passes the login approval gate.
    /// Administrators are implicitly treated as approved.
    pub fn approval_granted(&self) -> bool {
        self.is_approved || self.is_admin
    }
}

/// New account payload; the password is hashed by the repository
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password: String,
}

/// Account representation returned by the API, without credential material
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub is_admin: bool,
    pub is_approved: bool,
    pub membership_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            is_admin: user.is_admin,
            is_approved: user.is_approved,
            membership_number: user.membership_number,
            created_at: user.created_at,
        }
    }
}

/// Archived account snapshot taken before an admin delete
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArchivedUser {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub deleted_by: Option<i64>,
    pub original_data: serde_json::Value,
    pub deleted_at: DateTime<Utc>,
}

/// Archive representation returned by the API, without the raw snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ArchivedUserResponse {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub deleted_by: Option<i64>,
    pub deleted_at: DateTime<Utc>,
}

impl From<ArchivedUser> for ArchivedUserResponse {
    fn from(archived: ArchivedUser) -> Self {
        ArchivedUserResponse {
            id: archived.id,
            user_id: archived.user_id,
            name: archived.name,
            email: archived.email,
            deleted_by: archived.deleted_by,
            deleted_at: archived.deleted_at,
        }
    }
}
