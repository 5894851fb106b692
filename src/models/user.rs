use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Available,
    NotAvailable,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Available => "available",
            UserStatus::NotAvailable => "not_available",
        }
    }

    pub fn from_str(value: &str) -> Result<Self, AppError> {
        match value {
            "available" => Ok(UserStatus::Available),
            "not_available" => Ok(UserStatus::NotAvailable),
            other => Err(AppError::internal(format!("corrupt user status '{other}'"))),
        }
    }
}

/// Role summary embedded in user payloads, mirroring what assignment copied.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoleRef {
    pub id: Uuid,
    pub name: String,
    pub permissions: Vec<i64>,
}

/// Public user representation. Password hash and external-auth id never leave
/// the database layer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub picture: String,
    pub is_external_auth: bool,
    pub email_verified: bool,
    pub status: UserStatus,
    pub role: Option<RoleRef>,
    pub permissions: Vec<i64>,
    pub is_admin_created: bool,
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub external_auth_id: Option<String>,
    pub picture: String,
    pub is_external_auth: bool,
    pub email_verified: bool,
    pub status: String,
    pub role_id: Option<String>,
    pub permissions: String,
    pub is_admin_created: bool,
    pub must_change_password: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbUser {
    /// Builds the public view; `role` is the separately-fetched populated role.
    pub fn into_user(self, role: Option<RoleRef>) -> Result<User, AppError> {
        Ok(User {
            id: Uuid::parse_str(&self.id)
                .map_err(|err| AppError::internal(format!("corrupt user id '{}': {err}", self.id)))?,
            name: self.name,
            email: self.email,
            picture: self.picture,
            is_external_auth: self.is_external_auth,
            email_verified: self.email_verified,
            status: UserStatus::from_str(&self.status)?,
            role,
            permissions: serde_json::from_str(&self.permissions)
                .map_err(|err| AppError::internal(format!("corrupt user permissions: {err}")))?,
            is_admin_created: self.is_admin_created,
            must_change_password: self.must_change_password,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserCreateRequest {
    #[schema(example = "Ada Lovelace")]
    pub name: Option<String>,
    #[schema(example = "ada@example.com")]
    pub email: Option<String>,
    pub status: Option<UserStatus>,
    pub picture: Option<String>,
    #[serde(alias = "roleId")]
    pub role_id: Option<Uuid>,
    /// Absent -> admin-created account with an emailed temporary password.
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserUpdateRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub status: Option<UserStatus>,
    pub picture: Option<String>,
    /// Absent = untouched; null or "" = clear role and zero permissions;
    /// a uuid = reassign (re-copies the role's permission codes).
    #[serde(default, alias = "roleId", deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub role_id: Option<Option<String>>,
}

impl UserUpdateRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.status.is_none()
            && self.picture.is_none()
            && self.role_id.is_none()
    }
}

/// Keeps the outer Option as "field present", so `null` survives as Some(None).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    pub search: Option<String>,
    pub status: Option<UserStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(alias = "excludeSelf")]
    pub exclude_self: Option<bool>,
}

/// Reduced projection for the task-assignment picker.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AssignableUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub picture: String,
    pub status: UserStatus,
    pub role: Option<String>,
}
