use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub permissions: Vec<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Raw row: uuid as canonical text, permission codes as a JSON array string.
#[derive(Debug, Clone, FromRow)]
pub struct DbRole {
    pub id: String,
    pub name: String,
    pub description: String,
    pub permissions: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = AppError;

    fn try_from(value: DbRole) -> Result<Self, Self::Error> {
        Ok(Role {
            id: Uuid::parse_str(&value.id)
                .map_err(|err| AppError::internal(format!("corrupt role id '{}': {err}", value.id)))?,
            name: value.name,
            description: value.description,
            permissions: serde_json::from_str(&value.permissions)
                .map_err(|err| AppError::internal(format!("corrupt role permissions: {err}")))?,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleCreateRequest {
    #[schema(example = "Project Admin")]
    pub name: Option<String>,
    #[schema(example = "Full access to role, user and task management")]
    pub description: Option<String>,
    #[schema(example = json!([1, 2, 3]))]
    pub permissions: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub permissions: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
pub struct RoleListQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(alias = "sortBy")]
    pub sort_by: Option<String>,
    #[serde(alias = "sortOrder")]
    pub sort_order: Option<String>,
}
