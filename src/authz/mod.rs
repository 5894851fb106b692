//! Route-group authorization gates.
//!
//! Each gate authenticates the caller (via [`Principal`]) and then checks a
//! single domain permission code from the registry. Gates are stateless and
//! independent: holding any other code has no effect.

pub mod principal;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

pub use principal::Principal;

use crate::app::AppState;
use crate::errors::AppError;

pub const ROLE_MANAGEMENT: &str = "role_management";
pub const USER_MANAGEMENT: &str = "user_management";
pub const TASK_MANAGEMENT: &str = "task_management";

async fn gate(
    parts: &mut Parts,
    state: &AppState,
    permission: &str,
    denial: &str,
) -> Result<Principal, AppError> {
    let principal = Principal::from_request_parts(parts, state).await?;

    // The registry is validated at startup, so a missing name is a deployment
    // mistake, not a caller error.
    let code = state
        .permissions
        .code_for(permission)
        .ok_or_else(|| AppError::configuration(format!("permission '{permission}' not registered")))?;

    if !principal.has_code(code) {
        tracing::debug!(user_id = %principal.id, permission, "permission denied");
        return Err(AppError::forbidden(denial));
    }

    Ok(principal)
}

/// Gate for `/api/role` routes.
pub struct RoleManagement(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for RoleManagement {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        gate(parts, state, ROLE_MANAGEMENT, "insufficient permissions").await.map(Self)
    }
}

/// Gate for `/api/user` routes.
pub struct UserManagement(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for UserManagement {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        gate(parts, state, USER_MANAGEMENT, "insufficient permissions for user management")
            .await
            .map(Self)
    }
}

/// Gate for `/api/tasks` routes.
pub struct TaskManagement(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for TaskManagement {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        gate(parts, state, TASK_MANAGEMENT, "insufficient permissions for task management")
            .await
            .map(Self)
    }
}
