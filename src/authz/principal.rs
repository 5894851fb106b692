use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sqlx::FromRow;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;

/// The authenticated caller: identity plus the permission snapshot that was
/// copied onto the user row at role-assignment time. Immutable for the
/// lifetime of the request; gates trust it without further database reads.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub email: String,
    pub permissions: Vec<i64>,
    pub role_id: Option<Uuid>,
}

impl Principal {
    pub fn has_code(&self, code: i64) -> bool {
        self.permissions.contains(&code)
    }
}

#[derive(Debug, FromRow)]
struct AuthRow {
    id: String,
    email: String,
    status: String,
    role_id: Option<String>,
    permissions: String,
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token)?;

        let row = sqlx::query_as::<_, AuthRow>(
            "SELECT id, email, status, role_id, permissions FROM users WHERE id = ?",
        )
        .bind(claims.sub.to_string())
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("user not found"))?;

        if row.status == "not_available" {
            return Err(AppError::account_inactive(
                "access denied: your account is currently suspended or inactive",
            ));
        }

        let id = Uuid::parse_str(&row.id)
            .map_err(|err| AppError::internal(format!("corrupt user id '{}': {err}", row.id)))?;
        let role_id = row
            .role_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()
            .map_err(|err| AppError::internal(format!("corrupt role id: {err}")))?;
        let permissions: Vec<i64> = serde_json::from_str(&row.permissions)
            .map_err(|err| AppError::internal(format!("corrupt user permissions: {err}")))?;

        Ok(Principal {
            id,
            email: row.email,
            permissions,
            role_id,
        })
    }
}
