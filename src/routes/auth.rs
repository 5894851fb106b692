use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::Principal;
use crate::errors::{AppError, AppResult};
use crate::models::user::{DbUser, User};
use crate::models::ApiResponse;
use crate::routes::users::{load_user, populated_role};
use crate::utils::{hash_password, is_valid_email, normalize_email, utc_now, verify_password};

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "Auth",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered", body = AuthResponse),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<AuthResponse>>)> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("name is required"));
    }

    let email = normalize_email(&payload.email);
    if !is_valid_email(&email) {
        return Err(AppError::bad_request("invalid email format"));
    }
    ensure_email_available(&state.pool, &email, None).await?;

    let password_hash = hash_password(&payload.password)?;
    let now = utc_now();
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, picture, is_external_auth, email_verified, \
         status, role_id, permissions, is_admin_created, must_change_password, created_at, updated_at) \
         VALUES (?, ?, ?, ?, '', 0, 0, 'available', NULL, '[]', 0, 0, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(payload.name.trim())
    .bind(&email)
    .bind(password_hash)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    let db_user = fetch_user_by_id(&state.pool, user_id).await?;
    let user = db_user.into_user(None)?;
    let token = state.jwt.encode(user.id)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok(AuthResponse { token, user }).with_message("User registered successfully")),
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<AuthResponse>>> {
    let email = normalize_email(&payload.email);

    let db_user = sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.pool)
        .await?
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    // External-identity accounts have no local password.
    let password_hash = db_user
        .password_hash
        .as_deref()
        .ok_or_else(|| AppError::unauthorized("invalid credentials"))?;

    if !verify_password(&payload.password, password_hash)? {
        return Err(AppError::unauthorized("invalid credentials"));
    }

    let user_id = Uuid::parse_str(&db_user.id)
        .map_err(|err| AppError::internal(format!("corrupt user id: {err}")))?;
    let token = state.jwt.encode(user_id)?;
    let role = populated_role(&state.pool, db_user.role_id.as_deref()).await?;
    let user = db_user.into_user(role)?;

    Ok(Json(ApiResponse::ok(AuthResponse { token, user })))
}

#[utoipa::path(
    get,
    path = "/api/auth/profile",
    tag = "Auth",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearerAuth" = []))
)]
pub async fn profile(
    State(state): State<AppState>,
    principal: Principal,
) -> AppResult<Json<ApiResponse<User>>> {
    let user = load_user(&state.pool, principal.id).await?;
    Ok(Json(ApiResponse::ok(user)))
}

pub async fn ensure_email_available(
    pool: &SqlitePool,
    email: &str,
    exclude: Option<Uuid>,
) -> AppResult<()> {
    let count: i64 = match exclude {
        Some(id) => {
            sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ? AND id != ?")
                .bind(email)
                .bind(id.to_string())
                .fetch_one(pool)
                .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ?")
                .bind(email)
                .fetch_one(pool)
                .await?
        }
    };

    if count > 0 {
        return Err(AppError::conflict("email already in use"));
    }

    Ok(())
}

pub async fn fetch_user_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbUser> {
    sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE id = ?")
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))
}
